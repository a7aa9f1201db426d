use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use checklist::config::{self, RollupScope, Settings};
use checklist::core::{Position, Selection};
use checklist::propagator::{self, Outcome};
use checklist::tree::{self, ChecklistNode};
use checklist::{Document, TextDocument};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "checklist",
    about = "Toggle nested checkboxes in plain-text checklists",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    /// Settings file; defaults to the nearest .checklist.toml above the input.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Toggle the checkbox (or recount the summary) at a position.
    Toggle(ToggleArgs),

    /// Print the checklist tree inferred from indentation.
    Tree(TreeArgs),
}

#[derive(Debug, Args)]
struct ToggleArgs {
    /// Text file containing the checklist.
    input: PathBuf,
    /// 1-based line of the caret.
    #[arg(long)]
    line: usize,
    /// 1-based column of the caret.
    #[arg(long)]
    column: usize,
    /// Overwrite the file instead of printing to stdout.
    #[arg(long)]
    in_place: bool,
    /// Print the planned edit batch as JSON without applying it.
    #[arg(long, conflicts_with = "in_place")]
    json: bool,
    /// How far counts are rolled up after a toggle.
    #[arg(long, value_enum)]
    rollup: Option<RollupArg>,
    /// Glyph written into checked boxes.
    #[arg(long, value_enum)]
    glyph: Option<GlyphArg>,
}

#[derive(Debug, Args)]
struct TreeArgs {
    /// Text file containing the checklist.
    input: PathBuf,
    /// Emit JSON instead of an indented outline.
    #[arg(long)]
    json: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum RollupArg {
    Parent,
    Ancestors,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum GlyphArg {
    #[value(name = "x")]
    Lower,
    #[value(name = "X")]
    Upper,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Toggle(args) => handle_toggle(args, config),
        Commands::Tree(args) => handle_tree(args),
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn handle_toggle(args: ToggleArgs, config: Option<&Path>) -> Result<()> {
    let ToggleArgs {
        input,
        line,
        column,
        in_place,
        json,
        rollup,
        glyph,
    } = args;

    let mut settings = resolve_settings(config, &input)?;
    if let Some(rollup) = rollup {
        settings.rollup = match rollup {
            RollupArg::Parent => RollupScope::Parent,
            RollupArg::Ancestors => RollupScope::Ancestors,
        };
    }
    if let Some(glyph) = glyph {
        settings.checked_glyph = match glyph {
            GlyphArg::Lower => 'x',
            GlyphArg::Upper => 'X',
        };
    }

    let position = zero_based(line, column)?;
    let mut doc = TextDocument::open(&input)?;
    if position.line >= doc.line_count() {
        anyhow::bail!(
            "line {} is past the end of {:?} ({} lines)",
            line,
            input,
            doc.line_count()
        );
    }

    if json {
        let plan = propagator::plan(&doc, Selection::caret(position), &settings)
            .context("planning toggle")?;
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    doc.select(Selection::caret(position));
    match propagator::update(&mut doc, &settings)
        .with_context(|| format!("applying edits to {:?}", input))?
    {
        Outcome::Applied(plan) => debug!(action = ?plan.action, edits = plan.batch.len(), "applied"),
        Outcome::Noop => debug!("nothing to apply"),
    }

    if in_place {
        doc.save()?;
    } else {
        let text = doc.text();
        print!("{text}");
        if !text.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}

fn handle_tree(args: TreeArgs) -> Result<()> {
    let TreeArgs { input, json } = args;
    let doc = TextDocument::open(&input)?;
    let forest = tree::forest(&doc);

    if json {
        println!("{}", serde_json::to_string_pretty(&forest)?);
    } else {
        let mut out = String::new();
        for node in &forest {
            render_node(&mut out, node, 0);
        }
        print!("{out}");
    }
    Ok(())
}

fn render_node(out: &mut String, node: &ChecklistNode, level: usize) {
    let state = match node.checked {
        Some(true) => "[X]",
        Some(false) => "[ ]",
        None => "   ",
    };
    let summary = node
        .summary
        .as_ref()
        .map(|s| format!(" ({s})"))
        .unwrap_or_default();
    out.push_str(&format!(
        "{:>4} {} {}{}{}\n",
        node.line + 1,
        state,
        "  ".repeat(level),
        node.text,
        summary
    ));
    for child in &node.children {
        render_node(out, child, level + 1);
    }
}

/// Explicit `--config` wins; otherwise the nearest `.checklist.toml` above the input.
fn resolve_settings(explicit: Option<&Path>, input: &Path) -> Result<Settings> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => input
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map_or_else(|| config::find_config(Path::new(".")), config::find_config),
    };
    match path {
        Some(path) => {
            debug!(?path, "loading settings");
            config::load_settings(&path).with_context(|| format!("loading {:?}", path))
        }
        None => Ok(Settings::default()),
    }
}

fn zero_based(line: usize, column: usize) -> Result<Position> {
    match (line.checked_sub(1), column.checked_sub(1)) {
        (Some(line), Some(column)) => Ok(Position::new(line, column)),
        _ => anyhow::bail!("--line and --column are 1-based"),
    }
}
