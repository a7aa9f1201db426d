//! Hierarchical checklists embedded in plain text.
//! Modules keep the core pure: analyzers and tree scans read line snapshots, the
//! propagator only plans edits, and a `Document` decides how a batch is committed.

pub mod core {
    use serde::{Deserialize, Serialize};

    /* ------------------------------ Positions ------------------------------ */

    /// Zero-based line/column pair. Columns count chars, not bytes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    pub struct Position {
        pub line: usize,
        pub column: usize,
    }

    impl Position {
        pub fn new(line: usize, column: usize) -> Self {
            Self { line, column }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Selection {
        pub anchor: Position,
        pub active: Position,
    }

    impl Selection {
        pub fn caret(at: Position) -> Self {
            Self {
                anchor: at,
                active: at,
            }
        }

        pub fn is_caret(&self) -> bool {
            self.anchor == self.active
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TextRange {
        pub start: Position,
        pub end: Position,
    }

    impl TextRange {
        pub fn new(start: Position, end: Position) -> Self {
            Self { start, end }
        }

        /// Zero-width range, used for pure insertions.
        pub fn empty(at: Position) -> Self {
            Self { start: at, end: at }
        }

        pub fn is_empty(&self) -> bool {
            self.start == self.end
        }
    }

    /* -------------------------------- Lines -------------------------------- */

    /// Immutable snapshot of one row of the document.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Line {
        pub index: usize,
        pub text: String,
    }

    impl Line {
        pub fn new(index: usize, text: impl Into<String>) -> Self {
            Self {
                index,
                text: text.into(),
            }
        }
    }

    /* -------------------------------- Tokens ------------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum TokenKind {
        /// The glyph inside `[ ]`, `[x]` or `[X]`.
        Checkbox,
        /// The `checked/total` body inside `[n/m]`.
        Summary,
    }

    /// Half-open char range `[start, end)` on one line.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TokenSpan {
        pub line: usize,
        pub start: usize,
        pub end: usize,
        pub kind: TokenKind,
    }

    impl TokenSpan {
        /// A caret sits between characters, so both boundaries count as inside.
        pub fn contains(&self, position: Position) -> bool {
            position.line == self.line
                && self.start <= position.column
                && position.column <= self.end
        }

        pub fn range(&self) -> TextRange {
            TextRange::new(
                Position::new(self.line, self.start),
                Position::new(self.line, self.end),
            )
        }
    }

    /* -------------------------------- Edits -------------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Edit {
        pub range: TextRange,
        pub text: String,
    }

    impl Edit {
        pub fn replace(span: &TokenSpan, text: impl Into<String>) -> Self {
            Self {
                range: span.range(),
                text: text.into(),
            }
        }

        pub fn insert(at: Position, text: impl Into<String>) -> Self {
            Self {
                range: TextRange::empty(at),
                text: text.into(),
            }
        }
    }

    /// Ordered replacements produced by one action, committed as a unit.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct EditBatch {
        pub edits: Vec<Edit>,
        /// Where the caret is collapsed to once the batch has landed.
        pub caret: Position,
    }

    impl EditBatch {
        pub fn new(edits: Vec<Edit>, caret: Position) -> Self {
            Self { edits, caret }
        }

        pub fn len(&self) -> usize {
            self.edits.len()
        }

        pub fn is_empty(&self) -> bool {
            self.edits.is_empty()
        }
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, thiserror::Error)]
    pub enum DocumentError {
        #[error("position {line}:{column} is outside the document")]
        OutOfRange { line: usize, column: usize },
        #[error("edits overlap at {line}:{column}")]
        Overlapping { line: usize, column: usize },
        #[error("document is read-only")]
        ReadOnly,
    }
}

pub mod analyzer {
    //! Token scanning for a single line, built on `nom`.
    //!
    //! Every function here is pure and total: absence is `None`, never an error.

    use crate::core::{Line, Position, TokenKind, TokenSpan};
    use nom::{
        IResult,
        bytes::complete::take_while,
        character::complete::{char, digit0, one_of},
        combinator::recognize,
        error::VerboseError,
        sequence::{delimited, tuple},
    };

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    // `[ ]`, `[x]`, `[X]` -> the glyph
    fn checkbox_glyph(i: &str) -> PResult<'_, &str> {
        delimited(char('['), recognize(one_of(" xX")), char(']'))(i)
    }

    // `[12/34]`, `[/]` -> the body between brackets
    fn summary_body(i: &str) -> PResult<'_, &str> {
        delimited(
            char('['),
            recognize(tuple((digit0, char('/'), digit0))),
            char(']'),
        )(i)
    }

    /// Leftmost match of `body` at any `[`, as a byte range of the body.
    fn find_token(text: &str, body: fn(&str) -> PResult<'_, &str>) -> Option<(usize, usize)> {
        text.match_indices('[').find_map(|(offset, _)| {
            body(&text[offset..]).ok().map(|(_, matched)| {
                let start = offset + 1;
                (start, start + matched.len())
            })
        })
    }

    fn locate(line: &Line, kind: TokenKind, position: Option<Position>) -> Option<TokenSpan> {
        let body: fn(&str) -> PResult<'_, &str> = match kind {
            TokenKind::Checkbox => checkbox_glyph,
            TokenKind::Summary => summary_body,
        };
        let (start, end) = find_token(&line.text, body)?;
        let column = line.text[..start].chars().count();
        let span = TokenSpan {
            line: line.index,
            start: column,
            end: column + line.text[start..end].chars().count(),
            kind,
        };
        match position {
            Some(at) if !span.contains(at) => None,
            _ => Some(span),
        }
    }

    /// First checkbox glyph on the line. With a position, only if the position is on it.
    pub fn find_checkbox(line: &Line, position: Option<Position>) -> Option<TokenSpan> {
        locate(line, TokenKind::Checkbox, position)
    }

    /// First summary body on the line. With a position, only if the position is on it.
    pub fn find_summary(line: &Line, position: Option<Position>) -> Option<TokenSpan> {
        locate(line, TokenKind::Summary, position)
    }

    /// Leading whitespace chars; whitespace-only lines are depth 0.
    pub fn indent_depth(text: &str) -> usize {
        match take_while::<_, _, VerboseError<&str>>(char::is_whitespace)(text) {
            Ok(("", _)) | Err(_) => 0,
            Ok((_, leading)) => leading.chars().count(),
        }
    }

    pub fn token_text(line: &Line, span: &TokenSpan) -> String {
        line.text
            .chars()
            .skip(span.start)
            .take(span.end - span.start)
            .collect()
    }

    pub fn is_checked(line: &Line, span: &TokenSpan) -> bool {
        matches!(line.text.chars().nth(span.start), Some('x' | 'X'))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn line(text: &str) -> Line {
            Line::new(0, text)
        }

        #[test]
        fn checkbox_span_covers_only_the_glyph() {
            let l = line("- [x] done");
            let span = find_checkbox(&l, None).expect("checkbox");
            assert_eq!((span.start, span.end), (3, 4));
            assert_eq!(span.kind, TokenKind::Checkbox);
            assert!(is_checked(&l, &span));

            let blank = line("  - [ ] todo");
            let span = find_checkbox(&blank, None).expect("checkbox");
            assert_eq!((span.start, span.end), (5, 6));
            assert!(!is_checked(&blank, &span));

            let upper = line("[X]");
            assert!(is_checked(&upper, &find_checkbox(&upper, None).unwrap()));
        }

        #[test]
        fn checkbox_position_filter() {
            let l = line("- [x] done");
            assert!(find_checkbox(&l, Some(Position::new(0, 3))).is_some());
            assert!(find_checkbox(&l, Some(Position::new(0, 4))).is_some());
            assert!(find_checkbox(&l, Some(Position::new(0, 8))).is_none());
            assert!(find_checkbox(&l, Some(Position::new(1, 3))).is_none());
        }

        #[test]
        fn other_bracket_forms_are_not_checkboxes() {
            assert!(find_checkbox(&line("- [-] partial"), None).is_none());
            assert!(find_checkbox(&line("- [xx] nope"), None).is_none());
            assert!(find_checkbox(&line("no brackets"), None).is_none());

            let mixed = line("[12/3] and [ ]");
            let span = find_checkbox(&mixed, None).expect("checkbox after summary");
            assert_eq!(span.start, 12);
        }

        #[test]
        fn summary_spans_body_and_accepts_empty_counts() {
            let l = line("- [ ] Parent [1/3]");
            let span = find_summary(&l, None).expect("summary");
            assert_eq!((span.start, span.end), (14, 17));
            assert_eq!(token_text(&l, &span), "1/3");

            let empty = line("todo [/]");
            let span = find_summary(&empty, None).expect("empty summary");
            assert_eq!((span.start, span.end), (6, 7));
            assert!(find_summary(&empty, Some(Position::new(0, 6))).is_some());
            assert!(find_summary(&empty, Some(Position::new(0, 2))).is_none());

            assert!(find_summary(&line("[1-3]"), None).is_none());
        }

        #[test]
        fn columns_are_counted_in_chars() {
            let l = line("é [x]");
            let span = find_checkbox(&l, None).expect("checkbox");
            assert_eq!(span.start, 3);
            assert!(is_checked(&l, &span));
        }

        #[test]
        fn indent_depth_counts_leading_whitespace() {
            assert_eq!(indent_depth("    - [ ] a"), 4);
            assert_eq!(indent_depth("\t- [ ] a"), 1);
            assert_eq!(indent_depth(" \t x"), 3);
            assert_eq!(indent_depth("x"), 0);
            assert_eq!(indent_depth("   "), 0);
            assert_eq!(indent_depth(""), 0);
        }
    }
}

pub mod document {
    //! The line-addressable surface the propagator reads from and commits to.

    use crate::core::{DocumentError, Edit, Line, Position, Selection, TextRange};
    use anyhow::{Context, Result};
    use std::{
        fs,
        path::{Path, PathBuf},
    };

    pub trait Document {
        fn line_count(&self) -> usize;

        fn line_at(&self, index: usize) -> Option<Line>;

        fn selection(&self) -> Selection;

        /// Apply every edit or none of them, as a single undo step.
        fn apply_edits(&mut self, edits: &[Edit]) -> Result<(), DocumentError>;

        fn set_caret(&mut self, position: Position);

        fn line_break(&self) -> &str {
            "\n"
        }
    }

    /// In-memory text buffer, optionally backed by a file on disk.
    #[derive(Debug, Clone)]
    pub struct TextDocument {
        path: Option<PathBuf>,
        lines: Vec<String>,
        eol: &'static str,
        selection: Selection,
        history: Vec<Vec<String>>,
        read_only: bool,
    }

    impl TextDocument {
        pub fn new(text: &str) -> Self {
            Self {
                path: None,
                lines: split_lines(text),
                eol: if text.contains("\r\n") { "\r\n" } else { "\n" },
                selection: Selection::caret(Position::new(0, 0)),
                history: Vec::new(),
                read_only: false,
            }
        }

        pub fn open(path: &Path) -> Result<Self> {
            let text =
                fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
            let mut doc = Self::new(&text);
            doc.path = Some(path.to_path_buf());
            Ok(doc)
        }

        pub fn save(&self) -> Result<()> {
            let Some(path) = &self.path else {
                anyhow::bail!("document has no backing file");
            };
            fs::write(path, self.text()).with_context(|| format!("writing {:?}", path))
        }

        pub fn path(&self) -> Option<&Path> {
            self.path.as_deref()
        }

        pub fn text(&self) -> String {
            self.lines.join(self.eol)
        }

        pub fn select(&mut self, selection: Selection) {
            self.selection = selection;
        }

        pub fn set_read_only(&mut self, read_only: bool) {
            self.read_only = read_only;
        }

        /// Revert the most recent batch. Returns false when there is nothing to undo.
        pub fn undo(&mut self) -> bool {
            match self.history.pop() {
                Some(previous) => {
                    self.lines = previous;
                    true
                }
                None => false,
            }
        }

        fn check_position(&self, at: Position) -> Result<(), DocumentError> {
            let fits = self
                .lines
                .get(at.line)
                .is_some_and(|line| at.column <= line.chars().count());
            if fits {
                Ok(())
            } else {
                Err(DocumentError::OutOfRange {
                    line: at.line,
                    column: at.column,
                })
            }
        }

        fn check_range(&self, range: &TextRange) -> Result<(), DocumentError> {
            self.check_position(range.start)?;
            self.check_position(range.end)?;
            if range.start > range.end {
                return Err(DocumentError::OutOfRange {
                    line: range.end.line,
                    column: range.end.column,
                });
            }
            Ok(())
        }

        /// Byte offset of a validated position in `lines.join("\n")`.
        fn offset(&self, at: Position) -> usize {
            let before: usize = self.lines[..at.line].iter().map(|l| l.len() + 1).sum();
            let line = &self.lines[at.line];
            let within = line
                .char_indices()
                .nth(at.column)
                .map(|(byte, _)| byte)
                .unwrap_or(line.len());
            before + within
        }
    }

    impl Document for TextDocument {
        fn line_count(&self) -> usize {
            self.lines.len()
        }

        fn line_at(&self, index: usize) -> Option<Line> {
            self.lines.get(index).map(|text| Line::new(index, text.as_str()))
        }

        fn selection(&self) -> Selection {
            self.selection
        }

        fn apply_edits(&mut self, edits: &[Edit]) -> Result<(), DocumentError> {
            if self.read_only {
                return Err(DocumentError::ReadOnly);
            }
            if edits.is_empty() {
                return Ok(());
            }
            for edit in edits {
                self.check_range(&edit.range)?;
            }

            let mut ordered: Vec<&Edit> = edits.iter().collect();
            ordered.sort_by_key(|edit| edit.range.start);
            for pair in ordered.windows(2) {
                if pair[0].range.end > pair[1].range.start {
                    let at = pair[1].range.start;
                    return Err(DocumentError::Overlapping {
                        line: at.line,
                        column: at.column,
                    });
                }
            }

            // Back to front so earlier offsets stay valid.
            let mut text = self.lines.join("\n");
            for edit in ordered.iter().rev() {
                let start = self.offset(edit.range.start);
                let end = self.offset(edit.range.end);
                text.replace_range(start..end, &edit.text);
            }

            let previous = std::mem::replace(&mut self.lines, split_lines(&text));
            self.history.push(previous);
            Ok(())
        }

        fn set_caret(&mut self, position: Position) {
            self.selection = Selection::caret(position);
        }

        fn line_break(&self) -> &str {
            self.eol
        }
    }

    fn split_lines(text: &str) -> Vec<String> {
        text.split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
            .collect()
    }

}

pub mod tree {
    //! The implicit checklist forest. Nothing is cached: every query rescans
    //! the neighbouring lines, so structure always follows the current text.

    use crate::analyzer::{find_checkbox, find_summary, indent_depth, is_checked, token_text};
    use crate::core::Line;
    use crate::document::Document;
    use serde::Serialize;
    use tracing::trace;

    /// Direct children: the following run deeper than `line`, restricted to the
    /// run's minimum depth. Deeper lines belong to those children.
    pub fn find_children<D: Document + ?Sized>(doc: &D, line: &Line) -> Vec<Line> {
        let depth = indent_depth(&line.text);
        let mut run = Vec::new();
        for index in line.index + 1..doc.line_count() {
            let Some(next) = doc.line_at(index) else {
                break;
            };
            let next_depth = indent_depth(&next.text);
            if next_depth <= depth {
                break;
            }
            run.push((next_depth, next));
        }

        let Some(sibling_depth) = run.iter().map(|(d, _)| *d).min() else {
            return Vec::new();
        };
        trace!(line = line.index, run = run.len(), sibling_depth, "scanned children");
        run.into_iter()
            .filter(|(d, _)| *d == sibling_depth)
            .map(|(_, l)| l)
            .collect()
    }

    /// Nearest preceding line with a strictly smaller depth. Blank lines count.
    pub fn find_parent<D: Document + ?Sized>(doc: &D, line: &Line) -> Option<Line> {
        let depth = indent_depth(&line.text);
        (0..line.index.min(doc.line_count()))
            .rev()
            .filter_map(|index| doc.line_at(index))
            .find(|candidate| indent_depth(&candidate.text) < depth)
    }

    /// Read model of one line of the forest.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct ChecklistNode {
        pub line: usize,
        pub depth: usize,
        pub checked: Option<bool>,
        pub summary: Option<String>,
        pub text: String,
        pub children: Vec<ChecklistNode>,
    }

    /// The whole forest as the propagator sees it.
    pub fn forest<D: Document + ?Sized>(doc: &D) -> Vec<ChecklistNode> {
        let mut roots = Vec::new();
        let mut index = 0;
        while let Some(line) = doc.line_at(index) {
            let end = subtree_end(doc, &line);
            if !line.text.trim().is_empty() || end > index + 1 {
                roots.push(node(doc, line));
            }
            index = end;
        }
        roots
    }

    fn subtree_end<D: Document + ?Sized>(doc: &D, line: &Line) -> usize {
        let depth = indent_depth(&line.text);
        (line.index + 1..doc.line_count())
            .find(|&index| {
                doc.line_at(index)
                    .map_or(true, |next| indent_depth(&next.text) <= depth)
            })
            .unwrap_or(doc.line_count())
    }

    fn node<D: Document + ?Sized>(doc: &D, line: Line) -> ChecklistNode {
        let children = find_children(doc, &line)
            .into_iter()
            .map(|child| node(doc, child))
            .collect();
        ChecklistNode {
            line: line.index,
            depth: indent_depth(&line.text),
            checked: find_checkbox(&line, None).map(|span| is_checked(&line, &span)),
            summary: find_summary(&line, None).map(|span| token_text(&line, &span)),
            text: line.text.trim().to_string(),
            children,
        }
    }

}

pub mod config {
    //! User settings, read from `.checklist.toml`.

    use serde::{Deserialize, Serialize};
    use std::{
        fs,
        path::{Path, PathBuf},
    };
    use thiserror::Error;

    pub const CONFIG_FILE_NAME: &str = ".checklist.toml";

    #[derive(Debug, Error)]
    pub enum ConfigError {
        #[error("config IO error: {0}")]
        Io(#[from] std::io::Error),
        #[error("failed to parse config: {0}")]
        Parse(#[from] toml::de::Error),
        #[error("checked glyph must be 'x' or 'X', got {0:?}")]
        InvalidGlyph(char),
    }

    /// How far a rollup climbs after a toggle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum RollupScope {
        /// Only the immediate parent is recomputed.
        #[default]
        Parent,
        /// Keep recomputing until the top-level line.
        Ancestors,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Settings {
        /// Glyph written when a box becomes checked.
        pub checked_glyph: char,
        pub rollup: RollupScope,
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                checked_glyph: 'X',
                rollup: RollupScope::Parent,
            }
        }
    }

    impl Settings {
        pub fn validate(&self) -> Result<(), ConfigError> {
            match self.checked_glyph {
                'x' | 'X' => Ok(()),
                other => Err(ConfigError::InvalidGlyph(other)),
            }
        }

        pub fn glyph(&self, checked: bool) -> char {
            if checked { self.checked_glyph } else { ' ' }
        }
    }

    pub fn parse_settings(text: &str) -> Result<Settings, ConfigError> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
        parse_settings(&fs::read_to_string(path)?)
    }

    /// Closest `.checklist.toml` in `start` or any of its ancestors.
    pub fn find_config(start: &Path) -> Option<PathBuf> {
        let start = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
        start
            .ancestors()
            .map(|dir| dir.join(CONFIG_FILE_NAME))
            .find(|candidate| candidate.is_file())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn empty_config_uses_defaults() {
            assert_eq!(parse_settings("").expect("parse"), Settings::default());
        }

        #[test]
        fn parses_scope_and_glyph() {
            let settings =
                parse_settings("checked_glyph = \"x\"\nrollup = \"ancestors\"\n").expect("parse");
            assert_eq!(settings.checked_glyph, 'x');
            assert_eq!(settings.rollup, RollupScope::Ancestors);
            assert_eq!(settings.glyph(true), 'x');
            assert_eq!(settings.glyph(false), ' ');
        }

        #[test]
        fn rejects_foreign_glyphs_and_bad_toml() {
            assert!(matches!(
                parse_settings("checked_glyph = \"v\""),
                Err(ConfigError::InvalidGlyph('v'))
            ));
            assert!(matches!(
                parse_settings("rollup = \"everything\""),
                Err(ConfigError::Parse(_))
            ));
        }

        #[test]
        fn config_is_found_in_an_ancestor_directory() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let nested = tmp.path().join("notes").join("daily");
            fs::create_dir_all(&nested).expect("mkdir");
            fs::write(tmp.path().join(CONFIG_FILE_NAME), "rollup = \"ancestors\"\n")
                .expect("write config");

            let found = find_config(&nested).expect("config found");
            assert_eq!(
                found,
                fs::canonicalize(tmp.path())
                    .expect("canonical")
                    .join(CONFIG_FILE_NAME)
            );
            assert_eq!(
                load_settings(&found).expect("load").rollup,
                RollupScope::Ancestors
            );
        }
    }
}

pub mod propagator {
    //! Toggle-at-cursor: cascade a new state down the subtree, roll counts up
    //! to the parent, and hand the resulting batch to the document in one go.

    use crate::analyzer::{find_checkbox, find_summary, is_checked, token_text};
    use crate::config::{RollupScope, Settings};
    use crate::core::{DocumentError, Edit, EditBatch, Line, Position, Selection, TokenSpan};
    use crate::document::Document;
    use crate::tree::{find_children, find_parent};
    use serde::Serialize;
    use tracing::{debug, warn};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(tag = "kind", rename_all = "snake_case")]
    pub enum Action {
        /// The caret was on a checkbox; `checked` is the new state.
        Toggle { checked: bool },
        /// The caret was on a summary.
        Rollup,
        /// Neither; a line break is inserted at the caret.
        InsertLineBreak,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct Plan {
        pub action: Action,
        pub batch: EditBatch,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Outcome {
        /// The caret was past the end of the document.
        Noop,
        Applied(Plan),
    }

    /// Compute the edits for a toggle without touching the document.
    /// The anchor picks the token; the active end is where the caret returns.
    pub fn plan<D: Document + ?Sized>(
        doc: &D,
        selection: Selection,
        settings: &Settings,
    ) -> Option<Plan> {
        let position = selection.anchor;
        let line = doc.line_at(position.line)?;
        let mut planner = Planner::new(doc, settings);

        let action = if let Some(checkbox) = find_checkbox(&line, Some(position)) {
            let was_checked = is_checked(&line, &checkbox);
            planner.set_subtree(&line, !was_checked);
            let adjustment = if was_checked { -1 } else { 1 };
            planner.rollup_from(find_parent(doc, &line), adjustment);
            Action::Toggle {
                checked: !was_checked,
            }
        } else if find_summary(&line, Some(position)).is_some() {
            planner.rollup_from(Some(line), 0);
            Action::Rollup
        } else {
            let column = position.column.min(line.text.chars().count());
            planner.push(Edit::insert(
                Position::new(position.line, column),
                doc.line_break(),
            ));
            Action::InsertLineBreak
        };

        debug!(?action, edits = planner.edits.len(), line = position.line, "planned toggle");
        Some(Plan {
            action,
            batch: EditBatch::new(planner.edits, selection.active),
        })
    }

    /// Toggle at the selection anchor and commit the batch. The selection is
    /// collapsed to its prior active end only after the batch has been applied.
    pub fn update<D: Document + ?Sized>(
        doc: &mut D,
        settings: &Settings,
    ) -> Result<Outcome, DocumentError> {
        let selection = doc.selection();
        let Some(plan) = plan(&*doc, selection, settings) else {
            debug!(line = selection.anchor.line, "anchor is past the end of the document");
            return Ok(Outcome::Noop);
        };

        if let Err(err) = doc.apply_edits(&plan.batch.edits) {
            warn!(%err, edits = plan.batch.len(), "edit batch rejected");
            return Err(err);
        }
        doc.set_caret(plan.batch.caret);
        Ok(Outcome::Applied(plan))
    }

    struct Planner<'a, D: ?Sized> {
        doc: &'a D,
        settings: &'a Settings,
        edits: Vec<Edit>,
    }

    impl<'a, D: Document + ?Sized> Planner<'a, D> {
        fn new(doc: &'a D, settings: &'a Settings) -> Self {
            Self {
                doc,
                settings,
                edits: Vec::new(),
            }
        }

        fn push(&mut self, edit: Edit) {
            debug!(
                line = edit.range.start.line,
                column = edit.range.start.column,
                text = %edit.text.escape_debug(),
                "edit"
            );
            self.edits.push(edit);
        }

        /// Set this node's checkbox only. Returns whether an edit was emitted.
        fn set_node(&mut self, line: &Line, checked: bool) -> bool {
            let Some(span) = find_checkbox(line, None) else {
                return false;
            };
            if is_checked(line, &span) == checked {
                return false;
            }
            let glyph = self.settings.glyph(checked);
            self.push(Edit::replace(&span, glyph.to_string()));
            true
        }

        /// Set this node and cascade to every descendant.
        fn set_subtree(&mut self, line: &Line, checked: bool) {
            if !self.set_node(line, checked) {
                return;
            }
            let children = find_children(self.doc, line);
            for child in &children {
                self.set_subtree(child, checked);
            }
            let total = children.len();
            self.set_summary(line, if checked { total } else { 0 }, total);
        }

        fn set_summary(&mut self, line: &Line, checked: usize, total: usize) {
            let Some(span) = find_summary(line, None) else {
                return;
            };
            let body = format!("{checked}/{total}");
            if token_text(line, &span) != body {
                self.push(Edit::replace(&span, body));
            }
        }

        /// Recompute `line` from its children as they read before this batch,
        /// offset by `adjustment` for the child edited in this batch.
        /// Returns the new state if the line's own checkbox changed.
        fn rollup(&mut self, line: &Line, adjustment: isize) -> Option<bool> {
            let children = find_children(self.doc, line);
            if children.is_empty() {
                return None;
            }
            let already = children.iter().filter(|child| checked_box(child)).count();
            // A toggled line outside the minimum-depth children can push this below zero.
            let checked = (already as isize + adjustment).max(0) as usize;
            let total = children.len();
            self.set_summary(line, checked, total);

            let state = checked == total;
            self.set_node(line, state).then_some(state)
        }

        fn rollup_from(&mut self, start: Option<Line>, adjustment: isize) {
            let mut current = start;
            let mut adjustment = adjustment;
            while let Some(line) = current {
                let changed = self.rollup(&line, adjustment);
                if self.settings.rollup == RollupScope::Parent {
                    break;
                }
                adjustment = match changed {
                    Some(true) => 1,
                    Some(false) => -1,
                    None => 0,
                };
                current = find_parent(self.doc, &line);
            }
        }
    }

    fn checked_box(line: &Line) -> bool {
        find_checkbox(line, None).is_some_and(|span: TokenSpan| is_checked(line, &span))
    }

}

pub use config::Settings;
pub use document::{Document, TextDocument};
pub use propagator::{plan, update};
