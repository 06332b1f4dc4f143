//! Error types shared across the compilation pipeline and the VM.
//!
//! Every user-visible failure is an [`EngineError`]: a category, a message,
//! and optionally a source location with a rendered hint (the offending line
//! with a caret under the column). Stages accumulate errors in pipeline
//! order; the engine routes them through the single host-installed error
//! handler.

use std::fmt;

use strum::{Display, IntoStaticStr};

/// Category of a user-visible failure, one per pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum ErrorKind {
    /// Tokenizer failure: unterminated string, bad escape, malformed number.
    Lex,
    /// Parser failure: unexpected token, missing delimiter.
    Parse,
    /// IR generation failure: undefined name, redefinition, wrong argc.
    Ir,
    /// Bytecode serialization failure: unresolved global symbol.
    Serialize,
    /// VM failure: type mismatch, missing extension, invalid index.
    Runtime,
}

/// A position within a source file. Lines and columns are zero-based
/// internally and rendered one-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLoc {
    pub file: String,
    pub line: u32,
    pub col: u32,
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line + 1, self.col + 1)
    }
}

/// A single diagnostic surfaced to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
    pub loc: Option<SourceLoc>,
    /// Pre-rendered source excerpt (offending line plus a caret), present
    /// when the source text was available at report time.
    pub hint: Option<String>,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            loc: None,
            hint: None,
        }
    }

    #[must_use]
    pub fn with_loc(mut self, loc: SourceLoc) -> Self {
        self.loc = Some(loc);
        self
    }

    #[must_use]
    pub fn with_hint(mut self, hint: String) -> Self {
        self.hint = Some(hint);
        self
    }

    /// Shorthand for a runtime error without location; the VM attaches a
    /// marker-derived location before reporting when one exists.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::Lex => write!(f, "lex error: {}", self.message)?,
            ErrorKind::Parse => write!(f, "parse error: {}", self.message)?,
            ErrorKind::Ir => write!(f, "compile error: {}", self.message)?,
            ErrorKind::Serialize => write!(f, "serialize error: {}", self.message)?,
            ErrorKind::Runtime => write!(f, "runtime error: {}", self.message)?,
        }
        if let Some(loc) = &self.loc {
            write!(f, "\n --> {loc}")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n{hint}")?;
        }
        Ok(())
    }
}

impl std::error::Error for EngineError {}

/// Renders the line containing `col` with a caret underneath.
///
/// `line_text` must be the raw source line without its terminating newline.
pub(crate) fn render_hint(line_text: &str, col: u32) -> String {
    let mut out = String::with_capacity(line_text.len() + col as usize + 8);
    out.push_str(line_text);
    out.push('\n');
    for ch in line_text.chars().take(col as usize) {
        // Keep tabs so the caret lines up under tabulated source.
        out.push(if ch == '\t' { '\t' } else { ' ' });
    }
    out.push('^');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_location() {
        let err = EngineError::new(ErrorKind::Parse, "missing ')'").with_loc(SourceLoc {
            file: "test.aug".to_owned(),
            line: 2,
            col: 4,
        });
        assert_eq!(format!("{err}"), "parse error: missing ')'\n --> test.aug:3:5");
    }

    #[test]
    fn hint_places_caret_under_column() {
        let hint = render_hint("var x = ;", 8);
        assert_eq!(hint, "var x = ;\n        ^");
    }
}
