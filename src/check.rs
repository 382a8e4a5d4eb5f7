//! Check capability
//!
//! A check declares the node kinds it wants to see and receives `visit` and
//! `leave` callbacks for every node of those kinds. The tree passed to a
//! check is read-only; checks must not rely on state of other checks.

use crate::diagnostic::MessageSink;
use crate::tree::{NodeRef, Tree};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Content of the file being checked
#[derive(Debug, Clone)]
pub struct FileContents {
    path: PathBuf,
    text: Arc<str>,
}

impl FileContents {
    pub fn new(path: impl Into<PathBuf>, text: &str) -> Self {
        Self {
            path: path.into(),
            text: Arc::from(text),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Shared handle on the full text
    pub fn shared_text(&self) -> Arc<str> {
        Arc::clone(&self.text)
    }

    /// Source line (1-based)
    pub fn line(&self, line: usize) -> Option<&str> {
        line.checked_sub(1).and_then(|i| self.text.lines().nth(i))
    }
}

/// Configuration-time failure of a check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitError {
    pub key: String,
    pub args: Vec<String>,
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::diagnostic::format_message(&self.key, &self.args))
    }
}

impl std::error::Error for InitError {}

/// A unit of rule logic run by the tree walker
pub trait Check: Send {
    /// Identifier used in diagnostics
    fn id(&self) -> &str;

    /// Kinds visited when no explicit kinds are configured
    fn default_kinds(&self) -> &[&str];

    /// Kinds the check is able to handle
    fn acceptable_kinds(&self) -> &[&str] {
        self.default_kinds()
    }

    /// Kinds chosen by configuration; empty means use the defaults
    fn explicit_kinds(&self) -> &[String] {
        &[]
    }

    /// Called once after configuration
    fn init(&mut self) -> Result<(), InitError> {
        Ok(())
    }

    /// Called before each file; `tree` is `None` for an empty file
    fn begin_tree(
        &mut self,
        _contents: &FileContents,
        _tree: Option<&Tree>,
        _sink: &mut dyn MessageSink,
    ) {
    }

    fn visit(&mut self, _node: NodeRef<'_>, _sink: &mut dyn MessageSink) {}

    fn leave(&mut self, _node: NodeRef<'_>, _sink: &mut dyn MessageSink) {}

    /// Called after each file, whatever the traversal did
    fn end_tree(&mut self, _tree: Option<&Tree>, _sink: &mut dyn MessageSink) {}

    /// Called once when the run is over
    fn destroy(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_contents_lines() {
        let contents = FileContents::new("a.xml", "<a>\n  <b/>\n</a>");
        assert_eq!(contents.line(2), Some("  <b/>"));
        assert_eq!(contents.line(0), None);
        assert_eq!(contents.line(4), None);
        assert_eq!(contents.path(), Path::new("a.xml"));
    }

    #[test]
    fn test_init_error_display() {
        let err = InitError {
            key: crate::diagnostic::keys::QUERY_INVALID_EXPRESSION.to_string(),
            args: vec!["//".to_string(), "unexpected end".to_string()],
        };
        assert_eq!(err.to_string(), "Invalid query expression '//': unexpected end");
    }
}
