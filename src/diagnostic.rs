//! Diagnostic types for check results

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Severity level for diagnostics
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message
    Info,
    /// Warning - potential issue
    Warning,
    /// Error - definite problem
    #[default]
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" | "hint" | "note" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" | "err" => Ok(Severity::Error),
            _ => Err(()),
        }
    }
}

/// Source code location
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// File path
    pub file: PathBuf,
    /// Line number (1-based, 0 when unknown)
    pub line: usize,
    /// Column number (1-based, 0 when unknown)
    pub column: usize,
}

impl Location {
    pub fn new(file: PathBuf, line: usize, column: usize) -> Self {
        Self { file, line, column }
    }
}

/// Message keys used by the engine and the built-in checks
pub mod keys {
    pub const GENERAL_EXCEPTION: &str = "general.exception";
    pub const CHECK_UNREGISTERABLE: &str = "check.unregisterable";
    pub const QUERY_TOO_FEW: &str = "query.tooFew";
    pub const QUERY_TOO_MANY: &str = "query.tooMany";
    pub const QUERY_INVALID_EXPRESSION: &str = "query.invalidExpression";
    pub const QUERY_EVALUATION_FAILED: &str = "query.evaluationFailed";
}

fn template(key: &str) -> Option<&'static str> {
    match key {
        keys::GENERAL_EXCEPTION => Some("Got an exception - {0}"),
        keys::CHECK_UNREGISTERABLE => Some("Check {0} disabled: {1}"),
        keys::QUERY_TOO_FEW => {
            Some("Expected at least {2} match(es) for expression '{0}', but found {1}.")
        }
        keys::QUERY_TOO_MANY => {
            Some("Expected at most {3} match(es) for expression '{0}', but found {1}.")
        }
        keys::QUERY_INVALID_EXPRESSION => Some("Invalid query expression '{0}': {1}"),
        keys::QUERY_EVALUATION_FAILED => Some("Query evaluation of '{0}' failed: {1}"),
        _ => None,
    }
}

/// Render a message key with positional `{n}` arguments
pub fn format_message(key: &str, args: &[String]) -> String {
    let Some(template) = template(key) else {
        return if args.is_empty() {
            key.to_string()
        } else {
            format!("{}: {}", key, args.join(", "))
        };
    };

    let mut text = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        text.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let argument = after.find('}').and_then(|close| {
            let index = after[..close].parse::<usize>().ok()?;
            Some((args.get(index)?, close))
        });
        match argument {
            Some((arg, close)) => {
                text.push_str(arg);
                rest = &after[close + 1..];
            }
            // Unknown placeholders stay literal
            None => {
                text.push('{');
                rest = after;
            }
        }
    }
    text.push_str(rest);
    text
}

/// A check diagnostic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Check that reported the diagnostic
    pub check_id: String,
    /// Severity level
    pub severity: Severity,
    /// Message key
    pub key: String,
    /// Message arguments
    pub args: Vec<String>,
    /// Rendered message
    pub message: String,
    /// Source location
    pub location: Location,
}

impl Diagnostic {
    /// Create a diagnostic, rendering its message from `key`
    pub fn new(
        check_id: &str,
        severity: Severity,
        key: &str,
        args: Vec<String>,
        location: Location,
    ) -> Self {
        Self {
            check_id: check_id.to_string(),
            severity,
            key: key.to_string(),
            message: format_message(key, &args),
            args,
            location,
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}: {} [{}]",
            self.location.file.display(),
            self.location.line,
            self.location.column,
            self.severity,
            self.message,
            self.check_id
        )
    }
}

/// Receiver of check violations
pub trait MessageSink {
    fn log(&mut self, line: usize, column: usize, key: &str, args: Vec<String>);
}

/// Collects the diagnostics of one file
#[derive(Debug, Default)]
pub struct MessageCollector {
    file: PathBuf,
    diagnostics: Vec<Diagnostic>,
}

impl MessageCollector {
    pub fn new(file: PathBuf) -> Self {
        Self {
            file,
            diagnostics: Vec::new(),
        }
    }

    pub fn file(&self) -> &PathBuf {
        &self.file
    }

    pub fn add(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    /// Sink that stamps diagnostics with a check's id and severity
    pub fn sink<'a>(&'a mut self, check_id: &'a str, severity: Severity) -> CheckSink<'a> {
        CheckSink {
            collector: self,
            check_id,
            severity,
        }
    }
}

/// [`MessageSink`] bound to one check
pub struct CheckSink<'a> {
    collector: &'a mut MessageCollector,
    check_id: &'a str,
    severity: Severity,
}

impl MessageSink for CheckSink<'_> {
    fn log(&mut self, line: usize, column: usize, key: &str, args: Vec<String>) {
        let location = Location::new(self.collector.file.clone(), line, column);
        let diagnostic = Diagnostic::new(self.check_id, self.severity, key, args, location);
        self.collector.add(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_parse() {
        assert_eq!("warn".parse::<Severity>(), Ok(Severity::Warning));
        assert_eq!("ERROR".parse::<Severity>(), Ok(Severity::Error));
        assert!("loud".parse::<Severity>().is_err());
        assert_eq!(Severity::default(), Severity::Error);
    }

    #[test]
    fn test_format_known_key() {
        let args = vec!["/a/b".to_string(), "0".to_string(), "1".to_string()];
        assert_eq!(
            format_message(keys::QUERY_TOO_FEW, &args),
            "Expected at least 1 match(es) for expression '/a/b', but found 0."
        );
    }

    #[test]
    fn test_format_does_not_expand_arguments() {
        let args = vec![
            "//a[@n='{1}']".to_string(),
            "3".to_string(),
            "0".to_string(),
            "1".to_string(),
        ];
        assert_eq!(
            format_message(keys::QUERY_TOO_MANY, &args),
            "Expected at most 1 match(es) for expression '//a[@n='{1}']', but found 3."
        );
    }

    #[test]
    fn test_format_missing_argument_stays_literal() {
        let args = vec!["//a".to_string()];
        assert_eq!(
            format_message(keys::QUERY_INVALID_EXPRESSION, &args),
            "Invalid query expression '//a': {1}"
        );
    }

    #[test]
    fn test_format_unknown_key() {
        assert_eq!(format_message("custom.key", &[]), "custom.key");
        assert_eq!(
            format_message("custom.key", &["a".to_string(), "b".to_string()]),
            "custom.key: a, b"
        );
    }

    #[test]
    fn test_sink_stamps_check() {
        let mut collector = MessageCollector::new(PathBuf::from("in.xml"));
        {
            let mut sink = collector.sink("MyCheck", Severity::Warning);
            sink.log(3, 4, "custom", vec![]);
        }
        let diags = collector.into_diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].check_id, "MyCheck");
        assert_eq!(diags[0].severity, Severity::Warning);
        assert_eq!(diags[0].location, Location::new(PathBuf::from("in.xml"), 3, 4));
    }

    #[test]
    fn test_display() {
        let diag = Diagnostic::new(
            "Query",
            Severity::Error,
            keys::GENERAL_EXCEPTION,
            vec!["boom".to_string()],
            Location::new(PathBuf::from("x.xml"), 2, 1),
        );
        assert_eq!(
            diag.to_string(),
            "x.xml:2:1: error: Got an exception - boom [Query]"
        );
    }
}
