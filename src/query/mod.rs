//! Query-match check
//!
//! Evaluates an XPath 3.1 expression against the raw document text with xee
//! and bounds the number of results. XQuery checks accept FLWOR expressions
//! with `where`, `order by` and positional variables.
//!
//! - Fewer than `min` results: one violation at the document node.
//! - More than `max` results: one violation per result past `max`, at the
//!   result's own position when it has one.

pub mod engine;
pub mod flwor;

use crate::check::{Check, FileContents, InitError};
use crate::diagnostic::{keys, MessageSink, Severity};
use crate::tree::{NodeRef, Tree};
use engine::CompiledQuery;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Default upper bound of XPath checks
pub const XPATH_DEFAULT_MAX: usize = 100;

/// Default upper bound of XQuery checks
pub const XQUERY_DEFAULT_MAX: usize = 0;

const DOCUMENT_ONLY: &[&str] = &["DOCUMENT"];

/// Query compilation or evaluation failure
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueryError {
    #[error("{message}")]
    Compile { expression: String, message: String },

    #[error("{0}")]
    Evaluation(String),
}

/// Prefix to namespace URI mapping usable in expressions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceBinding {
    pub prefix: String,
    pub uri: String,
}

impl NamespaceBinding {
    pub fn new(prefix: &str, uri: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            uri: uri.to_string(),
        }
    }
}

/// Expression language of a query check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryLanguage {
    Xpath,
    Xquery,
}

impl QueryLanguage {
    pub fn default_max(self) -> usize {
        match self {
            QueryLanguage::Xpath => XPATH_DEFAULT_MAX,
            QueryLanguage::Xquery => XQUERY_DEFAULT_MAX,
        }
    }

    pub fn default_id(self) -> &'static str {
        match self {
            QueryLanguage::Xpath => "XPathCheck",
            QueryLanguage::Xquery => "XQueryCheck",
        }
    }
}

/// Settings of one query check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCheckConfig {
    /// Identifier in diagnostics; defaults per language
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub severity: Severity,

    /// Explicit node kinds; empty means the document node
    #[serde(default)]
    pub tokens: Vec<String>,

    pub expression: String,

    #[serde(default)]
    pub min: usize,

    /// Defaults per language
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<usize>,

    #[serde(default)]
    pub namespaces: Vec<NamespaceBinding>,
}

impl QueryCheckConfig {
    pub fn new(expression: &str) -> Self {
        Self {
            id: None,
            severity: Severity::default(),
            tokens: Vec::new(),
            expression: expression.to_string(),
            min: 0,
            max: None,
            namespaces: Vec::new(),
        }
    }

    pub fn with_bounds(mut self, min: usize, max: usize) -> Self {
        self.min = min;
        self.max = Some(max);
        self
    }

    pub fn with_namespace(mut self, prefix: &str, uri: &str) -> Self {
        self.namespaces.push(NamespaceBinding::new(prefix, uri));
        self
    }
}

/// Check bounding the number of query results per document
pub struct QueryMatchCheck {
    id: String,
    language: QueryLanguage,
    expression: String,
    min: usize,
    max: usize,
    namespaces: Vec<NamespaceBinding>,
    tokens: Vec<String>,
    compiled: Option<CompiledQuery>,
    text: Option<Arc<str>>,
}

impl QueryMatchCheck {
    pub fn new(language: QueryLanguage, config: QueryCheckConfig) -> Self {
        Self {
            id: config
                .id
                .unwrap_or_else(|| language.default_id().to_string()),
            language,
            expression: config.expression,
            min: config.min,
            max: config.max.unwrap_or_else(|| language.default_max()),
            namespaces: config.namespaces,
            tokens: config.tokens,
            compiled: None,
            text: None,
        }
    }

    pub fn xpath(config: QueryCheckConfig) -> Self {
        Self::new(QueryLanguage::Xpath, config)
    }

    pub fn xquery(config: QueryCheckConfig) -> Self {
        Self::new(QueryLanguage::Xquery, config)
    }

    pub fn language(&self) -> QueryLanguage {
        self.language
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn min(&self) -> usize {
        self.min
    }

    pub fn max(&self) -> usize {
        self.max
    }

    fn report(
        &self,
        matches: &[Option<(usize, usize)>],
        root: NodeRef<'_>,
        sink: &mut dyn MessageSink,
    ) {
        let n = matches.len();
        if n > self.max {
            let args = vec![
                self.expression.clone(),
                n.to_string(),
                self.min.to_string(),
                self.max.to_string(),
            ];
            for position in &matches[self.max..] {
                let (line, column) = position.unwrap_or((root.line(), root.column()));
                sink.log(line, column, keys::QUERY_TOO_MANY, args.clone());
            }
        } else if n < self.min {
            sink.log(
                root.line(),
                root.column(),
                keys::QUERY_TOO_FEW,
                vec![self.expression.clone(), n.to_string(), self.min.to_string()],
            );
        }
    }
}

impl Check for QueryMatchCheck {
    fn id(&self) -> &str {
        &self.id
    }

    fn default_kinds(&self) -> &[&str] {
        DOCUMENT_ONLY
    }

    fn explicit_kinds(&self) -> &[String] {
        &self.tokens
    }

    fn init(&mut self) -> Result<(), InitError> {
        match CompiledQuery::compile(self.language, &self.expression, &self.namespaces) {
            Ok(query) => {
                self.compiled = Some(query);
                Ok(())
            }
            Err(e) => {
                log::warn!("Failed to compile '{}': {}", self.expression, e);
                Err(InitError {
                    key: keys::QUERY_INVALID_EXPRESSION.to_string(),
                    args: vec![self.expression.clone(), e.to_string()],
                })
            }
        }
    }

    fn begin_tree(
        &mut self,
        contents: &FileContents,
        _tree: Option<&Tree>,
        _sink: &mut dyn MessageSink,
    ) {
        self.text = Some(contents.shared_text());
    }

    fn visit(&mut self, node: NodeRef<'_>, sink: &mut dyn MessageSink) {
        let (Some(query), Some(text)) = (&self.compiled, &self.text) else {
            return;
        };
        match query.evaluate(text) {
            Ok(matches) => self.report(&matches, node, sink),
            Err(e) => sink.log(
                node.line(),
                node.column(),
                keys::QUERY_EVALUATION_FAILED,
                vec![self.expression.clone(), e.to_string()],
            ),
        }
    }

    fn end_tree(&mut self, _tree: Option<&Tree>, _sink: &mut dyn MessageSink) {
        self.text = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::Diagnostic;
    use crate::walker::TreeWalker;
    use std::path::Path;

    const BOOKS: &str = r#"<bookstore>
  <book><title>A</title></book>
  <book><title>B</title></book>
  <book><title>C</title></book>
</bookstore>"#;

    fn run(check: QueryMatchCheck, text: &str) -> (Vec<Diagnostic>, Vec<Diagnostic>) {
        let mut walker = TreeWalker::default();
        walker.add_check(Box::new(check), Severity::Error);
        let diagnostics = walker.check_text(Path::new("/tmp/books.xml"), text);
        (walker.setup_diagnostics().to_vec(), diagnostics)
    }

    #[test]
    fn test_too_few_reports_once_at_root() {
        let config = QueryCheckConfig::new("/bookstore/magazine").with_bounds(1, 1);
        let (_, diagnostics) = run(QueryMatchCheck::xpath(config), BOOKS);

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].key, keys::QUERY_TOO_FEW);
        assert_eq!(diagnostics[0].args[1], "0");
        assert_eq!((diagnostics[0].location.line, diagnostics[0].location.column), (1, 1));
        assert_eq!(
            diagnostics[0].message,
            "Expected at least 1 match(es) for expression '/bookstore/magazine', but found 0."
        );
    }

    #[test]
    fn test_too_many_reports_each_excess_match() {
        let config = QueryCheckConfig::new("//book").with_bounds(0, 1);
        let (_, diagnostics) = run(QueryMatchCheck::xpath(config), BOOKS);

        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics.iter().all(|d| d.key == keys::QUERY_TOO_MANY));
        assert_eq!(diagnostics[0].location.line, 3);
        assert_eq!(diagnostics[0].location.column, 3);
        assert_eq!(diagnostics[1].location.line, 4);
        assert_eq!(
            diagnostics[0].message,
            "Expected at most 1 match(es) for expression '//book', but found 3."
        );
    }

    #[test]
    fn test_full_xpath_expressions() {
        let config = QueryCheckConfig::new("//book[position() mod 2 = 0]").with_bounds(0, 0);
        let (setup, diagnostics) = run(QueryMatchCheck::xpath(config), BOOKS);
        assert!(setup.is_empty());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].location.line, 3);

        let config = QueryCheckConfig::new("//book[matches(title, '^[AB]$')]").with_bounds(0, 1);
        let (setup, diagnostics) = run(QueryMatchCheck::xpath(config), BOOKS);
        assert!(setup.is_empty());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].location.line, 3);

        let config = QueryCheckConfig::new("count(//book) - 1").with_bounds(1, 1);
        let (setup, diagnostics) = run(QueryMatchCheck::xpath(config), BOOKS);
        assert!(setup.is_empty());
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_xquery_order_by() {
        let config = QueryCheckConfig::new(
            "for $b in //book order by $b/title descending return $b",
        )
        .with_bounds(0, 1);
        let (setup, diagnostics) = run(QueryMatchCheck::xquery(config), BOOKS);
        assert!(setup.is_empty());
        let lines: Vec<usize> = diagnostics.iter().map(|d| d.location.line).collect();
        assert_eq!(lines, vec![3, 2]);
    }

    #[test]
    fn test_within_bounds() {
        let config = QueryCheckConfig::new("//book[title != 'C']").with_bounds(0, 5);
        let (_, diagnostics) = run(QueryMatchCheck::xpath(config), BOOKS);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_max_below_min_takes_too_many_branch() {
        let config = QueryCheckConfig::new("//book[title != 'C']").with_bounds(3, 1);
        let (_, diagnostics) = run(QueryMatchCheck::xpath(config), BOOKS);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].key, keys::QUERY_TOO_MANY);
        assert_eq!(diagnostics[0].location.line, 3);

        let config = QueryCheckConfig::new("//magazine").with_bounds(3, 1);
        let (_, diagnostics) = run(QueryMatchCheck::xpath(config), BOOKS);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].key, keys::QUERY_TOO_FEW);
    }

    #[test]
    fn test_atomic_results_fall_back_to_root() {
        let config = QueryCheckConfig::new("count(//book), 'x'").with_bounds(0, 0);
        let (_, diagnostics) = run(QueryMatchCheck::xpath(config), BOOKS);
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics
            .iter()
            .all(|d| d.location.line == 1 && d.location.column == 1));
    }

    #[test]
    fn test_defaults_per_language() {
        let xpath = QueryMatchCheck::xpath(QueryCheckConfig::new("//a"));
        assert_eq!((xpath.min(), xpath.max()), (0, XPATH_DEFAULT_MAX));
        assert_eq!(xpath.id(), "XPathCheck");

        let xquery = QueryMatchCheck::xquery(QueryCheckConfig::new("//a"));
        assert_eq!((xquery.min(), xquery.max()), (0, XQUERY_DEFAULT_MAX));
        assert_eq!(xquery.id(), "XQueryCheck");
    }

    #[test]
    fn test_xquery_required() {
        let expression = "for $b in /bookstore/book where $b/title = 'XML for Dummies' return $b";
        let config = QueryCheckConfig::new(expression).with_bounds(1, 10);
        let (_, diagnostics) = run(QueryMatchCheck::xquery(config), BOOKS);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].message,
            format!(
                "Expected at least 1 match(es) for expression '{}', but found 0.",
                expression
            )
        );
        assert_eq!(diagnostics[0].check_id, "XQueryCheck");
    }

    #[test]
    fn test_xquery_default_forbids_matches() {
        let config = QueryCheckConfig::new("for $t in //title where $t = 'B' return $t");
        let (_, diagnostics) = run(QueryMatchCheck::xquery(config), BOOKS);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].location.line, 3);
    }

    #[test]
    fn test_namespaced_expression() {
        let text = r#"<s:store xmlns:s="urn:shop"><s:item/><item/></s:store>"#;
        let config = QueryCheckConfig::new("//p:item")
            .with_bounds(0, 0)
            .with_namespace("p", "urn:shop");
        let (_, diagnostics) = run(QueryMatchCheck::xpath(config), text);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].location.column, 29);
    }

    #[test]
    fn test_invalid_expression_disables_check() {
        let config = QueryCheckConfig::new("/bookstore[").with_bounds(1, 1);
        let (setup, diagnostics) = run(QueryMatchCheck::xpath(config), BOOKS);
        assert_eq!(setup.len(), 1);
        assert_eq!(setup[0].key, keys::QUERY_INVALID_EXPRESSION);
        assert_eq!(setup[0].check_id, "XPathCheck");
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_evaluation_failure_is_reported_per_file() {
        let config = QueryCheckConfig::new("//a").with_bounds(0, 10);
        let (_, diagnostics) = run(QueryMatchCheck::xpath(config), "<a>&undeclared;</a>");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].key, keys::QUERY_EVALUATION_FAILED);
    }

    #[test]
    fn test_unacceptable_token_never_runs() {
        let mut config = QueryCheckConfig::new("//book").with_bounds(0, 0);
        config.tokens = vec!["ELEMENT".to_string()];
        let (setup, diagnostics) = run(QueryMatchCheck::xpath(config), BOOKS);
        assert!(setup.is_empty());
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_config_deserialize() {
        let config: QueryCheckConfig = serde_yaml::from_str(
            "expression: //book\nmin: 1\nnamespaces:\n  - prefix: b\n    uri: urn:b\n",
        )
        .unwrap();
        assert_eq!(config.min, 1);
        assert_eq!(config.max, None);
        assert_eq!(config.namespaces, vec![NamespaceBinding::new("b", "urn:b")]);
    }
}
