//! Query evaluation through xee
//!
//! Expressions run as XPath 3.1 against the raw document text. Each result
//! item is turned into a locator string inside the query itself, which is
//! then resolved against a roxmltree parse of the same text to recover
//! source positions:
//!
//! - `""` for atomic values and function items
//! - `"/"` followed by the 1-based element index at every level, for nodes
//! - a trailing `":k"` for text, comment and processing-instruction nodes,
//!   the node's 1-based index among its parent's children
//!
//! Attributes are positioned at their owner element.

use super::{flwor, NamespaceBinding, QueryError, QueryLanguage};
use roxmltree::{Document, ParsingOptions};
use xee_xpath::context::StaticContextBuilder;
use xee_xpath::{Documents, Queries, Query};

const DOCUMENT_URI: &str = "urn:xmlwalk:document";

const LOCATOR: &str = "if (. instance of node()) then concat('/', \
    string-join(ancestor-or-self::* ! string(count(preceding-sibling::*) + 1), '/'), \
    if (self::text() or self::comment() or self::processing-instruction()) \
    then concat(':', count(preceding-sibling::node()) + 1) else '') else ''";

/// An expression validated by xee, ready to run against documents
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    program: String,
    namespaces: Vec<NamespaceBinding>,
}

impl CompiledQuery {
    /// Compile `expression`; XQuery FLWOR clauses are rewritten first
    pub fn compile(
        language: QueryLanguage,
        expression: &str,
        namespaces: &[NamespaceBinding],
    ) -> Result<Self, QueryError> {
        let compile_error = |message: String| QueryError::Compile {
            expression: expression.to_string(),
            message,
        };

        let source = match language {
            QueryLanguage::Xpath => expression.to_string(),
            QueryLanguage::Xquery => flwor::rewrite(expression).map_err(compile_error)?,
        };
        log::debug!("Compiling '{}' as '{}'", expression, source);

        let query = Self {
            program: format!("({}) ! ({})", source, LOCATOR),
            namespaces: namespaces.to_vec(),
        };
        query.run(None).map_err(|e| compile_error(e.to_string()))?;
        Ok(query)
    }

    /// Evaluate against `text`, returning one position per result item.
    ///
    /// Node results carry their start position; anything else carries `None`.
    pub fn evaluate(&self, text: &str) -> Result<Vec<Option<(usize, usize)>>, QueryError> {
        let locators = self.run(Some(text))?;
        if locators.iter().all(|l| l.is_empty()) {
            return Ok(vec![None; locators.len()]);
        }

        let mut options = ParsingOptions::default();
        options.allow_dtd = true;
        match Document::parse_with_options(text, options) {
            Ok(doc) => Ok(locators.iter().map(|l| locate(&doc, l)).collect()),
            Err(e) => {
                log::debug!("No positions for query results: {}", e);
                Ok(vec![None; locators.len()])
            }
        }
    }

    /// Compile the program and, given a document, run it
    fn run(&self, text: Option<&str>) -> Result<Vec<String>, QueryError> {
        let mut context = StaticContextBuilder::default();
        if !self.namespaces.is_empty() {
            context.namespaces(
                self.namespaces
                    .iter()
                    .map(|b| (b.prefix.as_str(), b.uri.as_str())),
            );
        }
        let queries = Queries::new(context);
        let query = queries
            .many(&self.program, |_, item| Ok(item.try_into_value::<String>()?))
            .map_err(|e| QueryError::Compile {
                expression: self.program.clone(),
                message: e.to_string(),
            })?;

        let Some(text) = text else {
            return Ok(Vec::new());
        };

        let mut documents = Documents::new();
        let handle = match DOCUMENT_URI.try_into() {
            Ok(uri) => documents
                .add_string(uri, text)
                .map_err(|e| QueryError::Evaluation(e.to_string()))?,
            Err(_) => {
                return Err(QueryError::Evaluation(format!(
                    "invalid document URI {}",
                    DOCUMENT_URI
                )))
            }
        };
        query
            .execute(&mut documents, handle)
            .map_err(|e| QueryError::Evaluation(e.to_string()))
    }
}

/// Resolve a locator to a 1-based line and column; `None` for the document
fn locate(doc: &Document<'_>, locator: &str) -> Option<(usize, usize)> {
    let path = locator.strip_prefix('/')?;
    let (elements, child) = match path.split_once(':') {
        Some((elements, child)) => (elements, child.parse::<usize>().ok()),
        None => (path, None),
    };

    let mut node = doc.root();
    for step in elements.split('/').filter(|s| !s.is_empty()) {
        let next = step.parse::<usize>().ok().and_then(|index| {
            node.children()
                .filter(|n| n.is_element())
                .nth(index.checked_sub(1)?)
        });
        match next {
            Some(next) => node = next,
            None => break,
        }
    }
    if let Some(found) = child
        .and_then(|k| node.children().nth(k.checked_sub(1)?))
        .filter(|n| !n.is_element())
    {
        node = found;
    }

    if node.is_root() {
        return None;
    }
    let pos = doc.text_pos_at(node.range().start);
    Some((pos.row as usize, pos.col as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SHOP: &str = r#"<shop>
  <book id="a"><title>A</title><price>10</price></book>
  <book id="b"><title>B</title><price>25</price></book>
  <book id="c"><title>C</title><price>40</price></book>
  <!-- sale -->
</shop>"#;

    fn xpath(expression: &str) -> Vec<Option<(usize, usize)>> {
        CompiledQuery::compile(QueryLanguage::Xpath, expression, &[])
            .unwrap()
            .evaluate(SHOP)
            .unwrap()
    }

    fn xquery(expression: &str) -> Vec<Option<(usize, usize)>> {
        CompiledQuery::compile(QueryLanguage::Xquery, expression, &[])
            .unwrap()
            .evaluate(SHOP)
            .unwrap()
    }

    #[test]
    fn test_paths_and_positions() {
        assert_eq!(xpath("//book"), vec![Some((2, 3)), Some((3, 3)), Some((4, 3))]);
        assert_eq!(xpath("//book[2]/title"), vec![Some((3, 16))]);
        assert_eq!(xpath("/shop"), vec![Some((1, 1))]);
        assert_eq!(xpath("/"), vec![None]);
        assert!(xpath("//magazine").is_empty());
    }

    #[test]
    fn test_attributes_at_owner_element() {
        assert_eq!(xpath("//book[@id = 'c']/@id"), vec![Some((4, 3))]);
    }

    #[test]
    fn test_text_and_comment_nodes() {
        assert_eq!(xpath("//book[1]/title/text()"), vec![Some((2, 23))]);
        assert_eq!(xpath("//comment()"), vec![Some((5, 3))]);
    }

    #[test]
    fn test_arithmetic_and_aggregates() {
        assert_eq!(xpath("//book[price * 2 > 50]"), vec![Some((4, 3))]);
        assert_eq!(xpath("//book[position() mod 2 = 0]"), vec![Some((3, 3))]);
        assert_eq!(xpath("count(//book) - 1"), vec![None]);
        assert_eq!(xpath("/shop[sum(//price) = 75]"), vec![Some((1, 1))]);
        assert_eq!(xpath("if (//book) then 1 else 0"), vec![None]);
    }

    #[test]
    fn test_let_and_for_expressions() {
        assert_eq!(xpath("let $b := //book return $b").len(), 3);
        assert_eq!(xpath("for $b in //book return $b/title").len(), 3);
        assert_eq!(xpath("count(//book), 'x'"), vec![None, None]);
    }

    #[test]
    fn test_regex_functions() {
        assert_eq!(xpath("//book[matches(title, '^[AB]$')]").len(), 2);
        assert_eq!(xpath("//book[matches(@id, 'C', 'i')]"), vec![Some((4, 3))]);
    }

    #[test]
    fn test_xquery_clauses() {
        assert_eq!(
            xquery("for $b in //book where $b/price > 20 return $b/title"),
            vec![Some((3, 16)), Some((4, 16))]
        );
        assert_eq!(
            xquery("for $b in //book let $p := $b/price where $p > 20 return $b"),
            vec![Some((3, 3)), Some((4, 3))]
        );
        assert_eq!(
            xquery("for $b at $i in //book where $i > 1 return $b"),
            vec![Some((3, 3)), Some((4, 3))]
        );
        assert_eq!(
            xquery("for $b in //book order by number($b/price) descending return $b"),
            vec![Some((4, 3)), Some((3, 3)), Some((2, 3))]
        );
    }

    #[test]
    fn test_namespaces() {
        let text = r#"<s:store xmlns:s="urn:shop"><s:item/><item/></s:store>"#;
        let bindings = vec![NamespaceBinding::new("p", "urn:shop")];
        let query = CompiledQuery::compile(QueryLanguage::Xpath, "//p:item", &bindings).unwrap();
        assert_eq!(query.evaluate(text).unwrap(), vec![Some((1, 29))]);

        let query = CompiledQuery::compile(QueryLanguage::Xpath, "//item", &bindings).unwrap();
        assert_eq!(query.evaluate(text).unwrap(), vec![Some((1, 38))]);
    }

    #[test]
    fn test_compile_errors() {
        for expression in ["//book[", "//undeclared:item", "unknown-function(1)"] {
            let err = CompiledQuery::compile(QueryLanguage::Xpath, expression, &[]).unwrap_err();
            assert!(
                matches!(err, QueryError::Compile { expression: ref e, .. } if e == expression),
                "{}",
                expression
            );
        }
        assert!(CompiledQuery::compile(
            QueryLanguage::Xquery,
            "for $a in //a, $b in //b order by $b return $a",
            &[]
        )
        .is_err());
    }

    #[test]
    fn test_malformed_document_fails_evaluation() {
        let query = CompiledQuery::compile(QueryLanguage::Xpath, "//a", &[]).unwrap();
        assert!(matches!(
            query.evaluate("<a><b></a>"),
            Err(QueryError::Evaluation(_))
        ));
    }
}
