//! Streaming XML reader
//!
//! Drives a [`ContentHandler`] from raw document text using quick-xml. The
//! reader resolves namespace scopes itself so that `xmlns` declarations turn
//! into prefix-mapping events instead of attributes.

use crate::builder::{BuildError, ContentHandler, TreeBuilder, XmlAttribute};
use crate::tree::Tree;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::path::Path;
use thiserror::Error;

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Failure to turn a document into events
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("XML parse error at line {line}, column {column}: {message}")]
    Xml {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("{source} at line {line}, column {column}")]
    Build {
        line: usize,
        column: usize,
        #[source]
        source: BuildError,
    },
}

impl ReadError {
    /// Line and column where reading stopped
    pub fn position(&self) -> (usize, usize) {
        match self {
            ReadError::Xml { line, column, .. } | ReadError::Build { line, column, .. } => {
                (*line, *column)
            }
        }
    }
}

/// Parse `text` into a tree; `None` for an empty document
pub fn parse_document(text: &str, label: Option<&Path>) -> Result<Option<Tree>, ReadError> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    let mut builder = TreeBuilder::new();
    read_events(text, label, &mut builder)?;
    builder
        .finish()
        .map(Some)
        .map_err(|source| ReadError::Build {
            line: 0,
            column: 0,
            source,
        })
}

/// Maps byte offsets to 1-based line/column
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(content: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(content.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { starts }
    }

    fn position(&self, offset: usize) -> (usize, usize) {
        let line = self.starts.partition_point(|&start| start <= offset);
        let col = offset - self.starts.get(line.saturating_sub(1)).unwrap_or(&0) + 1;
        (line, col)
    }
}

/// Namespace declarations currently in scope
#[derive(Default)]
struct Scopes {
    frames: Vec<Vec<(String, String)>>,
}

impl Scopes {
    fn resolve(&self, prefix: &str) -> String {
        if prefix == "xml" {
            return XML_NAMESPACE.to_string();
        }
        self.frames
            .iter()
            .rev()
            .flat_map(|frame| frame.iter().rev())
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| uri.clone())
            .unwrap_or_default()
    }
}

/// An element start split into declarations and plain attributes
struct StartTag {
    raw_name: String,
    local_name: String,
    prefix: String,
    declarations: Vec<(String, String)>,
    attributes: Vec<(String, String, String, String)>,
}

fn split_qname(raw: &str) -> (&str, &str) {
    match raw.split_once(':') {
        Some((prefix, local)) => (prefix, local),
        None => ("", raw),
    }
}

fn read_start_tag(e: &BytesStart<'_>) -> Result<StartTag, String> {
    let raw_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
    let (prefix, local) = split_qname(&raw_name);
    let mut tag = StartTag {
        local_name: local.to_string(),
        prefix: prefix.to_string(),
        raw_name: raw_name.clone(),
        declarations: Vec::new(),
        attributes: Vec::new(),
    };

    for attr in e.attributes() {
        let attr = attr.map_err(|err| err.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|err| err.to_string())?
            .into_owned();
        if key == "xmlns" {
            tag.declarations.push((String::new(), value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            tag.declarations.push((prefix.to_string(), value));
        } else {
            let (prefix, local) = split_qname(&key);
            tag.attributes
                .push((prefix.to_string(), local.to_string(), key.clone(), value));
        }
    }
    Ok(tag)
}

/// Piece of character data
enum Segment {
    Text(String),
    Entity(String),
}

/// Split escaped text into decoded runs and unresolvable entity references
fn decode_text(raw: &str) -> Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut rest = raw;

    while let Some(amp) = rest.find('&') {
        current.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let end = after
            .find(';')
            .ok_or_else(|| "unterminated entity reference".to_string())?;
        let name = &after[..end];
        match unescape(&rest[amp..amp + end + 2]) {
            Ok(decoded) => current.push_str(&decoded),
            Err(_) if !name.starts_with('#') && !name.is_empty() => {
                if !current.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut current)));
                }
                segments.push(Segment::Entity(name.to_string()));
            }
            Err(err) => return Err(err.to_string()),
        }
        rest = &after[end + 1..];
    }
    current.push_str(rest);
    if !current.is_empty() {
        segments.push(Segment::Text(current));
    }
    Ok(segments)
}

/// Feed every structural event of `text` to `handler`
pub fn read_events<H: ContentHandler>(
    text: &str,
    label: Option<&Path>,
    handler: &mut H,
) -> Result<(), ReadError> {
    let index = LineIndex::new(text);
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(false);

    let mut scopes = Scopes::default();
    let mut open: Vec<(String, String, String)> = Vec::new();
    let mut root_closed = false;
    let mut buf = Vec::new();

    handler.set_position(1, 1);
    handler
        .start_document(label)
        .map_err(|source| ReadError::Build {
            line: 1,
            column: 1,
            source,
        })?;

    loop {
        let (line, column) = index.position(reader.buffer_position() as usize);
        let build_err = |source: BuildError| ReadError::Build {
            line,
            column,
            source,
        };
        let xml_err = |message: String| ReadError::Xml {
            line,
            column,
            message,
        };

        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| xml_err(e.to_string()))?;
        handler.set_position(line, column);
        let empty = matches!(event, Event::Empty(_));

        match event {
            Event::Start(e) | Event::Empty(e) => {
                if open.is_empty() && root_closed {
                    return Err(xml_err("multiple root elements".to_string()));
                }
                let tag = read_start_tag(&e).map_err(xml_err)?;

                for (prefix, uri) in &tag.declarations {
                    handler
                        .start_prefix_mapping(prefix, uri)
                        .map_err(build_err)?;
                }
                scopes.frames.push(tag.declarations.clone());

                let namespace = scopes.resolve(&tag.prefix);
                let attributes: Vec<XmlAttribute> = tag
                    .attributes
                    .iter()
                    .map(|(prefix, local, qname, value)| XmlAttribute {
                        namespace_uri: if prefix.is_empty() {
                            String::new()
                        } else {
                            scopes.resolve(prefix)
                        },
                        local_name: local.clone(),
                        qualified_name: qname.clone(),
                        value: value.clone(),
                    })
                    .collect();

                handler
                    .start_element(&namespace, &tag.local_name, &tag.raw_name, &attributes)
                    .map_err(build_err)?;
                open.push((namespace, tag.local_name, tag.raw_name));

                if empty {
                    close_element(handler, &mut scopes, &mut open).map_err(build_err)?;
                    root_closed = open.is_empty();
                }
            }

            Event::End(_) => {
                close_element(handler, &mut scopes, &mut open).map_err(build_err)?;
                root_closed = open.is_empty();
            }

            // Only whitespace may surround the root element.
            Event::Text(e) if open.is_empty() => {
                let raw = String::from_utf8_lossy(&e);
                if !raw.trim_matches(|c: char| c.is_whitespace() || c == '\u{feff}').is_empty() {
                    return Err(xml_err("text outside the root element".to_string()));
                }
            }

            Event::CData(_) if open.is_empty() => {
                return Err(xml_err("CDATA outside the root element".to_string()));
            }

            Event::Text(e) => {
                let raw = String::from_utf8_lossy(&e).to_string();
                let segments = decode_text(&raw).map_err(xml_err)?;
                let blank = segments.iter().all(|s| match s {
                    Segment::Text(t) => t.trim().is_empty(),
                    Segment::Entity(_) => false,
                });
                for segment in segments {
                    let delivered = match segment {
                        Segment::Text(t) if blank => handler.ignorable_whitespace(&t, 0),
                        Segment::Text(t) => handler.characters(&t, 0),
                        Segment::Entity(name) => handler.skipped_entity(&name),
                    };
                    delivered.map_err(build_err)?;
                }
            }

            Event::CData(e) => {
                let content = String::from_utf8_lossy(&e).to_string();
                handler.characters(&content, 0).map_err(build_err)?;
            }

            Event::PI(e) => {
                let target = String::from_utf8_lossy(e.target()).to_string();
                let data = String::from_utf8_lossy(e.content()).trim_start().to_string();
                handler
                    .processing_instruction(&target, &data)
                    .map_err(build_err)?;
            }

            Event::Eof => break,

            // Declaration, comments and DOCTYPE carry no tree nodes.
            _ => {}
        }

        buf.clear();
    }

    let (line, column) = index.position(text.len());
    handler.set_position(line, column);
    handler.end_document().map_err(|source| ReadError::Build {
        line,
        column,
        source,
    })
}

fn close_element<H: ContentHandler>(
    handler: &mut H,
    scopes: &mut Scopes,
    open: &mut Vec<(String, String, String)>,
) -> Result<(), BuildError> {
    let (namespace, local, raw) = open.pop().ok_or_else(|| {
        BuildError::UnbalancedElements("end tag without start tag".to_string())
    })?;
    handler.end_element(&namespace, &local, &raw)?;
    if let Some(frame) = scopes.frames.pop() {
        for (prefix, _) in frame.iter().rev() {
            handler.end_prefix_mapping(prefix)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::NodeKind;
    use crate::tree::NodeRef;

    fn parse(text: &str) -> Tree {
        parse_document(text, Some(Path::new("dir/test.xml")))
            .unwrap()
            .unwrap()
    }

    fn elements(tree: &Tree) -> Vec<NodeRef<'_>> {
        fn collect<'t>(node: NodeRef<'t>, out: &mut Vec<NodeRef<'t>>) {
            if node.kind() == NodeKind::Element {
                out.push(node);
            }
            for child in node.children() {
                collect(child, out);
            }
        }
        let mut out = Vec::new();
        collect(tree.root(), &mut out);
        out
    }

    #[test]
    fn test_empty_document_has_no_tree() {
        assert!(parse_document("", None).unwrap().is_none());
        assert!(parse_document("  \n ", None).unwrap().is_none());
    }

    #[test]
    fn test_element_count_matches_source() {
        let tree = parse(r#"<?xml version="1.0"?><root><a/><b><c/></b></root>"#);
        assert_eq!(tree.count_kind(NodeKind::Element), 4);
        let names: Vec<_> = elements(&tree).iter().map(|e| e.text()).collect();
        assert_eq!(names, vec!["root", "a", "b", "c"]);
    }

    #[test]
    fn test_positions() {
        let tree = parse("<root>\n  <child attr=\"1\"/>\n</root>");
        let child = elements(&tree)[1];
        assert_eq!(child.line(), 2);
        assert_eq!(child.column(), 3);
    }

    #[test]
    fn test_namespace_declarations_become_mappings() {
        let tree = parse(r#"<r xmlns="urn:d" xmlns:p="urn:p" p:a="1" b="2"/>"#);
        let root = tree.root();
        let mappings: Vec<_> = root
            .children()
            .filter(|c| c.kind() == NodeKind::PrefixMapping)
            .map(|c| {
                (
                    c.text().to_string(),
                    c.find_first(NodeKind::StringLiteral).unwrap().text().to_string(),
                )
            })
            .collect();
        assert_eq!(
            mappings,
            vec![
                (String::new(), "urn:d".to_string()),
                ("p".to_string(), "urn:p".to_string())
            ]
        );

        let element = root.find_first(NodeKind::Element).unwrap();
        let list = element.find_first(NodeKind::Attributes).unwrap();
        assert_eq!(list.child_count(), 2);
    }

    #[test]
    fn test_text_and_whitespace() {
        let tree = parse("<r>\n  <a>hello &amp; bye</a>\n</r>");
        let r = elements(&tree)[0];
        assert_eq!(r.children().filter(|c| c.kind() == NodeKind::WhiteSpace).count(), 2);
        let a = elements(&tree)[1];
        let text = a.find_first(NodeKind::Pcdata).unwrap();
        assert_eq!(text.text(), "hello & bye");
    }

    #[test]
    fn test_cdata_is_text() {
        let tree = parse("<r><![CDATA[<raw>]]></r>");
        let r = elements(&tree)[0];
        assert_eq!(r.find_first(NodeKind::Pcdata).unwrap().text(), "<raw>");
    }

    #[test]
    fn test_unknown_entity_is_skipped() {
        let tree = parse("<r>a&custom;b</r>");
        let r = elements(&tree)[0];
        let kinds: Vec<_> = r
            .children()
            .filter(|c| c.kind() != NodeKind::Ident && c.kind() != NodeKind::Attributes)
            .map(|c| (c.kind(), c.text().to_string()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (NodeKind::Pcdata, "a".to_string()),
                (NodeKind::SkippedEntity, "custom".to_string()),
                (NodeKind::Pcdata, "b".to_string()),
            ]
        );
    }

    #[test]
    fn test_processing_instruction() {
        let tree = parse(r#"<r><?render mode="fast"?></r>"#);
        let r = elements(&tree)[0];
        let pi = r.find_first(NodeKind::ProcessingInstruction).unwrap();
        assert_eq!(pi.text(), "render");
        assert_eq!(
            pi.find_first(NodeKind::ProcessingData).unwrap().text(),
            "mode=\"fast\""
        );
    }

    #[test]
    fn test_comments_are_ignored() {
        let tree = parse("<r><!-- note --></r>");
        let r = elements(&tree)[0];
        assert_eq!(r.child_count(), 2);
    }

    #[test]
    fn test_mismatched_tags_fail() {
        let err = parse_document("<a>\n<b></a>", None).unwrap_err();
        let (line, _) = err.position();
        assert!(line >= 1);
    }

    #[test]
    fn test_unclosed_element_fails() {
        assert!(parse_document("<a><b></b>", None).is_err());
    }

    #[test]
    fn test_second_root_fails() {
        let err = parse_document("<a/>\n<b/>", None).unwrap_err();
        assert!(matches!(err, ReadError::Xml { .. }));
        assert_eq!(err.position().0, 2);
        assert!(parse_document("<a></a><b></b>", None).is_err());
    }

    #[test]
    fn test_text_outside_root_fails() {
        assert!(matches!(
            parse_document("<a/>junk", None),
            Err(ReadError::Xml { .. })
        ));
        assert!(matches!(
            parse_document("junk<a/>", None),
            Err(ReadError::Xml { .. })
        ));
        assert!(parse_document("<a/><![CDATA[x]]>", None).is_err());
    }

    #[test]
    fn test_whitespace_and_comments_around_root() {
        let text = "<?xml version=\"1.0\"?>\n<!-- head -->\n<a/>\n<!-- tail -->\n\n";
        let tree = parse_document(text, None).unwrap().unwrap();
        assert_eq!(tree.count_kind(NodeKind::Element), 1);
    }

    #[test]
    fn test_line_index() {
        let index = LineIndex::new("ab\ncd\n");
        assert_eq!(index.position(0), (1, 1));
        assert_eq!(index.position(1), (1, 2));
        assert_eq!(index.position(3), (2, 1));
        assert_eq!(index.position(4), (2, 2));
    }
}
