//! Tree construction from structural parse events
//!
//! [`ContentHandler`] is the event contract a streaming parser drives;
//! [`TreeBuilder`] implements it and grows one [`Tree`] per document. The
//! builder keeps an insertion point that moves down on `start_element` and
//! back up on `end_element`. It trusts the feed for well-formedness and only
//! rejects streams that break its own preconditions.

use crate::kind::NodeKind;
use crate::tree::{NodeId, Tree};
use std::path::Path;
use thiserror::Error;

/// Event stream precondition failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("malformed event stream: {0}")]
    MalformedEventStream(String),

    #[error("unbalanced elements: end of '{0}' without matching start")]
    UnbalancedElements(String),
}

/// An attribute as reported by the parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    pub namespace_uri: String,
    pub local_name: String,
    pub qualified_name: String,
    pub value: String,
}

impl XmlAttribute {
    /// Attribute without namespace
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            namespace_uri: String::new(),
            local_name: name.to_string(),
            qualified_name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// Receiver of structural parse events, in document order
pub trait ContentHandler {
    /// Position of the event about to be delivered
    fn set_position(&mut self, line: usize, column: usize);

    fn start_document(&mut self, label: Option<&Path>) -> Result<(), BuildError>;

    fn end_document(&mut self) -> Result<(), BuildError>;

    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<(), BuildError>;

    fn end_prefix_mapping(&mut self, prefix: &str) -> Result<(), BuildError>;

    fn start_element(
        &mut self,
        namespace_uri: &str,
        local_name: &str,
        raw_name: &str,
        attributes: &[XmlAttribute],
    ) -> Result<(), BuildError>;

    fn end_element(
        &mut self,
        namespace_uri: &str,
        local_name: &str,
        raw_name: &str,
    ) -> Result<(), BuildError>;

    /// Character data; `start` is the offset reported with the run
    fn characters(&mut self, text: &str, start: usize) -> Result<(), BuildError>;

    fn ignorable_whitespace(&mut self, text: &str, start: usize) -> Result<(), BuildError>;

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), BuildError>;

    fn skipped_entity(&mut self, name: &str) -> Result<(), BuildError>;
}

/// Builds a [`Tree`] from a [`ContentHandler`] event stream
#[derive(Debug, Default)]
pub struct TreeBuilder {
    tree: Option<Tree>,
    insertion_point: Option<NodeId>,
    line: usize,
    column: usize,
    finished: bool,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self {
            line: 1,
            column: 1,
            ..Self::default()
        }
    }

    /// Node the next event attaches to
    pub fn insertion_point(&self) -> Option<NodeId> {
        self.insertion_point
    }

    /// Tree under construction
    pub fn tree(&self) -> Option<&Tree> {
        self.tree.as_ref()
    }

    /// Hand over the completed tree
    pub fn finish(self) -> Result<Tree, BuildError> {
        if !self.finished {
            return Err(BuildError::MalformedEventStream(
                "end of document not received".to_string(),
            ));
        }
        self.tree.ok_or_else(|| {
            BuildError::MalformedEventStream("start of document not received".to_string())
        })
    }

    fn cursor(&mut self, event: &str) -> Result<(&mut Tree, NodeId), BuildError> {
        if self.finished {
            return Err(BuildError::MalformedEventStream(format!(
                "{} after end of document",
                event
            )));
        }
        match (self.tree.as_mut(), self.insertion_point) {
            (Some(tree), Some(at)) => Ok((tree, at)),
            _ => Err(BuildError::MalformedEventStream(format!(
                "{} before start of document",
                event
            ))),
        }
    }

    fn append_leaf(
        &mut self,
        event: &str,
        kind: NodeKind,
        column: usize,
        text: &str,
    ) -> Result<NodeId, BuildError> {
        let line = self.line;
        let (tree, at) = self.cursor(event)?;
        Ok(tree.append(at, kind, line, column, text))
    }
}

impl ContentHandler for TreeBuilder {
    fn set_position(&mut self, line: usize, column: usize) {
        self.line = line;
        self.column = column;
    }

    fn start_document(&mut self, label: Option<&Path>) -> Result<(), BuildError> {
        if self.tree.is_some() {
            return Err(BuildError::MalformedEventStream(
                "document started twice".to_string(),
            ));
        }
        log::debug!("Starting XML tree for {:?}", label);
        let (line, col) = (self.line, self.column);

        let name = label
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut tree = Tree::new(NodeKind::Document, line, col, &name);
        let root = tree.root_id();

        // Path/name addressing shared with non-XML sources.
        if let Some(label) = label {
            let container = label
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            let path = tree.append(root, NodeKind::Path, line, col, &container);
            tree.append(path, NodeKind::Ident, line, col, &container);
            let ident = tree.append(root, NodeKind::Ident, line, col, &name);
            tree.append(ident, NodeKind::Ident, line, col, &name);
        }

        self.insertion_point = Some(root);
        self.tree = Some(tree);
        Ok(())
    }

    fn end_document(&mut self) -> Result<(), BuildError> {
        let (tree, at) = self.cursor("end of document")?;
        if at != tree.root_id() {
            let open = tree.get(at).text().to_string();
            return Err(BuildError::MalformedEventStream(format!(
                "end of document while element '{}' is open",
                open
            )));
        }
        log::debug!("Finished XML tree with {} nodes", tree.len());
        self.finished = true;
        Ok(())
    }

    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<(), BuildError> {
        log::debug!("Prefix mapping: {} -> {}", prefix, uri);
        let (line, col) = (self.line, self.column);
        let (tree, at) = self.cursor("prefix mapping")?;
        let mapping = tree.append(at, NodeKind::PrefixMapping, line, col, prefix);
        tree.append(mapping, NodeKind::Ident, line, col, prefix);
        tree.append(mapping, NodeKind::StringLiteral, line, col, uri);
        Ok(())
    }

    fn end_prefix_mapping(&mut self, prefix: &str) -> Result<(), BuildError> {
        log::debug!("End of prefix mapping: {}", prefix);
        self.cursor("end of prefix mapping").map(|_| ())
    }

    fn start_element(
        &mut self,
        _namespace_uri: &str,
        local_name: &str,
        raw_name: &str,
        attributes: &[XmlAttribute],
    ) -> Result<(), BuildError> {
        log::debug!("Opening element: {}", local_name);
        let (line, mut col) = (self.line, self.column);
        let (tree, at) = self.cursor("start of element")?;

        let element = tree.append(at, NodeKind::Element, line, col, raw_name);
        col += 1;
        tree.append(element, NodeKind::Ident, line, col, local_name);
        col += raw_name.len() + 1;
        let list = tree.append(element, NodeKind::Attributes, line, col, raw_name);

        // Best-effort columns: each attribute advances by name + value + 2.
        for attr in attributes {
            let node = tree.append(list, NodeKind::Attribute, line, col, raw_name);
            tree.append(node, NodeKind::Ident, line, col, &attr.local_name);
            let value_col = col + attr.local_name.len() + 1;
            tree.append(node, NodeKind::StringLiteral, line, value_col, &attr.value);
            col += attr.local_name.len() + attr.value.len() + 2;
        }

        self.insertion_point = Some(element);
        Ok(())
    }

    fn end_element(
        &mut self,
        _namespace_uri: &str,
        local_name: &str,
        raw_name: &str,
    ) -> Result<(), BuildError> {
        log::debug!("End of element: {}", local_name);
        let (tree, at) = self.cursor("end of element")?;
        match tree.parent(at) {
            Some(parent) => {
                self.insertion_point = Some(parent);
                Ok(())
            }
            None => Err(BuildError::UnbalancedElements(raw_name.to_string())),
        }
    }

    fn characters(&mut self, text: &str, start: usize) -> Result<(), BuildError> {
        let col = self.column + start;
        self.append_leaf("characters", NodeKind::Pcdata, col, text)
            .map(|_| ())
    }

    fn ignorable_whitespace(&mut self, text: &str, start: usize) -> Result<(), BuildError> {
        let col = self.column + start;
        self.append_leaf("ignorable whitespace", NodeKind::WhiteSpace, col, text)
            .map(|_| ())
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), BuildError> {
        log::debug!("Processing instruction: {} {}", target, data);
        let (line, col) = (self.line, self.column);
        let (tree, at) = self.cursor("processing instruction")?;
        let pi = tree.append(at, NodeKind::ProcessingInstruction, line, col, target);
        tree.append(pi, NodeKind::ProcessingTarget, line, col, target);
        tree.append(pi, NodeKind::ProcessingData, line, col, data);
        Ok(())
    }

    fn skipped_entity(&mut self, name: &str) -> Result<(), BuildError> {
        let col = self.column;
        self.append_leaf("skipped entity", NodeKind::SkippedEntity, col, name)
            .map(|_| ())
    }
}
