//! Document tree
//!
//! Nodes live in an arena owned by the [`Tree`] and are linked through
//! parent, first-child and next-sibling indices. Children keep insertion
//! order. A tree is built once per file and is read-only for checks.

use crate::kind::NodeKind;
use std::fmt;

/// Index of a node inside its tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A node of the document tree
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    /// Line number (1-based)
    pub line: usize,
    /// Column number (1-based)
    pub column: usize,
    pub text: String,
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    last_child: Option<NodeId>,
    next_sibling: Option<NodeId>,
    child_count: usize,
}

/// A document tree with a single root
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    /// Create a tree holding only its root
    pub fn new(kind: NodeKind, line: usize, column: usize, text: &str) -> Self {
        Self {
            nodes: vec![Node {
                kind,
                line,
                column,
                text: text.to_string(),
                parent: None,
                first_child: None,
                last_child: None,
                next_sibling: None,
                child_count: 0,
            }],
        }
    }

    pub fn root_id(&self) -> NodeId {
        NodeId(0)
    }

    pub fn root(&self) -> NodeRef<'_> {
        self.get(self.root_id())
    }

    /// Handle on a node. Ids are only valid for the tree that issued them.
    pub fn get(&self, id: NodeId) -> NodeRef<'_> {
        NodeRef { tree: self, id }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Number of nodes in the tree
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Append a new last child under `parent`
    pub fn append(
        &mut self,
        parent: NodeId,
        kind: NodeKind,
        line: usize,
        column: usize,
        text: &str,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            line,
            column,
            text: text.to_string(),
            parent: Some(parent),
            first_child: None,
            last_child: None,
            next_sibling: None,
            child_count: 0,
        });

        let previous = self.nodes[parent.0].last_child;
        match previous {
            Some(prev) => self.nodes[prev.0].next_sibling = Some(id),
            None => self.nodes[parent.0].first_child = Some(id),
        }
        let parent_node = &mut self.nodes[parent.0];
        parent_node.last_child = Some(id);
        parent_node.child_count += 1;
        id
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].first_child
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].next_sibling
    }

    /// Count every node of `kind`
    pub fn count_kind(&self, kind: NodeKind) -> usize {
        self.nodes.iter().filter(|n| n.kind == kind).count()
    }
}

/// Borrowed handle on a tree node
#[derive(Clone, Copy)]
pub struct NodeRef<'t> {
    tree: &'t Tree,
    id: NodeId,
}

impl<'t> NodeRef<'t> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn tree(&self) -> &'t Tree {
        self.tree
    }

    fn data(&self) -> &'t Node {
        self.tree.node(self.id)
    }

    pub fn kind(&self) -> NodeKind {
        self.data().kind
    }

    pub fn line(&self) -> usize {
        self.data().line
    }

    pub fn column(&self) -> usize {
        self.data().column
    }

    pub fn text(&self) -> &'t str {
        &self.data().text
    }

    pub fn parent(&self) -> Option<NodeRef<'t>> {
        self.data().parent.map(|id| self.tree.get(id))
    }

    pub fn first_child(&self) -> Option<NodeRef<'t>> {
        self.data().first_child.map(|id| self.tree.get(id))
    }

    pub fn next_sibling(&self) -> Option<NodeRef<'t>> {
        self.data().next_sibling.map(|id| self.tree.get(id))
    }

    pub fn child_count(&self) -> usize {
        self.data().child_count
    }

    /// Children in insertion order
    pub fn children(&self) -> Children<'t> {
        Children {
            next: self.first_child(),
        }
    }

    /// First direct child of the given kind
    pub fn find_first(&self, kind: NodeKind) -> Option<NodeRef<'t>> {
        self.children().find(|c| c.kind() == kind)
    }
}

impl fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} [{}:{}]",
            self.kind(),
            self.text(),
            self.line(),
            self.column()
        )
    }
}

impl PartialEq for NodeRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.tree, other.tree) && self.id == other.id
    }
}

impl Eq for NodeRef<'_> {}

/// Iterator over the children of a node
pub struct Children<'t> {
    next: Option<NodeRef<'t>>,
}

impl<'t> Iterator for Children<'t> {
    type Item = NodeRef<'t>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.next_sibling();
        Some(current)
    }
}

/// Indented outline of the tree, one node per line
impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_node(f: &mut fmt::Formatter<'_>, node: NodeRef<'_>, depth: usize) -> fmt::Result {
            writeln!(f, "{}{:?}", "  ".repeat(depth), node)?;
            for child in node.children() {
                write_node(f, child, depth + 1)?;
            }
            Ok(())
        }
        write_node(f, self.root(), 0)
    }
}
