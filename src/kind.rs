//! Node kinds of the XML tree
//!
//! XML trees reuse the token-type space of the host style-checking engine so
//! that rule plumbing written for other grammars applies unchanged. Every XML
//! kind is paired with exactly one host token in [`KIND_TABLE`]; the XML name
//! is what checks register against, the host id is the numeric discriminant.

use std::fmt;
use thiserror::Error;

/// Registry lookup failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KindError {
    #[error("unknown node kind name: {0}")]
    UnknownKind(String),

    #[error("unknown node kind id: {0}")]
    UnknownId(u32),
}

/// Discriminant of a tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    /// End of input
    Eof,
    /// Root of every document tree
    Document,
    /// Container identity of the document (directory)
    Path,
    /// An XML element
    Element,
    /// The attribute list of an element
    Attributes,
    /// A single attribute
    Attribute,
    /// Names: element and attribute local names, prefixes, file names
    Ident,
    /// Attribute values and namespace URIs
    StringLiteral,
    /// Character data
    Pcdata,
    /// Ignorable whitespace
    WhiteSpace,
    /// A processing instruction
    ProcessingInstruction,
    /// Target of a processing instruction
    ProcessingTarget,
    /// Data of a processing instruction
    ProcessingData,
    /// An entity reference the parser did not expand
    SkippedEntity,
    /// A namespace prefix declaration
    PrefixMapping,
}

/// One row of the XML kind to host token mapping
#[derive(Debug, Clone, Copy)]
pub struct KindEntry {
    pub kind: NodeKind,
    /// Name checks use to register interest
    pub name: &'static str,
    /// Host token the kind borrows its id from
    pub host_token: &'static str,
    /// Id in the host token space
    pub id: u32,
}

/// Hand-maintained 1:1 mapping between XML kinds and host tokens.
pub static KIND_TABLE: [KindEntry; 15] = [
    KindEntry { kind: NodeKind::Eof, name: "EOF", host_token: "EOF", id: 1 },
    KindEntry { kind: NodeKind::Document, name: "DOCUMENT", host_token: "CLASS_DEF", id: 14 },
    KindEntry { kind: NodeKind::Path, name: "PATH", host_token: "PACKAGE_DEF", id: 16 },
    KindEntry { kind: NodeKind::Element, name: "ELEMENT", host_token: "METHOD_DEF", id: 9 },
    KindEntry { kind: NodeKind::Attributes, name: "ATTRIBUTES", host_token: "PARAMETERS", id: 20 },
    KindEntry { kind: NodeKind::Attribute, name: "ATTRIBUTE", host_token: "PARAMETER_DEF", id: 21 },
    KindEntry { kind: NodeKind::Ident, name: "IDENT", host_token: "IDENT", id: 58 },
    KindEntry { kind: NodeKind::StringLiteral, name: "STRING_LITERAL", host_token: "STRING_LITERAL", id: 139 },
    KindEntry { kind: NodeKind::Pcdata, name: "PCDATA", host_token: "VARIABLE_DEF", id: 10 },
    KindEntry { kind: NodeKind::WhiteSpace, name: "WHITE_SPACE", host_token: "WILDCARD_TYPE", id: 163 },
    KindEntry { kind: NodeKind::ProcessingInstruction, name: "PROCESSING_INSTRUCTION", host_token: "ANNOTATIONS", id: 158 },
    KindEntry { kind: NodeKind::ProcessingTarget, name: "PROCESSING_TARGET", host_token: "ANNOTATION", id: 159 },
    KindEntry { kind: NodeKind::ProcessingData, name: "PROCESSING_DATA", host_token: "ANNOTATION_DEF", id: 157 },
    KindEntry { kind: NodeKind::SkippedEntity, name: "SKIPPED_ENTITY", host_token: "SINGLE_LINE_COMMENT", id: 144 },
    KindEntry { kind: NodeKind::PrefixMapping, name: "PREFIX_MAPPING", host_token: "IMPORT", id: 30 },
];

impl NodeKind {
    /// All kinds, in table order
    pub const ALL: [NodeKind; 15] = [
        NodeKind::Eof,
        NodeKind::Document,
        NodeKind::Path,
        NodeKind::Element,
        NodeKind::Attributes,
        NodeKind::Attribute,
        NodeKind::Ident,
        NodeKind::StringLiteral,
        NodeKind::Pcdata,
        NodeKind::WhiteSpace,
        NodeKind::ProcessingInstruction,
        NodeKind::ProcessingTarget,
        NodeKind::ProcessingData,
        NodeKind::SkippedEntity,
        NodeKind::PrefixMapping,
    ];

    fn entry(self) -> &'static KindEntry {
        // Table rows are declared in the same order as `ALL`.
        &KIND_TABLE[self as usize]
    }

    /// Registry name of the kind
    pub fn name(self) -> &'static str {
        self.entry().name
    }

    /// Numeric id in the shared host token space
    pub fn id(self) -> u32 {
        self.entry().id
    }

    /// Host token this kind is mapped onto
    pub fn host_token(self) -> &'static str {
        self.entry().host_token
    }

    /// Resolve a registry name
    pub fn from_name(name: &str) -> Result<Self, KindError> {
        KIND_TABLE
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.kind)
            .ok_or_else(|| KindError::UnknownKind(name.to_string()))
    }

    /// Resolve a numeric id
    pub fn from_id(id: u32) -> Result<Self, KindError> {
        KIND_TABLE
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.kind)
            .ok_or(KindError::UnknownId(id))
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for NodeKind {
    type Err = KindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

/// Id of the kind called `name`
pub fn id_of(name: &str) -> Result<u32, KindError> {
    NodeKind::from_name(name).map(NodeKind::id)
}

/// Name of the kind with host id `id`
pub fn name_of(id: u32) -> Result<&'static str, KindError> {
    NodeKind::from_id(id).map(NodeKind::name)
}
