//! xmlwalk - Tree-Walking Style Checks for XML
//!
//! Parses XML files into a typed node tree, walks the tree once per file and
//! notifies every registered check about the nodes it is interested in.
//! Files found clean are remembered by modification time and skipped on the
//! next run.
//!
//! # Architecture
//!
//! ```text
//! Checker -> TreeWalker -> reader/TreeBuilder -> Tree -> Check
//!                \-> ResultCache
//! ```
//!
//! The reader drives a quick-xml event stream into the [`TreeBuilder`], which
//! assembles a [`Tree`] of nodes tagged with a [`NodeKind`]. The walker
//! traverses that tree (iteratively by default, recursively on request) and
//! dispatches enter/leave notifications to checks in registration order.
//!
//! # Query Checks
//!
//! The built-in checks count the matches of an XPath 3.1 or XQuery
//! expression, evaluated with xee:
//!
//! ```yaml
//! walker:
//!   cache_file: .xmlwalk/cache.properties
//!
//! checks:
//!   - type: xpath
//!     id: RequiredTitle
//!     expression: /bookstore/book/title
//!     min: 1
//!     severity: warning
//! ```

pub mod builder;
pub mod cache;
pub mod check;
pub mod checker;
pub mod config;
pub mod diagnostic;
pub mod kind;
pub mod query;
pub mod reader;
pub mod tree;
pub mod walker;

// Re-export main types
pub use builder::{BuildError, ContentHandler, TreeBuilder, XmlAttribute};
pub use cache::ResultCache;
pub use check::{Check, FileContents, InitError};
pub use checker::{CheckFactory, Checker, CheckerError, RunReport};
pub use config::{CheckSpec, Config, ConfigError};
pub use diagnostic::{Diagnostic, Location, MessageCollector, MessageSink, Severity};
pub use kind::{KindError, NodeKind};
pub use query::engine::CompiledQuery;
pub use query::{
    NamespaceBinding, QueryCheckConfig, QueryError, QueryLanguage, QueryMatchCheck,
};
pub use reader::{parse_document, ReadError};
pub use tree::{NodeId, NodeRef, Tree};
pub use walker::{FileOutcome, Phase, RegistrationError, Traversal, TreeWalker};
