//! Tree walker
//!
//! Parses a file into a [`Tree`], then walks it depth-first and dispatches
//! enter/leave notifications to every check registered for the node's kind.

use crate::cache::ResultCache;
use crate::check::{Check, FileContents};
use crate::diagnostic::{keys, Diagnostic, Location, MessageCollector, Severity};
use crate::kind::NodeKind;
use crate::reader::parse_document;
use crate::tree::{NodeRef, Tree};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Identifier stamped on diagnostics raised by the walker itself
pub const WALKER_ID: &str = "TreeWalker";

/// Environment variable selecting the recursive traversal
pub const RECURSIVE_ENV: &str = "XMLWALK_RECURSIVE";

/// Failure to register a check
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Check '{check}' declares unknown node kind '{kind}'")]
    UnregisterableCheck { check: String, kind: String },
}

/// Traversal algorithm, chosen once for the whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Traversal {
    /// Parent-link iteration with constant stack depth
    #[default]
    Iterative,
    /// Child-then-sibling structural recursion
    Recursive,
}

impl Traversal {
    /// Recursive when `XMLWALK_RECURSIVE=true`, iterative otherwise
    pub fn from_env() -> Self {
        match std::env::var(RECURSIVE_ENV) {
            Ok(value) if value.eq_ignore_ascii_case("true") => Traversal::Recursive,
            _ => Traversal::Iterative,
        }
    }

    /// Use `configured` when set, else fall back to the environment
    pub fn resolve(configured: Option<Traversal>) -> Self {
        configured.unwrap_or_else(Self::from_env)
    }

    /// Call `f` for every (phase, node) pair of `tree` in walk order
    pub fn walk<'t, F>(self, tree: &'t Tree, mut f: F)
    where
        F: FnMut(Phase, NodeRef<'t>),
    {
        match self {
            Traversal::Iterative => {
                for (phase, node) in events(tree) {
                    f(phase, node);
                }
            }
            Traversal::Recursive => walk_recursive(tree.root(), &mut f),
        }
    }
}

/// Notification phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Enter,
    Leave,
}

/// Lazy walk order of a tree: enter in pre-order, leave in post-order
pub fn events(tree: &Tree) -> TreeEvents<'_> {
    TreeEvents {
        next: Some((Phase::Enter, tree.root())),
    }
}

/// Iterator returned by [`events`]
pub struct TreeEvents<'t> {
    next: Option<(Phase, NodeRef<'t>)>,
}

impl<'t> Iterator for TreeEvents<'t> {
    type Item = (Phase, NodeRef<'t>);

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        let (phase, node) = current;
        self.next = match phase {
            Phase::Enter => match node.first_child() {
                Some(child) => Some((Phase::Enter, child)),
                None => Some((Phase::Leave, node)),
            },
            Phase::Leave => match (node.next_sibling(), node.parent()) {
                (_, None) => None,
                (Some(sibling), Some(_)) => Some((Phase::Enter, sibling)),
                (None, Some(parent)) => Some((Phase::Leave, parent)),
            },
        };
        Some(current)
    }
}

fn walk_recursive<'t, F>(node: NodeRef<'t>, f: &mut F)
where
    F: FnMut(Phase, NodeRef<'t>),
{
    f(Phase::Enter, node);
    for child in node.children() {
        walk_recursive(child, f);
    }
    f(Phase::Leave, node);
}

/// Result of processing one file
#[derive(Debug)]
pub enum FileOutcome {
    /// Unchanged since it was last found clean
    Skipped,
    /// Analyzed; may be empty
    Checked(Vec<Diagnostic>),
}

struct RegisteredCheck {
    id: String,
    severity: Severity,
    check: Box<dyn Check>,
}

/// Dispatches tree notifications to registered checks
pub struct TreeWalker {
    checks: Vec<RegisteredCheck>,
    registry: HashMap<NodeKind, Vec<usize>>,
    traversal: Traversal,
    setup: Vec<Diagnostic>,
}

impl Default for TreeWalker {
    fn default() -> Self {
        Self::new(Traversal::default())
    }
}

impl TreeWalker {
    pub fn new(traversal: Traversal) -> Self {
        Self {
            checks: Vec::new(),
            registry: HashMap::new(),
            traversal,
            setup: Vec::new(),
        }
    }

    pub fn traversal(&self) -> Traversal {
        self.traversal
    }

    /// Number of registered checks
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Number of checks notified for nodes of `kind`
    pub fn interested(&self, kind: NodeKind) -> usize {
        self.registry.get(&kind).map_or(0, Vec::len)
    }

    /// Diagnostics raised while setting checks up
    pub fn setup_diagnostics(&self) -> &[Diagnostic] {
        &self.setup
    }

    /// Register `check` for the kinds it declares.
    ///
    /// Explicit kinds are kept only when the check accepts them; without
    /// explicit kinds the check's defaults apply. A check resolving to no kind
    /// still receives begin/end notifications.
    pub fn register_check(
        &mut self,
        check: Box<dyn Check>,
        severity: Severity,
    ) -> Result<(), RegistrationError> {
        let kinds = resolve_kinds(check.as_ref())?;
        let index = self.checks.len();
        log::debug!(
            "Registering check '{}' for {:?}",
            check.id(),
            kinds.iter().map(|k| k.name()).collect::<Vec<_>>()
        );
        for kind in kinds {
            self.registry.entry(kind).or_default().push(index);
        }
        self.checks.push(RegisteredCheck {
            id: check.id().to_string(),
            severity,
            check,
        });
        Ok(())
    }

    /// Initialize and register `check`, turning failures into one setup
    /// diagnostic. A check that fails either step is dropped.
    pub fn add_check(&mut self, mut check: Box<dyn Check>, severity: Severity) -> bool {
        if let Err(e) = check.init() {
            log::warn!("Check '{}' failed to initialize: {}", check.id(), e);
            self.setup
                .push(setup_diagnostic(check.id(), severity, &e.key, e.args.clone()));
            check.destroy();
            return false;
        }

        let id = check.id().to_string();
        match self.register_check(check, severity) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("{}", e);
                self.setup.push(setup_diagnostic(
                    &id,
                    severity,
                    keys::CHECK_UNREGISTERABLE,
                    vec![id.clone(), e.to_string()],
                ));
                false
            }
        }
    }

    /// Process one file, skipping it when the cache knows it is clean
    pub fn process_file(
        &mut self,
        path: &Path,
        text: &str,
        timestamp: u64,
        cache: &ResultCache,
    ) -> FileOutcome {
        let key = path.to_string_lossy();
        if cache.is_known_clean(&key, timestamp) {
            log::debug!("Skipping unchanged file {}", path.display());
            return FileOutcome::Skipped;
        }

        let diagnostics = self.check_text(path, text);
        if diagnostics.is_empty() {
            cache.mark_clean(&key, timestamp);
        } else {
            cache.invalidate(&key);
        }
        FileOutcome::Checked(diagnostics)
    }

    /// Parse and walk `text`, returning every diagnostic found
    pub fn check_text(&mut self, path: &Path, text: &str) -> Vec<Diagnostic> {
        let mut collector = MessageCollector::new(path.to_path_buf());

        let tree = match parse_document(text, Some(path)) {
            Ok(tree) => tree,
            Err(e) => {
                let (line, column) = e.position();
                log::debug!("Failed to parse {}: {}", path.display(), e);
                collector.add(Diagnostic::new(
                    WALKER_ID,
                    Severity::Error,
                    keys::GENERAL_EXCEPTION,
                    vec![e.to_string()],
                    Location::new(path.to_path_buf(), line, column),
                ));
                return collector.into_diagnostics();
            }
        };

        let contents = FileContents::new(path, text);
        self.walk(&contents, tree.as_ref(), &mut collector);
        collector.into_diagnostics()
    }

    /// Run begin hooks, the traversal and end hooks over an already built tree
    pub fn walk(
        &mut self,
        contents: &FileContents,
        tree: Option<&Tree>,
        collector: &mut MessageCollector,
    ) {
        for entry in &mut self.checks {
            let mut sink = collector.sink(&entry.id, entry.severity);
            entry.check.begin_tree(contents, tree, &mut sink);
        }

        if let Some(tree) = tree {
            let checks = &mut self.checks;
            let registry = &self.registry;
            self.traversal.walk(tree, |phase, node| {
                let Some(indices) = registry.get(&node.kind()) else {
                    return;
                };
                for &index in indices {
                    let entry = &mut checks[index];
                    let mut sink = collector.sink(&entry.id, entry.severity);
                    match phase {
                        Phase::Enter => entry.check.visit(node, &mut sink),
                        Phase::Leave => entry.check.leave(node, &mut sink),
                    }
                }
            });
        }

        for entry in &mut self.checks {
            let mut sink = collector.sink(&entry.id, entry.severity);
            entry.check.end_tree(tree, &mut sink);
        }
    }

    /// Release every registered check; the walker is empty afterwards
    pub fn destroy(&mut self) {
        self.registry.clear();
        for mut entry in self.checks.drain(..) {
            entry.check.destroy();
        }
    }
}

impl Drop for TreeWalker {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn resolve_kinds(check: &dyn Check) -> Result<Vec<NodeKind>, RegistrationError> {
    let unknown = |name: &str| RegistrationError::UnregisterableCheck {
        check: check.id().to_string(),
        kind: name.to_string(),
    };

    let mut kinds = Vec::new();
    let explicit = check.explicit_kinds();
    if explicit.is_empty() {
        for name in check.default_kinds() {
            let kind = NodeKind::from_name(name).map_err(|_| unknown(name))?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
    } else {
        let acceptable = check.acceptable_kinds();
        for name in explicit {
            let kind = NodeKind::from_name(name).map_err(|_| unknown(name))?;
            if !acceptable.contains(&name.as_str()) {
                log::warn!(
                    "Check '{}' does not accept node kind '{}', ignoring it",
                    check.id(),
                    name
                );
                continue;
            }
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
    }
    Ok(kinds)
}

fn setup_diagnostic(check_id: &str, severity: Severity, key: &str, args: Vec<String>) -> Diagnostic {
    Diagnostic::new(
        check_id,
        severity,
        key,
        args,
        Location::new(PathBuf::new(), 0, 0),
    )
}
