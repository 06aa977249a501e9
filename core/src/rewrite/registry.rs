use std::sync::Mutex;

use lazy_static::lazy_static;

use crate::internal::*;

/// One guarded replacement for a qualified name. Immutable once registered.
#[derive(Clone)]
pub struct RewriteEntry {
    pub name: QualifiedName,
    pub guard: Guard,
    pub replacement: Arc<dyn Callable>,
    pub priority: i32,
    seq: usize,
}

impl std::fmt::Debug for RewriteEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("RewriteEntry")
            .field("name", &self.name)
            .field("guard", &self.guard)
            .field("priority", &self.priority)
            .field("seq", &self.seq)
            .finish()
    }
}

/// The ordered set of rewrite candidates, keyed by qualified name.
///
/// Multiple entries may target the same name; at most one is selected per
/// activation. Selection is a total order: explicit priority first, then
/// guard specificity, then registration recency. Two matching entries that
/// tie on priority and carry an identical guard cannot be ordered
/// meaningfully and are treated as a configuration bug.
#[derive(Debug, Default)]
pub struct RewriteRegistry {
    entries: Vec<RewriteEntry>,
}

impl RewriteRegistry {
    pub fn new() -> RewriteRegistry {
        RewriteRegistry::default()
    }

    pub fn register(&mut self, name: QualifiedName, guard: Guard, replacement: Arc<dyn Callable>) {
        self.register_with_priority(name, guard, 0, replacement)
    }

    pub fn register_with_priority(
        &mut self,
        name: QualifiedName,
        guard: Guard,
        priority: i32,
        replacement: Arc<dyn Callable>,
    ) {
        let seq = self.entries.len();
        log::debug!("rewrite candidate #{seq} for {name} (priority {priority}, guard {guard:?})");
        self.entries.push(RewriteEntry { name, guard, replacement, priority, seq });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Selects the replacement to run for `name` under `config`, if any.
    ///
    /// Zero matching entries is not an error: it means "no rewrite" and the
    /// original implementation runs.
    pub fn resolve_active(
        &self,
        name: &QualifiedName,
        config: &DeployConfig,
    ) -> PortResult<Option<Arc<dyn Callable>>> {
        let mut matching: Vec<&RewriteEntry> = self
            .entries
            .iter()
            .filter(|e| &e.name == name && e.guard.matches(config))
            .collect();
        if matching.is_empty() {
            return Ok(None);
        }
        matching.sort_by_key(|e| {
            (std::cmp::Reverse(e.priority), std::cmp::Reverse(e.guard.specificity()), std::cmp::Reverse(e.seq))
        });
        let winner = matching[0];
        let conflicting = matching[1..].iter().any(|e| {
            e.priority == winner.priority
                && e.guard.specificity() == winner.guard.specificity()
                && e.guard == winner.guard
        });
        if conflicting {
            return Err(ExportError::PredicateConflict(name.to_string()).into());
        }
        Ok(Some(winner.replacement.clone()))
    }

    /// Every qualified name with at least one matching entry, in first
    /// registration order, deduplicated. This is the set a patch scope
    /// patches.
    pub fn active_names(&self, config: &DeployConfig) -> Vec<QualifiedName> {
        let mut names: Vec<QualifiedName> = vec![];
        for entry in &self.entries {
            if entry.guard.matches(config) && !names.contains(&entry.name) {
                names.push(entry.name.clone());
            }
        }
        names
    }
}

lazy_static! {
    static ref DEFAULT: Mutex<RewriteRegistry> = Mutex::new(RewriteRegistry::new());
}

/// Runs `f` against the process-wide default registry.
///
/// Registration into this registry belongs to the explicit initialization
/// phase, before any patch scope opens; selection reads are what the export
/// workflows do afterwards.
pub fn with_default_registry<R>(f: impl FnOnce(&mut RewriteRegistry) -> R) -> R {
    let mut registry = DEFAULT.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut registry)
}
