//! Deferred rollback actions.
//!
//! A [`CleanupRegistry`] is owned by the top-level run context. Components
//! register actions as they change external state and unregister them once the
//! change is meant to outlive the run. Whatever is left runs in registration
//! order when the registry is drained, which happens at the latest when it is
//! dropped.

use pstart_common::{PstartError, PstartResult};

/// A deferred rollback step.
pub type CleanupAction = Box<dyn FnOnce() -> PstartResult<()>>;

struct CleanupEntry {
    name: String,
    action: CleanupAction,
}

/// Ordered, name-keyed set of rollback actions.
#[derive(Default)]
pub struct CleanupRegistry {
    entries: Vec<CleanupEntry>,
}

impl CleanupRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `action` under `name`.
    ///
    /// An existing entry with the same name is replaced in place, so it keeps
    /// its original position in the run order.
    pub fn register(&mut self, name: impl Into<String>, action: impl FnOnce() -> PstartResult<()> + 'static) {
        let name = name.into();
        let action: CleanupAction = Box::new(action);
        if let Some(entry) = self.entries.iter_mut().find(|e| e.name == name) {
            tracing::debug!(cleanup = %name, "Replacing cleanup");
            entry.action = action;
        } else {
            tracing::debug!(cleanup = %name, "Registering cleanup");
            self.entries.push(CleanupEntry { name, action });
        }
    }

    /// Register `action` to be called with `args`.
    pub fn register_with<A: 'static>(
        &mut self,
        name: impl Into<String>,
        args: A,
        action: impl FnOnce(A) -> PstartResult<()> + 'static,
    ) {
        self.register(name, move || action(args));
    }

    /// Remove the entry registered under `name` without running it.
    ///
    /// # Errors
    ///
    /// Returns [`PstartError::CleanupNotFound`] if nothing is registered under
    /// `name`.
    pub fn unregister(&mut self, name: &str) -> PstartResult<()> {
        let index = self
            .entries
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| PstartError::CleanupNotFound {
                name: name.to_string(),
            })?;
        self.entries.remove(index);
        tracing::debug!(cleanup = %name, "Cleanup unregistered");
        Ok(())
    }

    /// Whether an entry is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Registered names in run order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run and remove every pending action in registration order.
    ///
    /// A failing action is logged and does not stop the remaining ones.
    /// Returns the number of actions that failed.
    pub fn run_all(&mut self) -> usize {
        let entries = std::mem::take(&mut self.entries);
        if !entries.is_empty() {
            tracing::info!(count = entries.len(), "Running cleanups");
        }

        let mut failed = 0;
        for CleanupEntry { name, action } in entries {
            tracing::debug!(cleanup = %name, "Running cleanup");
            if let Err(err) = action() {
                failed += 1;
                tracing::error!(cleanup = %name, error = %err, "Cleanup failed");
            }
        }
        failed
    }
}

impl Drop for CleanupRegistry {
    fn drop(&mut self) {
        self.run_all();
    }
}

impl std::fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupRegistry")
            .field("entries", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    type Log = Rc<RefCell<Vec<String>>>;

    fn record(log: &Log, label: &str) -> impl FnOnce() -> PstartResult<()> + 'static {
        let log = Rc::clone(log);
        let label = label.to_string();
        move || {
            log.borrow_mut().push(label);
            Ok(())
        }
    }

    #[test]
    fn runs_in_registration_order() {
        let log = Log::default();
        let mut registry = CleanupRegistry::new();
        registry.register("a", record(&log, "a"));
        registry.register("b", record(&log, "b"));
        registry.register("c", record(&log, "c"));

        assert_eq!(registry.run_all(), 0);
        assert_eq!(*log.borrow(), ["a", "b", "c"]);
        assert!(registry.is_empty());
    }

    #[test]
    fn failing_action_does_not_block_later_ones() {
        let log = Log::default();
        let mut registry = CleanupRegistry::new();
        registry.register("first", record(&log, "first"));
        registry.register("broken", || Err(PstartError::fatal("boom")));
        registry.register("last", record(&log, "last"));

        assert_eq!(registry.run_all(), 1);
        assert_eq!(*log.borrow(), ["first", "last"]);
    }

    #[test]
    fn unregister_unknown_name_fails() {
        let mut registry = CleanupRegistry::new();
        let err = registry.unregister("missing").unwrap_err();
        assert!(matches!(err, PstartError::CleanupNotFound { name } if name == "missing"));
    }

    #[test]
    fn register_then_unregister_leaves_registry_empty() {
        let log = Log::default();
        let mut registry = CleanupRegistry::new();
        registry.register("x", record(&log, "x"));
        registry.unregister("x").unwrap();

        assert!(registry.is_empty());
        assert!(registry.unregister("x").is_err());
        drop(registry);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn reregistering_overwrites_in_place() {
        let log = Log::default();
        let mut registry = CleanupRegistry::new();
        registry.register("a", record(&log, "a1"));
        registry.register("b", record(&log, "b"));
        registry.register("a", record(&log, "a2"));

        assert_eq!(registry.names(), ["a", "b"]);
        registry.run_all();
        assert_eq!(*log.borrow(), ["a2", "b"]);
    }

    #[test]
    fn register_with_passes_args() {
        let log = Log::default();
        let mut registry = CleanupRegistry::new();
        let sink = Rc::clone(&log);
        registry.register_with("detach", ("box1".to_string(), 7), move |(name, n)| {
            sink.borrow_mut().push(format!("{name}:{n}"));
            Ok(())
        });
        registry.run_all();
        assert_eq!(*log.borrow(), ["box1:7"]);
    }

    #[test]
    fn drop_runs_pending_actions_once() {
        let log = Log::default();
        {
            let mut registry = CleanupRegistry::new();
            registry.register("a", record(&log, "a"));
            registry.run_all();
            registry.register("b", record(&log, "b"));
        }
        assert_eq!(*log.borrow(), ["a", "b"]);
    }
}
