//! Post-sync callbacks.
//!
//! Hooks run after each synced entry, inside the same atomic unit. Every
//! hook's `synced` callback runs first, then the role-specific callback
//! (`synced_as_subject` or `synced_as_affected`). Any callback may return
//! [`HookFlow::Stop`] to skip the remaining callbacks for that entry.

use std::fmt;
use std::sync::Arc;

use tandem_core::types::{Attributes, LogEntry};

/// How an entry relates to the checklist that synced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRole {
    Subject,
    Affected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookFlow {
    Continue,
    Stop,
}

/// What a hook sees for one synced entry.
#[derive(Debug, Clone, Copy)]
pub struct SyncedEntry<'a> {
    pub entry: &'a LogEntry,
    /// The row as written to production, `None` for deletions.
    pub attributes: Option<&'a Attributes>,
}

pub trait SyncHook: Send + Sync {
    fn synced(&self, _synced: &SyncedEntry<'_>) -> HookFlow {
        HookFlow::Continue
    }

    fn synced_as_subject(&self, _synced: &SyncedEntry<'_>) -> HookFlow {
        HookFlow::Continue
    }

    fn synced_as_affected(&self, _synced: &SyncedEntry<'_>) -> HookFlow {
        HookFlow::Continue
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Synced,
    Subject,
    Affected,
}

/// Ordered hook registry.
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn SyncHook>>,
}

impl fmt::Debug for HookChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookChain")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hook: Arc<dyn SyncHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Invoke the chain for one entry. `role` is `None` outside checklist
    /// syncs, in which case only `synced` runs.
    ///
    /// Returns the number of callbacks invoked.
    pub fn run(&self, synced: &SyncedEntry<'_>, role: Option<SyncRole>) -> usize {
        let role_stage = match role {
            Some(SyncRole::Subject) => Some(Stage::Subject),
            Some(SyncRole::Affected) => Some(Stage::Affected),
            None => None,
        };
        let plan = self
            .hooks
            .iter()
            .map(|h| (Stage::Synced, h))
            .chain(role_stage.into_iter().flat_map(|s| self.hooks.iter().map(move |h| (s, h))));

        let mut invoked = 0;
        for (stage, hook) in plan {
            invoked += 1;
            let flow = match stage {
                Stage::Synced => hook.synced(synced),
                Stage::Subject => hook.synced_as_subject(synced),
                Stage::Affected => hook.synced_as_affected(synced),
            };
            if flow == HookFlow::Stop {
                tracing::debug!("hook chain stopped for entry {}", synced.entry.id);
                break;
            }
        }
        invoked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tandem_core::types::{EntryId, Key, Operation, SessionId};

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<&'static str>>,
        stop_on_synced: bool,
    }

    impl SyncHook for Recorder {
        fn synced(&self, _: &SyncedEntry<'_>) -> HookFlow {
            self.calls.lock().push("synced");
            if self.stop_on_synced {
                HookFlow::Stop
            } else {
                HookFlow::Continue
            }
        }

        fn synced_as_subject(&self, _: &SyncedEntry<'_>) -> HookFlow {
            self.calls.lock().push("subject");
            HookFlow::Continue
        }

        fn synced_as_affected(&self, _: &SyncedEntry<'_>) -> HookFlow {
            self.calls.lock().push("affected");
            HookFlow::Continue
        }
    }

    fn entry() -> LogEntry {
        LogEntry {
            id: EntryId(1),
            operation: Operation::Update,
            key: Some(Key::new("posts", 1)),
            commit_id: None,
            session: SessionId(1),
            subject: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn synced_runs_before_role_callbacks() {
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let mut chain = HookChain::new();
        chain.push(a.clone());
        chain.push(b.clone());

        let e = entry();
        let synced = SyncedEntry {
            entry: &e,
            attributes: None,
        };
        assert_eq!(chain.run(&synced, Some(SyncRole::Subject)), 4);
        assert_eq!(*a.calls.lock(), vec!["synced", "subject"]);
        assert_eq!(*b.calls.lock(), vec!["synced", "subject"]);
    }

    #[test]
    fn stop_skips_the_rest_of_the_chain() {
        let a = Arc::new(Recorder {
            stop_on_synced: true,
            ..Recorder::default()
        });
        let b = Arc::new(Recorder::default());
        let mut chain = HookChain::new();
        chain.push(a.clone());
        chain.push(b.clone());

        let e = entry();
        let synced = SyncedEntry {
            entry: &e,
            attributes: None,
        };
        assert_eq!(chain.run(&synced, Some(SyncRole::Affected)), 1);
        assert!(b.calls.lock().is_empty());
    }

    #[test]
    fn drain_mode_only_runs_synced() {
        let a = Arc::new(Recorder::default());
        let mut chain = HookChain::new();
        chain.push(a.clone());
        let e = entry();
        let synced = SyncedEntry {
            entry: &e,
            attributes: None,
        };
        chain.run(&synced, None);
        assert_eq!(*a.calls.lock(), vec!["synced"]);
    }
}
