//! Reconciliation of externally run jobs into the task registry.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info};

use crate::store::services::HashService;

use super::registry::{JobRegistry, RegistryError, TaskUpdater};
use super::types::{FIELD_STATUS, TaskColumns, TaskStatus, TaskToken};

/// Source of externally tracked job states, keyed by task token.
pub trait ExternalJobTracker: Send + Sync {
    /// Current fields for every job the tracker knows about.
    ///
    /// `known_terminal` lists jobs already recorded as finished; trackers may
    /// skip fetching details for them.
    fn poll(
        &self,
        known_terminal: &HashSet<TaskToken>,
    ) -> Result<BTreeMap<TaskToken, TaskColumns>, RegistryError>;
}

/// Applies tracker snapshots to tasks of one type, remembering which jobs have
/// already reached a terminal state so they are written only once.
#[derive(Debug, Clone)]
pub struct Reconciler {
    expected_type: String,
    terminal: HashSet<TaskToken>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new("process")
    }
}

impl Reconciler {
    pub fn new(expected_type: impl Into<String>) -> Self {
        Self {
            expected_type: expected_type.into(),
            terminal: HashSet::new(),
        }
    }

    pub fn terminal_cache(&self) -> &HashSet<TaskToken> {
        &self.terminal
    }

    /// Poll once and write updates. Returns the number of tasks updated.
    ///
    /// Jobs the registry no longer has, or that belong to another task type,
    /// are ignored.
    pub fn reconcile<H>(
        &mut self,
        registry: &JobRegistry<H>,
        tracker: &dyn ExternalJobTracker,
    ) -> Result<usize, RegistryError>
    where
        H: HashService,
    {
        let snapshot = tracker.poll(&self.terminal)?;
        let mut updated = 0;

        for (token, columns) in snapshot {
            if self.terminal.contains(&token) {
                continue;
            }
            // Cached even when the task is gone.
            let terminal = columns
                .get(FIELD_STATUS)
                .and_then(|s| s.parse::<TaskStatus>().ok())
                .is_some_and(|s| s.is_terminal());
            if terminal {
                self.terminal.insert(token.clone());
            }

            match registry.task_type(&token)? {
                Some(task_type) if task_type == self.expected_type => {
                    registry.update_task(&token, &columns)?;
                    updated += 1;
                }
                _ => {
                    debug!(token = %token, "reconcile skipped unknown or foreign task");
                }
            }
        }

        if updated > 0 {
            info!(updated, cached = self.terminal.len(), "reconciled external jobs");
        }
        Ok(updated)
    }
}
