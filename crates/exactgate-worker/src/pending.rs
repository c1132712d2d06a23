//! Pending request table.
//!
//! Each in-flight request owns one entry keyed by request id. An entry is
//! settled by whichever of response, timeout, or worker exit removes it
//! first; later attempts find nothing and are no-ops.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use exactgate_core::InferenceResponse;
use tokio::sync::oneshot;

use crate::error::WorkerError;

pub(crate) type Completion = Result<InferenceResponse, WorkerError>;

#[derive(Debug)]
struct PendingEntry {
    /// Worker generation the request was written to.
    generation: u64,
    tx: oneshot::Sender<Completion>,
}

#[derive(Debug, Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert an entry; the receiver yields its single outcome.
    pub(crate) fn register(
        &self,
        request_id: impl Into<String>,
        generation: u64,
    ) -> oneshot::Receiver<Completion> {
        let (tx, rx) = oneshot::channel();
        let request_id = request_id.into();
        if self
            .lock()
            .insert(request_id.clone(), PendingEntry { generation, tx })
            .is_some()
        {
            tracing::warn!(request_id = %request_id, "replaced pending entry with duplicate id");
        }
        rx
    }

    /// Claim and settle an entry. `false` if nothing was pending under `id`.
    pub(crate) fn complete(&self, request_id: &str, outcome: Completion) -> bool {
        let Some(entry) = self.lock().remove(request_id) else {
            return false;
        };
        // The waiter may already have given up; the entry is claimed either way.
        let _ = entry.tx.send(outcome);
        true
    }

    /// Claim an entry without settling it. Used by the waiter itself on
    /// timeout or write failure.
    pub(crate) fn cancel(&self, request_id: &str) -> bool {
        self.lock().remove(request_id).is_some()
    }

    /// Reject every entry written to `generation`. Returns how many were settled.
    pub(crate) fn sweep_generation(&self, generation: u64, error: &WorkerError) -> usize {
        let claimed: Vec<(String, PendingEntry)> = {
            let mut entries = self.lock();
            let ids: Vec<String> = entries
                .iter()
                .filter(|(_, e)| e.generation == generation)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|e| (id, e)))
                .collect()
        };

        let count = claimed.len();
        for (request_id, entry) in claimed {
            tracing::debug!(request_id = %request_id, generation, "rejecting in-flight request");
            let _ = entry.tx.send(Err(error.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.lock().contains_key(request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::WorkerExit;

    fn failure(msg: &str) -> Completion {
        Ok(InferenceResponse::Failure {
            error: msg.to_string(),
        })
    }

    #[tokio::test]
    async fn complete_settles_exactly_once() {
        let table = PendingTable::new();
        let rx = table.register("r_1", 1);
        assert!(table.complete("r_1", failure("first")));
        assert!(!table.complete("r_1", failure("second")));
        assert!(!table.cancel("r_1"));
        assert!(table.is_empty());

        let outcome = rx.await.expect("settled");
        assert!(matches!(outcome, Ok(InferenceResponse::Failure { error }) if error == "first"));
    }

    #[test]
    fn unknown_id_is_not_claimed() {
        let table = PendingTable::new();
        let _rx = table.register("r_1", 1);
        assert!(!table.complete("r_stale", failure("late")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn completion_after_waiter_dropped_still_clears_entry() {
        let table = PendingTable::new();
        drop(table.register("r_1", 1));
        assert!(table.complete("r_1", failure("nobody listening")));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn sweep_only_touches_its_generation() {
        let table = PendingTable::new();
        let old_a = table.register("r_1", 1);
        let old_b = table.register("r_2", 1);
        let _new = table.register("r_3", 2);

        let err = WorkerError::Crashed {
            exit: WorkerExit {
                code: Some(1),
                signal: None,
            },
        };
        assert_eq!(table.sweep_generation(1, &err), 2);
        assert_eq!(table.len(), 1);
        assert!(table.contains("r_3"));

        for rx in [old_a, old_b] {
            let outcome = rx.await.expect("settled");
            assert!(matches!(outcome, Err(WorkerError::Crashed { .. })));
        }
        assert_eq!(table.sweep_generation(1, &err), 0);
    }
}
