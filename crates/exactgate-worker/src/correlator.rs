//! Request correlator: many concurrent callers over one worker stdio pair.

use std::time::Duration;

use chrono::Utc;
use exactgate_core::protocol::RequestIdGenerator;
use exactgate_core::{InferenceRequest, InferenceResponse};
use tokio::sync::oneshot;
use tokio::time::{Instant, timeout_at};

use crate::error::WorkerError;
use crate::launcher::WorkerLauncher;
use crate::pending::{Completion, PendingTable};
use crate::supervisor::Supervisor;

/// Per-request budget when the caller does not pick one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub struct Correlator<L> {
    supervisor: Supervisor<L>,
    ids: RequestIdGenerator,
}

impl<L: WorkerLauncher> Correlator<L> {
    pub fn new(launcher: L) -> Self {
        Self::with_supervisor(Supervisor::new(launcher))
    }

    pub fn with_supervisor(supervisor: Supervisor<L>) -> Self {
        Self {
            supervisor,
            ids: RequestIdGenerator::new(),
        }
    }

    pub fn supervisor(&self) -> &Supervisor<L> {
        &self.supervisor
    }

    pub fn pending_count(&self) -> usize {
        self.supervisor.pending().len()
    }

    /// Send one inference request and wait for its answer.
    ///
    /// The timeout starts once a worker is available and covers both the
    /// stdin write and the wait for the response. Every call ends with
    /// exactly one outcome, and its pending entry is gone when it returns.
    pub async fn dispatch(
        &self,
        model_id: &str,
        image_base64: &str,
        timeout: Duration,
    ) -> Result<InferenceResponse, WorkerError> {
        let handle = self.supervisor.ensure_alive().await?;
        let deadline = Instant::now() + timeout;

        let request = InferenceRequest {
            request_id: self.ids.next_id(Utc::now()),
            model_id: model_id.to_string(),
            image_base64: image_base64.to_string(),
        };
        let line = request
            .to_line()
            .map_err(|e| WorkerError::Encode(e.to_string()))?;
        let request_id = request.request_id;

        let pending = self.supervisor.pending();
        let mut rx = pending.register(request_id.clone(), handle.generation());
        let _guard = PendingGuard {
            pending,
            request_id: &request_id,
        };
        tracing::debug!(
            request_id = %request_id,
            model_id,
            generation = handle.generation(),
            "dispatching exact detector request"
        );

        let expired = || WorkerError::Timeout {
            model_id: model_id.to_string(),
            elapsed: timeout,
        };

        let ack = match handle.send(line) {
            Ok(ack) => ack,
            Err(err) => return self.settle(&request_id, rx, err).await,
        };
        drop(handle);

        match timeout_at(deadline, ack).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(reason))) => {
                return self
                    .settle(&request_id, rx, WorkerError::Transport(reason))
                    .await;
            }
            Ok(Err(_)) => {
                let err = WorkerError::Transport("worker stdin is closed".to_string());
                return self.settle(&request_id, rx, err).await;
            }
            Err(_) => return self.settle(&request_id, rx, expired()).await,
        }

        match timeout_at(deadline, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(WorkerError::Transport(
                "pending request was dropped".to_string(),
            )),
            Err(_) => self.settle(&request_id, rx, expired()).await,
        }
    }

    /// Give up on a request with `err`, unless another path already claimed
    /// it; then that path's outcome wins.
    async fn settle(
        &self,
        request_id: &str,
        rx: oneshot::Receiver<Completion>,
        err: WorkerError,
    ) -> Result<InferenceResponse, WorkerError> {
        if self.supervisor.pending().cancel(request_id) {
            tracing::warn!(request_id, kind = err.kind(), error = %err, "exact detector request failed");
            return Err(err);
        }
        rx.await.unwrap_or(Err(err))
    }
}

/// Removes the entry if the dispatch future is dropped before it settles.
struct PendingGuard<'a> {
    pending: &'a PendingTable,
    request_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.pending.cancel(self.request_id) {
            tracing::debug!(request_id = self.request_id, "caller went away, pending request cancelled");
        }
    }
}
