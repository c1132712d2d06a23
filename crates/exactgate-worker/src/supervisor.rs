//! Worker supervisor: at most one live detector worker, spawned on demand.
//!
//! Each spawn gets a new generation number. Four tasks serve a generation:
//! a stdin writer fed by a channel so request lines are never interleaved,
//! a stdout reader that routes protocol lines into the [`PendingTable`], a
//! stderr logger, and an exit watcher. On exit the watcher clears the
//! current handle (if it still belongs to that generation), lets the reader
//! drain what the worker already flushed, then rejects every request still
//! pending on that generation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use exactgate_core::ResponseLine;
use exactgate_core::protocol::parse_response_line;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};

use crate::error::WorkerError;
use crate::launcher::{BoxedReader, BoxedWriter, WorkerIo, WorkerLauncher};
use crate::pending::PendingTable;

/// How long the exit watcher waits for buffered stdout before sweeping.
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_millis(500);

pub(crate) type WriteAck = oneshot::Receiver<Result<(), String>>;

#[derive(Debug)]
struct OutboundLine {
    line: String,
    ack: oneshot::Sender<Result<(), String>>,
}

/// Cheap handle to one worker generation.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    generation: u64,
    outbound: mpsc::UnboundedSender<OutboundLine>,
}

impl WorkerHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue a full protocol line. The ack resolves once it is flushed.
    pub(crate) fn send(&self, line: String) -> Result<WriteAck, WorkerError> {
        let (ack, rx) = oneshot::channel();
        self.outbound
            .send(OutboundLine { line, ack })
            .map_err(|_| WorkerError::Transport("worker stdin is closed".to_string()))?;
        Ok(rx)
    }
}

type Slot = Arc<Mutex<Option<WorkerHandle>>>;

fn lock_slot(slot: &Mutex<Option<WorkerHandle>>) -> MutexGuard<'_, Option<WorkerHandle>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Supervisor<L> {
    launcher: L,
    pending: Arc<PendingTable>,
    current: Slot,
    spawn_lock: tokio::sync::Mutex<()>,
    generations: AtomicU64,
    drain_grace: Duration,
}

impl<L> std::fmt::Debug for Supervisor<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("generation", &self.current_generation())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl<L: WorkerLauncher> Supervisor<L> {
    pub fn new(launcher: L) -> Self {
        Self {
            launcher,
            pending: Arc::new(PendingTable::new()),
            current: Arc::new(Mutex::new(None)),
            spawn_lock: tokio::sync::Mutex::new(()),
            generations: AtomicU64::new(0),
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }

    #[must_use]
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// Handle to the live worker, spawning one if there is none.
    ///
    /// Concurrent callers during a spawn wait for it and share the result;
    /// exactly one launch happens.
    pub async fn ensure_alive(&self) -> Result<WorkerHandle, WorkerError> {
        if let Some(handle) = self.current() {
            return Ok(handle);
        }

        let _spawning = self.spawn_lock.lock().await;
        if let Some(handle) = self.current() {
            return Ok(handle);
        }

        let io = self.launcher.launch().await.inspect_err(|e| {
            tracing::error!(error = %e, kind = e.kind(), "detector worker launch failed");
        })?;
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(self.attach(generation, io))
    }

    fn attach(&self, generation: u64, io: WorkerIo) -> WorkerHandle {
        let WorkerIo {
            stdin,
            stdout,
            stderr,
            exit,
            pid,
        } = io;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let handle = WorkerHandle {
            generation,
            outbound,
        };
        // Installed before the exit watcher runs so a fast exit clears it.
        *lock_slot(&self.current) = Some(handle.clone());

        tokio::spawn(write_requests(outbound_rx, stdin, generation));
        let reader = tokio::spawn(read_responses(stdout, self.pending.clone(), generation));
        tokio::spawn(log_stderr(stderr, generation));

        let current = self.current.clone();
        let pending = self.pending.clone();
        let grace = self.drain_grace;
        tokio::spawn(async move {
            let exit = exit.await;
            {
                let mut slot = lock_slot(&current);
                if slot.as_ref().is_some_and(|h| h.generation == generation) {
                    *slot = None;
                }
            }
            tracing::warn!(generation, %exit, "detector worker exited");

            let abort = reader.abort_handle();
            if tokio::time::timeout(grace, reader).await.is_err() {
                abort.abort();
                tracing::debug!(generation, "stdout drain grace elapsed");
            }

            let swept = pending.sweep_generation(generation, &WorkerError::Crashed { exit });
            if swept > 0 {
                tracing::warn!(generation, swept, "rejected in-flight requests after worker exit");
            }
        });

        tracing::info!(generation, pid, "detector worker attached");
        handle
    }
}

impl<L> Supervisor<L> {
    fn current(&self) -> Option<WorkerHandle> {
        lock_slot(&self.current).clone()
    }

    pub fn is_alive(&self) -> bool {
        lock_slot(&self.current).is_some()
    }

    pub fn current_generation(&self) -> Option<u64> {
        lock_slot(&self.current).as_ref().map(WorkerHandle::generation)
    }

    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Close the live worker's stdin. The worker is expected to exit on EOF;
    /// its in-flight requests are rejected by the exit watcher.
    pub fn shutdown(&self) -> bool {
        let taken = lock_slot(&self.current).take();
        if let Some(handle) = &taken {
            tracing::info!(generation = handle.generation, "closing detector worker stdin");
        }
        taken.is_some()
    }
}

async fn write_line(stdin: &mut BoxedWriter, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

async fn write_requests(
    mut rx: mpsc::UnboundedReceiver<OutboundLine>,
    mut stdin: BoxedWriter,
    generation: u64,
) {
    while let Some(OutboundLine { line, ack }) = rx.recv().await {
        match write_line(&mut stdin, &line).await {
            Ok(()) => {
                let _ = ack.send(Ok(()));
            }
            Err(e) => {
                tracing::warn!(generation, error = %e, "detector worker stdin write failed");
                let _ = ack.send(Err(format!("stdin write failed: {e}")));
                break;
            }
        }
    }
    tracing::debug!(generation, "detector worker stdin writer stopped");
}

async fn read_responses(stdout: BoxedReader, pending: Arc<PendingTable>, generation: u64) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => route_line(&pending, generation, &String::from_utf8_lossy(&buf)),
            Err(e) => {
                tracing::warn!(generation, error = %e, "detector worker stdout read failed");
                break;
            }
        }
    }
    tracing::debug!(generation, "detector worker stdout closed");
}

fn route_line(pending: &PendingTable, generation: u64, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match parse_response_line(line) {
        Ok(ResponseLine::Addressed {
            request_id,
            response,
        }) => {
            if !pending.complete(&request_id, Ok(response)) {
                tracing::debug!(generation, request_id = %request_id, "dropping response for unknown or settled request");
            }
        }
        Ok(ResponseLine::Unaddressed) => {
            tracing::debug!(generation, "dropping worker line without request id");
        }
        Err(e) => match e.request_id() {
            Some(request_id) => {
                tracing::warn!(generation, request_id, error = %e, "malformed worker answer");
                let outcome = Err(WorkerError::Protocol(e.to_string()));
                if !pending.complete(request_id, outcome) {
                    tracing::debug!(generation, request_id, "malformed answer for unknown or settled request");
                }
            }
            None => {
                tracing::warn!(generation, error = %e, "dropping malformed worker line");
            }
        },
    }
}

async fn log_stderr(stderr: BoxedReader, generation: u64) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if !line.is_empty() {
                    tracing::info!(target: "exactgate::worker_stderr", generation, "{line}");
                }
            }
        }
    }
}
