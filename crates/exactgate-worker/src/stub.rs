//! In-memory stub worker for tests.
//!
//! [`StubLauncher`] hands out [`WorkerIo`] backed by `tokio::io::duplex`
//! pipes. The other end is a [`StubWorker`] that a test drives by hand, or
//! that a background task drives with a response handler.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use exactgate_core::{InferenceRequest, InferenceResponse};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::sync::{mpsc, oneshot};

use crate::error::WorkerError;
use crate::launcher::{WorkerExit, WorkerIo, WorkerLauncher};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Answer for one request; `None` leaves it unanswered.
pub type StubHandler = Arc<dyn Fn(&InferenceRequest) -> Option<InferenceResponse> + Send + Sync>;

pub struct StubLauncher {
    launches: AtomicUsize,
    failure: Mutex<Option<WorkerError>>,
    launch_delay: Duration,
    handler: Option<StubHandler>,
    workers_tx: mpsc::UnboundedSender<StubWorker>,
    workers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<StubWorker>>,
}

impl std::fmt::Debug for StubLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubLauncher")
            .field("launches", &self.launches())
            .field("serving", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for StubLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl StubLauncher {
    /// Launched workers are queued for [`StubLauncher::next_worker`].
    pub fn new() -> Self {
        let (workers_tx, workers_rx) = mpsc::unbounded_channel();
        Self {
            launches: AtomicUsize::new(0),
            failure: Mutex::new(None),
            launch_delay: Duration::ZERO,
            handler: None,
            workers_tx,
            workers_rx: tokio::sync::Mutex::new(workers_rx),
        }
    }

    /// Every launched worker answers requests through `handler` until its
    /// stdin closes.
    pub fn serving<F>(handler: F) -> Self
    where
        F: Fn(&InferenceRequest) -> Option<InferenceResponse> + Send + Sync + 'static,
    {
        Self {
            handler: Some(Arc::new(handler)),
            ..Self::new()
        }
    }

    #[must_use]
    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = delay;
        self
    }

    /// Make every following launch fail with `error`.
    pub fn fail_launches(&self, error: WorkerError) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Next worker launched in manual mode.
    pub async fn next_worker(&self) -> Option<StubWorker> {
        self.workers_rx.lock().await.recv().await
    }

    async fn spawn(&self) -> Result<WorkerIo, WorkerError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let failure = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(err) = failure {
            return Err(err);
        }
        if !self.launch_delay.is_zero() {
            tokio::time::sleep(self.launch_delay).await;
        }

        let (io, worker) = pair();
        match &self.handler {
            Some(handler) => {
                tokio::spawn(serve(worker, handler.clone()));
            }
            None => {
                let _ = self.workers_tx.send(worker);
            }
        }
        Ok(io)
    }
}

impl WorkerLauncher for StubLauncher {
    fn launch(
        &self,
    ) -> impl std::future::Future<Output = Result<WorkerIo, WorkerError>> + Send {
        self.spawn()
    }
}

fn pair() -> (WorkerIo, StubWorker) {
    let (stdin_host, stdin_worker) = tokio::io::duplex(PIPE_CAPACITY);
    let (stdout_host, stdout_worker) = tokio::io::duplex(PIPE_CAPACITY);
    let (stderr_host, stderr_worker) = tokio::io::duplex(PIPE_CAPACITY);
    let (exit_tx, exit_rx) = oneshot::channel::<WorkerExit>();

    let io = WorkerIo {
        stdin: Box::new(stdin_host),
        stdout: Box::new(stdout_host),
        stderr: Box::new(stderr_host),
        exit: Box::pin(async move { exit_rx.await.unwrap_or_default() }),
        pid: None,
    };
    let worker = StubWorker {
        requests: BufReader::new(stdin_worker).lines(),
        stdout: stdout_worker,
        stderr: stderr_worker,
        exit_tx: Some(exit_tx),
    };
    (io, worker)
}

async fn serve(mut worker: StubWorker, handler: StubHandler) {
    while let Some(request) = worker.next_request().await {
        let Some(response) = handler(&request) else {
            continue;
        };
        if worker.respond(&request.request_id, &response).await.is_err() {
            break;
        }
    }
}

/// Worker side of a stub. Dropping it ends the worker with SIGKILL status.
#[derive(Debug)]
pub struct StubWorker {
    requests: Lines<BufReader<DuplexStream>>,
    stdout: DuplexStream,
    stderr: DuplexStream,
    exit_tx: Option<oneshot::Sender<WorkerExit>>,
}

impl StubWorker {
    /// Next request written by the host; `None` once stdin is closed.
    pub async fn next_request(&mut self) -> Option<InferenceRequest> {
        loop {
            let line = self.requests.next_line().await.ok()??;
            match serde_json::from_str(&line) {
                Ok(request) => return Some(request),
                Err(e) => tracing::warn!(error = %e, "stub worker got undecodable request"),
            }
        }
    }

    pub async fn respond(
        &mut self,
        request_id: &str,
        response: &InferenceResponse,
    ) -> std::io::Result<()> {
        let line = response.to_line(request_id).map_err(std::io::Error::other)?;
        self.send_raw(line.as_bytes()).await
    }

    /// Write arbitrary bytes to the protocol stream.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stdout.write_all(bytes).await?;
        self.stdout.flush().await
    }

    /// Write one diagnostic line to stderr.
    pub async fn log(&mut self, line: &str) -> std::io::Result<()> {
        self.stderr.write_all(line.as_bytes()).await?;
        self.stderr.write_all(b"\n").await?;
        self.stderr.flush().await
    }

    /// Close every pipe without reporting an exit; the returned sender
    /// reports it later.
    pub fn close_pipes(mut self) -> Option<oneshot::Sender<WorkerExit>> {
        self.exit_tx.take()
    }

    /// End the worker with an exit code.
    pub fn exit(mut self, code: i32) {
        if let Some(tx) = self.exit_tx.take() {
            let _ = tx.send(WorkerExit {
                code: Some(code),
                signal: None,
            });
        }
    }
}

impl Drop for StubWorker {
    fn drop(&mut self) {
        if let Some(tx) = self.exit_tx.take() {
            let _ = tx.send(WorkerExit {
                code: None,
                signal: Some(9),
            });
        }
    }
}
