//! WorkerLauncher trait and ProcessLauncher (real subprocess).
//!
//! The supervisor only sees a [`WorkerIo`]: three byte streams and a future
//! that resolves when the worker is gone. Tests inject in-memory workers
//! through the same trait.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;

use crate::error::WorkerError;
use crate::probe::InterpreterProber;

pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type ExitFuture = Pin<Box<dyn Future<Output = WorkerExit> + Send>>;

/// How a worker ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl WorkerExit {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "code={code}")?,
            None => f.write_str("code=none")?,
        }
        match self.signal {
            Some(signal) => write!(f, ", signal={signal}"),
            None => f.write_str(", signal=none"),
        }
    }
}

/// Streams of a freshly launched worker.
pub struct WorkerIo {
    /// Protocol requests, one JSON line each.
    pub stdin: BoxedWriter,
    /// Protocol responses.
    pub stdout: BoxedReader,
    /// Free-form diagnostics; never parsed.
    pub stderr: BoxedReader,
    /// Resolves once the worker has exited.
    pub exit: ExitFuture,
    /// OS process id, when there is one.
    pub pid: Option<u32>,
}

impl fmt::Debug for WorkerIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerIo").field("pid", &self.pid).finish_non_exhaustive()
    }
}

/// Starts workers. Enables stub injection for testing.
pub trait WorkerLauncher: Send + Sync + 'static {
    fn launch(&self) -> impl Future<Output = Result<WorkerIo, WorkerError>> + Send;
}

impl<T: WorkerLauncher> WorkerLauncher for std::sync::Arc<T> {
    fn launch(&self) -> impl Future<Output = Result<WorkerIo, WorkerError>> + Send {
        (**self).launch()
    }
}

// ─── ProcessLauncher ─────────────────────────────────────────────────

/// Spawns `<interpreter> <script>` with piped stdio.
///
/// The interpreter comes from the prober, so a failed probe surfaces as
/// [`WorkerError::Configuration`] on every launch.
#[derive(Debug)]
pub struct ProcessLauncher {
    prober: InterpreterProber,
    script: PathBuf,
}

impl ProcessLauncher {
    pub fn new(prober: InterpreterProber, script: impl Into<PathBuf>) -> Self {
        Self {
            prober,
            script: script.into(),
        }
    }

    pub fn prober(&self) -> &InterpreterProber {
        &self.prober
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    async fn spawn(&self) -> Result<WorkerIo, WorkerError> {
        let interpreter = self
            .prober
            .resolve()
            .await
            .map_err(WorkerError::Configuration)?;

        let mut cmd = Command::new(&interpreter.executable);
        cmd.arg(&self.script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let inherited = std::env::var("PYTHONPATH").ok();
        if let Some(path) = interpreter.python_path(inherited.as_deref()) {
            cmd.env("PYTHONPATH", path);
        }

        let mut child = cmd.spawn().map_err(|e| {
            WorkerError::Spawn(format!(
                "{} {}: {e}",
                interpreter.executable,
                self.script.display()
            ))
        })?;

        let missing = |stream: &str| WorkerError::Spawn(format!("worker {stream} is not piped"));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;
        let pid = child.id();

        tracing::info!(
            pid,
            executable = %interpreter.executable,
            script = %self.script.display(),
            "spawned detector worker"
        );

        let exit = Box::pin(async move {
            match child.wait().await {
                Ok(status) => WorkerExit::from_status(status),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to wait on detector worker");
                    WorkerExit::default()
                }
            }
        });

        Ok(WorkerIo {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            exit,
            pid,
        })
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self) -> impl Future<Output = Result<WorkerIo, WorkerError>> + Send {
        self.spawn()
    }
}
