//! Error types for the worker boundary.

use std::time::Duration;

use thiserror::Error;

use crate::launcher::WorkerExit;

/// Why a single dispatch did not produce a worker answer.
///
/// `Clone` because one worker exit rejects every call that was in flight.
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    /// No interpreter satisfied the capability requirement. Terminal until
    /// the prober is recreated.
    #[error("{0}")]
    Configuration(String),

    #[error("failed to spawn detector worker: {0}")]
    Spawn(String),

    #[error("detector worker is not available: {0}")]
    Transport(String),

    #[error(
        "Exact detector timed out after {:.1}s while loading/running model {model_id}.",
        .elapsed.as_secs_f64()
    )]
    Timeout { model_id: String, elapsed: Duration },

    #[error("detector worker exited unexpectedly ({exit})")]
    Crashed { exit: WorkerExit },

    #[error("failed to encode request: {0}")]
    Encode(String),

    /// The worker answered this request with a line that breaks the protocol.
    #[error("malformed detector response: {0}")]
    Protocol(String),
}

impl WorkerError {
    /// Short stable name for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Spawn(_) | Self::Transport(_) => "transport",
            Self::Timeout { .. } => "timeout",
            Self::Crashed { .. } => "crash",
            Self::Encode(_) => "encode",
            Self::Protocol(_) => "protocol",
        }
    }
}
