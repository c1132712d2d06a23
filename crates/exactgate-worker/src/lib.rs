//! exactgate-worker: detector worker process boundary.
//! Probes for a capable interpreter, supervises the long-lived worker
//! subprocess, and multiplexes concurrent requests over its stdio by id.
//! No detector logic lives here; the worker is opaque behind the protocol.

pub mod correlator;
pub mod error;
pub mod launcher;
pub mod pending;
pub mod probe;
#[cfg(any(test, feature = "stub"))]
pub mod stub;
pub mod supervisor;

pub use correlator::{Correlator, DEFAULT_TIMEOUT};
pub use error::WorkerError;
pub use launcher::{ProcessLauncher, WorkerExit, WorkerIo, WorkerLauncher};
pub use pending::PendingTable;
pub use probe::{CapabilityRequirement, InterpreterProber, ResolvedInterpreter};
pub use supervisor::{Supervisor, WorkerHandle};
