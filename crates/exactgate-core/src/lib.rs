//! exactgate-core: wire protocol, model catalog, and ensemble vote logic.
//!
//! Everything here is pure and deterministic. Time is passed in by callers;
//! no async runtime, no subprocess IO.

pub mod catalog;
pub mod ensemble;
pub mod protocol;
pub mod types;

pub use catalog::{ModelCatalog, ModelLookup};
pub use ensemble::{DetectorSpec, EnsembleVerdict, FakeKeywords, MemberVote};
pub use protocol::{InferenceRequest, InferenceResponse, InferenceSuccess, ResponseLine};
pub use types::{DetectionResult, Prediction, Verdict};
