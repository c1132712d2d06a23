//! exactgate-gateway: model-id guardrails in front of the detector worker,
//! and the three-member ensemble built on top of them.

pub mod ensemble;
pub mod error;
pub mod gateway;

pub use ensemble::EnsembleAggregator;
pub use error::{ErrorBody, GatewayError};
pub use gateway::Gateway;
