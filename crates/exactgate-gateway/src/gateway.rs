//! Gateway: exact detection for a single model id.
//!
//! Requests pass the guardrail and mapping tables before anything reaches
//! the worker. Unavailable and unknown models are answered from the tables
//! alone, so they never spawn a worker or write a request line.

use std::sync::Arc;
use std::time::Duration;

use exactgate_core::{DetectionResult, InferenceResponse, ModelCatalog, ModelLookup};
use exactgate_worker::{Correlator, DEFAULT_TIMEOUT, WorkerLauncher};

use crate::error::GatewayError;

/// Explanation used when the worker sends none.
const DEFAULT_EXPLANATION: &str = "Exact detector response received.";

#[derive(Debug)]
pub struct Gateway<L> {
    correlator: Arc<Correlator<L>>,
    catalog: ModelCatalog,
    timeout: Duration,
}

impl<L: WorkerLauncher> Gateway<L> {
    pub fn new(correlator: Arc<Correlator<L>>, catalog: ModelCatalog) -> Self {
        Self {
            correlator,
            catalog,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn correlator(&self) -> &Arc<Correlator<L>> {
        &self.correlator
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn detect_exact(
        &self,
        model_id: &str,
        image_base64: &str,
    ) -> Result<DetectionResult, GatewayError> {
        if model_id.trim().is_empty() || image_base64.trim().is_empty() {
            return Err(GatewayError::BadRequest(
                "modelId and imageBase64 are required".to_string(),
            ));
        }

        let model_repo = match self.catalog.lookup(model_id) {
            ModelLookup::Unavailable(reason) => {
                tracing::debug!(model_id, "guardrail rejected exact detector request");
                return Err(GatewayError::UnavailableModel {
                    model_id: model_id.to_string(),
                    reason: reason.to_string(),
                });
            }
            ModelLookup::Unknown => return Err(GatewayError::UnknownModel(model_id.to_string())),
            ModelLookup::Mapped(repo) => repo.to_string(),
        };

        let response = self
            .correlator
            .dispatch(model_id, image_base64, self.timeout)
            .await
            .map_err(|source| GatewayError::Infrastructure {
                model_id: model_id.to_string(),
                source,
            })?;

        match response {
            InferenceResponse::Success(success) => {
                let explanation = if success.explanation.is_empty() {
                    DEFAULT_EXPLANATION.to_string()
                } else {
                    success.explanation
                };
                Ok(DetectionResult {
                    label: success.label,
                    confidence: success.confidence,
                    explanation,
                    raw_predictions: success.predictions,
                    model_repo: Some(success.model_repo.unwrap_or(model_repo)),
                })
            }
            InferenceResponse::Failure { error } => {
                tracing::info!(model_id, %model_repo, %error, "exact detector reported failure");
                Err(GatewayError::DetectorFailure {
                    model_id: model_id.to_string(),
                    model_repo,
                    message: error,
                })
            }
        }
    }
}
