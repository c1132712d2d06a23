//! Runtime wiring: one correlator shared by the gateway and the ensemble.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use exactgate_core::ensemble::HYBRID_MODEL_ID;
use exactgate_core::{DetectionResult, EnsembleVerdict, ModelCatalog};
use exactgate_gateway::{EnsembleAggregator, Gateway, GatewayError};
use exactgate_worker::probe::default_candidates;
use exactgate_worker::{
    CapabilityRequirement, Correlator, InterpreterProber, ProcessLauncher, WorkerLauncher,
};
use serde::Serialize;

use crate::cli::WorkerOpts;

/// Single-model result or ensemble verdict, depending on the model id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Detection {
    Exact(DetectionResult),
    Hybrid(EnsembleVerdict),
}

pub struct Context<L> {
    gateway: Arc<Gateway<L>>,
    ensemble: EnsembleAggregator<L>,
}

impl Context<ProcessLauncher> {
    pub fn from_opts(opts: &WorkerOpts) -> Self {
        let launcher = ProcessLauncher::new(prober(opts), opts.worker_script.clone());
        Self::new(
            Arc::new(Correlator::new(launcher)),
            ModelCatalog::reference(),
            Duration::from_secs(opts.timeout_secs),
        )
    }
}

impl<L: WorkerLauncher> Context<L> {
    pub fn new(correlator: Arc<Correlator<L>>, catalog: ModelCatalog, timeout: Duration) -> Self {
        let gateway = Arc::new(Gateway::new(correlator, catalog).with_timeout(timeout));
        let ensemble = EnsembleAggregator::new(gateway.clone());
        Self { gateway, ensemble }
    }

    pub fn gateway(&self) -> &Gateway<L> {
        &self.gateway
    }

    pub fn ensemble(&self) -> &EnsembleAggregator<L> {
        &self.ensemble
    }

    /// `hybrid-detector` runs the ensemble; any other id goes to the gateway.
    pub async fn detect(&self, model_id: &str, image_base64: &str) -> Result<Detection, GatewayError> {
        if model_id == HYBRID_MODEL_ID {
            return self.evaluate(image_base64).await.map(Detection::Hybrid);
        }
        self.gateway
            .detect_exact(model_id, image_base64)
            .await
            .map(Detection::Exact)
    }

    pub async fn evaluate(&self, image_base64: &str) -> Result<EnsembleVerdict, GatewayError> {
        if image_base64.trim().is_empty() {
            return Err(GatewayError::BadRequest("imageBase64 is required".to_string()));
        }
        Ok(self.ensemble.evaluate(image_base64).await)
    }

    /// Close the worker's stdin so it exits with the host.
    pub fn shutdown(&self) {
        self.gateway.correlator().supervisor().shutdown();
    }
}

pub fn prober(opts: &WorkerOpts) -> InterpreterProber {
    InterpreterProber::new(
        default_candidates(opts.python.as_deref()),
        CapabilityRequirement::detector_stack(),
    )
}

/// Read an image file as the base64 payload the worker expects.
pub fn read_image_base64(path: &Path) -> anyhow::Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("cannot read image {}", path.display()))?;
    if bytes.is_empty() {
        anyhow::bail!("image {} is empty", path.display());
    }
    Ok(STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use exactgate_core::{InferenceResponse, InferenceSuccess, Prediction, Verdict};
    use exactgate_worker::stub::StubLauncher;

    fn stub_context() -> Context<StubLauncher> {
        let launcher = StubLauncher::serving(|req| {
            let score = if req.model_id == "umm-maybe-detector" { 0.3 } else { 0.99 };
            Some(InferenceResponse::Success(
                InferenceSuccess::new(Verdict::Fake, score, "stub")
                    .with_predictions(vec![Prediction::new("fake", score)]),
            ))
        });
        Context::new(
            Arc::new(Correlator::new(launcher)),
            ModelCatalog::reference(),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn hybrid_model_id_routes_to_ensemble() {
        let ctx = stub_context();
        let detection = ctx.detect(HYBRID_MODEL_ID, "aGk=").await.expect("verdict");
        let Detection::Hybrid(verdict) = detection else {
            panic!("expected ensemble verdict");
        };
        assert_eq!(verdict.label, Verdict::Fake);
        assert_eq!(verdict.members.len(), 3);
    }

    #[tokio::test]
    async fn exact_model_serializes_flat() {
        let ctx = stub_context();
        let detection = ctx.detect("univfd-clip", "aGk=").await.expect("result");
        let json = serde_json::to_value(&detection).expect("serialize");
        assert_eq!(json["label"], "FAKE");
        assert_eq!(json["modelRepo"], "slxhere/UnivFD");
        assert_eq!(json["rawPredictions"][0]["label"], "fake");
    }

    #[tokio::test]
    async fn evaluate_rejects_empty_image() {
        let ctx = stub_context();
        let err = ctx.evaluate("").await.expect_err("bad request");
        assert_eq!(err.status_code(), 400);
        assert_eq!(ctx.gateway().correlator().supervisor().launcher().launches(), 0);
    }

    #[test]
    fn image_is_base64_encoded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tiny.png");
        std::fs::write(&path, b"hello").expect("write");
        assert_eq!(read_image_base64(&path).expect("encode"), "aGVsbG8=");

        let empty = dir.path().join("empty.png");
        std::fs::write(&empty, b"").expect("write");
        assert!(read_image_base64(&empty).is_err());
        assert!(read_image_base64(&dir.path().join("missing.png")).is_err());
    }
}
