//! Gateway and ensemble against an in-memory detector worker.

use std::sync::Arc;
use std::time::Duration;

use exactgate_core::{
    InferenceRequest, InferenceResponse, InferenceSuccess, ModelCatalog, Prediction, Verdict,
};
use exactgate_gateway::{EnsembleAggregator, Gateway, GatewayError};
use exactgate_worker::Correlator;
use exactgate_worker::stub::StubLauncher;

const IMAGE: &str = "iVBORw0KGgo=";

fn answer(label: Verdict, predictions: &[(&str, f64)]) -> Option<InferenceResponse> {
    let top = predictions
        .iter()
        .map(|&(_, s)| s)
        .fold(0.0_f64, f64::max);
    Some(InferenceResponse::Success(
        InferenceSuccess::new(label, top, "stub").with_predictions(
            predictions
                .iter()
                .map(|&(l, s)| Prediction::new(l, s))
                .collect(),
        ),
    ))
}

fn failure(message: &str) -> Option<InferenceResponse> {
    Some(InferenceResponse::Failure {
        error: message.to_string(),
    })
}

fn hybrid<F>(handler: F) -> (Arc<Gateway<StubLauncher>>, EnsembleAggregator<StubLauncher>)
where
    F: Fn(&InferenceRequest) -> Option<InferenceResponse> + Send + Sync + 'static,
{
    let correlator = Arc::new(Correlator::new(StubLauncher::serving(handler)));
    let gateway = Arc::new(
        Gateway::new(correlator, ModelCatalog::reference()).with_timeout(Duration::from_millis(100)),
    );
    let aggregator = EnsembleAggregator::new(gateway.clone());
    (gateway, aggregator)
}

// ── 1. Guardrail ─────────────────────────────────────────────────────

#[tokio::test]
async fn guardrail_model_never_reaches_the_worker() {
    let correlator = Arc::new(Correlator::new(StubLauncher::new()));
    let gateway = Gateway::new(correlator.clone(), ModelCatalog::reference());

    let err = gateway
        .detect_exact("distil-dire", IMAGE)
        .await
        .expect_err("guardrail");
    assert!(matches!(&err, GatewayError::UnavailableModel { model_id, .. } if model_id == "distil-dire"));
    assert_eq!(err.status_code(), 422);
    assert_eq!(correlator.supervisor().launcher().launches(), 0);

    // Same with a worker already running: nothing is written to its stdin.
    correlator.supervisor().ensure_alive().await.expect("spawn");
    let mut worker = correlator
        .supervisor()
        .launcher()
        .next_worker()
        .await
        .expect("worker");
    let err = gateway
        .detect_exact("hive-det", IMAGE)
        .await
        .expect_err("guardrail");
    assert!(err.to_string().contains("proprietary vendor access"));
    let read = tokio::time::timeout(Duration::from_millis(30), worker.next_request()).await;
    assert!(read.is_err(), "worker stdin must stay silent");
    assert_eq!(correlator.pending_count(), 0);
}

// ── 2. Ensemble verdicts ─────────────────────────────────────────────

#[tokio::test]
async fn two_fake_votes_make_fake() {
    let (_, aggregator) = hybrid(|req| match req.model_id.as_str() {
        "ateeqq-detector" => answer(Verdict::Real, &[("ai", 0.10), ("hum", 0.90)]),
        "umm-maybe-detector" => answer(Verdict::Real, &[("artificial", 0.40), ("human", 0.60)]),
        "univfd-clip" => answer(Verdict::Fake, &[("fake", 0.95), ("real", 0.05)]),
        _ => failure("unexpected model"),
    });

    let verdict = aggregator.evaluate(IMAGE).await;
    assert_eq!(verdict.label, Verdict::Fake);
    assert!((verdict.confidence - 2.0 / 3.0).abs() < 1e-9);
    let votes: Vec<bool> = verdict.members.iter().map(|m| m.vote_fake).collect();
    assert_eq!(votes, vec![true, false, true]);
    assert!(verdict.explanation.starts_with(
        "Hybrid optimized thresholds + majority vote (2/3 => FAKE). Votes: 2/3 fake."
    ));
}

#[tokio::test]
async fn no_fake_votes_make_real() {
    let (_, aggregator) = hybrid(|req| match req.model_id.as_str() {
        "ateeqq-detector" => answer(Verdict::Real, &[("ai", 0.01), ("hum", 0.99)]),
        "umm-maybe-detector" => answer(Verdict::Real, &[("artificial", 0.10), ("human", 0.90)]),
        "univfd-clip" => answer(Verdict::Real, &[("fake", 0.20), ("real", 0.80)]),
        _ => failure("unexpected model"),
    });

    let verdict = aggregator.evaluate(IMAGE).await;
    assert_eq!(verdict.label, Verdict::Real);
    assert_eq!(verdict.confidence, 1.0);
    assert!(verdict.members.iter().all(|m| !m.vote_fake));
}

#[tokio::test]
async fn every_member_failing_is_unknown() {
    let (gateway, aggregator) = hybrid(|req| match req.model_id.as_str() {
        "ateeqq-detector" => failure("Failed to parse image: truncated"),
        "umm-maybe-detector" => None,
        _ => failure("Model load failed"),
    });

    let verdict = aggregator.evaluate(IMAGE).await;
    assert_eq!(verdict.label, Verdict::Unknown);
    assert_eq!(verdict.confidence, 0.0);
    assert!(verdict.members.is_empty());
    assert!(verdict.explanation.starts_with("Hybrid detector requires all 3 detectors."));
    assert!(verdict.explanation.contains("Ateeqq: Failed to parse image: truncated"));
    assert!(verdict.explanation.contains("Umm_Maybe: Exact detector failed: Exact detector timed out"));
    assert!(verdict.explanation.contains("UniversalFakeDetect: Model load failed"));
    assert_eq!(gateway.correlator().pending_count(), 0);
}

#[tokio::test]
async fn one_failing_member_still_means_unknown() {
    let (_, aggregator) = hybrid(|req| match req.model_id.as_str() {
        "univfd-clip" => failure("CUDA out of memory"),
        _ => answer(Verdict::Fake, &[("fake", 0.99)]),
    });

    let verdict = aggregator.evaluate(IMAGE).await;
    assert_eq!(verdict.label, Verdict::Unknown);
    assert_eq!(
        verdict.explanation,
        "Hybrid detector requires all 3 detectors. Failures: UniversalFakeDetect: CUDA out of memory"
    );
}

#[tokio::test]
async fn ensemble_shares_one_worker() {
    let (gateway, aggregator) = hybrid(|_| answer(Verdict::Fake, &[("fake", 0.99)]));
    let verdict = aggregator.evaluate(IMAGE).await;
    assert_eq!(verdict.label, Verdict::Fake);
    assert_eq!(gateway.correlator().supervisor().launcher().launches(), 1);
}
