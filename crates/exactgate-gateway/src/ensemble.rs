//! Ensemble aggregator ("hybrid detector").
//!
//! Runs the three members concurrently through the [`Gateway`] and votes
//! only when every member answered. A single failure turns the verdict
//! into `UNKNOWN` with every failure listed.

use std::sync::Arc;

use exactgate_core::ensemble::{self, MemberFailure};
use exactgate_core::{DetectionResult, DetectorSpec, EnsembleVerdict, FakeKeywords, MemberVote};
use exactgate_worker::WorkerLauncher;

use crate::error::GatewayError;
use crate::gateway::Gateway;

#[derive(Debug)]
pub struct EnsembleAggregator<L> {
    gateway: Arc<Gateway<L>>,
    members: [DetectorSpec; 3],
    keywords: FakeKeywords,
}

impl<L: WorkerLauncher> EnsembleAggregator<L> {
    /// Reference members and keyword sets.
    pub fn new(gateway: Arc<Gateway<L>>) -> Self {
        Self::with_members(gateway, ensemble::reference_members())
    }

    pub fn with_members(gateway: Arc<Gateway<L>>, members: [DetectorSpec; 3]) -> Self {
        Self {
            gateway,
            members,
            keywords: FakeKeywords::default(),
        }
    }

    #[must_use]
    pub fn with_keywords(mut self, keywords: FakeKeywords) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn members(&self) -> &[DetectorSpec; 3] {
        &self.members
    }

    pub async fn evaluate(&self, image_base64: &str) -> EnsembleVerdict {
        let [a, b, c] = &self.members;
        let (ra, rb, rc) = tokio::join!(
            self.gateway.detect_exact(&a.id, image_base64),
            self.gateway.detect_exact(&b.id, image_base64),
            self.gateway.detect_exact(&c.id, image_base64),
        );
        let verdict = self.combine([ra, rb, rc]);
        tracing::info!(
            label = %verdict.label,
            confidence = verdict.confidence,
            "ensemble evaluated"
        );
        verdict
    }

    fn combine(&self, outcomes: [Result<DetectionResult, GatewayError>; 3]) -> EnsembleVerdict {
        let mut votes = Vec::with_capacity(self.members.len());
        let mut failures = Vec::new();

        for (spec, outcome) in self.members.iter().zip(outcomes) {
            match outcome {
                Ok(result) => {
                    let score = ensemble::detection_fake_score(&result, &self.keywords);
                    votes.push(MemberVote::cast(spec, score));
                }
                Err(err) => {
                    tracing::warn!(member = %spec.name, kind = err.kind(), error = %err, "ensemble member failed");
                    failures.push(MemberFailure {
                        name: spec.name.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        if failures.is_empty() {
            ensemble::tally(votes)
        } else {
            ensemble::incomplete(self.members.len(), &failures)
        }
    }
}
