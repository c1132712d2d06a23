//! Hybrid detector: thresholded majority vote over three exact detectors.
//!
//! Each member model speaks its own label vocabulary, so a member's output is
//! first reduced to a fake score in `[0, 1]` by keyword matching, then
//! compared against that member's tuned threshold. The ensemble never votes
//! with fewer members than it was configured with: any failure yields
//! `UNKNOWN` (see [`incomplete`]).

use serde::{Deserialize, Serialize};

use crate::types::{DetectionResult, Prediction, Verdict};

/// Model id under which the request layer exposes the ensemble.
pub const HYBRID_MODEL_ID: &str = "hybrid-detector";

// ─── Members ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorSpec {
    /// Exact-detector model id passed to the gateway.
    pub id: String,
    /// Display name used in explanations.
    pub name: String,
    /// Vote threshold in `[0, 1]`; a member votes FAKE when `score >= threshold`.
    pub threshold: f64,
}

impl DetectorSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>, threshold: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            threshold,
        }
    }
}

/// Members and thresholds of the reference deployment.
pub fn reference_members() -> [DetectorSpec; 3] {
    [
        DetectorSpec::new("ateeqq-detector", "Ateeqq", 0.05),
        DetectorSpec::new("umm-maybe-detector", "Umm_Maybe", 0.58),
        DetectorSpec::new("univfd-clip", "UniversalFakeDetect", 0.93),
    ]
}

// ─── Fake Score ──────────────────────────────────────────────────────

/// Keyword sets used to read heterogeneous label vocabularies.
///
/// Matching is substring-based on lowercased labels, so `"ai"` matches
/// `"AI-generated"` and `"hum"` matches `"human"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeKeywords {
    pub fake: Vec<String>,
    pub real: Vec<String>,
}

impl FakeKeywords {
    pub fn new(fake: &[&str], real: &[&str]) -> Self {
        let lower =
            |words: &[&str]| -> Vec<String> { words.iter().map(|w| w.to_lowercase()).collect() };
        Self {
            fake: lower(fake),
            real: lower(real),
        }
    }

    fn is_fake(&self, label: &str) -> bool {
        self.fake.iter().any(|k| label.contains(k.as_str()))
    }

    fn is_real(&self, label: &str) -> bool {
        self.real.iter().any(|k| label.contains(k.as_str()))
    }
}

impl Default for FakeKeywords {
    fn default() -> Self {
        Self::new(
            &[
                "fake",
                "deepfake",
                "ai",
                "artificial",
                "synthetic",
                "generated",
                "manipulated",
            ],
            &["real", "human", "hum", "authentic", "genuine", "natural"],
        )
    }
}

/// Fake score from raw predictions alone, or `None` if no label matched.
///
/// Fake-keyword labels win: their maximum score is returned. Otherwise the
/// complement of the best real-keyword score is returned, floored at 0.
pub fn keyword_fake_score(predictions: &[Prediction], keywords: &FakeKeywords) -> Option<f64> {
    let scored: Vec<(String, f64)> = predictions
        .iter()
        .filter(|p| p.score.is_finite())
        .map(|p| (p.label.to_lowercase(), p.score))
        .collect();

    let max_of = |want: &dyn Fn(&str) -> bool| {
        scored
            .iter()
            .filter(|(label, _)| want(label.as_str()))
            .map(|&(_, score)| score)
            .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))))
    };

    if let Some(fake) = max_of(&|label| keywords.is_fake(label)) {
        return Some(fake);
    }
    max_of(&|label| keywords.is_real(label)).map(|real| (1.0 - real).max(0.0))
}

/// Fake score for one member, falling back to its top-level verdict.
///
/// Fallback: a FAKE verdict scores its confidence; anything else scores
/// `1 - confidence`, floored at 0.
pub fn fake_score(
    predictions: &[Prediction],
    fallback_label: Verdict,
    fallback_confidence: f64,
    keywords: &FakeKeywords,
) -> f64 {
    if let Some(score) = keyword_fake_score(predictions, keywords) {
        return score;
    }
    match fallback_label {
        Verdict::Fake => fallback_confidence,
        _ => (1.0 - fallback_confidence).max(0.0),
    }
}

/// [`fake_score`] applied to a gateway detection result.
pub fn detection_fake_score(result: &DetectionResult, keywords: &FakeKeywords) -> f64 {
    fake_score(
        result.raw_predictions.as_deref().unwrap_or_default(),
        result.label,
        result.confidence,
        keywords,
    )
}

// ─── Vote ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberVote {
    pub id: String,
    pub name: String,
    pub fake_score: f64,
    pub threshold: f64,
    pub vote_fake: bool,
}

impl MemberVote {
    pub fn cast(spec: &DetectorSpec, fake_score: f64) -> Self {
        Self {
            id: spec.id.clone(),
            name: spec.name.clone(),
            fake_score,
            threshold: spec.threshold,
            vote_fake: fake_score >= spec.threshold,
        }
    }
}

/// A member that could not produce an output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberFailure {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsembleVerdict {
    pub label: Verdict,
    pub confidence: f64,
    pub explanation: String,
    /// Per-member votes; empty when the ensemble could not vote.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<MemberVote>,
}

/// Majority vote over every member's ballot.
///
/// FAKE needs a strict majority of fake votes (2 of 3). Confidence is the
/// share of members that agree with the outcome.
pub fn tally(votes: Vec<MemberVote>) -> EnsembleVerdict {
    let total = votes.len();
    if total == 0 {
        return EnsembleVerdict {
            label: Verdict::Unknown,
            confidence: 0.0,
            explanation: "Hybrid detector has no members configured.".to_string(),
            members: votes,
        };
    }

    let fake_votes = votes.iter().filter(|v| v.vote_fake).count();
    let majority = total / 2 + 1;
    let label = if fake_votes >= majority {
        Verdict::Fake
    } else {
        Verdict::Real
    };
    let agreeing = match label {
        Verdict::Fake => fake_votes,
        _ => total - fake_votes,
    };
    let confidence = agreeing as f64 / total as f64;

    let summary = votes
        .iter()
        .map(|v| {
            format!(
                "{}: fakeScore={:.3} vs th={:.2} => {}",
                v.name,
                v.fake_score,
                v.threshold,
                if v.vote_fake { "FAKE" } else { "REAL" }
            )
        })
        .collect::<Vec<_>>()
        .join(" | ");

    EnsembleVerdict {
        label,
        confidence,
        explanation: format!(
            "Hybrid optimized thresholds + majority vote ({majority}/{total} => FAKE). \
             Votes: {fake_votes}/{total} fake. {summary}"
        ),
        members: votes,
    }
}

/// Verdict when at least one member failed: no partial vote is attempted.
pub fn incomplete(member_count: usize, failures: &[MemberFailure]) -> EnsembleVerdict {
    let listed = failures
        .iter()
        .map(|f| format!("{}: {}", f.name, f.error))
        .collect::<Vec<_>>()
        .join(" | ");
    EnsembleVerdict {
        label: Verdict::Unknown,
        confidence: 0.0,
        explanation: format!(
            "Hybrid detector requires all {member_count} detectors. Failures: {listed}"
        ),
        members: Vec::new(),
    }
}
