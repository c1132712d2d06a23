use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ─── Verdict ──────────────────────────────────────────────────────

/// Final decision for a single image.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Real,
    Fake,
    #[default]
    Unknown,
}

impl Verdict {
    pub const ALL: [Self; 3] = [Self::Real, Self::Fake, Self::Unknown];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Real => "REAL",
            Self::Fake => "FAKE",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Lenient mapping for labels reported by the worker.
    ///
    /// Anything other than a case-insensitive `REAL` / `FAKE` becomes
    /// `Unknown` rather than an error: the worker owns its vocabulary.
    pub fn from_worker_label(label: &str) -> Self {
        label.trim().parse().unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown verdict label: {0}")]
pub struct UnknownVerdict(pub String);

impl FromStr for Verdict {
    type Err = UnknownVerdict;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "REAL" => Ok(Self::Real),
            "FAKE" => Ok(Self::Fake),
            "UNKNOWN" => Ok(Self::Unknown),
            _ => Err(UnknownVerdict(s.to_string())),
        }
    }
}

// ─── Predictions ──────────────────────────────────────────────────

/// One raw `(label, score)` entry as emitted by a detector model.
///
/// Labels use the model's own vocabulary (`"ai"`, `"hum"`, `"Fake"`,
/// `"artificial"`, ...), which is why the ensemble derives fake scores by
/// keyword instead of by exact label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub score: f64,
}

impl Prediction {
    pub fn new(label: impl Into<String>, score: f64) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

// ─── Detection Result ─────────────────────────────────────────────

/// Successful single-model detection, in the shape the request layer serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub label: Verdict,
    /// Confidence of the top prediction, in `[0, 1]`.
    pub confidence: f64,
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_predictions: Option<Vec<Prediction>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_repo: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_serializes_uppercase() {
        let json = serde_json::to_string(&Verdict::Fake).expect("serialize");
        assert_eq!(json, "\"FAKE\"");
        let back: Verdict = serde_json::from_str("\"REAL\"").expect("deserialize");
        assert_eq!(back, Verdict::Real);
    }

    #[test]
    fn verdict_from_str_is_case_insensitive() {
        assert_eq!("fake".parse::<Verdict>(), Ok(Verdict::Fake));
        assert_eq!("Real".parse::<Verdict>(), Ok(Verdict::Real));
        assert!("maybe".parse::<Verdict>().is_err());
    }

    #[test]
    fn worker_label_falls_back_to_unknown() {
        assert_eq!(Verdict::from_worker_label(" FAKE "), Verdict::Fake);
        assert_eq!(Verdict::from_worker_label("hum"), Verdict::Unknown);
        assert_eq!(Verdict::from_worker_label(""), Verdict::Unknown);
    }

    #[test]
    fn detection_result_omits_absent_optionals() {
        let result = DetectionResult {
            label: Verdict::Real,
            confidence: 0.9,
            explanation: "ok".to_string(),
            raw_predictions: None,
            model_repo: None,
        };
        let value = serde_json::to_value(&result).expect("serialize");
        assert_eq!(value["label"], "REAL");
        assert!(value.get("rawPredictions").is_none());
        assert!(value.get("modelRepo").is_none());
    }

    #[test]
    fn detection_result_uses_camel_case_keys() {
        let result = DetectionResult {
            label: Verdict::Fake,
            confidence: 0.75,
            explanation: "top".to_string(),
            raw_predictions: Some(vec![Prediction::new("ai", 0.75)]),
            model_repo: Some("Ateeqq/ai-vs-human-image-detector".to_string()),
        };
        let value = serde_json::to_value(&result).expect("serialize");
        assert_eq!(value["rawPredictions"][0]["label"], "ai");
        assert_eq!(value["modelRepo"], "Ateeqq/ai-vs-human-image-detector");
    }
}
