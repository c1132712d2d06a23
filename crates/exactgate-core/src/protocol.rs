//! Line-delimited JSON protocol spoken with the detector worker.
//!
//! Requests go to the worker's stdin, one object per line:
//! `{"requestId", "modelId", "imageBase64"}`. Responses come back on stdout,
//! either `{"requestId", "ok": true, "label", "confidence", "explanation", ...}`
//! or `{"requestId", "ok": false, "error"}`. The worker's stderr is free-form
//! diagnostics and never reaches this parser.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Prediction, Verdict};

/// Error message used when the worker answers `ok: false` without an `error`.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Exact detector failed";

// ─── Request ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceRequest {
    pub request_id: String,
    pub model_id: String,
    pub image_base64: String,
}

impl InferenceRequest {
    /// Encode as a single protocol line, including the trailing newline.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Process-scoped request id source.
///
/// Ids look like `r_<unix-millis>_<seq>`. The sequence alone keeps ids unique
/// for one generator; the time component keeps them apart from ids minted by
/// an earlier generator whose late answers may still be in flight.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    seq: AtomicU64,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self, now: DateTime<Utc>) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        format!("r_{}_{seq}", now.timestamp_millis())
    }
}

// ─── Response ────────────────────────────────────────────────────────

/// Payload of an `ok: true` response.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceSuccess {
    pub label: Verdict,
    pub confidence: f64,
    pub explanation: String,
    pub predictions: Option<Vec<Prediction>>,
    pub model_repo: Option<String>,
    pub model_id: Option<String>,
    pub top_label: Option<String>,
}

impl InferenceSuccess {
    pub fn new(label: Verdict, confidence: f64, explanation: impl Into<String>) -> Self {
        Self {
            label,
            confidence,
            explanation: explanation.into(),
            predictions: None,
            model_repo: None,
            model_id: None,
            top_label: None,
        }
    }

    #[must_use]
    pub fn with_predictions(mut self, predictions: Vec<Prediction>) -> Self {
        self.predictions = Some(predictions);
        self
    }

    #[must_use]
    pub fn with_model_repo(mut self, repo: impl Into<String>) -> Self {
        self.model_repo = Some(repo.into());
        self
    }
}

/// A worker answer for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceResponse {
    Success(InferenceSuccess),
    /// The worker ran but reported `ok: false`; `error` is surfaced verbatim.
    Failure { error: String },
}

impl InferenceResponse {
    /// Encode as the worker would emit it (used by stub workers in tests).
    pub fn to_line(&self, request_id: &str) -> Result<String, serde_json::Error> {
        let wire = match self {
            Self::Success(s) => WireResponse {
                request_id: Some(request_id.to_string()),
                ok: Some(true),
                label: Some(s.label.as_str().to_string()),
                confidence: Some(s.confidence),
                explanation: Some(s.explanation.clone()),
                predictions: s.predictions.clone(),
                model_repo: s.model_repo.clone(),
                model_id: s.model_id.clone(),
                top_label: s.top_label.clone(),
                error: None,
            },
            Self::Failure { error } => WireResponse {
                request_id: Some(request_id.to_string()),
                ok: Some(false),
                error: Some(error.clone()),
                ..WireResponse::default()
            },
        };
        let mut line = serde_json::to_string(&wire)?;
        line.push('\n');
        Ok(line)
    }
}

/// Classification of one line read from the worker's protocol stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseLine {
    /// Carries a request id; may or may not match a pending request.
    Addressed {
        request_id: String,
        response: InferenceResponse,
    },
    /// Well-formed JSON without a request id. Dropped by the correlator.
    Unaddressed,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON from worker: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("response for {request_id} is missing field `{field}`")]
    MissingField {
        request_id: String,
        field: &'static str,
    },

    #[error("response for {request_id} is malformed: {reason}")]
    InvalidField { request_id: String, reason: String },
}

impl ProtocolError {
    /// Request id of a malformed but addressed line, if one could be read.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::InvalidJson(_) => None,
            Self::MissingField { request_id, .. } | Self::InvalidField { request_id, .. } => {
                Some(request_id)
            }
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    predictions: Option<Vec<Prediction>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model_repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    top_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Parse one stdout line from the worker.
///
/// Lines without a (non-empty) string `requestId` are
/// [`ResponseLine::Unaddressed`] even if the rest of the object is odd; the
/// correlator drops them without noise. Addressed lines must carry `ok`, and
/// successes must carry a `label` and a numeric `confidence`. Errors for
/// addressed lines keep the id so the caller can be failed promptly.
pub fn parse_response_line(line: &str) -> Result<ResponseLine, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(line.trim())?;

    let Some(request_id) = value
        .get("requestId")
        .and_then(serde_json::Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
    else {
        return Ok(ResponseLine::Unaddressed);
    };

    let wire: WireResponse =
        serde_json::from_value(value).map_err(|e| ProtocolError::InvalidField {
            request_id: request_id.clone(),
            reason: e.to_string(),
        })?;

    let missing = |field: &'static str| ProtocolError::MissingField {
        request_id: request_id.clone(),
        field,
    };

    let response = match wire.ok {
        None => return Err(missing("ok")),
        Some(false) => InferenceResponse::Failure {
            error: wire
                .error
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
        },
        Some(true) => {
            let label = wire.label.ok_or_else(|| missing("label"))?;
            let confidence = wire.confidence.ok_or_else(|| missing("confidence"))?;
            InferenceResponse::Success(InferenceSuccess {
                label: Verdict::from_worker_label(&label),
                confidence,
                explanation: wire.explanation.unwrap_or_default(),
                predictions: wire.predictions,
                model_repo: wire.model_repo,
                model_id: wire.model_id,
                top_label: wire.top_label,
            })
        }
    };

    Ok(ResponseLine::Addressed {
        request_id,
        response,
    })
}
