//! Gateway errors and their request-layer shape.

use exactgate_worker::WorkerError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("{0}")]
    BadRequest(String),

    /// Guardrail hit; the worker was never contacted.
    #[error("{reason}")]
    UnavailableModel { model_id: String, reason: String },

    #[error("No exact detector mapping found for {0}")]
    UnknownModel(String),

    /// The worker ran and answered `ok: false`. The message is verbatim.
    #[error("{message}")]
    DetectorFailure {
        model_id: String,
        model_repo: String,
        message: String,
    },

    /// Spawn, configuration, transport, timeout, or crash.
    #[error("Exact detector failed: {source}")]
    Infrastructure {
        model_id: String,
        #[source]
        source: WorkerError,
    },
}

impl GatewayError {
    /// HTTP status the request layer answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::UnknownModel(_) => 404,
            Self::UnavailableModel { .. } => 422,
            Self::DetectorFailure { .. } => 502,
            Self::Infrastructure { .. } => 500,
        }
    }

    /// Caller mistakes, as opposed to detector or infrastructure trouble.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::UnavailableModel { .. } => "unavailable_model",
            Self::UnknownModel(_) => "unknown_model",
            Self::DetectorFailure { .. } => "detector_failure",
            Self::Infrastructure { source, .. } => source.kind(),
        }
    }

    pub fn model_id(&self) -> Option<&str> {
        match self {
            Self::BadRequest(_) => None,
            Self::UnknownModel(model_id)
            | Self::UnavailableModel { model_id, .. }
            | Self::DetectorFailure { model_id, .. }
            | Self::Infrastructure { model_id, .. } => Some(model_id),
        }
    }

    pub fn body(&self) -> ErrorBody {
        let model_repo = match self {
            Self::DetectorFailure { model_repo, .. } => Some(model_repo.clone()),
            _ => None,
        };
        ErrorBody {
            error: self.to_string(),
            model_id: self.model_id().map(str::to_string),
            model_repo,
        }
    }
}

/// Error payload served next to [`GatewayError::status_code`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_repo: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn all() -> Vec<GatewayError> {
        vec![
            GatewayError::BadRequest("modelId and imageBase64 are required".to_string()),
            GatewayError::UnknownModel("gemini-pro".to_string()),
            GatewayError::UnavailableModel {
                model_id: "hive-det".to_string(),
                reason: "proprietary".to_string(),
            },
            GatewayError::DetectorFailure {
                model_id: "dima".to_string(),
                model_repo: "dima806/deepfake_vs_real_image_detection".to_string(),
                message: "Failed to parse image".to_string(),
            },
            GatewayError::Infrastructure {
                model_id: "univfd-clip".to_string(),
                source: WorkerError::Timeout {
                    model_id: "univfd-clip".to_string(),
                    elapsed: Duration::from_secs(300),
                },
            },
        ]
    }

    #[test]
    fn status_codes() {
        let codes: Vec<u16> = all().iter().map(GatewayError::status_code).collect();
        assert_eq!(codes, vec![400, 404, 422, 502, 500]);
        let client: Vec<bool> = all().iter().map(GatewayError::is_client_error).collect();
        assert_eq!(client, vec![true, true, true, false, false]);
    }

    #[test]
    fn messages_match_request_layer() {
        let errs = all();
        assert_eq!(errs[1].to_string(), "No exact detector mapping found for gemini-pro");
        assert_eq!(errs[2].to_string(), "proprietary");
        assert_eq!(errs[3].to_string(), "Failed to parse image");
        assert_eq!(
            errs[4].to_string(),
            "Exact detector failed: Exact detector timed out after 300.0s while loading/running model univfd-clip."
        );
        assert_eq!(errs[4].kind(), "timeout");
    }

    #[test]
    fn body_carries_model_context() {
        let errs = all();
        let failure = errs[3].body();
        assert_eq!(failure.model_id.as_deref(), Some("dima"));
        assert_eq!(
            failure.model_repo.as_deref(),
            Some("dima806/deepfake_vs_real_image_detection")
        );

        let json = serde_json::to_value(errs[0].body()).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({"error": "modelId and imageBase64 are required"})
        );
    }
}
