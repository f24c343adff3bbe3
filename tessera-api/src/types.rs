use std::collections::BTreeMap;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tessera_core::error::TesseraError;
use tessera_core::proof::GpuExpectations;

use crate::engine::VerifyParams;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    #[serde(default)]
    pub verification_id: Value,
    pub message_id: Option<String>,
    pub model: Option<String>,
    /// Kept loose so a non-string nonce can be rejected with a clear message.
    #[serde(default)]
    pub nonce: Value,
    pub request_hash: Option<String>,
    pub response_hash: Option<String>,
    pub expected_arch: Option<String>,
    pub expected_device_cert_hash: Option<String>,
    pub expected_rim_hash: Option<String>,
    pub expected_ueid: Option<String>,
    #[serde(default)]
    pub expected_measurements: Vec<String>,
}

impl VerifyRequest {
    pub fn into_params(self) -> Result<VerifyParams, TesseraError> {
        let verification_id = match self.verification_id {
            Value::String(s) if !s.trim().is_empty() => s,
            _ => {
                return Err(TesseraError::InvalidInput(
                    "verificationId must be a non-empty string".into(),
                ));
            }
        };
        let nonce = match self.nonce {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s),
            _ => return Err(TesseraError::InvalidInput("nonce must be a string".into())),
        };
        Ok(VerifyParams {
            verification_id,
            message_id: self.message_id,
            model: self.model,
            nonce,
            request_hash: self.request_hash,
            response_hash: self.response_hash,
            expectations: GpuExpectations {
                arch: self.expected_arch,
                device_cert_hash: self.expected_device_cert_hash,
                rim_hash: self.expected_rim_hash,
                ueid: self.expected_ueid,
                measurements: self.expected_measurements,
            },
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub sessions: usize,
    pub intel_configured: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_missing: Option<BTreeMap<String, String>>,
}

/// Engine errors rendered as HTTP responses.
#[derive(Debug)]
pub struct ApiError(pub TesseraError);

impl From<TesseraError> for ApiError {
    fn from(e: TesseraError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            TesseraError::InvalidInput(_) | TesseraError::Parse(_) => StatusCode::BAD_REQUEST,
            TesseraError::Unavailable(_) | TesseraError::Upstream(_) => StatusCode::BAD_GATEWAY,
            TesseraError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            TesseraError::ConfigMissing(_)
            | TesseraError::Verification(_)
            | TesseraError::Io(_)
            | TesseraError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.0.to_string(),
            status: matches!(self.0, TesseraError::Unavailable(_)).then_some("pending"),
            config_missing: match &self.0 {
                TesseraError::ConfigMissing(missing) => Some(missing.clone()),
                _ => None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self.0, "request failed");
        }
        (status, Json(self.body())).into_response()
    }
}
