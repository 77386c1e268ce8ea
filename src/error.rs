//! Top-level router error, composing every subsystem's `thiserror` enum and mapping each
//! to its stable error tag and HTTP status (§7, §10.2).

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use router_types::ErrorReason;
use serde_json::json;

use crate::federation::FederationError;
use crate::payment_engine::PaymentError;
use crate::persistence::PersistError;
use crate::registry::AdmissionError;
use crate::replaystore::ReplayError;
use crate::scheduler::SchedulerError;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("envelope is malformed: {0}")]
    EnvelopeMalformed(String),
    #[error("envelope signature is invalid")]
    EnvelopeSignatureInvalid,
    #[error("envelope keyId does not match the expected signer")]
    EnvelopeKeyMismatch,
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error(transparent)]
    Federation(#[from] FederationError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("router is saturated")]
    RouterSaturated,
    #[error("runner returned a client error: {0}")]
    RunnerClientError(String),
    #[error("runner is unavailable: {0}")]
    RunnerUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RouterError {
    pub fn reason(&self) -> ErrorReason {
        match self {
            RouterError::EnvelopeMalformed(_) => ErrorReason::EnvelopeMalformed,
            RouterError::EnvelopeSignatureInvalid => ErrorReason::EnvelopeSignatureInvalid,
            RouterError::EnvelopeKeyMismatch => ErrorReason::EnvelopeKeyMismatch,
            RouterError::Replay(e) => e.reason(),
            RouterError::Admission(_) => ErrorReason::EnvelopeMalformed,
            RouterError::Scheduler(e) => e.reason(),
            RouterError::Payment(e) => e.reason(),
            RouterError::Federation(e) => e.reason(),
            RouterError::Persist(_) => ErrorReason::PersistFailed,
            RouterError::RouterSaturated => ErrorReason::RouterSaturated,
            RouterError::RunnerClientError(_) => ErrorReason::RunnerClientError,
            RouterError::RunnerUnavailable(_) => ErrorReason::RunnerUnavailable,
            RouterError::Internal(_) => ErrorReason::Internal,
        }
    }
}

impl IntoResponse for RouterError {
    fn into_response(self) -> Response {
        let reason = self.reason();
        let status =
            StatusCode::from_u16(reason.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        tracing::warn!(error = %self, reason = %reason, "request failed");
        (status, Json(json!({ "error": reason, "details": self.to_string() }))).into_response()
    }
}
