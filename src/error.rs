use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::keys::engine::RotationError;
use crate::keys::material::MaterialError;
use crate::keys::store::StoreError;

#[derive(Debug, Error)]
pub enum KeyLifecycleError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("not eligible yet: {} seconds remaining", .remaining.num_seconds())]
    NotEligibleYet { remaining: chrono::Duration },
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("another operation holds this tenant's signing keys; retry later")]
    Busy,
    #[error("storage error: {0}")]
    Storage(StoreError),
    #[error("signing key not found")]
    NotFound,
    #[error("key generation failed: {0}")]
    Collaborator(String),
}

impl KeyLifecycleError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, KeyLifecycleError::Busy | KeyLifecycleError::Storage(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            KeyLifecycleError::Validation(_) => "validation_error",
            KeyLifecycleError::PreconditionFailed(_) => "precondition_failed",
            KeyLifecycleError::NotEligibleYet { .. } => "not_eligible_yet",
            KeyLifecycleError::InvariantViolation(_) => "invariant_violation",
            KeyLifecycleError::Busy => "busy",
            KeyLifecycleError::Storage(_) => "storage_error",
            KeyLifecycleError::NotFound => "not_found",
            KeyLifecycleError::Collaborator(_) => "collaborator_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            KeyLifecycleError::Validation(_) => StatusCode::BAD_REQUEST,
            KeyLifecycleError::PreconditionFailed(_) | KeyLifecycleError::NotEligibleYet { .. } => {
                StatusCode::CONFLICT
            }
            KeyLifecycleError::NotFound => StatusCode::NOT_FOUND,
            KeyLifecycleError::Busy => StatusCode::SERVICE_UNAVAILABLE,
            KeyLifecycleError::Storage(err) if err.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            KeyLifecycleError::Storage(_)
            | KeyLifecycleError::InvariantViolation(_)
            | KeyLifecycleError::Collaborator(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for KeyLifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } => KeyLifecycleError::Busy,
            StoreError::Constraint(reason) => KeyLifecycleError::InvariantViolation(reason),
            StoreError::Cardinality(violation) => {
                KeyLifecycleError::InvariantViolation(violation.to_string())
            }
            other => KeyLifecycleError::Storage(other),
        }
    }
}

impl From<RotationError> for KeyLifecycleError {
    fn from(err: RotationError) -> Self {
        match err {
            RotationError::Validation(message) => KeyLifecycleError::Validation(message),
            RotationError::Precondition(message) => KeyLifecycleError::PreconditionFailed(message),
            RotationError::NotFound(_) => KeyLifecycleError::NotFound,
            RotationError::NotEligibleYet { remaining, .. } => {
                KeyLifecycleError::NotEligibleYet { remaining }
            }
            RotationError::Invariant(violation) => {
                KeyLifecycleError::InvariantViolation(violation.to_string())
            }
            RotationError::Material(err @ MaterialError::Invalid { .. }) => {
                KeyLifecycleError::Validation(err.to_string())
            }
            RotationError::Material(err @ MaterialError::Generation { .. }) => {
                KeyLifecycleError::Collaborator(err.to_string())
            }
            RotationError::Store(err) => err.into(),
        }
    }
}

impl IntoResponse for KeyLifecycleError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, kind = self.kind(), "signing key request failed");
        } else {
            tracing::debug!(error = %self, kind = self.kind(), "signing key request rejected");
        }

        let mut body = json!({
            "error": self.kind(),
            "message": self.to_string(),
            "retryable": self.is_retryable(),
        });
        if let KeyLifecycleError::NotEligibleYet { remaining } = &self {
            let seconds = remaining.num_seconds().max(0);
            body["remaining_seconds"] = json!(seconds);
            body["remaining_days"] = json!((seconds + 86_399) / 86_400);
        }
        (status, Json(body)).into_response()
    }
}

pub type KeyResult<T> = Result<T, KeyLifecycleError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::models::{KeyStatus, SigningAlgorithm};
    use crate::keys::store::CardinalityViolation;
    use uuid::Uuid;

    #[test]
    fn lost_version_race_surfaces_as_busy() {
        let err: KeyLifecycleError = StoreError::Conflict {
            key_id: Uuid::new_v4(),
        }
        .into();
        assert!(matches!(err, KeyLifecycleError::Busy));
        assert!(err.is_retryable());
    }

    #[test]
    fn storage_constraint_is_an_invariant_violation() {
        let err: KeyLifecycleError =
            RotationError::Store(StoreError::Constraint("duplicate active key".into())).into();
        assert!(matches!(err, KeyLifecycleError::InvariantViolation(_)));
        assert!(!err.is_retryable());

        let err: KeyLifecycleError = RotationError::Invariant(CardinalityViolation {
            tenant_id: "tenant-a".into(),
            status: KeyStatus::Standby,
            count: 2,
        })
        .into();
        assert_eq!(err.kind(), "invariant_violation");
    }

    #[test]
    fn material_failures_split_by_cause() {
        let invalid: KeyLifecycleError = RotationError::Material(MaterialError::Invalid {
            algorithm: SigningAlgorithm::Es256,
            reason: "not a PEM document".into(),
        })
        .into();
        assert!(matches!(invalid, KeyLifecycleError::Validation(_)));

        let generation: KeyLifecycleError = RotationError::Material(MaterialError::Generation {
            algorithm: SigningAlgorithm::Rs256,
            reason: "entropy source unavailable".into(),
        })
        .into();
        assert!(matches!(generation, KeyLifecycleError::Collaborator(_)));
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(
            KeyLifecycleError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            KeyLifecycleError::NotEligibleYet {
                remaining: chrono::Duration::days(3)
            }
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(KeyLifecycleError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            KeyLifecycleError::Busy.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            KeyLifecycleError::Storage(StoreError::Transient("reset".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            KeyLifecycleError::Storage(StoreError::Decode("bad status".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
