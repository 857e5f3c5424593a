use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::{DbErr, SqlErr};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Error body returned by every failing HTTP route.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Stable classification of the failure
    pub class: ErrorClass,
    /// RFC 3339 timestamp when the error was rendered
    pub timestamp: String,
}

/// Coarse classification every [`ServiceError`] belongs to.
///
/// Validation and domain errors are safe to show verbatim. Infrastructure and
/// invariant errors are logged in full and rendered as a generic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Validation,
    Domain,
    Infrastructure,
    Invariant,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    InsufficientStock(String),

    #[error("Product unavailable: {0}")]
    ProductUnavailable(String),

    #[error("Invalid coupon code: {0}")]
    InvalidCoupon(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ValidationError(_) | Self::Unauthorized(_) => ErrorClass::Validation,
            Self::NotFound(_)
            | Self::InsufficientStock(_)
            | Self::ProductUnavailable(_)
            | Self::InvalidCoupon(_)
            | Self::InvalidOperation(_)
            | Self::InvalidStatus(_)
            | Self::PaymentFailed(_) => ErrorClass::Domain,
            Self::DatabaseError(err) if is_check_violation(err) => ErrorClass::Invariant,
            Self::DatabaseError(_) | Self::TransactionConflict(_) | Self::InternalError(_) => {
                ErrorClass::Infrastructure
            }
            Self::InvariantViolation(_) => ErrorClass::Invariant,
        }
    }

    /// Whether re-running the whole transaction from scratch may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransactionConflict(_) => true,
            Self::DatabaseError(err) => is_transient_db_error(err),
            _ => false,
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_) | Self::ProductUnavailable(_) | Self::InvalidCoupon(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::InvalidOperation(_) | Self::InvalidStatus(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InsufficientStock(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
            Self::TransactionConflict(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::DatabaseError(_) | Self::InternalError(_) | Self::InvariantViolation(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Infrastructure and invariant errors return generic messages to avoid leaking details.
    pub fn response_message(&self) -> String {
        match self.class() {
            ErrorClass::Validation | ErrorClass::Domain => self.to_string(),
            ErrorClass::Infrastructure if self.is_retryable() => {
                "Service temporarily unavailable, please retry".to_string()
            }
            ErrorClass::Infrastructure | ErrorClass::Invariant => {
                "Internal server error".to_string()
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let class = self.class();
        if matches!(class, ErrorClass::Infrastructure | ErrorClass::Invariant) {
            error!(error = %self, ?class, "request failed");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            class,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

const TRANSIENT_MARKERS: &[&str] = &[
    "40001",
    "40P01",
    "55P03",
    "could not serialize access",
    "deadlock detected",
    "lock timeout",
    "database is locked",
    "database table is locked",
    "canceling statement due to statement timeout",
];

/// Serialization failures, deadlocks, lock timeouts, pool exhaustion and
/// unique-key races are resolved by re-running the transaction.
pub fn is_transient_db_error(err: &DbErr) -> bool {
    if matches!(err, DbErr::ConnectionAcquire(_)) {
        return true;
    }
    if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
        return true;
    }
    let message = err.to_string();
    TRANSIENT_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// A CHECK constraint firing means a guarded column was about to go out of range.
pub fn is_check_violation(err: &DbErr) -> bool {
    let message = err.to_string();
    message.contains("CHECK constraint failed") || message.contains("23514")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::InsufficientStock("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::PaymentFailed("x".into()).status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            ServiceError::TransactionConflict("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServiceError::InvariantViolation("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn only_infrastructure_conflicts_are_retryable() {
        assert!(ServiceError::TransactionConflict("busy".into()).is_retryable());
        assert!(ServiceError::DatabaseError(DbErr::Custom(
            "could not serialize access due to concurrent update".into()
        ))
        .is_retryable());
        assert!(!ServiceError::DatabaseError(DbErr::Custom("syntax error".into())).is_retryable());
        assert!(!ServiceError::InsufficientStock("none left".into()).is_retryable());
        assert!(!ServiceError::NotFound("cart".into()).is_retryable());
        assert!(!ServiceError::ValidationError("qty".into()).is_retryable());
    }

    #[test]
    fn check_violations_are_invariant_failures() {
        let err = ServiceError::DatabaseError(DbErr::Custom(
            "CHECK constraint failed: available_quantity >= 0".into(),
        ));
        assert_eq!(err.class(), ErrorClass::Invariant);
        assert_eq!(err.response_message(), "Internal server error");
    }

    #[test]
    fn domain_messages_are_shown_verbatim() {
        let err =
            ServiceError::InsufficientStock("Insufficient stock for Mug. Available: 1, Requested: 2".into());
        assert_eq!(err.class(), ErrorClass::Domain);
        assert_eq!(
            err.response_message(),
            "Insufficient stock for Mug. Available: 1, Requested: 2"
        );
    }

    #[tokio::test]
    async fn infrastructure_details_are_hidden_from_callers() {
        let response =
            ServiceError::DatabaseError(DbErr::Custom("relation carts does not exist".into()))
                .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.message, "Internal server error");
        assert_eq!(payload.class, ErrorClass::Infrastructure);
    }
}
