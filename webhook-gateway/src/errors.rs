//! Gateway error taxonomy and HTTP mapping
//!
//! The idempotent short-circuit is deliberately absent here: an
//! already-processed event is acknowledged with 200, it is not an error.

use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Malformed payload. Never retried by the provider, no state change.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Shared-secret header check failed
    #[error("Unauthorized")]
    Unauthorized,

    /// Referenced transaction does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transient failure; the provider should retry (safe: idempotent)
    #[error("Transient error: {0}")]
    Transient(String),

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ledger_core::Error> for GatewayError {
    fn from(err: ledger_core::Error) -> Self {
        use ledger_core::Error as L;
        match err {
            L::InvalidIdentifier(id) => {
                GatewayError::Validation(format!("invalid identifier: {}", id))
            }
            L::InvalidAmount(amount) => {
                GatewayError::Validation(format!("invalid amount: {}", amount))
            }
            L::Validation(msg) => GatewayError::Validation(msg),
            L::AccountNotFound(user_id) => {
                GatewayError::NotFound(format!("account {}", user_id))
            }
            L::EntryNotFound(reference) => GatewayError::NotFound(reference),
            L::InsufficientBalance { .. } | L::WithdrawalLimitExceeded { .. } => {
                GatewayError::Validation(err.to_string())
            }
            L::Conflict(msg) => GatewayError::Transient(msg),
            L::Database(e) => GatewayError::Transient(e.to_string()),
            L::Config(msg) | L::Internal(msg) => GatewayError::Internal(msg),
        }
    }
}

impl actix_web::ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Transient(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "error": self.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::ResponseError;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::Transient("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_ledger_error_conversion() {
        let err: GatewayError = ledger_core::Error::InvalidIdentifier("nope".into()).into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err: GatewayError = ledger_core::Error::AccountNotFound(9).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err: GatewayError = ledger_core::Error::Conflict("locked".into()).into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let err: GatewayError = ledger_core::Error::InvalidAmount(dec!(-5)).into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
