//! Error types for the ledger

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Database error (sqlx)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Account does not exist. Fatal on the webhook path: a webhook must
    /// never provision a phantom account.
    #[error("Account not found: user_id={0}")]
    AccountNotFound(i64),

    /// Ledger entry not found for an identifier
    #[error("Ledger entry not found: {0}")]
    EntryNotFound(String),

    /// Provider identifier failed the format check
    #[error("Invalid external identifier: {0}")]
    InvalidIdentifier(String),

    /// Amount failed a precondition (non-positive deposit, etc.)
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// Active balance too low for the requested debit
    #[error("Insufficient balance for user {user_id}: required {required}, available {available}")]
    InsufficientBalance {
        user_id: i64,
        required: Decimal,
        available: Decimal,
    },

    /// Daily withdrawal caps or amount limits exceeded
    #[error("Withdrawal limit exceeded for user {user_id}: {reason}")]
    WithdrawalLimitExceeded { user_id: i64, reason: String },

    /// Isolation conflict that survived the bounded retry loop. Transient:
    /// the provider retries and the idempotency guard absorbs it.
    #[error("Concurrent modification conflict: {0}")]
    Conflict(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a caller seeing this error may safely retry the delivery
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Conflict(_))
    }
}

/// Serialization failures and deadlocks are retried inside the applier;
/// everything else propagates immediately.
pub fn is_serialization_failure(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => matches!(
            db_err.code().as_deref(),
            Some("40001") | Some("40P01")
        ),
        _ => false,
    }
}

/// Unique-constraint violations are the arbiter for races on the
/// idempotency key and the commission pair.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}
