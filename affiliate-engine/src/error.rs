//! Error types for the commission engine
//!
//! These never propagate past the webhook dispatcher boundary: a failed
//! commission credit is logged and swallowed, the triggering deposit
//! stays committed.

use thiserror::Error;

/// Result type for commission operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
