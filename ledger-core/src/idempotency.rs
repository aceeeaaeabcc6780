//! Idempotency guard
//!
//! Classifies a provider event identifier against the ledger:
//! never seen, seen but still pending, or already terminal. The terminal
//! case is the primary defense against duplicate and retried webhooks.

use crate::atomic::PgTx;
use crate::error::{Error, Result};
use crate::types::LedgerEntry;
use sqlx::PgPool;

/// Parsed deposit identifier: `deposit_<userId>_<timestampMillis>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositIdentifier {
    pub user_id: i64,
    pub issued_at_millis: i64,
}

impl DepositIdentifier {
    /// Parse and validate the provider identifier format. Malformed
    /// identifiers are rejected, never silently dropped.
    pub fn parse(identifier: &str) -> Result<Self> {
        if identifier.is_empty() {
            return Err(Error::InvalidIdentifier("empty identifier".to_string()));
        }

        let rest = identifier
            .strip_prefix("deposit_")
            .ok_or_else(|| Error::InvalidIdentifier(identifier.to_string()))?;

        let (user_part, millis_part) = rest
            .split_once('_')
            .ok_or_else(|| Error::InvalidIdentifier(identifier.to_string()))?;

        let user_id: i64 = user_part
            .parse()
            .map_err(|_| Error::InvalidIdentifier(identifier.to_string()))?;
        let issued_at_millis: i64 = millis_part
            .parse()
            .map_err(|_| Error::InvalidIdentifier(identifier.to_string()))?;

        if user_id <= 0 {
            return Err(Error::InvalidIdentifier(identifier.to_string()));
        }

        Ok(Self {
            user_id,
            issued_at_millis,
        })
    }
}

/// Outcome of an idempotency check
#[derive(Debug, Clone)]
pub enum IdempotencyState {
    /// No entry with this identifier; the caller creates one inside the
    /// atomic apply.
    Unseen,
    /// A pending entry exists; the caller terminalizes it atomically.
    SeenPendingOnly(LedgerEntry),
    /// Already applied. Acknowledge and do nothing.
    SeenTerminal(LedgerEntry),
}

impl IdempotencyState {
    fn classify(entry: Option<LedgerEntry>) -> Self {
        match entry {
            None => IdempotencyState::Unseen,
            Some(e) if e.is_terminal() => IdempotencyState::SeenTerminal(e),
            Some(e) => IdempotencyState::SeenPendingOnly(e),
        }
    }
}

/// Idempotency guard over the ledger entries table
#[derive(Clone)]
pub struct IdempotencyGuard {
    pool: PgPool,
}

impl IdempotencyGuard {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Classify an identifier outside any transaction. Advisory only: the
    /// applier re-checks under the account row lock before mutating.
    pub async fn check(&self, external_identifier: &str) -> Result<IdempotencyState> {
        if external_identifier.is_empty() {
            return Err(Error::InvalidIdentifier("empty identifier".to_string()));
        }

        let entry = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT id, user_id, kind, amount, status, external_identifier,
                   balance_before, balance_after, description,
                   provider_reference, created_at, processed_at
            FROM ledger_entries
            WHERE external_identifier = $1
            "#,
        )
        .bind(external_identifier)
        .fetch_optional(&self.pool)
        .await?;

        Ok(IdempotencyState::classify(entry))
    }
}

/// Classify inside an open transaction, locking the entry row so a
/// concurrent delivery of the same identifier blocks here and then
/// observes the terminal state.
pub async fn check_in_tx(
    tx: &mut PgTx<'_>,
    external_identifier: &str,
) -> Result<IdempotencyState> {
    let entry = sqlx::query_as::<_, LedgerEntry>(
        r#"
        SELECT id, user_id, kind, amount, status, external_identifier,
               balance_before, balance_after, description,
               provider_reference, created_at, processed_at
        FROM ledger_entries
        WHERE external_identifier = $1
        FOR UPDATE
        "#,
    )
    .bind(external_identifier)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(IdempotencyState::classify(entry))
}
