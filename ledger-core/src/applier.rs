//! Transaction applier
//!
//! The single writer for balance mutations. For one externally-confirmed
//! payment event, the account update, the wallet projection mirror, and
//! the ledger entry transition commit as one unit. Serialization conflicts
//! are retried a bounded number of times, then surfaced as transient so
//! the provider's own retry re-delivers (safe: the idempotency guard
//! absorbs the duplicate).

use crate::atomic::{self, BalanceChange};
use crate::config::LedgerConfig;
use crate::error::{is_serialization_failure, is_unique_violation, Error, Result};
use crate::idempotency::{check_in_tx, IdempotencyState};
use crate::types::{EntryKind, EntryStatus, LedgerEntry, NewEntry};
use rand::Rng;
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One balance-affecting apply request
#[derive(Debug, Clone)]
pub struct ApplyRequest {
    pub user_id: i64,
    pub kind: EntryKind,
    /// Positive credit amount
    pub amount: Decimal,
    pub external_identifier: String,
    pub target_status: EntryStatus,
    pub description: Option<String>,
    pub provider_reference: Option<String>,
}

/// Committed balance movement for one applied event
#[derive(Debug, Clone, Copy)]
pub struct AppliedResult {
    pub entry_id: Uuid,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
}

/// Outcome of an apply attempt. `AlreadyProcessed` is the idempotency
/// short-circuit, not an error: callers acknowledge it as success.
#[derive(Debug, Clone, Copy)]
pub enum ApplyOutcome {
    Applied(AppliedResult),
    AlreadyProcessed { entry_id: Uuid },
}

/// Applies confirmed payment events to the ledger
#[derive(Clone)]
pub struct TransactionApplier {
    pool: PgPool,
    config: LedgerConfig,
}

impl TransactionApplier {
    pub fn new(pool: PgPool, config: LedgerConfig) -> Self {
        Self { pool, config }
    }

    /// Credit the user's active balance and terminalize (or create) the
    /// ledger entry, atomically. Used for confirmed deposits.
    pub async fn apply(&self, request: &ApplyRequest) -> Result<ApplyOutcome> {
        if request.amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(request.amount));
        }
        if !request.target_status.is_terminal() {
            return Err(Error::Validation(
                "apply target status must be terminal".to_string(),
            ));
        }

        let mut attempt: u32 = 0;
        loop {
            match self.apply_once(request).await {
                Ok(outcome) => return Ok(outcome),
                Err(Error::Database(db_err)) if is_unique_violation(&db_err) => {
                    // Lost the insert race for this identifier: the other
                    // delivery won. Same contract as SeenTerminal.
                    return self.resolve_duplicate(&request.external_identifier).await;
                }
                Err(Error::Database(db_err)) if is_serialization_failure(&db_err) => {
                    if attempt >= self.config.apply_max_retries {
                        warn!(
                            "Apply for {} exhausted {} retries",
                            request.external_identifier, attempt
                        );
                        return Err(Error::Conflict(db_err.to_string()));
                    }
                    attempt += 1;
                    let backoff = self.backoff_for(attempt);
                    debug!(
                        "Serialization conflict applying {}, retry {} in {:?}",
                        request.external_identifier, attempt, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn apply_once(&self, request: &ApplyRequest) -> Result<ApplyOutcome> {
        let mut tx = self.pool.begin().await?;

        let account = atomic::lock_account(&mut tx, request.user_id).await?;

        // Re-check under the account lock: a concurrent duplicate blocks
        // on the lock above and must observe the terminal state here.
        match check_in_tx(&mut tx, &request.external_identifier).await? {
            IdempotencyState::SeenTerminal(entry) => {
                tx.rollback().await?;
                debug!(
                    "Identifier {} already terminal, short-circuiting",
                    request.external_identifier
                );
                return Ok(ApplyOutcome::AlreadyProcessed { entry_id: entry.id });
            }
            IdempotencyState::SeenPendingOnly(entry) => {
                let change =
                    atomic::apply_balance_delta(&mut tx, &account, request.amount).await?;
                atomic::terminalize_entry(
                    &mut tx,
                    entry.id,
                    request.target_status,
                    Some(change),
                    request.provider_reference.as_deref(),
                )
                .await?;
                self.finish_deposit(&mut tx, request, change).await?;
                let entry_id = entry.id;
                tx.commit().await?;
                Ok(ApplyOutcome::Applied(AppliedResult {
                    entry_id,
                    balance_before: change.before,
                    balance_after: change.after,
                }))
            }
            IdempotencyState::Unseen => {
                let change =
                    atomic::apply_balance_delta(&mut tx, &account, request.amount).await?;
                let entry = atomic::insert_entry(
                    &mut tx,
                    NewEntry {
                        user_id: request.user_id,
                        kind: request.kind,
                        amount: request.amount,
                        status: request.target_status,
                        external_identifier: Some(request.external_identifier.clone()),
                        balance_before: change.before,
                        balance_after: change.after,
                        description: request.description.clone(),
                        provider_reference: request.provider_reference.clone(),
                    },
                )
                .await?;
                self.finish_deposit(&mut tx, request, change).await?;
                tx.commit().await?;
                Ok(ApplyOutcome::Applied(AppliedResult {
                    entry_id: entry.id,
                    balance_before: change.before,
                    balance_after: change.after,
                }))
            }
        }
    }

    async fn finish_deposit(
        &self,
        tx: &mut atomic::PgTx<'_>,
        request: &ApplyRequest,
        change: BalanceChange,
    ) -> Result<()> {
        if request.kind == EntryKind::Deposit && request.target_status == EntryStatus::Completed {
            atomic::mark_first_deposit_done(tx, request.user_id).await?;
            info!(
                "Deposit {} applied for user {}: {} -> {}",
                request.external_identifier, request.user_id, change.before, change.after
            );
        }
        Ok(())
    }

    /// Terminalize a deposit that expired or failed at the provider. No
    /// balance movement; an entry is still recorded for audit when the
    /// initiating flow never created one.
    pub async fn record_deposit_failure(
        &self,
        user_id: i64,
        external_identifier: &str,
        amount: Decimal,
        target_status: EntryStatus,
        provider_status: &str,
    ) -> Result<ApplyOutcome> {
        let mut tx = self.pool.begin().await?;

        let account = atomic::lock_account(&mut tx, user_id).await?;

        match check_in_tx(&mut tx, external_identifier).await? {
            IdempotencyState::SeenTerminal(entry) => {
                tx.rollback().await?;
                Ok(ApplyOutcome::AlreadyProcessed { entry_id: entry.id })
            }
            IdempotencyState::SeenPendingOnly(entry) => {
                atomic::terminalize_entry(&mut tx, entry.id, target_status, None, None).await?;
                tx.commit().await?;
                Ok(ApplyOutcome::Applied(AppliedResult {
                    entry_id: entry.id,
                    balance_before: entry.balance_before,
                    balance_after: entry.balance_after,
                }))
            }
            IdempotencyState::Unseen => {
                let balance = account.active_balance();
                let entry = atomic::insert_entry(
                    &mut tx,
                    NewEntry {
                        user_id,
                        kind: EntryKind::Deposit,
                        amount,
                        status: target_status,
                        external_identifier: Some(external_identifier.to_string()),
                        balance_before: balance,
                        balance_after: balance,
                        description: Some(format!("Deposit {}", provider_status)),
                        provider_reference: None,
                    },
                )
                .await?;
                tx.commit().await?;
                Ok(ApplyOutcome::Applied(AppliedResult {
                    entry_id: entry.id,
                    balance_before: balance,
                    balance_after: balance,
                }))
            }
        }
    }

    /// Terminalize an approved withdrawal. The balance was debited at
    /// creation time; approval changes status only.
    pub async fn approve_withdrawal(
        &self,
        entry_id: Uuid,
        provider_reference: Option<&str>,
    ) -> Result<ApplyOutcome> {
        let mut tx = self.pool.begin().await?;

        let entry = lock_entry(&mut tx, entry_id).await?;
        if entry.is_terminal() {
            tx.rollback().await?;
            return Ok(ApplyOutcome::AlreadyProcessed { entry_id: entry.id });
        }

        atomic::terminalize_entry(
            &mut tx,
            entry.id,
            EntryStatus::Completed,
            None,
            provider_reference,
        )
        .await?;
        tx.commit().await?;

        info!("Withdrawal {} approved for user {}", entry.id, entry.user_id);
        Ok(ApplyOutcome::Applied(AppliedResult {
            entry_id: entry.id,
            balance_before: entry.balance_before,
            balance_after: entry.balance_after,
        }))
    }

    /// Withdrawal reversal path: terminalize the original debit entry and
    /// restore the debited amount through a separate reversal entry. The
    /// original entry stays immutable apart from its status transition;
    /// the restore is its own audit record.
    pub async fn reverse_withdrawal(
        &self,
        entry_id: Uuid,
        target_status: EntryStatus,
        provider_reference: Option<&str>,
    ) -> Result<ApplyOutcome> {
        let mut tx = self.pool.begin().await?;

        // Lock order matches apply(): account row first, then the entry.
        let peek = lock_entry_user(&mut tx, entry_id).await?;
        let account = atomic::lock_account(&mut tx, peek).await?;
        let entry = lock_entry(&mut tx, entry_id).await?;

        if entry.is_terminal() {
            tx.rollback().await?;
            return Ok(ApplyOutcome::AlreadyProcessed { entry_id: entry.id });
        }

        // Withdrawal entries carry a negative amount; restoring negates it.
        let restore = -entry.amount;
        if restore <= Decimal::ZERO {
            tx.rollback().await?;
            return Err(Error::Validation(format!(
                "Entry {} is not a debit, cannot reverse",
                entry.id
            )));
        }

        atomic::terminalize_entry(&mut tx, entry.id, target_status, None, provider_reference)
            .await?;

        let change = atomic::apply_balance_delta(&mut tx, &account, restore).await?;
        let reversal = atomic::insert_entry(
            &mut tx,
            NewEntry {
                user_id: entry.user_id,
                kind: EntryKind::WithdrawalReversal,
                amount: restore,
                status: EntryStatus::Completed,
                external_identifier: None,
                balance_before: change.before,
                balance_after: change.after,
                description: Some(format!("Reversal of withdrawal {}", entry.id)),
                provider_reference: None,
            },
        )
        .await?;
        tx.commit().await?;

        info!(
            "Withdrawal {} reversed for user {}: restored {}",
            entry.id, entry.user_id, restore
        );
        Ok(ApplyOutcome::Applied(AppliedResult {
            entry_id: reversal.id,
            balance_before: change.before,
            balance_after: change.after,
        }))
    }

    async fn resolve_duplicate(&self, external_identifier: &str) -> Result<ApplyOutcome> {
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
        .await?
        .ok_or_else(|| Error::EntryNotFound(external_identifier.to_string()))?;

        Ok(ApplyOutcome::AlreadyProcessed { entry_id: entry.id })
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self.config.apply_backoff_ms << (attempt.saturating_sub(1).min(6));
        let jitter = rand::thread_rng().gen_range(0..=self.config.apply_backoff_ms);
        Duration::from_millis(base + jitter)
    }
}

async fn lock_entry(tx: &mut atomic::PgTx<'_>, entry_id: Uuid) -> Result<LedgerEntry> {
    sqlx::query_as::<_, LedgerEntry>(
        r#"
        SELECT id, user_id, kind, amount, status, external_identifier,
               balance_before, balance_after, description,
               provider_reference, created_at, processed_at
        FROM ledger_entries
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(entry_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| Error::EntryNotFound(entry_id.to_string()))
}

/// Read the owning user without taking the entry lock, so the account row
/// can be locked first (consistent lock order with `apply`).
async fn lock_entry_user(tx: &mut atomic::PgTx<'_>, entry_id: Uuid) -> Result<i64> {
    let user_id: Option<i64> =
        sqlx::query_scalar("SELECT user_id FROM ledger_entries WHERE id = $1")
            .bind(entry_id)
            .fetch_optional(&mut **tx)
            .await?;

    user_id.ok_or_else(|| Error::EntryNotFound(entry_id.to_string()))
}
