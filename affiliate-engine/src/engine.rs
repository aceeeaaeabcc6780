//! Commission engine
//!
//! Credits the referring affiliate once, and only once, for a referred
//! user's first qualifying deposit. The credit runs in its own atomic
//! unit, independent of the deposit's transaction: the deposit is durably
//! correct even if this engine never runs.
//!
//! The first-deposit determination only counts deposits strictly earlier
//! than the triggering entry (entry ids are UUIDv7, so id order is
//! insertion order). The trigger cannot disqualify itself, and a
//! concurrent later deposit cannot either: that race falls through to the
//! uniqueness constraint on the commission pair, which credits exactly one
//! of the two runs.

use crate::config::CommissionConfig;
use crate::error::Result;
use crate::types::{AffiliateCommission, AffiliateHistory};
use ledger_core::atomic;
use ledger_core::types::{EntryKind, EntryStatus, NewEntry};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

/// Outcome of a commission attempt. Only `Credited` moved money.
#[derive(Debug, Clone)]
pub enum CommissionOutcome {
    Credited {
        affiliate_account_id: i64,
        entry_id: Uuid,
        amount: Decimal,
    },
    /// The uniqueness constraint (or the existence check) says this pair
    /// was already paid. A no-op, not an error.
    AlreadyCredited,
    NotEligible(&'static str),
}

/// Pure eligibility filter: terminal success status and amount at or
/// above the qualifying threshold.
pub fn is_qualifying(status: EntryStatus, amount: Decimal, minimum: Decimal) -> bool {
    status == EntryStatus::Completed && amount >= minimum
}

#[derive(Clone)]
pub struct CommissionEngine {
    pool: PgPool,
    config: CommissionConfig,
}

impl CommissionEngine {
    pub fn new(pool: PgPool, config: CommissionConfig) -> Self {
        Self { pool, config }
    }

    /// Credit the referring affiliate if this deposit is the referred
    /// user's first qualifying one. Fire-and-check: the caller observes
    /// the outcome for logging but must not fail the deposit on error.
    pub async fn maybe_credit_commission(
        &self,
        referred_user_id: i64,
        deposit_amount: Decimal,
        deposit_status: EntryStatus,
        triggering_entry_id: Uuid,
    ) -> Result<CommissionOutcome> {
        if !is_qualifying(deposit_status, deposit_amount, self.config.min_qualifying_amount) {
            return Ok(CommissionOutcome::NotEligible("deposit not qualifying"));
        }

        let affiliate_id = match self.referring_affiliate(referred_user_id).await? {
            Some(affiliate_id) => affiliate_id,
            None => return Ok(CommissionOutcome::NotEligible("no referring affiliate")),
        };

        let mut tx = self.pool.begin().await?;

        // The affiliate account lock serializes concurrent qualifying
        // deposits for users referred by the same affiliate.
        let affiliate = atomic::lock_account(&mut tx, affiliate_id).await?;

        let already_credited: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM affiliate_commissions
                WHERE affiliate_account_id = $1 AND referred_user_id = $2
            )
            "#,
        )
        .bind(affiliate.user_id)
        .bind(referred_user_id)
        .fetch_one(&mut *tx)
        .await?;

        if already_credited {
            tx.rollback().await?;
            return Ok(CommissionOutcome::AlreadyCredited);
        }

        // Strictly earlier only (ids are UUIDv7, ordered by insertion).
        // A concurrent later deposit must not disqualify this run; if both
        // runs pass, the pair constraint below picks the single winner.
        let earlier_qualifying: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM ledger_entries
                WHERE user_id = $1
                  AND kind = $2
                  AND status = $3
                  AND amount >= $4
                  AND id < $5
            )
            "#,
        )
        .bind(referred_user_id)
        .bind(EntryKind::Deposit.as_str())
        .bind(EntryStatus::Completed.as_str())
        .bind(self.config.min_qualifying_amount)
        .bind(triggering_entry_id)
        .fetch_one(&mut *tx)
        .await?;

        if earlier_qualifying {
            tx.rollback().await?;
            return Ok(CommissionOutcome::NotEligible("not the first qualifying deposit"));
        }

        // The unique constraint on the pair is the race arbiter: the
        // second of two concurrent qualifying deposits inserts zero rows
        // and must treat that as already-credited.
        let inserted = sqlx::query(
            r#"
            INSERT INTO affiliate_commissions (
                id, affiliate_account_id, referred_user_id, amount, status, created_at
            ) VALUES ($1, $2, $3, $4, 'Credited', NOW())
            ON CONFLICT ON CONSTRAINT affiliate_commissions_pair_key DO NOTHING
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(affiliate.user_id)
        .bind(referred_user_id)
        .bind(self.config.commission_amount)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            debug!(
                "Commission for referred user {} lost the insert race",
                referred_user_id
            );
            return Ok(CommissionOutcome::AlreadyCredited);
        }

        let change =
            atomic::apply_balance_delta(&mut tx, &affiliate, self.config.commission_amount)
                .await?;
        let entry = atomic::insert_entry(
            &mut tx,
            NewEntry {
                user_id: affiliate.user_id,
                kind: EntryKind::AffiliateCredit,
                amount: self.config.commission_amount,
                status: EntryStatus::Completed,
                external_identifier: None,
                balance_before: change.before,
                balance_after: change.after,
                description: Some(format!(
                    "Referral commission for user {}",
                    referred_user_id
                )),
                provider_reference: None,
            },
        )
        .await?;

        sqlx::query(
            r#"
            INSERT INTO affiliate_history (
                id, affiliate_account_id, referred_user_id, event_type,
                amount, description, created_at
            ) VALUES ($1, $2, $3, 'FirstDepositCommission', $4, $5, NOW())
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(affiliate.user_id)
        .bind(referred_user_id)
        .bind(self.config.commission_amount)
        .bind(format!("Triggered by deposit entry {}", triggering_entry_id))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            "Commission {} credited to affiliate {} for referred user {}",
            self.config.commission_amount, affiliate.user_id, referred_user_id
        );
        Ok(CommissionOutcome::Credited {
            affiliate_account_id: affiliate.user_id,
            entry_id: entry.id,
            amount: self.config.commission_amount,
        })
    }

    /// Commission record for one (affiliate, referred user) pair, if paid
    pub async fn commission_for(
        &self,
        affiliate_account_id: i64,
        referred_user_id: i64,
    ) -> Result<Option<AffiliateCommission>> {
        let commission = sqlx::query_as::<_, AffiliateCommission>(
            r#"
            SELECT id, affiliate_account_id, referred_user_id, amount, status, created_at
            FROM affiliate_commissions
            WHERE affiliate_account_id = $1 AND referred_user_id = $2
            "#,
        )
        .bind(affiliate_account_id)
        .bind(referred_user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(commission)
    }

    /// Referral outcome history for an affiliate, newest first
    pub async fn history_for_affiliate(
        &self,
        affiliate_account_id: i64,
        limit: i64,
    ) -> Result<Vec<AffiliateHistory>> {
        let history = sqlx::query_as::<_, AffiliateHistory>(
            r#"
            SELECT id, affiliate_account_id, referred_user_id, event_type,
                   amount, description, created_at
            FROM affiliate_history
            WHERE affiliate_account_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(affiliate_account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(history)
    }

    async fn referring_affiliate(&self, referred_user_id: i64) -> Result<Option<i64>> {
        let affiliate_id: Option<Option<i64>> = sqlx::query_scalar(
            "SELECT referred_by_affiliate_id FROM accounts WHERE user_id = $1",
        )
        .bind(referred_user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(affiliate_id.flatten())
    }
}
