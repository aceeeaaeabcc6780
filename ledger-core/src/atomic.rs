//! Atomic unit-of-work primitives
//!
//! Every function here takes an open `PgTx`, making the "what must commit
//! together" boundary a signature-level contract. These are the only code
//! paths that write `accounts` and `wallet_projections`; the mirror
//! invariant (`wallet_projections == accounts` balance fields) holds
//! because both writes happen here, inside the caller's transaction.

use crate::error::{Error, Result};
use crate::types::{Account, AccountKind, EntryStatus, LedgerEntry, NewEntry};
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

/// An open Postgres transaction: the atomic unit
pub type PgTx<'a> = sqlx::Transaction<'a, sqlx::Postgres>;

/// Balance movement observed at commit time
#[derive(Debug, Clone, Copy)]
pub struct BalanceChange {
    pub before: Decimal,
    pub after: Decimal,
}

/// Lock the account row for the remainder of the transaction. This is the
/// per-user serialization point: concurrent appliers for the same user
/// queue here.
pub async fn lock_account(tx: &mut PgTx<'_>, user_id: i64) -> Result<Account> {
    sqlx::query_as::<_, Account>(
        r#"
        SELECT user_id, account_kind, real_balance, demo_balance,
               first_deposit_done, referred_by_affiliate_id,
               referral_code_used, created_at, updated_at
        FROM accounts
        WHERE user_id = $1
        FOR UPDATE
        "#,
    )
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(Error::AccountNotFound(user_id))
}

/// Apply a signed delta to the account's active balance and mirror the
/// result into the wallet projection. The inactive balance is written
/// back unchanged. Negative results are rejected before any write.
pub async fn apply_balance_delta(
    tx: &mut PgTx<'_>,
    account: &Account,
    delta: Decimal,
) -> Result<BalanceChange> {
    let before = account.active_balance();
    let after = before + delta;

    if after < Decimal::ZERO {
        return Err(Error::InsufficientBalance {
            user_id: account.user_id,
            required: -delta,
            available: before,
        });
    }

    let (real_balance, demo_balance) = match account.kind() {
        AccountKind::Real => (after, account.demo_balance),
        AccountKind::DemoAffiliate => (account.real_balance, after),
    };

    let now = Utc::now();

    sqlx::query(
        r#"
        UPDATE accounts
        SET real_balance = $2, demo_balance = $3, updated_at = $4
        WHERE user_id = $1
        "#,
    )
    .bind(account.user_id)
    .bind(real_balance)
    .bind(demo_balance)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    // Lazy upsert: the projection row may not exist yet for accounts
    // provisioned before the projection table was introduced.
    sqlx::query(
        r#"
        INSERT INTO wallet_projections (user_id, real_balance, demo_balance, updated_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id) DO UPDATE SET
            real_balance = EXCLUDED.real_balance,
            demo_balance = EXCLUDED.demo_balance,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(account.user_id)
    .bind(real_balance)
    .bind(demo_balance)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(BalanceChange { before, after })
}

/// Append a ledger entry
pub async fn insert_entry(tx: &mut PgTx<'_>, new_entry: NewEntry) -> Result<LedgerEntry> {
    let now = Utc::now();
    let processed_at = if new_entry.status.is_terminal() {
        Some(now)
    } else {
        None
    };

    let entry = sqlx::query_as::<_, LedgerEntry>(
        r#"
        INSERT INTO ledger_entries (
            id, user_id, kind, amount, status, external_identifier,
            balance_before, balance_after, description, provider_reference,
            created_at, processed_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING id, user_id, kind, amount, status, external_identifier,
                  balance_before, balance_after, description,
                  provider_reference, created_at, processed_at
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(new_entry.user_id)
    .bind(new_entry.kind.as_str())
    .bind(new_entry.amount)
    .bind(new_entry.status.as_str())
    .bind(&new_entry.external_identifier)
    .bind(new_entry.balance_before)
    .bind(new_entry.balance_after)
    .bind(&new_entry.description)
    .bind(&new_entry.provider_reference)
    .bind(now)
    .bind(processed_at)
    .fetch_one(&mut **tx)
    .await?;

    Ok(entry)
}

/// Transition a pending entry to a terminal status, optionally recording
/// the commit-time balance movement and provider metadata. Entries already
/// terminal are left alone (guarded by the caller's idempotency check).
pub async fn terminalize_entry(
    tx: &mut PgTx<'_>,
    entry_id: Uuid,
    status: EntryStatus,
    change: Option<BalanceChange>,
    provider_reference: Option<&str>,
) -> Result<()> {
    let now = Utc::now();

    match change {
        Some(change) => {
            sqlx::query(
                r#"
                UPDATE ledger_entries
                SET status = $2, balance_before = $3, balance_after = $4,
                    amount = $4 - $3,
                    provider_reference = COALESCE($5, provider_reference),
                    processed_at = $6
                WHERE id = $1 AND status = 'Pending'
                "#,
            )
            .bind(entry_id)
            .bind(status.as_str())
            .bind(change.before)
            .bind(change.after)
            .bind(provider_reference)
            .bind(now)
            .execute(&mut **tx)
            .await?;
        }
        None => {
            sqlx::query(
                r#"
                UPDATE ledger_entries
                SET status = $2,
                    provider_reference = COALESCE($3, provider_reference),
                    processed_at = $4
                WHERE id = $1 AND status = 'Pending'
                "#,
            )
            .bind(entry_id)
            .bind(status.as_str())
            .bind(provider_reference)
            .bind(now)
            .execute(&mut **tx)
            .await?;
        }
    }

    Ok(())
}

/// Record that the account has received its first completed deposit
pub async fn mark_first_deposit_done(tx: &mut PgTx<'_>, user_id: i64) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE accounts
        SET first_deposit_done = TRUE, updated_at = $2
        WHERE user_id = $1 AND first_deposit_done = FALSE
        "#,
    )
    .bind(user_id)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;

    Ok(())
}
