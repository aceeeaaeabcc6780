//! Ledger store: pool lifecycle and read-side access
//!
//! All balance mutations go through [`crate::atomic`] and the
//! [`crate::applier::TransactionApplier`]; this module owns the connection
//! pool, runs migrations, and provides reads plus registration-time account
//! provisioning. The webhook path never creates accounts.

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::types::{Account, AccountKind, EntryKind, LedgerEntry, WalletProjection};
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Handle to the persistent ledger. Cheap to clone; all clones share the
/// same pool.
#[derive(Clone)]
pub struct LedgerStore {
    pool: PgPool,
}

impl LedgerStore {
    /// Connect, verify the connection, and run migrations
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        // Probe the connection before declaring victory
        sqlx::query("SELECT 1").fetch_one(&pool).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::Internal(format!("Migration failed: {}", e)))?;

        info!("Database connection pool ready, migrations applied");

        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests, embedding)
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Shared connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close the pool, waiting for in-flight connections
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ===== ACCOUNTS =====

    /// Create an account at registration time, with its wallet projection,
    /// optionally linked to a referring affiliate.
    pub async fn create_account(
        &self,
        user_id: i64,
        kind: AccountKind,
        referred_by_affiliate_id: Option<i64>,
        referral_code_used: Option<String>,
    ) -> Result<Account> {
        let mut tx = self.pool.begin().await?;

        let now = Utc::now();
        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (
                user_id, account_kind, real_balance, demo_balance,
                first_deposit_done, referred_by_affiliate_id, referral_code_used,
                created_at, updated_at
            ) VALUES ($1, $2, 0, 0, FALSE, $3, $4, $5, $5)
            RETURNING user_id, account_kind, real_balance, demo_balance,
                      first_deposit_done, referred_by_affiliate_id,
                      referral_code_used, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(referred_by_affiliate_id)
        .bind(&referral_code_used)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO wallet_projections (user_id, real_balance, demo_balance, updated_at)
            VALUES ($1, 0, 0, $2)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!("Created account for user {}", user_id);
        Ok(account)
    }

    /// Link a referral after the fact. Write-once: refuses to overwrite an
    /// existing link.
    pub async fn link_referral(
        &self,
        user_id: i64,
        affiliate_id: i64,
        referral_code: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET referred_by_affiliate_id = $2,
                referral_code_used = $3,
                updated_at = $4
            WHERE user_id = $1 AND referred_by_affiliate_id IS NULL
            "#,
        )
        .bind(user_id)
        .bind(affiliate_id)
        .bind(referral_code)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Validation(format!(
                "User {} is already linked to an affiliate or does not exist",
                user_id
            )));
        }

        Ok(())
    }

    /// Fetch an account
    pub async fn get_account(&self, user_id: i64) -> Result<Account> {
        sqlx::query_as::<_, Account>(
            r#"
            SELECT user_id, account_kind, real_balance, demo_balance,
                   first_deposit_done, referred_by_affiliate_id,
                   referral_code_used, created_at, updated_at
            FROM accounts
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::AccountNotFound(user_id))
    }

    /// Fetch the wallet projection mirror
    pub async fn get_wallet_projection(&self, user_id: i64) -> Result<WalletProjection> {
        sqlx::query_as::<_, WalletProjection>(
            r#"
            SELECT user_id, real_balance, demo_balance, updated_at
            FROM wallet_projections
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::AccountNotFound(user_id))
    }

    // ===== LEDGER ENTRIES =====

    /// Look up an entry by its provider-supplied identifier
    pub async fn get_entry_by_external_identifier(
        &self,
        external_identifier: &str,
    ) -> Result<Option<LedgerEntry>> {
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

        Ok(entry)
    }

    /// Resolve a withdrawal entry by identifier or provider reference.
    /// Providers are inconsistent about which field they echo back.
    pub async fn find_withdrawal(&self, reference: &str) -> Result<Option<LedgerEntry>> {
        let entry = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT id, user_id, kind, amount, status, external_identifier,
                   balance_before, balance_after, description,
                   provider_reference, created_at, processed_at
            FROM ledger_entries
            WHERE kind = $1
              AND (external_identifier = $2 OR provider_reference = $2)
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(EntryKind::Withdrawal.as_str())
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    /// Transaction history for a user, newest first
    pub async fn list_entries_for_user(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT id, user_id, kind, amount, status, external_identifier,
                   balance_before, balance_after, description,
                   provider_reference, created_at, processed_at
            FROM ledger_entries
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}
