//! Withdrawal creation and guardrails
//!
//! The balance is debited here, at creation time, inside the same
//! transaction that records the pending entry. By the time the provider's
//! webhook arrives there is always a well-formed pending record to
//! terminalize, and concurrent withdrawal requests cannot overdraw.

use crate::atomic;
use crate::config::WithdrawalConfig;
use crate::error::{Error, Result};
use crate::types::{EntryKind, EntryStatus, LedgerEntry, NewEntry};
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

/// Declared type of the payee's PIX key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixKeyType {
    Cpf,
    Cnpj,
    Email,
    Phone,
    Random,
}

impl PixKeyType {
    pub fn as_str(&self) -> &str {
        match self {
            PixKeyType::Cpf => "cpf",
            PixKeyType::Cnpj => "cnpj",
            PixKeyType::Email => "email",
            PixKeyType::Phone => "phone",
            PixKeyType::Random => "random",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpf" => Some(PixKeyType::Cpf),
            "cnpj" => Some(PixKeyType::Cnpj),
            "email" => Some(PixKeyType::Email),
            "phone" => Some(PixKeyType::Phone),
            "random" | "evp" => Some(PixKeyType::Random),
            _ => None,
        }
    }
}

/// Validate a PIX key against its declared type
pub fn validate_pix_key(key_type: PixKeyType, key: &str) -> Result<()> {
    let ok = match key_type {
        PixKeyType::Cpf => key.len() == 11 && key.chars().all(|c| c.is_ascii_digit()),
        PixKeyType::Cnpj => key.len() == 14 && key.chars().all(|c| c.is_ascii_digit()),
        PixKeyType::Email => {
            let (local, domain) = match key.split_once('@') {
                Some(parts) => parts,
                None => return Err(invalid_key(key_type)),
            };
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        PixKeyType::Phone => {
            let digits = key.strip_prefix('+').unwrap_or(key);
            (10..=13).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
        }
        PixKeyType::Random => Uuid::parse_str(key).is_ok(),
    };

    if ok {
        Ok(())
    } else {
        Err(invalid_key(key_type))
    }
}

fn invalid_key(key_type: PixKeyType) -> Error {
    Error::Validation(format!("Malformed PIX key for type {}", key_type.as_str()))
}

/// Creates withdrawal entries with the caller-side guarantees the webhook
/// path depends on.
#[derive(Clone)]
pub struct WithdrawService {
    pool: PgPool,
    config: WithdrawalConfig,
}

impl WithdrawService {
    pub fn new(pool: PgPool, config: WithdrawalConfig) -> Self {
        Self { pool, config }
    }

    /// Create a pending withdrawal, debiting the balance atomically.
    pub async fn create_withdrawal(
        &self,
        user_id: i64,
        amount: Decimal,
        pix_key: &str,
        pix_key_type: PixKeyType,
    ) -> Result<LedgerEntry> {
        if amount < self.config.min_amount || amount > self.config.max_amount {
            return Err(Error::WithdrawalLimitExceeded {
                user_id,
                reason: format!(
                    "amount {} outside [{}, {}]",
                    amount, self.config.min_amount, self.config.max_amount
                ),
            });
        }
        validate_pix_key(pix_key_type, pix_key)?;

        let mut tx = self.pool.begin().await?;

        let account = atomic::lock_account(&mut tx, user_id).await?;

        // Daily caps, evaluated under the account lock so two concurrent
        // requests cannot both squeeze under the limit.
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(-amount), 0) AS total, COUNT(*) AS count
            FROM ledger_entries
            WHERE user_id = $1
              AND kind = $2
              AND status IN ('Pending', 'Completed')
              AND created_at >= date_trunc('day', NOW())
            "#,
        )
        .bind(user_id)
        .bind(EntryKind::Withdrawal.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let daily_total: Decimal = row.try_get("total")?;
        let daily_count: i64 = row.try_get("count")?;

        if daily_total + amount > self.config.daily_amount_cap {
            return Err(Error::WithdrawalLimitExceeded {
                user_id,
                reason: format!(
                    "daily amount cap {} exceeded ({} already withdrawn)",
                    self.config.daily_amount_cap, daily_total
                ),
            });
        }
        if daily_count >= self.config.daily_count_cap {
            return Err(Error::WithdrawalLimitExceeded {
                user_id,
                reason: format!("daily count cap {} reached", self.config.daily_count_cap),
            });
        }

        // Debit now; rejection restores through the reversal path later.
        let change = atomic::apply_balance_delta(&mut tx, &account, -amount).await?;

        let external_identifier =
            format!("withdraw_{}_{}", user_id, Utc::now().timestamp_millis());
        let entry = atomic::insert_entry(
            &mut tx,
            NewEntry {
                user_id,
                kind: EntryKind::Withdrawal,
                amount: -amount,
                status: EntryStatus::Pending,
                external_identifier: Some(external_identifier),
                balance_before: change.before,
                balance_after: change.after,
                description: Some(format!(
                    "PIX withdrawal to {} key",
                    pix_key_type.as_str()
                )),
                provider_reference: None,
            },
        )
        .await?;

        tx.commit().await?;

        info!(
            "Withdrawal {} created for user {}: {} -> {}",
            entry.id, user_id, change.before, change.after
        );
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpf_key_validation() {
        assert!(validate_pix_key(PixKeyType::Cpf, "12345678901").is_ok());
        assert!(validate_pix_key(PixKeyType::Cpf, "1234567890").is_err());
        assert!(validate_pix_key(PixKeyType::Cpf, "1234567890a").is_err());
    }

    #[test]
    fn test_cnpj_key_validation() {
        assert!(validate_pix_key(PixKeyType::Cnpj, "12345678000199").is_ok());
        assert!(validate_pix_key(PixKeyType::Cnpj, "12345678901").is_err());
    }

    #[test]
    fn test_email_key_validation() {
        assert!(validate_pix_key(PixKeyType::Email, "user@example.com").is_ok());
        assert!(validate_pix_key(PixKeyType::Email, "user-at-example.com").is_err());
        assert!(validate_pix_key(PixKeyType::Email, "@example.com").is_err());
        assert!(validate_pix_key(PixKeyType::Email, "user@.com").is_err());
    }

    #[test]
    fn test_phone_key_validation() {
        assert!(validate_pix_key(PixKeyType::Phone, "+5511987654321").is_ok());
        assert!(validate_pix_key(PixKeyType::Phone, "5511987654321").is_ok());
        assert!(validate_pix_key(PixKeyType::Phone, "123").is_err());
        assert!(validate_pix_key(PixKeyType::Phone, "+55phone").is_err());
    }

    #[test]
    fn test_random_key_validation() {
        assert!(validate_pix_key(
            PixKeyType::Random,
            "123e4567-e89b-12d3-a456-426614174000"
        )
        .is_ok());
        assert!(validate_pix_key(PixKeyType::Random, "not-a-uuid").is_err());
    }

    #[test]
    fn test_key_type_parsing() {
        assert_eq!(PixKeyType::from_str("CPF"), Some(PixKeyType::Cpf));
        assert_eq!(PixKeyType::from_str("evp"), Some(PixKeyType::Random));
        assert_eq!(PixKeyType::from_str("iban"), None);
    }
}
