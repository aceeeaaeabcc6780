//! Affiliate bookkeeping records

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// At most one per (affiliate, referred user) pair, enforced by a unique
/// constraint.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AffiliateCommission {
    pub id: Uuid,
    pub affiliate_account_id: i64,
    pub referred_user_id: i64,
    pub amount: Decimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only reporting record of referral outcomes. Not required for
/// balance correctness.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AffiliateHistory {
    pub id: Uuid,
    pub affiliate_account_id: i64,
    pub referred_user_id: i64,
    pub event_type: String,
    pub amount: Decimal,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}
