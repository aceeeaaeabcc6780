//! Core types for the ledger
//!
//! All money fields use `Decimal` for exact arithmetic. Status and kind
//! columns are stored as text; the enums below own the canonical spellings
//! via `as_str`/`from_str`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ===== ACCOUNTS =====

/// Per-user account record. Exactly one of the two balances is active,
/// selected by `account_kind`; the inactive one stays at zero.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub user_id: i64,
    pub account_kind: String,
    pub real_balance: Decimal,
    pub demo_balance: Decimal,
    pub first_deposit_done: bool,
    pub referred_by_affiliate_id: Option<i64>,
    pub referral_code_used: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Account kind as an enum
    pub fn kind(&self) -> AccountKind {
        AccountKind::from_str(&self.account_kind)
    }

    /// The balance selected by `account_kind`
    pub fn active_balance(&self) -> Decimal {
        match self.kind() {
            AccountKind::Real => self.real_balance,
            AccountKind::DemoAffiliate => self.demo_balance,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccountKind {
    Real,
    DemoAffiliate,
}

impl AccountKind {
    pub fn as_str(&self) -> &str {
        match self {
            AccountKind::Real => "Real",
            AccountKind::DemoAffiliate => "DemoAffiliate",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "DemoAffiliate" => AccountKind::DemoAffiliate,
            _ => AccountKind::Real,
        }
    }
}

// ===== WALLET PROJECTIONS =====

/// Denormalized mirror of the account balances. Updated only inside the
/// same transaction that updates `accounts`; equality with the account
/// row is a hard invariant, not eventual.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WalletProjection {
    pub user_id: i64,
    pub real_balance: Decimal,
    pub demo_balance: Decimal,
    pub updated_at: DateTime<Utc>,
}

// ===== LEDGER ENTRIES =====

/// Immutable audit record of one balance-affecting event.
///
/// `external_identifier`, when present, is the idempotency key: unique per
/// provider event, enforced by a partial unique index.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: i64,
    pub kind: String,
    pub amount: Decimal,
    pub status: String,
    pub external_identifier: Option<String>,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub description: Option<String>,
    pub provider_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    pub fn entry_kind(&self) -> EntryKind {
        EntryKind::from_str(&self.kind)
    }

    pub fn entry_status(&self) -> EntryStatus {
        EntryStatus::from_str(&self.status)
    }

    /// Terminal entries are never mutated again (except provider metadata)
    pub fn is_terminal(&self) -> bool {
        self.entry_status().is_terminal()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EntryKind {
    Deposit,
    Withdrawal,
    WithdrawalReversal,
    AffiliateCredit,
    AffiliateWithdrawal,
}

impl EntryKind {
    pub fn as_str(&self) -> &str {
        match self {
            EntryKind::Deposit => "Deposit",
            EntryKind::Withdrawal => "Withdrawal",
            EntryKind::WithdrawalReversal => "WithdrawalReversal",
            EntryKind::AffiliateCredit => "AffiliateCredit",
            EntryKind::AffiliateWithdrawal => "AffiliateWithdrawal",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "Withdrawal" => EntryKind::Withdrawal,
            "WithdrawalReversal" => EntryKind::WithdrawalReversal,
            "AffiliateCredit" => EntryKind::AffiliateCredit,
            "AffiliateWithdrawal" => EntryKind::AffiliateWithdrawal,
            _ => EntryKind::Deposit,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EntryStatus {
    Pending,
    Completed,
    Failed,
    Rejected,
}

impl EntryStatus {
    pub fn as_str(&self) -> &str {
        match self {
            EntryStatus::Pending => "Pending",
            EntryStatus::Completed => "Completed",
            EntryStatus::Failed => "Failed",
            EntryStatus::Rejected => "Rejected",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "Completed" => EntryStatus::Completed,
            "Failed" => EntryStatus::Failed,
            "Rejected" => EntryStatus::Rejected,
            _ => EntryStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, EntryStatus::Pending)
    }
}

// ===== NEW ENTRY =====

/// Fields for a ledger entry about to be inserted. The id and timestamps
/// are assigned at insert time.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub user_id: i64,
    pub kind: EntryKind,
    pub amount: Decimal,
    pub status: EntryStatus,
    pub external_identifier: Option<String>,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub description: Option<String>,
    pub provider_reference: Option<String>,
}
