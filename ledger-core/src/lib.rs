//! PrizeRail Ledger Core
//!
//! Persistent ledger for the PIX deposit/withdrawal rail: accounts, the
//! denormalized wallet projection, and the append-oriented ledger entry
//! log, together with the components that mutate them.
//!
//! # Invariants
//!
//! - Mirror: `wallet_projections` balances equal `accounts` balances after
//!   every committed apply
//! - Idempotency: at most one balance mutation per external identifier
//! - Audit: `balance_after == balance_before + amount`, evaluated at
//!   commit time under the account row lock
//! - Single writer: only [`atomic`] touches the balance columns

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod applier;
pub mod atomic;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod store;
pub mod types;
pub mod withdraw;

// Re-exports
pub use applier::{AppliedResult, ApplyOutcome, ApplyRequest, TransactionApplier};
pub use config::{DatabaseConfig, LedgerConfig, WithdrawalConfig};
pub use error::{Error, Result};
pub use idempotency::{DepositIdentifier, IdempotencyGuard, IdempotencyState};
pub use store::LedgerStore;
pub use types::{
    Account, AccountKind, EntryKind, EntryStatus, LedgerEntry, NewEntry, WalletProjection,
};
pub use withdraw::{PixKeyType, WithdrawService};
