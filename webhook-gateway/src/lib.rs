//! Webhook gateway
//!
//! HTTP entry point for the payment providers' asynchronous webhooks.
//! Authenticates the shared-secret headers, normalizes the provider
//! payload shapes, and dispatches into the ledger crates. Every
//! recognized event is acknowledged with 200 whether it was applied or
//! replayed; the providers retry anything else.

#![forbid(unsafe_code)]

pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod payload;

pub use config::{Config, ProviderConfig, ServerConfig};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use errors::{GatewayError, Result};
pub use handlers::AppState;
pub use metrics::GatewayMetrics;
pub use payload::{
    DepositEvent, DepositWebhook, NormalizedDeposit, NormalizedWithdrawal, WithdrawalEvent,
    WithdrawalWebhook,
};
