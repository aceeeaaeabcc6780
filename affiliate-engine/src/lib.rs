//! PrizeRail Affiliate Engine
//!
//! First-qualifying-deposit commission crediting, at most once per
//! (affiliate, referred user) pair. Isolated from the deposit path:
//! failures here never roll back the deposit that triggered them.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod config;
pub mod engine;
pub mod error;
pub mod types;

// Re-exports
pub use config::CommissionConfig;
pub use engine::{is_qualifying, CommissionEngine, CommissionOutcome};
pub use error::{EngineError, Result};
pub use types::{AffiliateCommission, AffiliateHistory};
