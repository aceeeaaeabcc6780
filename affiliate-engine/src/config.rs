//! Commission engine configuration

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionConfig {
    /// Deposits below this amount never qualify
    pub min_qualifying_amount: Decimal,
    /// Fixed commission credited to the affiliate
    pub commission_amount: Decimal,
}

impl Default for CommissionConfig {
    fn default() -> Self {
        Self {
            min_qualifying_amount: dec!(20.00),
            commission_amount: dec!(10.00),
        }
    }
}

impl CommissionConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        let mut config = CommissionConfig::default();

        if let Ok(value) = env::var("COMMISSION_MIN_QUALIFYING_AMOUNT") {
            if let Ok(value) = Decimal::from_str(&value) {
                config.min_qualifying_amount = value;
            }
        }
        if let Ok(value) = env::var("COMMISSION_AMOUNT") {
            if let Ok(value) = Decimal::from_str(&value) {
                config.commission_amount = value;
            }
        }

        config
    }
}
