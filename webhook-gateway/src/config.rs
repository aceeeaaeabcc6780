//! Gateway configuration

use affiliate_engine::CommissionConfig;
use ledger_core::{DatabaseConfig, LedgerConfig, WithdrawalConfig};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub ledger: LedgerConfig,
    pub withdrawal: WithdrawalConfig,
    pub commission: CommissionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

/// Shared-secret webhook authentication. When keys are configured the
/// `x-public-key`/`x-secret-key` headers are mandatory; the legacy
/// accept-when-absent behavior only exists behind the explicit
/// `allow_unauthenticated` flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub public_key: Option<String>,
    pub secret_key: Option<String>,
    pub allow_unauthenticated: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenv::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                http_port: env::var("HTTP_PORT")
                    .unwrap_or_else(|_| "8090".to_string())
                    .parse()?,
            },
            database: DatabaseConfig::from_env(),
            provider: ProviderConfig {
                public_key: env::var("WEBHOOK_PUBLIC_KEY").ok(),
                secret_key: env::var("WEBHOOK_SECRET_KEY").ok(),
                allow_unauthenticated: env::var("WEBHOOK_ALLOW_UNAUTHENTICATED")
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(false),
            },
            ledger: LedgerConfig::default(),
            withdrawal: WithdrawalConfig::default(),
            commission: CommissionConfig::from_env(),
        };

        config.provider.validate()?;

        Ok(config)
    }
}

impl ProviderConfig {
    /// Running with no keys at all is a configuration error, not an auth
    /// bypass, unless the operator explicitly opted in.
    pub fn validate(&self) -> Result<(), String> {
        let has_keys = self.public_key.is_some() && self.secret_key.is_some();
        if !has_keys && !self.allow_unauthenticated {
            return Err(
                "WEBHOOK_PUBLIC_KEY/WEBHOOK_SECRET_KEY are not set; refusing to accept \
                 unauthenticated webhooks without WEBHOOK_ALLOW_UNAUTHENTICATED=true"
                    .to_string(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(public: Option<&str>, secret: Option<&str>, allow: bool) -> ProviderConfig {
        ProviderConfig {
            public_key: public.map(String::from),
            secret_key: secret.map(String::from),
            allow_unauthenticated: allow,
        }
    }

    #[test]
    fn test_missing_keys_require_explicit_opt_in() {
        assert!(keys(None, None, false).validate().is_err());
        assert!(keys(None, None, true).validate().is_ok());
    }

    #[test]
    fn test_configured_keys_validate() {
        assert!(keys(Some("pk"), Some("sk"), false).validate().is_ok());
    }

    #[test]
    fn test_partial_keys_are_a_configuration_error() {
        assert!(keys(Some("pk"), None, false).validate().is_err());
    }
}
