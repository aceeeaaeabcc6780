//! Webhook payload models and event classification
//!
//! Providers disagree about payload shape: one nests the transaction fields
//! under `transaction`, another sends them flat; the event name arrives as
//! `event` or `status` depending on provider version. Normalization happens
//! here, before any of the fields reach the ledger, so the dispatcher only
//! ever sees one canonical shape.

use crate::errors::{GatewayError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;

// ===== DEPOSIT =====

/// Raw deposit webhook body as delivered by the provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositWebhook {
    pub event: Option<String>,
    pub status: Option<String>,
    pub identifier: Option<String>,
    pub amount: Option<Decimal>,
    pub transaction_id: Option<String>,
    pub transaction: Option<DepositTransactionBody>,
}

/// Nested `transaction` object used by the newer provider payloads.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositTransactionBody {
    pub identifier: Option<String>,
    pub amount: Option<Decimal>,
    pub transaction_id: Option<String>,
}

/// Deposit webhook after field fallback and event classification.
#[derive(Debug, Clone)]
pub struct NormalizedDeposit {
    pub event: DepositEvent,
    pub identifier: String,
    pub amount: Decimal,
    pub provider_reference: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositEvent {
    Paid,
    Expired,
    Failed,
    Unrecognized,
}

impl DepositEvent {
    pub fn classify(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "paid" | "transaction_paid" | "approved" | "completed" => DepositEvent::Paid,
            "expired" | "transaction_expired" => DepositEvent::Expired,
            "failed" | "transaction_failed" | "refused" | "canceled" | "cancelled" => {
                DepositEvent::Failed
            }
            _ => DepositEvent::Unrecognized,
        }
    }
}

impl DepositWebhook {
    /// Resolve field fallbacks and validate required fields.
    ///
    /// Nested `transaction.*` fields win over the flat ones when both are
    /// present. A payload without an event name, an identifier, or a
    /// positive amount is rejected before any state is touched.
    pub fn normalize(&self) -> Result<NormalizedDeposit> {
        let raw_event = self
            .event
            .as_deref()
            .or(self.status.as_deref())
            .ok_or_else(|| GatewayError::Validation("missing event/status field".to_string()))?;

        let nested = self.transaction.as_ref();

        let identifier = nested
            .and_then(|t| t.identifier.as_deref())
            .or(self.identifier.as_deref())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GatewayError::Validation("missing identifier".to_string()))?;

        let amount = nested
            .and_then(|t| t.amount)
            .or(self.amount)
            .ok_or_else(|| GatewayError::Validation("missing amount".to_string()))?;
        if amount <= Decimal::ZERO {
            return Err(GatewayError::Validation(format!(
                "amount must be positive, got {}",
                amount
            )));
        }

        let provider_reference = nested
            .and_then(|t| t.transaction_id.clone())
            .or_else(|| self.transaction_id.clone());

        Ok(NormalizedDeposit {
            event: DepositEvent::classify(raw_event),
            identifier: identifier.to_string(),
            amount,
            provider_reference,
        })
    }
}

// ===== WITHDRAWAL =====

/// Raw withdrawal webhook body. The reference field name varies by
/// provider; any of the three is accepted and resolved against both the
/// external identifier and the stored provider reference.
#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawalWebhook {
    pub identifier: Option<String>,
    pub external_id: Option<String>,
    pub transaction_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NormalizedWithdrawal {
    pub event: WithdrawalEvent,
    pub reference: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalEvent {
    Approved,
    Rejected,
    Failed,
    Unrecognized,
}

impl WithdrawalEvent {
    pub fn classify(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "approved" | "paid" | "completed" | "success" => WithdrawalEvent::Approved,
            "rejected" | "refused" | "canceled" | "cancelled" => WithdrawalEvent::Rejected,
            "failed" | "error" => WithdrawalEvent::Failed,
            _ => WithdrawalEvent::Unrecognized,
        }
    }
}

impl WithdrawalWebhook {
    pub fn normalize(&self) -> Result<NormalizedWithdrawal> {
        let reference = self
            .identifier
            .as_deref()
            .or(self.external_id.as_deref())
            .or(self.transaction_id.as_deref())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GatewayError::Validation("missing withdrawal reference".to_string()))?;

        let status = self
            .status
            .as_deref()
            .ok_or_else(|| GatewayError::Validation("missing status field".to_string()))?;

        Ok(NormalizedWithdrawal {
            event: WithdrawalEvent::classify(status),
            reference: reference.to_string(),
        })
    }
}
