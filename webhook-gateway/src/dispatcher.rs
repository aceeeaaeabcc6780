//! Webhook dispatcher
//!
//! Drives one webhook event through the pipeline: classify, check the
//! idempotency guard, invoke the transaction applier, and for confirmed
//! deposits hand off to the commission engine. Applier errors abort the
//! request; commission errors are caught here and never reach the
//! provider's response.

use crate::errors::{GatewayError, Result};
use crate::metrics::GatewayMetrics;
use crate::payload::{DepositEvent, NormalizedDeposit, NormalizedWithdrawal, WithdrawalEvent};
use affiliate_engine::{CommissionEngine, CommissionOutcome};
use ledger_core::{
    ApplyOutcome, ApplyRequest, DepositIdentifier, EntryKind, EntryStatus, IdempotencyGuard,
    IdempotencyState, LedgerConfig, LedgerStore, TransactionApplier,
};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How a dispatched event was resolved. All three variants acknowledge
/// with 200; the distinction only feeds logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The ledger was mutated
    Applied,
    /// Idempotent replay, no state change
    AlreadyProcessed,
    /// Recognized payload carrying an event we take no action on
    Ignored,
}

/// Routes normalized webhook events into the ledger
#[derive(Clone)]
pub struct Dispatcher {
    store: LedgerStore,
    guard: IdempotencyGuard,
    applier: TransactionApplier,
    commission: CommissionEngine,
    metrics: GatewayMetrics,
    apply_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        store: LedgerStore,
        applier: TransactionApplier,
        commission: CommissionEngine,
        metrics: GatewayMetrics,
        ledger_config: &LedgerConfig,
    ) -> Self {
        let guard = IdempotencyGuard::new(store.pool().clone());
        Self {
            store,
            guard,
            applier,
            commission,
            metrics,
            apply_timeout: Duration::from_millis(ledger_config.apply_timeout_ms),
        }
    }

    /// Process one deposit webhook.
    pub async fn dispatch_deposit(&self, deposit: &NormalizedDeposit) -> Result<DispatchOutcome> {
        self.metrics.deposits_received.inc();

        let parsed = DepositIdentifier::parse(&deposit.identifier).map_err(|e| {
            self.metrics.rejected.inc();
            GatewayError::from(e)
        })?;

        // Advisory fast path. The applier re-checks under the account lock,
        // so a race here costs one extra round-trip, never a double credit.
        if let IdempotencyState::SeenTerminal(entry) = self.guard.check(&deposit.identifier).await?
        {
            debug!(
                "Deposit {} already terminal as entry {}, acknowledging",
                deposit.identifier, entry.id
            );
            self.metrics.duplicates.inc();
            return Ok(DispatchOutcome::AlreadyProcessed);
        }

        match deposit.event {
            DepositEvent::Paid => self.apply_paid_deposit(deposit, parsed.user_id).await,
            DepositEvent::Expired => {
                self.record_failed_deposit(deposit, parsed.user_id, "expired")
                    .await
            }
            DepositEvent::Failed => {
                self.record_failed_deposit(deposit, parsed.user_id, "failed")
                    .await
            }
            DepositEvent::Unrecognized => {
                warn!(
                    "Unrecognized deposit event for {}, acknowledging without action",
                    deposit.identifier
                );
                Ok(DispatchOutcome::Ignored)
            }
        }
    }

    async fn apply_paid_deposit(
        &self,
        deposit: &NormalizedDeposit,
        user_id: i64,
    ) -> Result<DispatchOutcome> {
        let request = ApplyRequest {
            user_id,
            kind: EntryKind::Deposit,
            amount: deposit.amount,
            external_identifier: deposit.identifier.clone(),
            target_status: EntryStatus::Completed,
            description: Some("PIX deposit confirmed".to_string()),
            provider_reference: deposit.provider_reference.clone(),
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.apply_timeout, self.applier.apply(&request))
            .await
            .map_err(|_| {
                GatewayError::Transient(format!(
                    "apply for {} timed out after {:?}",
                    deposit.identifier, self.apply_timeout
                ))
            })??;
        self.metrics
            .record_apply_duration(started.elapsed().as_secs_f64());

        match outcome {
            ApplyOutcome::Applied(applied) => {
                self.metrics.events_applied.inc();
                self.credit_commission(user_id, deposit, applied.entry_id)
                    .await;
                Ok(DispatchOutcome::Applied)
            }
            ApplyOutcome::AlreadyProcessed { entry_id } => {
                debug!(
                    "Deposit {} resolved to existing entry {}",
                    deposit.identifier, entry_id
                );
                self.metrics.duplicates.inc();
                Ok(DispatchOutcome::AlreadyProcessed)
            }
        }
    }

    /// Commission is best-effort relative to the deposit itself: the credit
    /// has already committed, so any failure here is logged and swallowed.
    /// The at-most-once constraint lives in the database, not in this retry
    /// posture.
    async fn credit_commission(
        &self,
        user_id: i64,
        deposit: &NormalizedDeposit,
        entry_id: uuid::Uuid,
    ) {
        match self
            .commission
            .maybe_credit_commission(user_id, deposit.amount, EntryStatus::Completed, entry_id)
            .await
        {
            Ok(CommissionOutcome::Credited {
                affiliate_account_id,
                amount,
                ..
            }) => {
                self.metrics.commission_credits.inc();
                info!(
                    "Commission {} credited to affiliate {} for user {}",
                    amount, affiliate_account_id, user_id
                );
            }
            Ok(CommissionOutcome::AlreadyCredited) => {
                debug!("Commission for user {} already credited", user_id);
            }
            Ok(CommissionOutcome::NotEligible(reason)) => {
                debug!("No commission for user {}: {}", user_id, reason);
            }
            Err(e) => {
                self.metrics.commission_failures.inc();
                error!("Commission for user {} failed (deposit stands): {}", user_id, e);
            }
        }
    }

    async fn record_failed_deposit(
        &self,
        deposit: &NormalizedDeposit,
        user_id: i64,
        provider_status: &str,
    ) -> Result<DispatchOutcome> {
        let outcome = self
            .applier
            .record_deposit_failure(
                user_id,
                &deposit.identifier,
                deposit.amount,
                EntryStatus::Failed,
                provider_status,
            )
            .await?;

        match outcome {
            ApplyOutcome::Applied(_) => {
                info!(
                    "Deposit {} recorded as {} with no balance change",
                    deposit.identifier, provider_status
                );
                self.metrics.events_applied.inc();
                Ok(DispatchOutcome::Applied)
            }
            ApplyOutcome::AlreadyProcessed { .. } => {
                self.metrics.duplicates.inc();
                Ok(DispatchOutcome::AlreadyProcessed)
            }
        }
    }

    /// Process one withdrawal webhook. The referenced entry must exist:
    /// withdrawals are debited at creation time, so an unknown reference is
    /// a 404, never an implicit create.
    pub async fn dispatch_withdrawal(
        &self,
        withdrawal: &NormalizedWithdrawal,
    ) -> Result<DispatchOutcome> {
        self.metrics.withdrawals_received.inc();

        let entry = self
            .store
            .find_withdrawal(&withdrawal.reference)
            .await?
            .ok_or_else(|| {
                self.metrics.rejected.inc();
                GatewayError::NotFound(format!("withdrawal {}", withdrawal.reference))
            })?;

        if entry.is_terminal() {
            debug!(
                "Withdrawal {} already terminal, acknowledging",
                withdrawal.reference
            );
            self.metrics.duplicates.inc();
            return Ok(DispatchOutcome::AlreadyProcessed);
        }

        let started = Instant::now();
        let outcome = match withdrawal.event {
            WithdrawalEvent::Approved => {
                self.applier
                    .approve_withdrawal(entry.id, Some(&withdrawal.reference))
                    .await?
            }
            WithdrawalEvent::Rejected => {
                self.applier
                    .reverse_withdrawal(entry.id, EntryStatus::Rejected, Some(&withdrawal.reference))
                    .await?
            }
            WithdrawalEvent::Failed => {
                self.applier
                    .reverse_withdrawal(entry.id, EntryStatus::Failed, Some(&withdrawal.reference))
                    .await?
            }
            WithdrawalEvent::Unrecognized => {
                warn!(
                    "Unrecognized withdrawal status for {}, acknowledging without action",
                    withdrawal.reference
                );
                return Ok(DispatchOutcome::Ignored);
            }
        };
        self.metrics
            .record_apply_duration(started.elapsed().as_secs_f64());

        match outcome {
            ApplyOutcome::Applied(_) => {
                self.metrics.events_applied.inc();
                Ok(DispatchOutcome::Applied)
            }
            ApplyOutcome::AlreadyProcessed { .. } => {
                self.metrics.duplicates.inc();
                Ok(DispatchOutcome::AlreadyProcessed)
            }
        }
    }
}
