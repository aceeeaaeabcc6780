//! Metrics collection for observability
//!
//! Prometheus metrics for the webhook gateway, exposed on `/metrics`.
//!
//! # Metrics
//!
//! - `gateway_deposit_webhooks_total` - Deposit webhooks received
//! - `gateway_withdrawal_webhooks_total` - Withdrawal webhooks received
//! - `gateway_events_applied_total` - Events that mutated the ledger
//! - `gateway_duplicates_total` - Events short-circuited as already processed
//! - `gateway_rejected_total` - Payloads rejected before reaching the ledger
//! - `gateway_commission_credits_total` - Affiliate commissions credited
//! - `gateway_commission_failures_total` - Swallowed commission errors
//! - `gateway_apply_duration_seconds` - Histogram of atomic apply latencies

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct GatewayMetrics {
    /// Deposit webhooks received (any event)
    pub deposits_received: IntCounter,

    /// Withdrawal webhooks received (any event)
    pub withdrawals_received: IntCounter,

    /// Events that resulted in a committed ledger mutation
    pub events_applied: IntCounter,

    /// Events acknowledged without state change (idempotent replays)
    pub duplicates: IntCounter,

    /// Payloads rejected for validation or authentication failures
    pub rejected: IntCounter,

    /// Affiliate commissions credited
    pub commission_credits: IntCounter,

    /// Commission errors caught at the dispatcher boundary
    pub commission_failures: IntCounter,

    /// Atomic apply latency histogram
    pub apply_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl GatewayMetrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let deposits_received = IntCounter::with_opts(Opts::new(
            "gateway_deposit_webhooks_total",
            "Deposit webhooks received",
        ))?;
        registry.register(Box::new(deposits_received.clone()))?;

        let withdrawals_received = IntCounter::with_opts(Opts::new(
            "gateway_withdrawal_webhooks_total",
            "Withdrawal webhooks received",
        ))?;
        registry.register(Box::new(withdrawals_received.clone()))?;

        let events_applied = IntCounter::with_opts(Opts::new(
            "gateway_events_applied_total",
            "Events that mutated the ledger",
        ))?;
        registry.register(Box::new(events_applied.clone()))?;

        let duplicates = IntCounter::with_opts(Opts::new(
            "gateway_duplicates_total",
            "Events short-circuited as already processed",
        ))?;
        registry.register(Box::new(duplicates.clone()))?;

        let rejected = IntCounter::with_opts(Opts::new(
            "gateway_rejected_total",
            "Payloads rejected before reaching the ledger",
        ))?;
        registry.register(Box::new(rejected.clone()))?;

        let commission_credits = IntCounter::with_opts(Opts::new(
            "gateway_commission_credits_total",
            "Affiliate commissions credited",
        ))?;
        registry.register(Box::new(commission_credits.clone()))?;

        let commission_failures = IntCounter::with_opts(Opts::new(
            "gateway_commission_failures_total",
            "Swallowed commission errors",
        ))?;
        registry.register(Box::new(commission_failures.clone()))?;

        let apply_duration = Histogram::with_opts(
            HistogramOpts::new(
                "gateway_apply_duration_seconds",
                "Histogram of atomic apply latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(apply_duration.clone()))?;

        Ok(Self {
            deposits_received,
            withdrawals_received,
            events_applied,
            duplicates,
            rejected,
            commission_credits,
            commission_failures,
            apply_duration,
            registry,
        })
    }

    /// Record apply latency
    pub fn record_apply_duration(&self, duration_seconds: f64) {
        self.apply_duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new().unwrap_or_else(|e| panic!("Failed to create metrics: {}", e))
    }
}
