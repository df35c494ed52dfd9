//! Prometheus metrics for the coordinator.

use metrics::{Counter, Histogram};
use metrics_derive::Metrics;

/// Coordinator metrics
#[derive(Metrics, Clone)]
#[metrics(scope = "cosign")]
pub struct CoordinatorMetrics {
    /// Number of new proposals relayed with the agent's signature
    pub proposals_created: Counter,

    /// Number of prepare requests answered with an existing relay entry
    pub proposals_deduplicated: Counter,

    /// Number of confirmations the agent added to existing proposals
    pub confirmations_submitted: Counter,

    /// Executions mined successfully
    pub executions_success: Counter,

    /// Executions mined but reverted
    pub executions_reverted: Counter,

    /// Executions rejected before inclusion
    pub executions_failed: Counter,

    /// Relay request latency in seconds
    pub relay_latency_seconds: Histogram,

    /// Chain RPC latency in seconds
    pub rpc_latency_seconds: Histogram,
}

impl CoordinatorMetrics {
    #[inline]
    pub fn record_proposal_created(&self) {
        self.proposals_created.increment(1);
    }

    #[inline]
    pub fn record_proposal_deduplicated(&self) {
        self.proposals_deduplicated.increment(1);
    }

    #[inline]
    pub fn record_confirmation_submitted(&self) {
        self.confirmations_submitted.increment(1);
    }

    #[inline]
    pub fn record_execution_success(&self) {
        self.executions_success.increment(1);
    }

    #[inline]
    pub fn record_execution_reverted(&self) {
        self.executions_reverted.increment(1);
    }

    #[inline]
    pub fn record_execution_failed(&self) {
        self.executions_failed.increment(1);
    }

    #[inline]
    pub fn record_relay_latency(&self, duration_secs: f64) {
        self.relay_latency_seconds.record(duration_secs);
    }

    #[inline]
    pub fn record_rpc_latency(&self, duration_secs: f64) {
        self.rpc_latency_seconds.record(duration_secs);
    }
}
