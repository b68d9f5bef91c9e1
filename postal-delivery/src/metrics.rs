//! Dispatcher metrics
//!
//! Instruments are created on the global meter; without an installed
//! provider they are no-ops.

use opentelemetry::{
    KeyValue,
    metrics::{Counter, Meter},
};

/// Counters describing dispatcher activity
#[derive(Debug, Clone)]
pub struct DispatchMetrics {
    /// Broker attempts by outcome
    attempts_total: Counter<u64>,
    /// Records moved to `DEAD`
    dead_total: Counter<u64>,
    /// Claims lost to another dispatcher
    claims_lost_total: Counter<u64>,
    /// Expired leases returned to `PENDING`
    leases_reclaimed_total: Counter<u64>,
    /// Claims settled from the sent journal
    recovered_total: Counter<u64>,
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchMetrics {
    #[must_use]
    pub fn new() -> Self {
        let meter = meter();

        Self {
            attempts_total: meter
                .u64_counter("postal.dispatch.attempts.total")
                .with_description("Broker send attempts by outcome")
                .build(),
            dead_total: meter
                .u64_counter("postal.dispatch.dead.total")
                .with_description("Records that exhausted their retries")
                .build(),
            claims_lost_total: meter
                .u64_counter("postal.dispatch.claims.lost.total")
                .with_description("Claims lost to a concurrent dispatcher")
                .build(),
            leases_reclaimed_total: meter
                .u64_counter("postal.dispatch.leases.reclaimed.total")
                .with_description("Expired SENDING leases returned to PENDING")
                .build(),
            recovered_total: meter
                .u64_counter("postal.dispatch.recovered.total")
                .with_description("Claims settled from the sent journal without a broker call")
                .build(),
        }
    }

    pub fn record_attempt(&self, outcome: &'static str, topic: &str) {
        self.attempts_total.add(
            1,
            &[
                KeyValue::new("outcome", outcome),
                KeyValue::new("topic", topic.to_string()),
            ],
        );
    }

    pub fn record_dead(&self, topic: &str) {
        self.dead_total
            .add(1, &[KeyValue::new("topic", topic.to_string())]);
        self.record_attempt("dead", topic);
    }

    pub fn record_lost_claim(&self) {
        self.claims_lost_total.add(1, &[]);
    }

    pub fn record_reclaimed(&self) {
        self.leases_reclaimed_total.add(1, &[]);
    }

    pub fn record_recovered(&self) {
        self.recovered_total.add(1, &[]);
    }
}

fn meter() -> Meter {
    opentelemetry::global::meter("postal.dispatch")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_provider_is_noop() {
        let metrics = DispatchMetrics::new();
        metrics.record_attempt("sent", "orders");
        metrics.record_dead("orders");
        metrics.record_lost_claim();
        metrics.record_reclaimed();
        metrics.record_recovered();
    }
}
