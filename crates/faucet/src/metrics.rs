//! Prometheus metrics

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Faucet metrics, registered on a private registry.
#[derive(Clone)]
pub struct Metrics {
    /// Claims by outcome: sent | declined | failed
    pub claims_total: IntCounterVec,
    /// Failed transfers by class: gas | tokens | other
    pub transfer_failures_total: IntCounterVec,
    /// Notifications dropped after the last retry
    pub notifications_failed_total: IntCounter,
    pub registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let claims_total = IntCounterVec::new(
            Opts::new("faucet_claims_total", "Claim requests by outcome"),
            &["outcome"],
        )
        .expect("constant metric name is valid");

        let transfer_failures_total = IntCounterVec::new(
            Opts::new(
                "faucet_transfer_failures_total",
                "Token transfers rejected by the chain, by failure class",
            ),
            &["class"],
        )
        .expect("constant metric name is valid");

        let notifications_failed_total = IntCounter::new(
            "faucet_notifications_failed_total",
            "Claim notifications dropped after exhausting retries",
        )
        .expect("constant metric name is valid");

        registry
            .register(Box::new(claims_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(transfer_failures_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(notifications_failed_total.clone()))
            .expect("metric registration must not be called twice");

        Self {
            claims_total,
            transfer_failures_total,
            notifications_failed_total,
            registry,
        }
    }

    pub fn claim(&self, outcome: &str) {
        self.claims_total.with_label_values(&[outcome]).inc();
    }

    pub fn transfer_failure(&self, class: &str) {
        self.transfer_failures_total.with_label_values(&[class]).inc();
    }

    /// Render the registry in the text exposition format.
    pub fn encode(&self) -> Result<(String, Vec<u8>), prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}
