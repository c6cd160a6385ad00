//! Process-wide Prometheus metrics, registered once and cloned by handle.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

pub struct Metrics {
    pub registry: Registry,
    pub queue_depth: IntGauge,
    pub leases_active: IntGauge,
    pub analyses_persisted: IntCounter,
    pub analyses_duplicate: IntCounter,
    pub broadcast_drops: IntCounter,
    pub provider_reloads: IntCounter,
    pub provider_reload_failures: IntCounter,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();

        let queue_depth = IntGauge::new("vpipe_queue_depth", "Unclaimed events in the segment event queue").unwrap();
        let leases_active = IntGauge::new("vpipe_leases_active", "Currently leased, unacknowledged events").unwrap();
        let analyses_persisted = IntCounter::new("vpipe_analyses_persisted_total", "Analyses durably stored").unwrap();
        let analyses_duplicate = IntCounter::new("vpipe_analyses_duplicate_total", "Redelivered events that hit an existing analysis").unwrap();
        let broadcast_drops = IntCounter::new("vpipe_broadcast_drops_total", "Subscribers disconnected for falling behind").unwrap();
        let provider_reloads = IntCounter::new("vpipe_provider_reloads_total", "Successful provider registry reloads").unwrap();
        let provider_reload_failures = IntCounter::new("vpipe_provider_reload_failures_total", "Failed provider registry reloads").unwrap();

        for metric in [
            Box::new(queue_depth.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(leases_active.clone()),
            Box::new(analyses_persisted.clone()),
            Box::new(analyses_duplicate.clone()),
            Box::new(broadcast_drops.clone()),
            Box::new(provider_reloads.clone()),
            Box::new(provider_reload_failures.clone()),
        ] {
            registry.register(metric).expect("metric names are unique and registered once");
        }

        Self {
            registry,
            queue_depth,
            leases_active,
            analyses_persisted,
            analyses_duplicate,
            broadcast_drops,
            provider_reloads,
            provider_reload_failures,
        }
    }

    /// Render the current metric snapshot in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf).expect("text encoding never fails");
        String::from_utf8(buf).expect("prometheus output is always valid utf-8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_metric_names() {
        let metrics = Metrics::new();
        metrics.analyses_persisted.inc();
        let rendered = metrics.render();
        assert!(rendered.contains("vpipe_analyses_persisted_total"));
    }
}
