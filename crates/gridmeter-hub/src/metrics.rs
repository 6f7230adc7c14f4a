//! ---
//! meter_section: "05-networking-external-interfaces"
//! meter_subsection: "module"
//! meter_type: "source"
//! meter_scope: "code"
//! meter_description: "Prometheus instrumentation for the broadcast hub."
//! meter_version: "v0.1.0"
//! meter_owner: "tbd"
//! ---
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Counters and gauges tracking live connections and event delivery.
#[derive(Clone)]
pub struct HubMetrics {
    connections: IntGauge,
    frames_published: IntCounterVec,
    connections_dropped: IntCounter,
}

impl HubMetrics {
    /// Build the hub metric family and register it with `registry`.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let connections = IntGauge::with_opts(Opts::new(
            "gridmeter_hub_connections",
            "Currently registered live viewer connections",
        ))?;
        let frames_published = IntCounterVec::new(
            Opts::new(
                "gridmeter_hub_frames_published_total",
                "Event frames published through the hub by event type",
            ),
            &["event"],
        )?;
        let connections_dropped = IntCounter::with_opts(Opts::new(
            "gridmeter_hub_connections_dropped_total",
            "Connections evicted due to a full or closed outbound queue",
        ))?;

        registry.register(Box::new(connections.clone()))?;
        registry.register(Box::new(frames_published.clone()))?;
        registry.register(Box::new(connections_dropped.clone()))?;

        Ok(Self {
            connections,
            frames_published,
            connections_dropped,
        })
    }

    pub(crate) fn set_connections(&self, count: usize) {
        self.connections.set(count as i64);
    }

    pub(crate) fn record_published(&self, event: &str) {
        self.frames_published.with_label_values(&[event]).inc();
    }

    pub(crate) fn record_dropped(&self, count: usize) {
        self.connections_dropped.inc_by(count as u64);
    }
}

impl std::fmt::Debug for HubMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_and_records() {
        let registry = Registry::new();
        let metrics = HubMetrics::new(&registry).unwrap();
        metrics.set_connections(3);
        metrics.record_published("metrics");
        metrics.record_dropped(1);
        let families = registry.gather();
        assert_eq!(families.len(), 3);
    }
}
