//! Prometheus metrics for the engine

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Engine counters, registered once per process
#[derive(Clone)]
pub struct EngineMetrics {
    pub revisions_published: IntCounter,
    pub derivations_total: IntCounterVec,
    pub derivation_duration_seconds: Histogram,
    pub entries_blocked: IntCounter,
    pub cards_marked_stale: IntCounter,
    pub stale_cards: IntGauge,
    pub lookups_total: IntCounterVec,
    pub rollbacks_total: IntCounter,
}

impl EngineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            revisions_published: IntCounter::new(
                "tarifa_revisions_published_total",
                "Carrier revisions published",
            )?,
            derivations_total: IntCounterVec::new(
                Opts::new("tarifa_derivations_total", "Customer card derivations by outcome"),
                &["outcome"],
            )?,
            derivation_duration_seconds: Histogram::with_opts(
                HistogramOpts::new(
                    "tarifa_derivation_duration_seconds",
                    "Time to derive and commit one customer revision",
                )
                .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            )?,
            entries_blocked: IntCounter::new(
                "tarifa_entries_blocked_total",
                "Derived entries blocked by profit assurance",
            )?,
            cards_marked_stale: IntCounter::new(
                "tarifa_cards_marked_stale_total",
                "Customer cards moved to stale",
            )?,
            stale_cards: IntGauge::new(
                "tarifa_stale_cards",
                "Customer cards waiting for derivation after the last rebuild",
            )?,
            lookups_total: IntCounterVec::new(
                Opts::new("tarifa_lookups_total", "Rate lookups by result"),
                &["result"],
            )?,
            rollbacks_total: IntCounter::new("tarifa_rollbacks_total", "Revision rollbacks")?,
        })
    }

    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.revisions_published.clone()))?;
        registry.register(Box::new(self.derivations_total.clone()))?;
        registry.register(Box::new(self.derivation_duration_seconds.clone()))?;
        registry.register(Box::new(self.entries_blocked.clone()))?;
        registry.register(Box::new(self.cards_marked_stale.clone()))?;
        registry.register(Box::new(self.stale_cards.clone()))?;
        registry.register(Box::new(self.lookups_total.clone()))?;
        registry.register(Box::new(self.rollbacks_total.clone()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_gather() {
        let metrics = EngineMetrics::new().unwrap();
        let registry = Registry::new();
        metrics.register(&registry).unwrap();

        metrics.derivations_total.with_label_values(&["ok"]).inc();
        metrics.revisions_published.inc();

        let names: Vec<String> = registry.gather().iter().map(|f| f.get_name().to_string()).collect();
        assert!(names.contains(&"tarifa_derivations_total".to_string()));
        assert!(names.contains(&"tarifa_revisions_published_total".to_string()));
    }

    #[test]
    fn test_double_register_fails() {
        let metrics = EngineMetrics::new().unwrap();
        let registry = Registry::new();
        metrics.register(&registry).unwrap();
        assert!(metrics.register(&registry).is_err());
    }
}
