use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Reconciliation metrics, gated behind `enabled`.
///
/// When `enabled = false` no registry is created and every record call is a
/// no-op.
pub struct MetricsCollector {
    enabled: bool,
    registry: Option<Registry>,
    pub reconcile_total: Option<IntCounterVec>,
    pub reconcile_duration: Option<HistogramVec>,
    pub lock_conflicts: Option<IntCounter>,
}

impl MetricsCollector {
    /// Create a new collector. When `enabled = false`, everything is None.
    pub fn new(enabled: bool) -> anyhow::Result<Self> {
        if !enabled {
            return Ok(Self {
                enabled: false,
                registry: None,
                reconcile_total: None,
                reconcile_duration: None,
                lock_conflicts: None,
            });
        }

        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new("meshreg_reconcile_total", "Reconciliations by operation and outcome"),
            &["op", "outcome"],
        )?;

        let reconcile_duration = HistogramVec::new(
            HistogramOpts::new(
                "meshreg_reconcile_duration_seconds",
                "Reconciliation latency, lock wait included",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 90.0,
            ]),
            &["op"],
        )?;

        let lock_conflicts = IntCounter::new(
            "meshreg_lock_conflicts_total",
            "Requests rejected because another reconciliation held the lock",
        )?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(lock_conflicts.clone()))?;

        Ok(Self {
            enabled: true,
            registry: Some(registry),
            reconcile_total: Some(reconcile_total),
            reconcile_duration: Some(reconcile_duration),
            lock_conflicts: Some(lock_conflicts),
        })
    }

    /// Record one finished reconciliation (no-op when disabled).
    #[inline]
    pub fn record_reconcile(&self, op: &str, outcome: &str, duration_secs: f64) {
        if !self.enabled {
            return;
        }
        if let Some(ref counter) = self.reconcile_total {
            counter.with_label_values(&[op, outcome]).inc();
        }
        if let Some(ref hist) = self.reconcile_duration {
            hist.with_label_values(&[op]).observe(duration_secs);
        }
    }

    #[inline]
    pub fn record_lock_conflict(&self) {
        if let Some(ref counter) = self.lock_conflicts {
            counter.inc();
        }
    }

    /// Render prometheus text exposition format.
    pub fn render(&self) -> String {
        let Some(ref registry) = self.registry else {
            return String::new();
        };
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
