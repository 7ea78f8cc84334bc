//! Prometheus metrics for sagas

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Saga counters, registered on a caller-owned registry.
#[derive(Debug, Clone)]
pub struct SagaMetrics {
    /// Finished sagas by outcome label.
    pub sagas_total: IntCounterVec,
    /// Sagas currently running.
    pub active_sagas: IntGauge,
    /// Settlement gateway calls by action.
    pub settlement_calls_total: IntCounterVec,
    /// Submissions discarded because the job was claimed or terminal.
    pub redeliveries_discarded_total: IntCounter,
    /// Refunds or settlements that need an operator.
    pub manual_interventions_total: IntCounter,
    /// Wall-clock saga duration.
    pub saga_duration_seconds: Histogram,
}

impl SagaMetrics {
    /// Create the metrics and register them on `registry`.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let sagas_total = IntCounterVec::new(
            Opts::new("veritask_sagas_total", "Finished job sagas by outcome"),
            &["outcome"],
        )?;

        let active_sagas = IntGauge::new("veritask_active_sagas", "Job sagas currently running")?;

        let settlement_calls_total = IntCounterVec::new(
            Opts::new(
                "veritask_settlement_calls_total",
                "Settlement gateway calls by action",
            ),
            &["action"],
        )?;

        let redeliveries_discarded_total = IntCounter::new(
            "veritask_redeliveries_discarded_total",
            "Job submissions discarded as redeliveries",
        )?;

        let manual_interventions_total = IntCounter::new(
            "veritask_manual_interventions_total",
            "Jobs left for operator intervention",
        )?;

        let saga_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("veritask_saga_duration_seconds", "Duration of job sagas")
                .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]),
        )?;

        registry.register(Box::new(sagas_total.clone()))?;
        registry.register(Box::new(active_sagas.clone()))?;
        registry.register(Box::new(settlement_calls_total.clone()))?;
        registry.register(Box::new(redeliveries_discarded_total.clone()))?;
        registry.register(Box::new(manual_interventions_total.clone()))?;
        registry.register(Box::new(saga_duration_seconds.clone()))?;

        Ok(Self {
            sagas_total,
            active_sagas,
            settlement_calls_total,
            redeliveries_discarded_total,
            manual_interventions_total,
            saga_duration_seconds,
        })
    }

    /// Finished sagas with `outcome`.
    pub fn outcome_count(&self, outcome: &str) -> u64 {
        self.sagas_total.with_label_values(&[outcome]).get()
    }

    /// Settlement calls made for `action`.
    pub fn settlement_calls(&self, action: &str) -> u64 {
        self.settlement_calls_total.with_label_values(&[action]).get()
    }
}
