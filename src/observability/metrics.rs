use prometheus::{
    Encoder, Gauge, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub transitions_total: IntCounterVec,
    pub sync_failures_total: IntCounterVec,
    pub sync_latency_seconds: HistogramVec,
    pub ongoing_deliveries: IntGauge,
    pub history_entries: IntGauge,
    pub total_earnings: Gauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let transitions_total = IntCounterVec::new(
            Opts::new("transitions_total", "Lifecycle operations by transition and outcome"),
            &["transition", "outcome"],
        )
        .expect("valid transitions_total metric");

        let sync_failures_total = IntCounterVec::new(
            Opts::new("sync_failures_total", "Failed status sync calls by transition"),
            &["transition"],
        )
        .expect("valid sync_failures_total metric");

        let sync_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "sync_latency_seconds",
                "Latency of status sync calls in seconds",
            ),
            &["transition"],
        )
        .expect("valid sync_latency_seconds metric");

        let ongoing_deliveries =
            IntGauge::new("ongoing_deliveries", "Deliveries currently held as ongoing (0 or 1)")
                .expect("valid ongoing_deliveries metric");

        let history_entries = IntGauge::new("history_entries", "Ended deliveries in history")
            .expect("valid history_entries metric");

        let total_earnings = Gauge::new("total_earnings", "Sum of fees over delivery history")
            .expect("valid total_earnings metric");

        registry
            .register(Box::new(transitions_total.clone()))
            .expect("register transitions_total");
        registry
            .register(Box::new(sync_failures_total.clone()))
            .expect("register sync_failures_total");
        registry
            .register(Box::new(sync_latency_seconds.clone()))
            .expect("register sync_latency_seconds");
        registry
            .register(Box::new(ongoing_deliveries.clone()))
            .expect("register ongoing_deliveries");
        registry
            .register(Box::new(history_entries.clone()))
            .expect("register history_entries");
        registry
            .register(Box::new(total_earnings.clone()))
            .expect("register total_earnings");

        Self {
            registry,
            transitions_total,
            sync_failures_total,
            sync_latency_seconds,
            ongoing_deliveries,
            history_entries,
            total_earnings,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
