use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub deliveries_created_total: IntCounter,
    pub claims_total: IntCounterVec,
    pub watchdog_alerts_total: IntCounter,
    pub realtime_connections: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let deliveries_created_total = IntCounter::new(
            "deliveries_created_total",
            "Total deliveries created",
        )
        .expect("valid deliveries_created_total metric");

        let claims_total = IntCounterVec::new(
            Opts::new("claims_total", "Claim attempts by outcome"),
            &["outcome"],
        )
        .expect("valid claims_total metric");

        let watchdog_alerts_total = IntCounter::new(
            "watchdog_alerts_total",
            "Stale unassigned deliveries flagged by the watchdog",
        )
        .expect("valid watchdog_alerts_total metric");

        let realtime_connections = IntGauge::new(
            "realtime_connections",
            "Currently connected realtime clients",
        )
        .expect("valid realtime_connections metric");

        registry
            .register(Box::new(deliveries_created_total.clone()))
            .expect("register deliveries_created_total");
        registry
            .register(Box::new(claims_total.clone()))
            .expect("register claims_total");
        registry
            .register(Box::new(watchdog_alerts_total.clone()))
            .expect("register watchdog_alerts_total");
        registry
            .register(Box::new(realtime_connections.clone()))
            .expect("register realtime_connections");

        Self {
            registry,
            deliveries_created_total,
            claims_total,
            watchdog_alerts_total,
            realtime_connections,
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

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
