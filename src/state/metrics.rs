use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;

pub struct Metrics {
    registry: Registry,

    // Module metrics
    pub modules_active: IntGauge,
    pub modules_excluded: IntGauge,
    pub clone_failures: IntCounter,

    // Listener metrics
    pub listeners: IntGauge,
    pub port_conflicts: IntCounter,

    // Connection metrics
    pub active_connections: IntGauge,
    pub connections_total: IntCounter,
    pub connection_errors: IntCounter,

    // Query metrics
    pub queries_total: IntCounter,
    pub pipeline_aborts: IntCounterVec,
    pub query_duration: Histogram,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let modules_active = IntGauge::new(
            "apirate_modules_active",
            "Number of module prototypes taking part in the pipeline",
        )
        .expect("metric creation failed");
        let modules_excluded = IntGauge::new(
            "apirate_modules_excluded",
            "Number of module prototypes excluded at startup or after a clone failure",
        )
        .expect("metric creation failed");
        let clone_failures = IntCounter::new(
            "apirate_module_clone_failures_total",
            "Total number of failed per-connection module clones",
        )
        .expect("metric creation failed");

        let listeners = IntGauge::new("apirate_listeners", "Number of registered listening ports")
            .expect("metric creation failed");
        let port_conflicts = IntCounter::new(
            "apirate_port_conflicts_total",
            "Total number of rejected duplicate port requests",
        )
        .expect("metric creation failed");

        let active_connections = IntGauge::new(
            "apirate_active_connections",
            "Number of connections with an attached pipeline",
        )
        .expect("metric creation failed");
        let connections_total = IntCounter::new(
            "apirate_connections_total",
            "Total number of accepted connections",
        )
        .expect("metric creation failed");
        let connection_errors = IntCounter::new(
            "apirate_connection_errors_total",
            "Total number of connections ended by a socket error",
        )
        .expect("metric creation failed");

        let queries_total = IntCounter::new(
            "apirate_queries_total",
            "Total number of queries dispatched through the pipeline",
        )
        .expect("metric creation failed");
        let pipeline_aborts = IntCounterVec::new(
            Opts::new(
                "apirate_pipeline_aborts_total",
                "Total number of query cycles aborted by a module",
            ),
            &["module"],
        )
        .expect("metric creation failed");
        let query_duration = Histogram::with_opts(HistogramOpts::new(
            "apirate_query_duration_seconds",
            "Time spent dispatching one query through every phase",
        ))
        .expect("metric creation failed");

        // Register all metrics
        registry.register(Box::new(modules_active.clone())).unwrap();
        registry
            .register(Box::new(modules_excluded.clone()))
            .unwrap();
        registry.register(Box::new(clone_failures.clone())).unwrap();
        registry.register(Box::new(listeners.clone())).unwrap();
        registry.register(Box::new(port_conflicts.clone())).unwrap();
        registry
            .register(Box::new(active_connections.clone()))
            .unwrap();
        registry
            .register(Box::new(connections_total.clone()))
            .unwrap();
        registry
            .register(Box::new(connection_errors.clone()))
            .unwrap();
        registry.register(Box::new(queries_total.clone())).unwrap();
        registry
            .register(Box::new(pipeline_aborts.clone()))
            .unwrap();
        registry.register(Box::new(query_duration.clone())).unwrap();

        Self {
            registry,
            modules_active,
            modules_excluded,
            clone_failures,
            listeners,
            port_conflicts,
            active_connections,
            connections_total,
            connection_errors,
            queries_total,
            pipeline_aborts,
            query_duration,
        }
    }

    pub fn set_module_counts(&self, active: usize, excluded: usize) {
        self.modules_active.set(active as i64);
        self.modules_excluded.set(excluded as i64);
    }

    pub fn record_clone_failure(&self) {
        self.clone_failures.inc();
        self.modules_active.dec();
        self.modules_excluded.inc();
    }

    pub fn set_listener_count(&self, count: usize) {
        self.listeners.set(count as i64);
    }

    pub fn record_port_conflict(&self) {
        self.port_conflicts.inc();
    }

    pub fn connection_opened(&self) {
        self.connections_total.inc();
        self.active_connections.inc();
    }

    pub fn connection_closed(&self) {
        self.active_connections.dec();
    }

    pub fn record_connection_error(&self) {
        self.connection_errors.inc();
    }

    pub fn record_pipeline_abort(&self, module: &str) {
        self.pipeline_aborts.with_label_values(&[module]).inc();
    }

    pub fn pipeline_abort_count(&self, module: &str) -> u64 {
        self.pipeline_aborts.with_label_values(&[module]).get()
    }

    pub fn gather_metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.gather_metrics(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// Times one query dispatch.
pub struct QueryTimer {
    start: Instant,
    metrics: Arc<Metrics>,
}

impl QueryTimer {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        metrics.queries_total.inc();
        Self {
            start: Instant::now(),
            metrics,
        }
    }

    pub fn finish(self) {
        self.metrics
            .query_duration
            .observe(self.start.elapsed().as_secs_f64());
    }
}
