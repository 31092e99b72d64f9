//! Controller metrics
//!
//! Reconcile passes, pushes, and Namespace event filtering. Everything lives in
//! one registry rendered by [`gather_controller_metrics`].

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    /// Controller metrics registry
    pub static ref CONTROLLER_METRICS_REGISTRY: Registry = Registry::new();

    /// Reconcile pass duration
    static ref RECONCILE_DURATION: HistogramVec = {
        let opts = HistogramOpts::new(
            "gateway_reconcile_duration_seconds",
            "Gateway API reconcile pass duration in seconds",
        );
        let histogram = HistogramVec::new(opts, &["trigger"])
            .expect("Failed to create histogram");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(histogram.clone()))
            .expect("Failed to register histogram");
        histogram
    };

    /// Reconcile passes total
    static ref RECONCILES_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "gateway_reconciles_total",
            "Total number of Gateway API reconcile passes",
        );
        let counter = IntCounterVec::new(opts, &["trigger", "result"])
            .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Push requests total, by reason
    pub static ref PUSHES_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "gateway_pushes_total",
            "Total number of push requests issued",
        );
        let counter = IntCounterVec::new(opts, &["reason"])
            .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Namespace events total, by relevance decision
    static ref NAMESPACE_EVENTS_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "namespace_events_total",
            "Total number of Namespace change events seen",
        );
        let counter = IntCounterVec::new(opts, &["relevant"])
            .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };
}

/// Record one reconcile pass
pub fn record_reconcile(trigger: &str, duration_secs: f64, result: &str) {
    RECONCILE_DURATION
        .with_label_values(&[trigger])
        .observe(duration_secs);

    RECONCILES_TOTAL
        .with_label_values(&[trigger, result])
        .inc();
}

/// Record a Namespace event relevance decision
pub fn record_namespace_event(relevant: bool) {
    let label = if relevant { "true" } else { "false" };
    NAMESPACE_EVENTS_TOTAL.with_label_values(&[label]).inc();
}

/// Gather controller metrics
pub fn gather_controller_metrics() -> Result<String, String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = CONTROLLER_METRICS_REGISTRY.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Failed to convert to UTF-8: {}", e))
}
