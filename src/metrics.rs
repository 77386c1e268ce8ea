//! Prometheus metrics registry and text exposition for `GET /metrics` (C11, §10.5).
//!
//! One `Registry`, counters/gauges/histograms registered once at startup, rendered with
//! `TextEncoder` rather than a hand-rolled exposition format.

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub infer_requests_total: IntCounterVec,
    pub payment_challenges_total: prometheus::IntCounter,
    pub payment_receipts_total: prometheus::IntCounter,
    pub active_nodes: IntGauge,
    pub federation_attempts_total: prometheus::IntCounter,
    pub federation_bids_total: prometheus::IntCounter,
    pub federation_awards_total: prometheus::IntCounter,
    pub federation_success_total: prometheus::IntCounter,
    pub infer_latency_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let infer_requests_total = IntCounterVec::new(
            Opts::new("router_infer_requests_total", "Total /infer requests by outcome"),
            &["outcome"],
        )
        .expect("static metric descriptor");
        let payment_challenges_total = prometheus::IntCounter::new(
            "router_payment_challenges_total",
            "Total payment challenges issued",
        )
        .expect("static metric descriptor");
        let payment_receipts_total = prometheus::IntCounter::new(
            "router_payment_receipts_total",
            "Total payment receipts accepted",
        )
        .expect("static metric descriptor");
        let active_nodes = IntGauge::new("router_active_nodes", "Currently active nodes")
            .expect("static metric descriptor");
        let federation_attempts_total = prometheus::IntCounter::new(
            "router_federation_attempts_total",
            "Total offload attempts via federation",
        )
        .expect("static metric descriptor");
        let federation_bids_total = prometheus::IntCounter::new(
            "router_federation_bids_total",
            "Total bids received in auctions",
        )
        .expect("static metric descriptor");
        let federation_awards_total = prometheus::IntCounter::new(
            "router_federation_awards_total",
            "Total awards published",
        )
        .expect("static metric descriptor");
        let federation_success_total = prometheus::IntCounter::new(
            "router_federation_success_total",
            "Total offloads that returned a successful response",
        )
        .expect("static metric descriptor");
        let infer_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "router_infer_latency_seconds",
            "End-to-end /infer handler latency",
        ))
        .expect("static metric descriptor");

        registry.register(Box::new(infer_requests_total.clone())).expect("metric registration");
        registry.register(Box::new(payment_challenges_total.clone())).expect("metric registration");
        registry.register(Box::new(payment_receipts_total.clone())).expect("metric registration");
        registry.register(Box::new(active_nodes.clone())).expect("metric registration");
        registry.register(Box::new(federation_attempts_total.clone())).expect("metric registration");
        registry.register(Box::new(federation_bids_total.clone())).expect("metric registration");
        registry.register(Box::new(federation_awards_total.clone())).expect("metric registration");
        registry.register(Box::new(federation_success_total.clone())).expect("metric registration");
        registry.register(Box::new(infer_latency_seconds.clone())).expect("metric registration");

        Metrics {
            registry,
            infer_requests_total,
            payment_challenges_total,
            payment_receipts_total,
            active_nodes,
            federation_attempts_total,
            federation_bids_total,
            federation_awards_total,
            federation_success_total,
            infer_latency_seconds,
        }
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .expect("prometheus text encoding should not fail");
        String::from_utf8(buffer).expect("prometheus text encoder produces valid utf8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics::new()
    }
}
