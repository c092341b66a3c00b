//! Prometheus metrics & middleware helper.

use actix_web_prom::{PrometheusMetrics, PrometheusMetricsBuilder};
use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_gauge, IntCounter, IntGauge,
};

/// Global Prometheus handle reused in tests.
pub static METRICS: Lazy<PrometheusMetrics> = Lazy::new(|| {
    PrometheusMetricsBuilder::new("api")
        .registry(prometheus::default_registry().clone())
        .endpoint("/metrics") // exposed URL
        .build()
        .expect("metrics builder")
});

/// Battles currently resident on this instance.
pub static ACTIVE_BATTLES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("arena_active_battles", "Battles live on this instance").unwrap()
});

/// 1 while the coordination layer runs on the local fallback.
pub static DEGRADED_MODE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("arena_coord_degraded", "Coordination degraded to local mode").unwrap()
});

/// Calls that fell through from Redis to the local backend.
pub static COORD_FALLBACKS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("arena_coord_fallbacks_total", "Coordination calls served locally").unwrap()
});

/// Matches created by this instance.
pub static MATCHES_CREATED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("arena_matches_created_total", "Battles created here").unwrap()
});
