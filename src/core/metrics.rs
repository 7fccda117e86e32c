//! Metrics collection using Prometheus
//!
//! Registered on the default registry and exposed by the web server at
//! `/metrics` in the Prometheus text format.

#![allow(clippy::unwrap_used)]

use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_gauge, Encoder, IntCounter, IntGauge, TextEncoder};

/// Total Telegram messages handled by the dispatcher
pub static MESSAGES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("kursobot_messages_total", "Telegram messages handled").unwrap()
});

/// Total conversions performed (bot + web)
pub static CONVERSIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("kursobot_conversions_total", "Currency conversions performed").unwrap()
});

/// Total rates feed fetch attempts
pub static RATE_FETCHES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("kursobot_rate_fetches_total", "Rates feed fetch attempts").unwrap()
});

/// Total failed rates feed fetches
pub static RATE_FETCH_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("kursobot_rate_fetch_failures_total", "Failed rates feed fetches").unwrap()
});

/// Number of currencies in the currently cached rate table
pub static RATES_LOADED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("kursobot_rates_loaded", "Currencies in the cached rate table").unwrap()
});

/// Force registration of all metrics at startup so they show up in
/// /metrics with zero values before first use.
pub fn init_metrics() {
    Lazy::force(&MESSAGES_TOTAL);
    Lazy::force(&CONVERSIONS_TOTAL);
    Lazy::force(&RATE_FETCHES_TOTAL);
    Lazy::force(&RATE_FETCH_FAILURES_TOTAL);
    Lazy::force(&RATES_LOADED);
}

/// Encode the default registry in the Prometheus text format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        log::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
