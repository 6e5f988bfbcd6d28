//! Metrics and observability utilities
//!
//! Process-wide counters and histograms for research sessions, recorded
//! through the `metrics` facade. Installing an exporter is left to the
//! embedding process.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Metrics prefix for all DeepForge metrics
pub const METRICS_PREFIX: &str = "deepforge";

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_research_sessions_total", METRICS_PREFIX),
        Unit::Count,
        "Total research sessions by terminal status"
    );

    describe_counter!(
        format!("{}_research_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total retrieval calls issued by research sessions"
    );

    describe_counter!(
        format!("{}_research_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Queries answered from the per-session result cache"
    );

    describe_counter!(
        format!("{}_research_failed_retrievals_total", METRICS_PREFIX),
        Unit::Count,
        "Steps in which at least one retrieval back-end failed"
    );

    describe_histogram!(
        format!("{}_research_step_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Latency of one reason/search/extract step"
    );

    describe_histogram!(
        format!("{}_research_result_confidence", METRICS_PREFIX),
        Unit::Count,
        "Confidence of each extracted search result"
    );

    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cross-session cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cross-session cache misses"
    );

    tracing::info!("Metrics registered");
}

/// Record the end of a session
pub fn record_session(status: &str) {
    counter!(
        format!("{}_research_sessions_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record one retrieval call, tagged with the back-ends that answered
pub fn record_query(backends: usize) {
    counter!(
        format!("{}_research_queries_total", METRICS_PREFIX),
        "backends" => backends.to_string()
    )
    .increment(1);
}

/// Record a replay from the per-session result cache
pub fn record_result_cache_hit() {
    counter!(format!("{}_research_cache_hits_total", METRICS_PREFIX)).increment(1);
}

/// Record a step with at least one failed back-end
pub fn record_failed_retrieval() {
    counter!(format!("{}_research_failed_retrievals_total", METRICS_PREFIX)).increment(1);
}

/// Record step latency and terminal step status
pub fn record_step(duration_secs: f64, status: &str) {
    histogram!(
        format!("{}_research_step_duration_seconds", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .record(duration_secs);
}

/// Record the confidence of an extracted result
pub fn record_confidence(confidence: f64) {
    histogram!(format!("{}_research_result_confidence", METRICS_PREFIX)).record(confidence);
}

/// Helper to record embedding metrics
pub fn record_embedding(model: &str, batch_size: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(batch_size as u64);
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}
