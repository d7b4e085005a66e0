//! Metrics module for billing-service.
//! Provides Prometheus metrics for subscription operations and batch runs.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, TextEncoder, histogram_opts, opts,
    register_histogram_vec, register_int_counter_vec,
};
use std::sync::OnceLock;

/// Store query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!("billing_db_query_duration_seconds", "Store query duration"),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Subscription operations counter (per-merchant metering)
pub static SUBSCRIPTION_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Billing runs counter
pub static BILLING_RUNS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Charge attempts counter by outcome
pub static CHARGE_ATTEMPTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Charged amount counter (monetary tracking, stablecoin units)
pub static CHARGE_AMOUNT_TOTAL: OnceLock<prometheus::CounterVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    SUBSCRIPTION_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_subscription_operations_total",
                "Total subscription operations by merchant and operation type"
            ),
            &["merchant_id", "operation"]
        )
        .expect("Failed to register SUBSCRIPTION_OPERATIONS_TOTAL")
    });

    BILLING_RUNS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_runs_total",
                "Total billing runs by type and final status"
            ),
            &["run_type", "status"]
        )
        .expect("Failed to register BILLING_RUNS_TOTAL")
    });

    CHARGE_ATTEMPTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_charge_attempts_total",
                "Total charge attempts by outcome"
            ),
            &["outcome"]
        )
        .expect("Failed to register CHARGE_ATTEMPTS_TOTAL")
    });

    CHARGE_AMOUNT_TOTAL.get_or_init(|| {
        prometheus::register_counter_vec!(
            prometheus::opts!(
                "billing_charge_amount_total",
                "Total successfully charged amount by merchant"
            ),
            &["merchant_id"]
        )
        .expect("Failed to register CHARGE_AMOUNT_TOTAL")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("billing_errors_total", "Total errors by type for alerting"),
            &["error_type", "operation"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to string")
}

/// Record a subscription operation.
pub fn record_subscription_operation(merchant_id: &str, operation: &str) {
    if let Some(counter) = SUBSCRIPTION_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[merchant_id, operation]).inc();
    }
}

/// Record a billing run.
pub fn record_billing_run(run_type: &str, status: &str) {
    if let Some(counter) = BILLING_RUNS_TOTAL.get() {
        counter.with_label_values(&[run_type, status]).inc();
    }
}

/// Record a charge attempt outcome.
pub fn record_charge_attempt(outcome: &str) {
    if let Some(counter) = CHARGE_ATTEMPTS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

/// Record a successfully charged amount.
pub fn record_charge_amount(merchant_id: &str, amount: f64) {
    if let Some(counter) = CHARGE_AMOUNT_TOTAL.get() {
        counter.with_label_values(&[merchant_id]).inc_by(amount.abs());
    }
}

/// Record an error for alerting.
pub fn record_error(error_type: &str, operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type, operation]).inc();
    }
}
