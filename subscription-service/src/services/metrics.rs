//! Metrics module for subscription-service.
//! Provides Prometheus metrics for the billing job, settlements and the store.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_counter_vec, register_histogram, register_histogram_vec,
    register_int_counter, register_int_counter_vec, CounterVec, Encoder, Histogram, HistogramVec,
    IntCounter, IntCounterVec, TextEncoder,
};
use service_core::observability::render_metrics;
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "subscription_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Billing cycles by outcome (completed, failed, skipped)
pub static BILLING_CYCLES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Wall time of cycles that held the lock
pub static BILLING_CYCLE_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Bills created by origin (signup, cycle)
pub static BILLS_CREATED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Billed amount by origin (monetary tracking)
pub static BILLED_AMOUNT_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Payment settlements by outcome
pub static SETTLEMENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Lock acquisition attempts by result (acquired, contended, error)
pub static LOCK_ACQUISITIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Lock deletes that failed; the lock then lingers until its TTL
pub static LOCK_RELEASE_FAILURES_TOTAL: OnceLock<IntCounter> = OnceLock::new();

/// Subscription operations counter
pub static SUBSCRIPTION_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Safe to call more than once.
pub fn init_metrics() {
    BILLING_CYCLES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("billing_cycles_total", "Billing cycles by outcome"),
            &["outcome"]
        )
        .expect("Failed to register BILLING_CYCLES_TOTAL")
    });

    // Cycles can take minutes on a large due-set
    BILLING_CYCLE_DURATION.get_or_init(|| {
        register_histogram!(histogram_opts!(
            "billing_cycle_duration_seconds",
            "Billing cycle duration while holding the lock",
            vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]
        ))
        .expect("Failed to register BILLING_CYCLE_DURATION")
    });

    BILLS_CREATED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("billing_bills_created_total", "Bills created by origin"),
            &["origin"]
        )
        .expect("Failed to register BILLS_CREATED_TOTAL")
    });

    BILLED_AMOUNT_TOTAL.get_or_init(|| {
        register_counter_vec!(
            opts!("billing_billed_amount_total", "Total billed amount by origin"),
            &["origin"]
        )
        .expect("Failed to register BILLED_AMOUNT_TOTAL")
    });

    SETTLEMENTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("billing_settlements_total", "Payment settlements by outcome"),
            &["outcome"]
        )
        .expect("Failed to register SETTLEMENTS_TOTAL")
    });

    LOCK_ACQUISITIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_lock_acquisitions_total",
                "Billing lock acquisition attempts by result"
            ),
            &["result"]
        )
        .expect("Failed to register LOCK_ACQUISITIONS_TOTAL")
    });

    LOCK_RELEASE_FAILURES_TOTAL.get_or_init(|| {
        register_int_counter!(opts!(
            "billing_lock_release_failures_total",
            "Billing lock releases that failed"
        ))
        .expect("Failed to register LOCK_RELEASE_FAILURES_TOTAL")
    });

    SUBSCRIPTION_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "subscription_operations_total",
                "Total subscription operations by operation type"
            ),
            &["operation"]
        )
        .expect("Failed to register SUBSCRIPTION_OPERATIONS_TOTAL")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("subscription_errors_total", "Total errors by type for alerting"),
            &["error_type", "operation"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format: the billing registry followed by
/// the HTTP request metrics of the shared recorder.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    let mut text = String::from_utf8(buffer).unwrap_or_default();
    text.push_str(&render_metrics());
    text
}

/// Record the outcome of one scheduled billing cycle.
pub fn record_billing_cycle(outcome: &str) {
    if let Some(counter) = BILLING_CYCLES_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

/// Record how long a locked cycle ran.
pub fn record_billing_cycle_duration(duration_secs: f64) {
    if let Some(histogram) = BILLING_CYCLE_DURATION.get() {
        histogram.observe(duration_secs);
    }
}

/// Record a bill created, with its amount.
pub fn record_bill_created(origin: &str, amount: f64) {
    if let Some(counter) = BILLS_CREATED_TOTAL.get() {
        counter.with_label_values(&[origin]).inc();
    }
    if let Some(counter) = BILLED_AMOUNT_TOTAL.get() {
        counter.with_label_values(&[origin]).inc_by(amount.abs());
    }
}

/// Record a settlement attempt.
pub fn record_settlement(outcome: &str) {
    if let Some(counter) = SETTLEMENTS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

/// Record one lock acquisition attempt.
pub fn record_lock_acquisition(result: &str) {
    if let Some(counter) = LOCK_ACQUISITIONS_TOTAL.get() {
        counter.with_label_values(&[result]).inc();
    }
}

/// Record a failed lock release.
pub fn record_lock_release_failure() {
    if let Some(counter) = LOCK_RELEASE_FAILURES_TOTAL.get() {
        counter.inc();
    }
}

/// Record a subscription operation.
pub fn record_subscription_operation(operation: &str) {
    if let Some(counter) = SUBSCRIPTION_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[operation]).inc();
    }
}

/// Record an error for alerting.
pub fn record_error(error_type: &str, operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type, operation]).inc();
    }
}
