//! Prometheus metrics for tallerflow.
//!
//! Exposed via the /metrics endpoint.
//!
//! ## Metrics
//!
//! ### Counters
//! - `tallerflow_transitions_total` - Stage transitions by from, to and outcome
//! - `tallerflow_timer_operations_total` - Pause/resume calls by operation and outcome
//! - `tallerflow_sla_alerts_total` - Edge-triggered SLA alerts by status
//! - `tallerflow_sweep_failures_total` - Orders the sweep failed to evaluate
//! - `tallerflow_notification_failures_total` - Events a notifier rejected
//!
//! ### Histograms
//! - `tallerflow_sweep_duration_seconds` - Duration of one SLA sweep
//!
//! ### Gauges
//! - `tallerflow_active_orders` - Orders not yet delivered

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

use crate::engine::SlaStatus;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics exporter.
///
/// Call once at startup. If another recorder is already installed the
/// returned handle renders an empty registry.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if let Err(e) = metrics::set_global_recorder(recorder) {
                warn!("Metrics recorder already installed: {}", e);
            }
            handle
        })
        .clone()
}

/// Get the Prometheus handle, if metrics were initialized.
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render current metrics in Prometheus text format.
pub fn render_metrics() -> String {
    match get_prometheus_handle() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

// =============================================================================
// Workflow Metrics
// =============================================================================

/// Record a stage transition attempt.
pub fn record_transition(from: &str, to: &str, outcome: &str) {
    counter!(
        "tallerflow_transitions_total",
        "from" => from.to_string(),
        "to" => to.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a timer pause or resume.
pub fn record_timer_operation(operation: &str, outcome: &str) {
    counter!(
        "tallerflow_timer_operations_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn set_active_orders(count: u64) {
    gauge!("tallerflow_active_orders").set(count as f64);
}

pub fn inc_active_orders() {
    gauge!("tallerflow_active_orders").increment(1.0);
}

pub fn dec_active_orders() {
    gauge!("tallerflow_active_orders").decrement(1.0);
}

// =============================================================================
// SLA Metrics
// =============================================================================

pub fn record_sla_alert(status: SlaStatus) {
    counter!(
        "tallerflow_sla_alerts_total",
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_sweep_duration(duration: Duration) {
    histogram!("tallerflow_sweep_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_sweep_failure() {
    counter!("tallerflow_sweep_failures_total").increment(1);
}

pub fn record_notification_failure(kind: &str) {
    counter!(
        "tallerflow_notification_failures_total",
        "event" => kind.to_string()
    )
    .increment(1);
}

/// Label for an operation result.
pub fn outcome_label<T>(result: &crate::error::Result<T>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(e) => e.code(),
    }
}
