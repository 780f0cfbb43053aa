use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Process-wide counters. Every increment is mirrored to the `metrics` facade
/// so an installed exporter sees the same numbers as `/health`.
#[derive(Debug, Default)]
pub struct AppMetrics {
    requests_total: AtomicU64,
    expenses_recorded_total: AtomicU64,
    violations_total: AtomicU64,
    warnings_total: AtomicU64,
    configuration_errors_total: AtomicU64,
    total_latency_millis: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub expenses_recorded_total: u64,
    pub violations_total: u64,
    pub warnings_total: u64,
    pub configuration_errors_total: u64,
    pub avg_latency_millis: f64,
}

impl AppMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("expense_requests_total").increment(1);
    }

    pub fn inc_expense_recorded(&self) {
        self.expenses_recorded_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("expense_recorded_total").increment(1);
    }

    pub fn add_violations(&self, count: usize) {
        self.violations_total
            .fetch_add(count as u64, Ordering::Relaxed);
        metrics::counter!("expense_violations_total").increment(count as u64);
    }

    pub fn add_warnings(&self, count: usize) {
        self.warnings_total.fetch_add(count as u64, Ordering::Relaxed);
        metrics::counter!("expense_warnings_total").increment(count as u64);
    }

    pub fn inc_configuration_error(&self) {
        self.configuration_errors_total
            .fetch_add(1, Ordering::Relaxed);
        metrics::counter!("expense_configuration_errors_total").increment(1);
    }

    pub fn observe_latency(&self, duration: Duration) {
        self.total_latency_millis
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests = self.requests_total.load(Ordering::Relaxed);
        let latency = self.total_latency_millis.load(Ordering::Relaxed);

        MetricsSnapshot {
            requests_total: requests,
            expenses_recorded_total: self.expenses_recorded_total.load(Ordering::Relaxed),
            violations_total: self.violations_total.load(Ordering::Relaxed),
            warnings_total: self.warnings_total.load(Ordering::Relaxed),
            configuration_errors_total: self.configuration_errors_total.load(Ordering::Relaxed),
            avg_latency_millis: if requests == 0 {
                0.0
            } else {
                latency as f64 / requests as f64
            },
        }
    }
}

/// Logs go to stderr so CLI output on stdout stays machine-readable.
pub fn init_tracing(service_name: &str) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}=info,expense_api=info,expense_agents=info",
                service_name
            ))
        });

        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .init();
    });
}
