use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

// Global registry
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

// Metrics
pub static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
pub static LOGIN_ATTEMPTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static ACCOUNT_LOCKOUTS_TOTAL: OnceLock<IntCounter> = OnceLock::new();
pub static AUDIT_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static AUDIT_INTEGRITY_FAILURES_TOTAL: OnceLock<IntCounter> = OnceLock::new();
pub static ACCESS_DECISIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

fn register<T>(registry: &Registry, name: &str, metric: T) -> T
where
    T: prometheus::core::Collector + Clone + 'static,
{
    match registry.register(Box::new(metric.clone())) {
        Ok(()) => metric,
        Err(e) => {
            tracing::error!("Failed to register {} collector: {}", name, e);
            panic!("Failed to initialize metrics: {}", e);
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    match IntCounterVec::new(Opts::new(name, help), labels) {
        Ok(metric) => register(registry, name, metric),
        Err(e) => {
            tracing::error!("Failed to create {} metric: {}", name, e);
            panic!("Failed to initialize metrics: {}", e);
        }
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    match IntCounter::new(name, help) {
        Ok(metric) => register(registry, name, metric),
        Err(e) => {
            tracing::error!("Failed to create {} metric: {}", name, e);
            panic!("Failed to initialize metrics: {}", e);
        }
    }
}

/// Idempotent: only the first call installs the registry.
pub fn init_metrics() {
    if REGISTRY.get().is_some() {
        return;
    }

    let registry = Registry::new();

    let requests_total = counter_vec(
        &registry,
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"],
    );

    let request_duration = match HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
        ),
        &["method", "path", "status"],
    ) {
        Ok(metric) => register(&registry, "http_request_duration_seconds", metric),
        Err(e) => {
            tracing::error!(
                "Failed to create http_request_duration_seconds metric: {}",
                e
            );
            panic!("Failed to initialize metrics: {}", e);
        }
    };

    let login_attempts = counter_vec(
        &registry,
        "login_attempts_total",
        "Login attempts by outcome",
        &["outcome"],
    );
    let lockouts = counter(
        &registry,
        "account_lockouts_total",
        "Accounts locked after repeated failures",
    );
    let audit_events = counter_vec(
        &registry,
        "audit_events_total",
        "Audit events appended to the ledger",
        &["event_type"],
    );
    let integrity_failures = counter(
        &registry,
        "audit_integrity_failures_total",
        "Integrity verifications that found broken links",
    );
    let access_decisions = counter_vec(
        &registry,
        "access_decisions_total",
        "Role gate decisions",
        &["decision"],
    );

    // Initialize globals
    let _ = REGISTRY.set(registry);
    let _ = HTTP_REQUESTS_TOTAL.set(requests_total);
    let _ = HTTP_REQUEST_DURATION_SECONDS.set(request_duration);
    let _ = LOGIN_ATTEMPTS_TOTAL.set(login_attempts);
    let _ = ACCOUNT_LOCKOUTS_TOTAL.set(lockouts);
    let _ = AUDIT_EVENTS_TOTAL.set(audit_events);
    let _ = AUDIT_INTEGRITY_FAILURES_TOTAL.set(integrity_failures);
    let _ = ACCESS_DECISIONS_TOTAL.set(access_decisions);
}

pub fn record_login(outcome: &str) {
    if let Some(counter) = LOGIN_ATTEMPTS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn record_lockout() {
    if let Some(counter) = ACCOUNT_LOCKOUTS_TOTAL.get() {
        counter.inc();
    }
}

pub fn record_audit_event(event_type: &str) {
    if let Some(counter) = AUDIT_EVENTS_TOTAL.get() {
        counter.with_label_values(&[event_type]).inc();
    }
}

pub fn record_integrity_failure() {
    if let Some(counter) = AUDIT_INTEGRITY_FAILURES_TOTAL.get() {
        counter.inc();
    }
}

pub fn record_access_decision(granted: bool) {
    if let Some(counter) = ACCESS_DECISIONS_TOTAL.get() {
        let decision = if granted { "granted" } else { "denied" };
        counter.with_label_values(&[decision]).inc();
    }
}

pub fn get_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    let registry = match REGISTRY.get() {
        Some(r) => r,
        None => {
            tracing::error!("Metrics registry not initialized");
            return "# Metrics registry not initialized\n".to_string();
        }
    };

    let metric_families = registry.gather();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return format!("# Failed to encode metrics: {}\n", e);
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to convert metrics to UTF-8: {}", e);
            format!("# Failed to convert metrics to UTF-8: {}\n", e)
        }
    }
}
