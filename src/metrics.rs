//! Metrics instrumentation for app-ident-dns.
//!
//! All metrics are prefixed with `app_ident.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

/// Record one DNS response passing through the observer.
pub fn record_message(result: MessageResult) {
    let result_str = match result {
        MessageResult::Matched => "matched",
        MessageResult::Unmatched => "unmatched",
    };

    counter!("app_ident.message.count", "result" => result_str).increment(1);
}

/// Whether a response matched any application.
#[derive(Debug, Clone, Copy)]
pub enum MessageResult {
    /// The question name belongs to at least one application.
    Matched,
    /// No application lists the question name.
    Unmatched,
}

/// Record an address detected for an application.
pub fn record_detection(app: &str, is_new: bool) {
    let kind = if is_new { "new" } else { "repeat" };
    counter!("app_ident.detection.count", "app" => app.to_string(), "kind" => kind).increment(1);
}

/// Record the outcome of a kernel set add.
pub fn record_sync(result: SyncResult) {
    let result_str = match result {
        SyncResult::Success => "success",
        SyncResult::Failure => "failure",
        SyncResult::Dropped => "dropped",
    };

    counter!("app_ident.ipset.add.count", "result" => result_str).increment(1);
}

/// Kernel set add outcomes.
#[derive(Debug, Clone, Copy)]
pub enum SyncResult {
    /// Address added (or already present).
    Success,
    /// Command failed to run or exited non-zero.
    Failure,
    /// Queue was full; the add was never attempted.
    Dropped,
}

/// Record how long one kernel set add took.
pub fn record_sync_duration(duration: std::time::Duration) {
    histogram!("app_ident.ipset.add.duration.seconds").record(duration.as_secs_f64());
}

/// Record an exchange with the upstream resolver.
pub fn record_upstream(result: UpstreamResult, duration: std::time::Duration) {
    let result_str = match result {
        UpstreamResult::Success => "success",
        UpstreamResult::Timeout => "timeout",
        UpstreamResult::Error => "error",
    };

    counter!("app_ident.upstream.count", "result" => result_str).increment(1);
    histogram!("app_ident.upstream.duration.seconds").record(duration.as_secs_f64());
}

/// Upstream exchange outcomes.
#[derive(Debug, Clone, Copy)]
pub enum UpstreamResult {
    /// A matching reply was received.
    Success,
    /// No reply within the configured timeout.
    Timeout,
    /// Socket error or unusable reply.
    Error,
}

/// Record registry sizes (call periodically).
pub fn record_registry_counts(ips: usize, apps: usize) {
    gauge!("app_ident.registry.ips.count").set(ips as f64);
    gauge!("app_ident.registry.apps.count").set(apps as f64);
}

/// Record the size of the loaded application directory.
pub fn record_directory(apps: usize, domains: usize) {
    gauge!("app_ident.directory.apps.count").set(apps as f64);
    gauge!("app_ident.directory.domains.count").set(domains as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
