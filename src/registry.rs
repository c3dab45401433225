//! Registry of detected addresses and the applications they were detected for.
//!
//! The registry only grows. One mutex guards both membership and attribution, so
//! "is this address new" is decided exactly once per address no matter how many
//! requests race on it.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::debug;

use crate::directory::AppDirectory;
use crate::metrics;

/// Thread-safe set of detected IPv4 addresses with per-application attribution.
#[derive(Debug, Clone, Default)]
pub struct DetectedRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    /// ip -> names of the applications whose domains resolved to it
    attribution: BTreeMap<Ipv4Addr, BTreeSet<String>>,
}

impl DetectedRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `ip` was resolved for `app`.
    ///
    /// Returns `true` the first time `ip` is recorded for any application and
    /// `false` afterwards. The attribution to `app` is added either way.
    pub fn record(&self, app: &str, ip: Ipv4Addr) -> bool {
        let mut inner = self.inner.lock();
        let is_new = !inner.attribution.contains_key(&ip);
        let apps = inner.attribution.entry(ip).or_default();
        if !apps.contains(app) {
            apps.insert(app.to_string());
        }
        drop(inner);

        debug!(app, %ip, is_new, "recorded detected address");
        is_new
    }

    /// Check if `ip` has been detected.
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.inner.lock().attribution.contains_key(&ip)
    }

    /// Applications `ip` was detected for, sorted.
    pub fn apps_for(&self, ip: Ipv4Addr) -> Vec<String> {
        self.inner
            .lock()
            .attribution
            .get(&ip)
            .map(|apps| apps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All detected addresses, sorted.
    pub fn ips(&self) -> Vec<Ipv4Addr> {
        self.inner.lock().attribution.keys().copied().collect()
    }

    /// Number of detected addresses.
    pub fn len(&self) -> usize {
        self.inner.lock().attribution.len()
    }

    /// True when nothing has been detected yet.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().attribution.is_empty()
    }

    /// Point-in-time view of detected addresses per application.
    ///
    /// Only applications present in `directory` with at least one detection are
    /// included. The lock is held just long enough to copy the attribution map.
    pub fn snapshot(&self, directory: &AppDirectory) -> Snapshot {
        let attribution = self.inner.lock().attribution.clone();

        let mut buckets: BTreeMap<String, Vec<Ipv4Addr>> = BTreeMap::new();
        for (ip, apps) in attribution {
            for app in apps {
                if directory.contains_app(&app) {
                    buckets.entry(app).or_default().push(ip);
                }
            }
        }

        Snapshot(buckets)
    }

    /// Emit current registry metrics.
    pub fn emit_metrics(&self) {
        let inner = self.inner.lock();
        let apps: BTreeSet<&str> = inner
            .attribution
            .values()
            .flat_map(|apps| apps.iter().map(String::as_str))
            .collect();
        metrics::record_registry_counts(inner.attribution.len(), apps.len());
    }
}

/// Detected addresses grouped by application name.
///
/// Serializes as a JSON object of arrays of dotted-quad strings, e.g.
/// `{"Foo": ["93.184.216.34"]}`. Addresses within a bucket are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Snapshot(BTreeMap<String, Vec<Ipv4Addr>>);

impl Snapshot {
    /// Addresses detected for `app`, if any.
    pub fn get(&self, app: &str) -> Option<&[Ipv4Addr]> {
        self.0.get(app).map(Vec::as_slice)
    }

    /// Iterate `(app, addresses)` pairs in application-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Ipv4Addr])> {
        self.0.iter().map(|(app, ips)| (app.as_str(), ips.as_slice()))
    }

    /// Number of applications with at least one detection.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no application has detections.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume the snapshot into its underlying map.
    pub fn into_inner(self) -> BTreeMap<String, Vec<Ipv4Addr>> {
        self.0
    }
}
