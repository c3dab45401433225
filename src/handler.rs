//! Observe DNS responses and feed detections into the registry and kernel set.

use hickory_proto::op::Message;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::directory::AppDirectory;
use crate::ipset::KernelSetSync;
use crate::matcher;
use crate::metrics::{self, MessageResult};
use crate::registry::{DetectedRegistry, Snapshot};

/// One address seen for one application while observing a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Application whose domain matched.
    pub app: String,
    /// Address from an A answer.
    pub ip: Ipv4Addr,
    /// True if this was the first time the registry saw the address.
    pub is_new: bool,
}

/// Transparent observer placed in front of the response path.
///
/// Cheap to clone; all clones share the same directory, registry and sync worker.
#[derive(Debug, Clone)]
pub struct QueryHandler {
    directory: Arc<AppDirectory>,
    registry: DetectedRegistry,
    sync: KernelSetSync,
    sync_every_match: bool,
}

impl QueryHandler {
    /// Create a handler over a loaded directory, a registry and a running sync worker.
    pub fn new(directory: Arc<AppDirectory>, registry: DetectedRegistry, sync: KernelSetSync) -> Self {
        Self {
            directory,
            registry,
            sync,
            sync_every_match: false,
        }
    }

    /// Queue a kernel set add for every matched address, not only new ones.
    pub fn with_sync_every_match(mut self, enabled: bool) -> Self {
        self.sync_every_match = enabled;
        self
    }

    /// Observe `message` and hand it back untouched.
    pub fn handle(&self, message: Message) -> Message {
        self.observe(&message);
        message
    }

    /// Match `message`, record its addresses and queue kernel set adds.
    pub fn observe(&self, message: &Message) -> Vec<Detection> {
        let matches = matcher::match_message(message, &self.directory);
        if matches.is_empty() {
            trace!(id = message.id(), "response matched no application");
            metrics::record_message(MessageResult::Unmatched);
            return Vec::new();
        }
        metrics::record_message(MessageResult::Matched);

        let mut detections = Vec::new();
        for app_match in matches {
            debug!(app = %app_match.app, ips = app_match.ips.len(), "detected application");

            for ip in app_match.ips {
                let is_new = self.registry.record(&app_match.app, ip);
                metrics::record_detection(&app_match.app, is_new);

                if is_new {
                    info!(app = %app_match.app, %ip, "new address detected");
                }
                if is_new || self.sync_every_match {
                    if let Err(e) = self.sync.add(ip) {
                        warn!(app = %app_match.app, %ip, error = %e, "could not queue kernel set add");
                    }
                }

                detections.push(Detection {
                    app: app_match.app.clone(),
                    ip,
                    is_new,
                });
            }
        }

        detections
    }

    /// Current detections per application.
    pub fn snapshot(&self) -> Snapshot {
        self.registry.snapshot(&self.directory)
    }

    /// The registry this handler records into.
    pub fn registry(&self) -> &DetectedRegistry {
        &self.registry
    }

    /// The directory this handler matches against.
    pub fn directory(&self) -> &AppDirectory {
        &self.directory
    }
}
