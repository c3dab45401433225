//! Configuration types for app-ident-dns.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::DetectError;

/// Longest set name the kernel accepts (IPSET_MAXNAMELEN - 1).
pub const MAX_SET_NAME_LEN: usize = 31;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Detection and forwarding configuration.
    pub detect: DetectConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// DNS forwarding and application detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectConfig {
    /// Address for DNS server to listen on (UDP and TCP).
    pub listen_addr: SocketAddr,

    /// Upstream resolver every query is relayed to.
    pub upstream_addr: SocketAddr,

    /// How long to wait for the upstream resolver, in milliseconds.
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,

    /// Idle timeout for DNS-over-TCP client connections, in seconds.
    #[serde(default = "default_tcp_timeout_secs")]
    pub tcp_timeout_secs: u64,

    /// JSON file mapping application names to their domains.
    #[serde(default = "default_directory_path")]
    pub directory_path: PathBuf,

    /// Kernel address set settings.
    #[serde(default)]
    pub ipset: IpsetConfig,

    /// Snapshot endpoint settings.
    #[serde(default)]
    pub http: HttpConfig,
}

impl DetectConfig {
    /// Check values that serde cannot constrain on its own.
    pub fn validate(&self) -> Result<(), DetectError> {
        let name = &self.ipset.set_name;
        if name.is_empty() {
            return Err(DetectError::Config("ipset.set_name must not be empty".into()));
        }
        if name.len() > MAX_SET_NAME_LEN {
            return Err(DetectError::Config(format!(
                "ipset.set_name `{}` is longer than {} bytes",
                name, MAX_SET_NAME_LEN
            )));
        }
        if self.ipset.queue_capacity == 0 {
            return Err(DetectError::Config(
                "ipset.queue_capacity must be greater than zero".into(),
            ));
        }
        if self.upstream_timeout_ms == 0 {
            return Err(DetectError::Config(
                "upstream_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Kernel address set (`ipset`) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpsetConfig {
    /// Program invoked to manage the set.
    #[serde(default = "default_program")]
    pub program: String,

    /// Name of the set detected addresses are added to.
    #[serde(default = "default_set_name")]
    pub set_name: String,

    /// Set type used when `create_set` is enabled.
    #[serde(default = "default_set_type")]
    pub set_type: String,

    /// Create the set at startup if it does not exist.
    #[serde(default)]
    pub create_set: bool,

    /// Addresses that may wait for the sync worker before new ones are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Re-issue the (idempotent) add for every matched answer, not only new ones.
    #[serde(default)]
    pub sync_every_match: bool,
}

impl Default for IpsetConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            set_name: default_set_name(),
            set_type: default_set_type(),
            create_set: false,
            queue_capacity: default_queue_capacity(),
            sync_every_match: false,
        }
    }
}

/// Snapshot endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Serve the snapshot endpoint at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Address to serve `GET /detected` on.
    #[serde(default = "default_http_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: default_http_addr(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "app_ident_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_upstream_timeout_ms() -> u64 {
    2000
}

fn default_tcp_timeout_secs() -> u64 {
    30
}

fn default_directory_path() -> PathBuf {
    PathBuf::from("applications.json")
}

fn default_program() -> String {
    "ipset".to_string()
}

fn default_set_name() -> String {
    "detected_ips".to_string()
}

fn default_set_type() -> String {
    "hash:ip".to_string()
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_true() -> bool {
    true
}
