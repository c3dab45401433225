//! app-ident-dns - Identify applications from the DNS answers they receive.
//!
//! This crate sits in the DNS path as a transparent forwarder. Every reply from
//! the upstream resolver is matched against a directory of applications and their
//! domains; the IPv4 addresses those domains resolve to are recorded and mirrored
//! into a kernel address set (`ipset`), where firewall or routing rules can match
//! on them. The accumulated application -> address view is served over HTTP.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         app-ident-dns                            │
//! │                                                                  │
//! │  client ──▶ ┌─────────────┐ ──▶ upstream resolver                │
//! │   UDP/TCP   │  Forwarder  │ ◀──                                  │
//! │     ◀────── └──────┬──────┘                                      │
//! │                    │ reply                                       │
//! │                    ▼                                             │
//! │             ┌──────────────┐   ┌──────────────┐                  │
//! │             │ QueryHandler │──▶│ MatchEngine  │◀── AppDirectory  │
//! │             └──────┬───────┘   └──────────────┘                  │
//! │                    │ (app, ip)                                   │
//! │                    ▼                                             │
//! │             ┌──────────────┐  new ip  ┌──────────────┐           │
//! │             │   Registry   │────────▶ │ KernelSetSync│──▶ ipset  │
//! │             └──────┬───────┘          └──────────────┘           │
//! │                    │ snapshot                                    │
//! │                    ▼                                             │
//! │              GET /detected                                       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Name matching
//!
//! Question names and directory domains are both compared in lower-case,
//! fully-qualified form, so `Foo.Example.com` in the directory matches a query
//! for `foo.example.com.`.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use app_ident_dns::{AppDirectory, Config, DnsServer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config: Config = load_config();
//!     let directory = AppDirectory::load(&config.detect.directory_path).unwrap();
//!
//!     let shutdown = CancellationToken::new();
//!     let server = DnsServer::new(config.detect, directory);
//!     server.run(shutdown).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod api;
pub mod config;
pub mod directory;
pub mod error;
pub mod forwarder;
pub mod handler;
pub mod ipset;
pub mod matcher;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod telemetry;

// Re-export main types
pub use config::{Config, DetectConfig, HttpConfig, IpsetConfig, TelemetryConfig};
pub use directory::AppDirectory;
pub use error::DetectError;
pub use handler::{Detection, QueryHandler};
pub use ipset::{AddressSet, IpsetCommand, KernelSetSync};
pub use matcher::AppMatch;
pub use registry::{DetectedRegistry, Snapshot};
pub use server::DnsServer;
