//! Error types for app-ident-dns.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while detecting applications and syncing their addresses.
#[derive(Debug, Error)]
pub enum DetectError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// Application directory could not be read or parsed.
    #[error("failed to load application directory {path}: {reason}")]
    Directory {
        /// Path of the directory file.
        path: PathBuf,
        /// Underlying read or parse failure.
        reason: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The kernel set command could not be run or exited with a failure.
    #[error("ipset command `{command}` failed: {reason}")]
    Ipset {
        /// Rendered command line.
        command: String,
        /// Spawn error or captured stderr.
        reason: String,
    },

    /// The kernel set sync queue is full; the address was not queued.
    #[error("kernel set sync queue is full, dropped {0}")]
    SyncQueueFull(Ipv4Addr),

    /// The kernel set sync worker has stopped.
    #[error("kernel set sync worker is not running")]
    SyncClosed,

    /// Upstream resolver did not answer in time.
    #[error("upstream {0} timed out")]
    UpstreamTimeout(SocketAddr),

    /// Upstream resolver answered with something that is not a reply to our query.
    #[error("upstream {addr} sent an unexpected reply: {reason}")]
    UpstreamReply {
        /// Upstream resolver address.
        addr: SocketAddr,
        /// What was wrong with the reply.
        reason: String,
    },

    /// HTTP server error
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),
}
