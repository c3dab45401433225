//! Mirror detected addresses into a kernel address set.
//!
//! Adds go through a bounded queue to a single worker task, so the DNS path
//! never waits on process creation. The worker calls an [`AddressSet`]; the
//! production implementation is [`IpsetCommand`], which shells out to
//! `ipset add <set> <ip> -exist`. Because `-exist` makes the add idempotent,
//! replaying an address is always safe.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::IpsetConfig;
use crate::error::DetectError;
use crate::metrics::{self, SyncResult, Timer};

/// A named kernel address set that addresses can be added to.
#[async_trait]
pub trait AddressSet: Send + Sync + 'static {
    /// Add `ip` to the set. Adding an address already present must succeed.
    async fn add(&self, ip: Ipv4Addr) -> Result<(), DetectError>;

    /// Name of the set, for logging.
    fn set_name(&self) -> &str;
}

/// [`AddressSet`] backed by the `ipset` command line tool.
#[derive(Debug, Clone)]
pub struct IpsetCommand {
    program: String,
    set_name: String,
    set_type: String,
}

impl IpsetCommand {
    /// Create a command wrapper from configuration.
    pub fn new(config: &IpsetConfig) -> Self {
        Self {
            program: config.program.clone(),
            set_name: config.set_name.clone(),
            set_type: config.set_type.clone(),
        }
    }

    /// Arguments for adding `ip`.
    fn add_args(&self, ip: Ipv4Addr) -> Vec<String> {
        vec![
            "add".to_string(),
            self.set_name.clone(),
            ip.to_string(),
            "-exist".to_string(),
        ]
    }

    /// Arguments for creating the set if it is missing.
    fn create_args(&self) -> Vec<String> {
        vec![
            "create".to_string(),
            self.set_name.clone(),
            self.set_type.clone(),
            "-exist".to_string(),
        ]
    }

    /// Create the set if it does not exist yet.
    pub async fn ensure_set(&self) -> Result<(), DetectError> {
        self.run(self.create_args()).await?;
        info!(set = %self.set_name, set_type = %self.set_type, "kernel address set ready");
        Ok(())
    }

    async fn run(&self, args: Vec<String>) -> Result<(), DetectError> {
        let rendered = format!("{} {}", self.program, args.join(" "));

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DetectError::Ipset {
                command: rendered.clone(),
                reason: e.to_string(),
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = match stderr.trim() {
            "" => output.status.to_string(),
            msg => format!("{}: {}", output.status, msg),
        };
        Err(DetectError::Ipset {
            command: rendered,
            reason,
        })
    }
}

#[async_trait]
impl AddressSet for IpsetCommand {
    async fn add(&self, ip: Ipv4Addr) -> Result<(), DetectError> {
        self.run(self.add_args(ip)).await
    }

    fn set_name(&self) -> &str {
        &self.set_name
    }
}

/// Handle for queueing addresses to the kernel set worker.
///
/// Cloning is cheap; the worker stops once every handle is dropped or the
/// shutdown token fires, after draining what is already queued.
#[derive(Debug, Clone)]
pub struct KernelSetSync {
    tx: mpsc::Sender<Ipv4Addr>,
}

impl KernelSetSync {
    /// Start the sync worker for `set` with room for `capacity` pending addresses.
    pub fn spawn<S: AddressSet>(
        set: S,
        capacity: usize,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(sync_loop(Arc::new(set), rx, shutdown));
        (Self { tx }, handle)
    }

    /// Queue `ip` for addition without waiting.
    ///
    /// Fails if the queue is full or the worker is gone. The caller's registry
    /// state is unaffected either way.
    pub fn add(&self, ip: Ipv4Addr) -> Result<(), DetectError> {
        self.tx.try_send(ip).map_err(|e| match e {
            mpsc::error::TrySendError::Full(ip) => {
                metrics::record_sync(SyncResult::Dropped);
                DetectError::SyncQueueFull(ip)
            }
            mpsc::error::TrySendError::Closed(_) => DetectError::SyncClosed,
        })
    }
}

async fn sync_loop<S: AddressSet>(
    set: Arc<S>,
    mut rx: mpsc::Receiver<Ipv4Addr>,
    shutdown: CancellationToken,
) {
    debug!(set = set.set_name(), "kernel set sync worker started");

    loop {
        tokio::select! {
            biased;
            next = rx.recv() => match next {
                Some(ip) => apply(set.as_ref(), ip).await,
                None => break,
            },
            _ = shutdown.cancelled() => {
                rx.close();
                while let Some(ip) = rx.recv().await {
                    apply(set.as_ref(), ip).await;
                }
                break;
            }
        }
    }

    debug!(set = set.set_name(), "kernel set sync worker stopped");
}

async fn apply<S: AddressSet>(set: &S, ip: Ipv4Addr) {
    let timer = Timer::start();
    match set.add(ip).await {
        Ok(()) => {
            debug!(set = set.set_name(), %ip, "added address to kernel set");
            metrics::record_sync(SyncResult::Success);
        }
        Err(e) => {
            warn!(set = set.set_name(), %ip, error = %e, "failed to add address to kernel set");
            metrics::record_sync(SyncResult::Failure);
        }
    }
    metrics::record_sync_duration(timer.elapsed());
}
