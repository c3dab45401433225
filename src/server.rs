//! DNS server setup and lifecycle management.

use hickory_server::ServerFuture;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api;
use crate::config::DetectConfig;
use crate::directory::AppDirectory;
use crate::error::DetectError;
use crate::forwarder::ForwardingHandler;
use crate::handler::QueryHandler;
use crate::ipset::{IpsetCommand, KernelSetSync};
use crate::registry::DetectedRegistry;

/// Interval for emitting registry metrics.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Periodically emit registry metrics.
async fn metrics_loop(registry: DetectedRegistry, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                registry.emit_metrics();
                debug!(detected_ips = registry.len(), "emitted registry metrics");
            }
            _ = shutdown.cancelled() => {
                debug!("metrics loop shutting down");
                return;
            }
        }
    }
}

/// Wait until `shutdown` fires or the listeners stop on their own, then cancel `tasks`.
async fn serve_until<F, E>(serving: F, shutdown: &CancellationToken, tasks: &CancellationToken)
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    tokio::select! {
        _ = shutdown.cancelled() => {
            info!("DNS server shutdown requested");
        }
        result = serving => {
            match result {
                Ok(()) => warn!("DNS listeners stopped unexpectedly"),
                Err(e) => error!("DNS server error: {}", e),
            }
        }
    }
    tasks.cancel();
}

/// Forwarding DNS server that identifies applications in the replies it relays.
pub struct DnsServer {
    config: DetectConfig,
    directory: Arc<AppDirectory>,
    registry: DetectedRegistry,
}

impl DnsServer {
    /// Create a new server for a loaded application directory.
    pub fn new(config: DetectConfig, directory: AppDirectory) -> Self {
        Self {
            config,
            directory: Arc::new(directory),
            registry: DetectedRegistry::new(),
        }
    }

    /// Get a reference to the detection registry.
    pub fn registry(&self) -> &DetectedRegistry {
        &self.registry
    }

    /// Run the DNS server until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), DetectError> {
        self.config.validate()?;

        info!(
            listen_addr = %self.config.listen_addr,
            upstream_addr = %self.config.upstream_addr,
            apps = self.directory.len(),
            set = %self.config.ipset.set_name,
            "Starting app-ident-dns server"
        );

        let ipset = IpsetCommand::new(&self.config.ipset);
        if self.config.ipset.create_set {
            if let Err(e) = ipset.ensure_set().await {
                warn!(error = %e, "could not create kernel address set");
            }
        }

        // Sync worker gets its own token so it can drain after the listeners stop.
        let sync_shutdown = CancellationToken::new();
        let (sync, sync_handle) =
            KernelSetSync::spawn(ipset, self.config.ipset.queue_capacity, sync_shutdown.clone());

        // Background tasks stop with the caller's token or when the listeners fail.
        let tasks = shutdown.child_token();

        let handler = QueryHandler::new(self.directory.clone(), self.registry.clone(), sync)
            .with_sync_every_match(self.config.ipset.sync_every_match);

        let api_handle = if self.config.http.enabled {
            let addr = self.config.http.listen_addr;
            let api_handler = handler.clone();
            let api_shutdown = tasks.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = api::serve(addr, api_handler, api_shutdown).await {
                    error!("Snapshot endpoint error: {}", e);
                }
            }))
        } else {
            None
        };

        let forwarder = ForwardingHandler::new(
            self.config.upstream_addr,
            Duration::from_millis(self.config.upstream_timeout_ms),
            handler,
        );
        let mut server = ServerFuture::new(forwarder);

        // Bind UDP
        let udp_socket = UdpSocket::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS UDP listening");
        server.register_socket(udp_socket);

        // Bind TCP
        let tcp_listener = TcpListener::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS TCP listening");
        server.register_listener(
            tcp_listener,
            Duration::from_secs(self.config.tcp_timeout_secs),
        );

        info!(
            upstream_addr = %self.config.upstream_addr,
            "DNS server ready to forward queries"
        );

        // Start metrics loop
        let metrics_registry = self.registry.clone();
        let metrics_shutdown = tasks.clone();
        let metrics_handle = tokio::spawn(async move {
            metrics_loop(metrics_registry, metrics_shutdown).await;
        });

        serve_until(server.block_until_done(), &shutdown, &tasks).await;
        drop(server);

        let _ = metrics_handle.await;

        if let Some(handle) = api_handle {
            let _ = handle.await;
        }

        // Let queued kernel set adds finish before exiting.
        info!("Waiting for kernel set sync to drain...");
        sync_shutdown.cancel();
        let _ = sync_handle.await;

        info!(detected_ips = self.registry.len(), "DNS server stopped");
        Ok(())
    }
}
