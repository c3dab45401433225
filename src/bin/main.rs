//! app-ident-dns binary entry point.

use app_ident_dns::{telemetry, AppDirectory, Config, DnsServer};
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// DNS forwarder that identifies applications and mirrors their IPs into an ipset.
#[derive(Parser, Debug)]
#[command(name = "app-ident-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "app-ident-dns.toml")]
    config: PathBuf,

    /// Application directory (JSON), overriding `detect.directory_path`.
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM.
async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    let _ = tokio::signal::ctrl_c().await;

    info!("shutdown signal received");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let mut config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()))
        .add_source(
            config::Environment::with_prefix("APP_IDENT")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    if let Some(directory) = args.directory {
        config.detect.directory_path = directory;
    }

    // Initialize telemetry
    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        listen_addr = %config.detect.listen_addr,
        upstream_addr = %config.detect.upstream_addr,
        directory = %config.detect.directory_path.display(),
        "Starting app-ident-dns"
    );

    // The directory must load before anything is served.
    let directory = match AppDirectory::load(&config.detect.directory_path) {
        Ok(directory) => directory,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };

    // Setup graceful shutdown
    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let server = DnsServer::new(config.detect, directory);
    if let Err(e) = server.run(shutdown).await {
        error!("DNS server error: {}", e);
        return Err(e.into());
    }

    info!("app-ident-dns shutdown complete");
    Ok(())
}
