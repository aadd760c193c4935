//! Posuer CLI: serve the merged MCP namespace over stdio.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use posuer::Interposer;
use posuer_config::ConfigWatcher;
use rmcp::transport::io::stdio;
use rmcp::ServiceExt;
use tokio::signal;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default name advertised to the upstream client and to backends.
const SERVER_NAME: &str = "Posuer";

#[derive(Parser, Debug)]
#[command(name = "posuer", version)]
#[command(about = "MCP interposer that aggregates many MCP servers into one session")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", env = "POSUER_CONFIG")]
    config: Option<PathBuf>,

    /// Watch the config file and reconfigure on changes.
    #[arg(short = 'w', long = "watch", env = "POSUER_WATCH")]
    watch: bool,

    /// Debounce interval for config file events, in milliseconds.
    #[arg(long = "debounce-ms", env = "POSUER_DEBOUNCE_MS", default_value_t = 500)]
    debounce_ms: u64,

    /// Log level. Supports tracing filter syntax.
    #[arg(short = 'l', long = "log-level", env = "POSUER_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    tracing::info!("Starting {SERVER_NAME} MCP interposer v{VERSION}");

    let configs = posuer_config::load(cli.config.as_deref())?;
    tracing::info!("Loaded {} server(s) from config", configs.len());

    let interposer = Arc::new(Interposer::new(SERVER_NAME, VERSION));

    // Connect to all configured backends; unreachable backends are logged
    // and skipped so the upstream session still comes up.
    for config in &configs {
        tracing::info!(backend = %config.name, "connecting to backend");

        if let Err(error) = interposer.add_backend(&config.name, config).await {
            tracing::warn!(backend = %config.name, %error, "failed to connect to backend");
        }
    }

    if cli.watch {
        spawn_watcher(&cli, Arc::clone(&interposer));
    }

    tracing::info!("serving MCP over stdio");

    let service = interposer.server().serve(stdio()).await?;
    interposer.surface().attach_peer(service.peer().clone());

    let ct = service.cancellation_token();
    tokio::select! {
        result = service.waiting() => {
            if let Err(error) = result {
                tracing::warn!(%error, "upstream session ended with error");
            } else {
                tracing::info!("upstream session ended");
            }
        }
        () = shutdown_signal() => {
            tracing::info!("received shutdown signal");
            ct.cancel();
        }
    }

    interposer.close().await;
    tracing::info!("shut down gracefully");

    Ok(())
}

fn spawn_watcher(cli: &Cli, interposer: Arc<Interposer>) {
    let Some(path) = cli.config.clone() else {
        tracing::warn!("--watch requires --config; not watching");
        return;
    };

    let debounce = Duration::from_millis(cli.debounce_ms);
    let mut watcher = match ConfigWatcher::with_debounce(&path, debounce) {
        Ok(watcher) => watcher,
        Err(error) => {
            tracing::warn!(%error, "failed to start config watcher");
            return;
        }
    };

    tracing::info!(path = %path.display(), "watching config file for changes");

    tokio::spawn(async move {
        while let Some(configs) = watcher.recv().await {
            tracing::info!(backends = configs.len(), "config changed, reconfiguring");

            if let Err(error) = interposer.reconfigure(&configs).await {
                tracing::warn!(%error, "reconfiguration failed");
            }
        }
    });
}

/// Logging goes to stderr; stdout carries the MCP stdio transport.
fn init_logging(log_level: &str) {
    let env_filter =
        EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        _ = terminate => {}
    }
}
