//! thumbforge: event-triggered thumbnail and notification service.
//!
//! Serves the HTTP event surface by default.  `thumbforge thumbnail` runs a
//! single thumbnail pipeline invocation and exits non-zero on failure.
//! SIGTERM/SIGINT stop accepting connections and let in-flight events finish
//! within the configured timeout.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use thumbforge::config::{Config, LoggingConfig};
use thumbforge::pipeline::thumbnail::{FinalizedObject, Outcome};

/// Command-line arguments for thumbforge.
#[derive(Parser, Debug)]
#[command(
    name = "thumbforge",
    version,
    about = "Event-triggered thumbnail generation and follow notifications"
)]
struct Cli {
    /// Path to the YAML configuration file. Defaults apply when absent.
    #[arg(short, long, default_value = "thumbforge.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the thumbnail pipeline once for a single object.
    Thumbnail {
        /// Bucket holding the object.
        #[arg(long)]
        bucket: String,
        /// Object path within the bucket.
        #[arg(long)]
        path: String,
        /// Content type of the object.
        #[arg(long)]
        content_type: Option<String>,
    },
}

/// Initialize tracing; `RUST_LOG` overrides `logging.level`.
fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load(path: &str) -> anyhow::Result<Config> {
    if std::path::Path::new(path).exists() {
        thumbforge::config::load_config(path)
    } else {
        Ok(Config::default())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load(&cli.config)?;
    init_logging(&config.logging);
    info!("Configuration loaded from {}", cli.config);

    if config.observability.metrics {
        thumbforge::metrics::init_metrics();
        thumbforge::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    match cli.command {
        Some(Command::Thumbnail {
            bucket,
            path,
            content_type,
        }) => run_once(config, bucket, path, content_type).await,
        None => serve(config, cli.bind).await,
    }
}

async fn run_once(
    config: Config,
    bucket: String,
    path: String,
    content_type: Option<String>,
) -> anyhow::Result<()> {
    let state = thumbforge::bootstrap::build_state(config)?;
    let object = FinalizedObject {
        bucket,
        path,
        content_type,
    };
    match state.pipeline.run(&object).await {
        Ok(Outcome::Skipped(reason)) => {
            info!(?reason, "nothing to do");
            Ok(())
        }
        Ok(Outcome::Recorded {
            thumbnail_path,
            record,
            ..
        }) => {
            info!(thumbnail = %thumbnail_path, "thumbnail recorded");
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Err(e) => {
            error!(stage = e.stage(), "{e}");
            Err(e.into())
        }
    }
}

async fn serve(config: Config, bind: Option<String>) -> anyhow::Result<()> {
    let bind_addr =
        bind.unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);

    let state = Arc::new(thumbforge::bootstrap::build_state(config)?);
    let app = thumbforge::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("thumbforge listening on {}", bind_addr);

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .into_future();
    tokio::pin!(server);

    // Once a signal arrives, in-flight events get `shutdown_timeout` to drain.
    tokio::select! {
        result = &mut server => result?,
        _ = async {
            shutdown_signal().await;
            tokio::time::sleep(shutdown_timeout).await;
        } => {
            warn!("Shutdown timeout elapsed with requests still in flight");
        }
    }

    info!("thumbforge shut down");
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        },
    }
}
