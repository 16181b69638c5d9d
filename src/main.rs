use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use tollgate::{ConfigLoader, Error, Router};

#[derive(Parser)]
#[command(name = "tollgate", version, about = "HTTP API service with token-bucket admission control")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true, env = "TOLLGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server
    Serve {
        /// Address to bind, overrides config and environment
        #[arg(long)]
        host: Option<String>,
        /// Port to bind, overrides config and environment
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> tollgate::Result<()> {
    let cli = Cli::parse();
    let loader = ConfigLoader::default();

    match cli.command {
        Command::Serve { host, port } => {
            let config = loader.load(cli.config.as_deref(), host.as_deref(), port)?;
            tollgate::logging::init(&config)?;
            info!(
                service = %config.app.name,
                env = %config.app.env,
                rate_limit = config.rate_limit.enabled,
                "Starting"
            );

            let mut router = Router::new();
            tollgate::routes::register(&mut router);

            tollgate::server::run(config, router.into_handle(), wait_for_shutdown()).await
        }
        Command::Config => {
            let config = loader.load(cli.config.as_deref(), None, None)?;
            let rendered = toml::to_string_pretty(&config)
                .map_err(|e| Error::Internal(format!("Failed to render config: {e}")))?;
            print!("{rendered}");
            Ok(())
        }
    }
}

/// Wait for Ctrl+C or SIGTERM.
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
