mod checkpoint_commands;
mod export_commands;
mod relay_commands;

use std::path::PathBuf;

use {
    albumrelay_config::RelayConfig,
    clap::{Parser, Subcommand},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "albumrelay", about = "albumrelay: channel image albums to a Discord webhook")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of ./albumrelay.{toml,yaml,json}).
    #[arg(long, global = true, env = "ALBUMRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory for the checkpoint, scratch files and group records.
    #[arg(long, global = true, env = "RELAY_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk a channel's history and relay every image (pull mode).
    Export(export_commands::ExportArgs),
    /// Run the Telegram webhook host (push mode).
    Serve {
        /// Address to bind to (overrides config value).
        #[arg(long)]
        bind: Option<String>,
        /// Port to listen on (overrides config value).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Flush push-mode groups that went idle, without an inbound event.
    Sweep,
    /// Inspect or move the pull-mode checkpoint.
    Checkpoint {
        #[command(subcommand)]
        action: checkpoint_commands::CheckpointAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Build the immutable configuration value: file, then environment, then flags.
fn load_config(cli: &Cli) -> anyhow::Result<RelayConfig> {
    let mut config = match &cli.config {
        Some(path) => albumrelay_config::load_config(path)?,
        None => albumrelay_config::discover_and_load(),
    };
    albumrelay_config::apply_env_overrides(&mut config);
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = dir.clone();
    }
    Ok(config)
}

/// Cancel `token` on SIGINT or SIGTERM. Work stops at the next safe boundary.
fn spawn_shutdown_listener(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                },
                Err(e) => {
                    warn!(error = %e, "cannot listen for SIGTERM");
                    std::future::pending::<()>().await;
                },
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("interrupt received, stopping at the next safe point"),
            () = terminate => info!("termination requested, stopping at the next safe point"),
        }
        token.cancel();
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "albumrelay starting");

    let config = load_config(&cli)?;
    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    match cli.command {
        Commands::Export(args) => export_commands::handle_export(config, args, cancel).await,
        Commands::Serve { bind, port } => {
            relay_commands::handle_serve(config, bind, port, cancel).await
        },
        Commands::Sweep => relay_commands::handle_sweep(config, cancel).await,
        Commands::Checkpoint { action } => {
            checkpoint_commands::handle_checkpoint(&config, action)
        },
    }
}
