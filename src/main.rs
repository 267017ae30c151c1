use anyhow::Result;
use callback_relay::{init_telemetry, serve, shutdown_telemetry, RelayConfig, ShutdownCoordinator};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "callback-relay")]
#[command(about = "Correlates workflow webhook callbacks with polling dashboard clients")]
#[command(long_about = "callback-relay accepts out-of-band result deliveries from an external \
                       workflow engine, keyed by session id, and hands each final result to \
                       exactly one polling client. Run 'callback-relay serve' to start the server.")]
struct Cli {
    /// Configuration file layered over defaults and callback-relay.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook and poll endpoints (default)
    Serve {
        /// Listen address, overrides server.bind_addr
        #[arg(long, help = "Address to listen on, e.g. 127.0.0.1:8080")]
        bind: Option<String>,
    },
    /// Print the effective configuration as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    RelayConfig::load_env_file();
    let mut config = RelayConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve { bind: None }) {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind_addr = bind;
            }
            tokio::runtime::Runtime::new()?.block_on(async { serve_command(config).await })
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

async fn serve_command(config: RelayConfig) -> Result<()> {
    init_telemetry(&config.observability)?;

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let signal_listener = {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if let Err(e) = shutdown.wait_for_signal().await {
                tracing::error!("Signal handling failed: {}", e);
                shutdown.trigger();
            }
        })
    };

    let result = serve(&config, &shutdown).await;

    signal_listener.abort();
    shutdown_telemetry();
    result
}
