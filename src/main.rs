//! # stockie
//!
//! Command-line entry point: run the prediction API or forecast one ticker.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use stockie_forecast::{server, Config, PredictionService};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "stockie")]
#[command(about = "Rolling-window closing price forecasts", long_about = None)]
struct Cli {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP prediction API
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Bind port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Forecast a single ticker and print the result as JSON
    Predict {
        /// Ticker symbol, e.g. AAPL
        ticker: String,

        /// Number of steps to forecast (overrides config)
        #[arg(long)]
        horizon: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file (optional - won't fail if missing)
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stockie=info,stockie_forecast=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
                .parse()
                .with_context(|| {
                    format!(
                        "Invalid listen address {}:{}",
                        config.server.host, config.server.port
                    )
                })?;

            let service = build_service(config).await?;
            server::serve(addr, Arc::new(service)).await
        }
        Commands::Predict { ticker, horizon } => {
            let horizon = horizon.unwrap_or(config.forecast.horizon);
            let service = build_service(config).await?;

            let forecast =
                tokio::task::spawn_blocking(move || service.predict_with_horizon(&ticker, horizon))
                    .await??;

            println!("{}", serde_json::to_string_pretty(&forecast)?);
            Ok(())
        }
    }
}

/// Model download and session setup block, so they run off the async workers.
async fn build_service(config: Config) -> anyhow::Result<PredictionService> {
    tokio::task::spawn_blocking(move || PredictionService::from_config(&config)).await?
}
