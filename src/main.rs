use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use driftwatch::sim::{self, TrafficMode};

#[derive(Parser)]
#[command(
    name = "driftwatch",
    about = "Statistical drift detection for service telemetry",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + worker pool + retention sweeper)
    Serve {
        /// Bind address
        #[arg(long, default_value = "0.0.0.0:8000")]
        bind: String,

        /// Database file path
        #[arg(long, default_value = "driftwatch.db")]
        db: PathBuf,

        /// Optional YAML config file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Drive a running instance with synthetic traffic
    Simulate {
        /// Base URL of the DriftWatch instance
        #[arg(long, default_value = "http://127.0.0.1:8000")]
        url: String,

        /// Target service identifier
        #[arg(long)]
        service_id: String,

        /// Traffic shape
        #[arg(long, value_enum, default_value_t = TrafficMode::Normal)]
        mode: TrafficMode,

        /// Run length in seconds
        #[arg(long, default_value = "60")]
        duration_seconds: u64,

        /// Samples posted per second
        #[arg(long, default_value = "10")]
        samples_per_second: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind, db, config } => {
            let cfg = driftwatch::config::Config::load(config.as_deref())?;
            tracing::info!(%bind, "Starting DriftWatch daemon");
            driftwatch::serve(&bind, &db, cfg).await?;
        }
        Commands::Simulate {
            url,
            service_id,
            mode,
            duration_seconds,
            samples_per_second,
        } => {
            let report = sim::run(sim::SimOptions {
                url,
                service_id,
                mode,
                duration_seconds,
                samples_per_second,
            })
            .await?;

            println!("\n=== DriftWatch Simulation Report ===");
            println!("Simulation: {}", report.simulation_id);
            println!("Sent:       {}", report.sent);
            println!("Accepted:   {}", report.accepted);
            println!("Rejected:   {}", report.rejected);
            println!("Failed:     {}", report.failed);
            println!("====================================\n");
        }
    }

    Ok(())
}
