use anyhow::Result;
use clap::{Parser, Subcommand};
use logwarden::config::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "logwarden",
    about = "Streaming log anomaly detection with remediation enrichment",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (detection pipeline + status API)
    Serve {
        /// NDJSON log source: a file path, or '-' for stdin
        #[arg(long, default_value = "-")]
        input: String,

        /// Bind address for the status API (overrides config)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Replay a log file once and print the resulting alerts as JSON lines
    Process {
        /// NDJSON log file
        input: String,
    },

    /// Validate the configuration and exit
    CheckConfig,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(p) => Ok(Config::load(p)?),
        None => {
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Serve { input, bind } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            tracing::info!(%input, bind = %config.bind, "starting logwarden daemon");
            logwarden::serve(config, &input).await?;
        }
        Commands::Process { input } => {
            tracing::info!(%input, "replaying log file");
            let alerts = logwarden::process_file(config, &input).await?;
            for alert in &alerts {
                println!("{}", serde_json::to_string(alert)?);
            }
            tracing::info!(alerts = alerts.len(), "replay complete");
        }
        Commands::CheckConfig => {
            println!("configuration OK");
        }
    }

    Ok(())
}
