//! arbiter - deterministic decision control plane.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "arbiter")]
#[command(version, about = "Deterministic decision control plane", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP service
    Serve {
        /// Path to the YAML configuration file
        #[arg(long, default_value = "./config/example-config.yaml")]
        config: PathBuf,
    },
    /// Verify the audit hash chain (and mirror parity, when given)
    AuditVerify {
        /// Path to the audit JSONL file
        #[arg(long, default_value = "./arbiter-audit.jsonl")]
        path: PathBuf,
        /// Path to the immutable mirror JSONL file
        #[arg(long)]
        mirror_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Commands::Serve { config } => {
            let config_path = config.to_string_lossy().to_string();
            let cfg = arbiter_config::load_and_validate(&config_path)
                .with_context(|| format!("failed to load config {config_path}"))?;
            arbiter_server::serve(cfg).await.context("server exited")?;
        }
        Commands::AuditVerify { path, mirror_path } => {
            let mirror = mirror_path.as_ref().map(|p| p.to_string_lossy().to_string());
            let message = arbiter_server::verify_audit_chain_with_mirror(
                &path.to_string_lossy(),
                mirror.as_deref(),
            )
            .map_err(|err| anyhow::anyhow!("audit verification failed: {err}"))?;
            println!("{message}");
        }
    }
    Ok(())
}
