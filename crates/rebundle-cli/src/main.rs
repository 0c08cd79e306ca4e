//! rebundle CLI - Incremental build cache for derived artifacts.

mod build;
mod clean;
mod colors;
mod status;
mod watch;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rebundle")]
#[command(about = "Incremental build cache for derived artifacts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to rebundle.toml or its directory
    #[arg(short, long, global = true, default_value = ".")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one build pass and persist the cache
    Build {
        /// Print the pass report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rebuild on every input change
    Watch {
        /// Use the polling watcher regardless of configuration
        #[arg(long)]
        poll: bool,
    },

    /// Show the cache state of every artifact
    Status {
        /// Print the states as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove all persisted cache and fingerprint state
    Clean,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Helper to format rebundle-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(core_err) = err.downcast_ref::<rebundle_core::Error>() {
            anyhow::anyhow!("{}", core_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::Build { json } => build::execute(&cli.config, json).map_err(format_error)?,

        Commands::Watch { poll } => {
            watch::execute(&cli.config, poll).await.map_err(format_error)?;
        }

        Commands::Status { json } => status::execute(&cli.config, json).map_err(format_error)?,

        Commands::Clean => clean::execute(&cli.config).map_err(format_error)?,
    }

    Ok(())
}
