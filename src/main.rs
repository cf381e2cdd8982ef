mod cli;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kpack::config::KpackConfig;

#[derive(Parser)]
#[command(name = "kpack", version, about = "Layered knowledge packs for assistants")]
struct Cli {
    /// Config file (defaults to ~/.kpack/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Knowledge pack root, overriding config and KPACK_PACK_PATH
    #[arg(long, global = true)]
    pack: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Assemble the pack and report what loaded
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the contexts the pack declares
    Contexts,
    /// Assemble the pack and serve the HTTP API
    Serve,
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the local embedding model to the configured cache directory
    Download,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => KpackConfig::load_from(path)?,
        None => KpackConfig::load()?,
    };
    if let Some(pack) = &cli.pack {
        config.pack.path = pack.to_string_lossy().into_owned();
    }

    // Log to stderr so stdout stays clean for command output.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Status { json } => cli::status::status(&config, json)?,
        Command::Contexts => cli::contexts::contexts(&config)?,
        Command::Serve => {
            // The orchestrator owns blocking HTTP clients, which must be built and
            // dropped outside the async runtime.
            let orchestrator = kpack::KnowledgeOrchestrator::new(&config)?;
            let state = kpack::server::AppState::new(orchestrator);
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(kpack::server::serve(state.clone(), &config.server))?;
            drop(runtime);
            drop(state);
        }
        Command::Model { action } => match action {
            ModelAction::Download => {
                let runtime = tokio::runtime::Runtime::new()?;
                runtime.block_on(cli::model_download(&config.embedding))?;
            }
        },
    }

    Ok(())
}
