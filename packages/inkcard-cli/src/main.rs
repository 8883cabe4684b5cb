/// Inkcard command line: drives the autosave engine over a card folder.
mod commands;
mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use inkcard_core::notice::{Notice, Notifier};
use inkcard_core::query::SortMode;
use inkcard_core::storage::local::LocalStorage;
use inkcard_core::{AutosaveEngine, EngineOptions};

#[derive(Debug, Parser)]
#[command(name = "inkcard", about = "Idea cards stored as Markdown", version)]
struct Cli {
    /// Config file. Defaults to <config dir>/inkcard/config.json.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Enable debug logging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Point the config at a card folder, creating it if needed.
    Init { folder: PathBuf },
    /// List docked cards.
    List {
        #[arg(long)]
        sort: Option<SortMode>,
        /// Keep cards containing every word of the query.
        #[arg(long, default_value = "")]
        query: String,
    },
    /// Print one card as JSON.
    Show { id: String },
    /// Create a card.
    New {
        #[arg(long, default_value = "")]
        body: String,
        #[arg(long)]
        floating: bool,
    },
    /// Replace a card's body.
    Body { id: String, text: String },
    /// Replace a card's tag line.
    Tags { id: String, line: String },
    /// Set a card color (#RRGGBB).
    Color { id: String, hex: String },
    Pin { id: String },
    Unpin { id: String },
    /// Detach a card into a floating panel.
    Float { id: String },
    /// Return a floating card to the list.
    Dock { id: String },
    /// Attach or detach images.
    Image {
        #[command(subcommand)]
        action: ImageAction,
    },
    Delete { id: String },
    /// Follow external changes to the folder until interrupted.
    Watch,
}

#[derive(Debug, Subcommand)]
enum ImageAction {
    Add { id: String, path: String },
    Remove { id: String, path: String },
}

/// Prints notices for the user on stderr.
struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn notify(&self, notice: &Notice) {
        eprintln!("{}", notice);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    if let Command::Init { folder } = &cli.command {
        return config::init(&config_path, folder);
    }

    let config = inkcard_core::config::load_config(&config_path);
    let folder = config
        .folder
        .clone()
        .with_context(|| format!("no card folder configured in {}; run `inkcard init <folder>`", config_path.display()))?;
    let storage = Arc::new(LocalStorage::new(folder));
    let engine = AutosaveEngine::new(storage.clone(), Arc::new(StderrNotifier), EngineOptions::from(&config));
    let count = engine.open().await?;
    log::debug!("[inkcard.cli] Opened {} cards in {}", count, storage.root().display());

    let result = commands::run(&engine, &storage, &config, cli.command).await;
    engine.close().await;
    result
}
