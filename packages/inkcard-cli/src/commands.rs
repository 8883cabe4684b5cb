/// Subcommand handlers.
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use inkcard_core::config::CollectionConfig;
use inkcard_core::storage::local::LocalStorage;
use inkcard_core::types::Card;
use inkcard_core::watcher::file_watcher::FileWatcher;
use inkcard_core::watcher::types::CardChangeEvent;
use inkcard_core::{AutosaveEngine, FieldChange, NewCard, WriteOutcome};
use tokio::sync::broadcast::error::RecvError;

use crate::{Command, ImageAction};

const FINGERPRINT_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

pub async fn run(
    engine: &AutosaveEngine,
    storage: &Arc<LocalStorage>,
    config: &CollectionConfig,
    command: Command,
) -> Result<()> {
    match command {
        Command::Init { .. } => Ok(()),
        Command::List { sort, query } => {
            let cards = engine.list_view(sort.unwrap_or(config.sort), &query);
            for card in &cards {
                print_summary(card, config);
            }
            if cards.is_empty() {
                println!("No cards.");
            }
            Ok(())
        }
        Command::Show { id } => {
            let card = engine
                .get_card(&id)
                .with_context(|| format!("no card {}", id))?;
            println!("{}", serde_json::to_string_pretty(&card)?);
            Ok(())
        }
        Command::New { body, floating } => {
            let card = engine
                .create_card(NewCard {
                    body,
                    floating,
                    geometry: None,
                })
                .await?;
            println!("{}", card.id);
            Ok(())
        }
        Command::Body { id, text } => {
            engine.schedule_save(&id, FieldChange::Body(text))?;
            report(&id, engine.flush_save(&id).await?)
        }
        Command::Tags { id, line } => {
            engine.schedule_save(&id, FieldChange::TagsLine(line))?;
            report(&id, engine.flush_save(&id).await?)
        }
        Command::Color { id, hex } => report(&id, engine.set_color(&id, &hex).await?),
        Command::Pin { id } => report(&id, engine.set_pinned(&id, true).await?),
        Command::Unpin { id } => report(&id, engine.set_pinned(&id, false).await?),
        Command::Float { id } => report(&id, engine.set_floating(&id, true, None).await?),
        Command::Dock { id } => report(&id, engine.set_floating(&id, false, None).await?),
        Command::Image { action } => match action {
            ImageAction::Add { id, path } => report(&id, engine.add_image(&id, &path).await?),
            ImageAction::Remove { id, path } => report(&id, engine.remove_image(&id, &path).await?),
        },
        Command::Delete { id } => {
            engine.delete_card(&id).await?;
            println!("Deleted {}", id);
            Ok(())
        }
        Command::Watch => watch(engine, storage).await,
    }
}

fn report(id: &str, outcome: WriteOutcome) -> Result<()> {
    match outcome {
        WriteOutcome::Written => println!("Saved {}", id),
        WriteOutcome::Unchanged => println!("{} unchanged", id),
        WriteOutcome::Superseded => println!("{} superseded by a newer edit", id),
        WriteOutcome::Failed => anyhow::bail!("could not save {}", id),
    }
    Ok(())
}

fn print_summary(card: &Card, config: &CollectionConfig) {
    let content = &card.content;
    let mut marks = String::new();
    if content.is_pinned {
        marks.push_str(" [pinned]");
    }
    if let Some(color) = &content.color {
        marks.push(' ');
        marks.push_str(color);
    }
    println!("{}{}{}", card.id, marks, content.tags_line);
    for line in preview(&content.body, config.preview_lines) {
        println!("    {}", line);
    }
    for line in image_lines(&content.images, config.auto_expand_images) {
        println!("    {}", line);
    }
}

/// Every image path when expanded, otherwise a count.
fn image_lines(images: &[String], expand: bool) -> Vec<String> {
    match images.len() {
        0 => Vec::new(),
        _ if expand => images.iter().map(|path| format!("[image] {}", path)).collect(),
        1 => vec!["1 image".to_string()],
        n => vec![format!("{} images", n)],
    }
}

/// First `lines` non-blank lines of a body.
fn preview(body: &str, lines: usize) -> Vec<&str> {
    body.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .take(lines)
        .collect()
}

async fn watch(engine: &AutosaveEngine, storage: &Arc<LocalStorage>) -> Result<()> {
    let (_watcher, mut events) = FileWatcher::new(storage.root()).context("starting file watcher")?;
    let mut cleanup = tokio::time::interval(FINGERPRINT_CLEANUP_INTERVAL);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    println!("Watching {} (Ctrl-C to stop)", storage.root().display());

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = cleanup.tick() => storage.cleanup_expired_fingerprints(),
            event = events.recv() => match event {
                Ok(event) => apply_change(engine, storage, event).await,
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("[inkcard.cli.watch] Dropped {} change events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

async fn apply_change(engine: &AutosaveEngine, storage: &LocalStorage, event: CardChangeEvent) {
    let id = match event {
        CardChangeEvent::Deleted { id } => {
            engine.forget_card(&id);
            println!("Removed {}", id);
            return;
        }
        CardChangeEvent::Changed { id } | CardChangeEvent::Created { id } => id,
    };
    let path = match storage.path_for_id(&id) {
        Ok(path) => path,
        Err(e) => {
            log::warn!("[inkcard.cli.watch] Ignoring {}: {}", id, e);
            return;
        }
    };
    if storage.check_self_write(&path) {
        log::debug!("[inkcard.cli.watch] Suppressed self-write for {}", id);
        return;
    }
    match engine.reload_card(&id).await {
        Ok(true) => println!("Updated {}", id),
        Ok(false) => {}
        Err(e) => log::warn!("[inkcard.cli.watch] Failed to reload {}: {}", id, e),
    }
}
