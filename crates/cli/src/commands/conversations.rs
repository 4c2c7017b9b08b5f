//! `oi --list`, `--show`, `--show-last` and `--delete`.

use chrono::Local;
use oi_cache::{ConversationSummary, FileCache};
use oi_core::{CacheError, Role};

use super::CliResult;

pub async fn list(cache: &FileCache) -> CliResult {
    let conversations = cache.list().await.map_err(oi_core::Error::from)?;
    if conversations.is_empty() {
        eprintln!("  No saved conversations.");
        return Ok(());
    }
    for summary in conversations {
        println!("{}", summary_line(&summary));
    }
    Ok(())
}

fn summary_line(summary: &ConversationSummary) -> String {
    let title = if summary.title.is_empty() { "(untitled)" } else { &summary.title };
    format!(
        "{}  {}  {}/{}  {} messages  {}",
        summary.id.short(),
        title,
        summary.api,
        summary.model,
        summary.messages,
        summary.updated_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
    )
}

/// Print a conversation; `None` picks the most recent one.
pub async fn show(cache: &FileCache, reference: Option<&str>) -> CliResult {
    let summary = match reference {
        Some(reference) => cache.find(reference).await,
        None => cache.latest().await.and_then(|latest| {
            latest.ok_or_else(|| CacheError::NotFound("no saved conversations".into()))
        }),
    }
    .map_err(oi_core::Error::from)?;

    let record = cache.load(summary.id.as_str()).await.map_err(oi_core::Error::from)?;
    for message in record.messages.iter().filter(|m| m.role != Role::System) {
        match message.role {
            Role::User => println!("> {}\n", message.content.trim_end().replace('\n', "\n> ")),
            Role::Tool => println!("[tool output]\n{}\n", message.content.trim_end()),
            _ => println!("{}\n", message.content.trim_end()),
        }
    }
    Ok(())
}

pub async fn delete(cache: &FileCache, references: &[String]) -> CliResult {
    for reference in references {
        let summary = cache.find(reference).await.map_err(oi_core::Error::from)?;
        if cache.delete(summary.id.as_str()).await.map_err(oi_core::Error::from)? {
            eprintln!("  Deleted {} {}", summary.id.short(), summary.title);
        }
    }
    Ok(())
}
