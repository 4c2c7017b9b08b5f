//! The default command: run one turn with the prompt arguments and any
//! piped input.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use oi_cache::FileCache;
use oi_config::AppConfig;
use oi_core::{CacheError, ConversationId, Error};
use oi_engine::{CancelSet, RenderSink, RetryPolicy, SaveTarget, Session, StreamClient, TurnSetup};
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::CliResult;
use crate::Cli;
use crate::render::TerminalSink;

pub async fn run(cli: &Cli, config: &AppConfig, cache: FileCache, cancel: CancelSet) -> CliResult {
    let prefix = cli.prefix.join(" ");
    let piped = read_piped_input().await?;
    if prefix.trim().is_empty() && piped.trim().is_empty() {
        return Err("no input: pass a prompt or pipe text into oi".into());
    }

    let resolved = config
        .resolve_model(cli.api.as_deref(), &config.default_model)
        .map_err(Error::from)?;
    let backend = oi_providers::backend_for(&resolved)?;
    let client = Arc::new(StreamClient::new(
        backend,
        Duration::from_secs(config.request_timeout_secs),
    ));
    let tools = Arc::new(oi_tools::registry_from_config(
        &config.tools,
        Duration::from_secs(config.tool_timeout_secs),
    ));

    let conversation = pick_conversation(cli, config, &cache, &prefix, &piped).await?;
    debug!(
        id = %conversation.id,
        continued = conversation.read_id.is_some(),
        api = %resolved.api_name,
        model = %resolved.model,
        "Starting turn"
    );

    let mut setup = TurnSetup::from_config(config, &resolved).with_prefix(prefix.clone());
    if let Some(id) = &conversation.read_id {
        setup = setup.with_read_id(id.clone());
    }
    let session = Session::new(client, resolved.model.clone(), tools)
        .with_cache(Arc::new(cache))
        .with_setup(setup)
        .with_retry(RetryPolicy::new(config.max_retries))
        .with_params(config.sampling())
        .with_cancel(cancel)
        .with_save(SaveTarget {
            id: conversation.id.to_string(),
            title: conversation.title,
            api: resolved.api_name.clone(),
            model: resolved.model.clone(),
        });

    let mut sink = TerminalSink::new(config.quiet);
    echo_prompt(&mut sink, config, &prefix, &piped);
    let result = session.run(&piped, &mut sink).await;
    sink.finish();
    result?;
    Ok(())
}

async fn read_piped_input() -> Result<String, Error> {
    if std::io::stdin().is_terminal() {
        return Ok(String::new());
    }
    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .map_err(|e| Error::Internal(format!("failed to read stdin: {e}")))?;
    Ok(input)
}

struct Conversation {
    /// History to continue, if any.
    read_id: Option<String>,
    /// Where the finished turn is saved.
    id: ConversationId,
    title: String,
}

async fn pick_conversation(
    cli: &Cli,
    config: &AppConfig,
    cache: &FileCache,
    prefix: &str,
    piped: &str,
) -> Result<Conversation, Error> {
    let mut fallback_title = None;
    let existing = if config.no_cache {
        None
    } else if cli.continue_last {
        cache.latest().await.map_err(lookup_error)?
    } else if let Some(reference) = &cli.continue_from {
        match cache.find(reference).await {
            Ok(summary) => Some(summary),
            Err(CacheError::NotFound(_)) => {
                fallback_title = Some(reference.clone());
                None
            }
            Err(e) => return Err(lookup_error(e)),
        }
    } else {
        None
    };

    Ok(match existing {
        Some(summary) => Conversation {
            read_id: Some(summary.id.to_string()),
            title: cli.title.clone().unwrap_or(summary.title),
            id: summary.id,
        },
        None => Conversation {
            read_id: None,
            id: ConversationId::new(),
            title: cli
                .title
                .clone()
                .or(fallback_title)
                .unwrap_or_else(|| default_title(prefix, piped)),
        },
    })
}

/// An unreadable stored conversation is a failed history read, never a
/// reason to start over with an empty one.
fn lookup_error(error: CacheError) -> Error {
    match error {
        CacheError::Corrupt { .. } | CacheError::Storage(_) => Error::CacheRead(error),
        other => Error::Cache(other),
    }
}

/// First non-empty line of the prompt, shortened for listings.
fn default_title(prefix: &str, piped: &str) -> String {
    const MAX_TITLE_CHARS: usize = 60;
    prefix
        .lines()
        .chain(piped.lines())
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| oi_engine::truncate_chars(line, MAX_TITLE_CHARS).to_string())
        .unwrap_or_default()
}

fn echo_prompt(sink: &mut TerminalSink, config: &AppConfig, prefix: &str, piped: &str) {
    if config.include_prompt_args && !prefix.is_empty() {
        sink.push(prefix);
        sink.push("\n\n");
    }
    if config.include_prompt > 0 {
        for line in piped.lines().take(config.include_prompt) {
            sink.push(line);
            sink.push("\n");
        }
        sink.push("\n");
    }
}
