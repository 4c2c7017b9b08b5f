//! Command dispatch. Exactly one action runs per invocation; a turn is the
//! default when no listing or settings flag is given.

pub mod chat;
pub mod conversations;
pub mod settings;

use oi_cache::FileCache;
use oi_config::AppConfig;
use oi_engine::CancelSet;

use crate::Cli;

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

pub async fn run(cli: Cli, cancel: CancelSet) -> CliResult {
    if cli.settings {
        return settings::path();
    }
    if cli.reset_settings {
        return settings::reset();
    }

    let mut config = AppConfig::load().map_err(oi_core::Error::from)?;
    cli.apply(&mut config);
    config.validate().map_err(oi_core::Error::from)?;

    if cli.dirs {
        return settings::dirs(&config);
    }
    if cli.list_tools {
        return settings::list_tools(&config);
    }
    if cli.list_roles {
        return settings::list_roles(&config);
    }

    let cache = FileCache::new(config.cache_dir());
    if cli.list {
        return conversations::list(&cache).await;
    }
    if !cli.delete.is_empty() {
        return conversations::delete(&cache, &cli.delete).await;
    }
    if let Some(reference) = &cli.show {
        return conversations::show(&cache, Some(reference.as_str())).await;
    }
    if cli.show_last {
        return conversations::show(&cache, None).await;
    }

    chat::run(&cli, &config, cache, cancel).await
}
