//! `oi --settings`, `--reset-settings`, `--dirs`, `--list-tools`, `--list-roles`.

use std::time::Duration;

use oi_config::AppConfig;
use oi_core::ToolInvoker;

use super::CliResult;

pub fn path() -> CliResult {
    println!("{}", AppConfig::config_path().display());
    Ok(())
}

pub fn reset() -> CliResult {
    let path = AppConfig::config_path();
    let backup = AppConfig::write_default(&path).map_err(oi_core::Error::from)?;
    if let Some(backup) = backup {
        eprintln!("  Previous settings saved to {}", backup.display());
    }
    eprintln!("  Wrote default settings to {}", path.display());
    Ok(())
}

pub fn dirs(config: &AppConfig) -> CliResult {
    println!("Configuration: {}", AppConfig::config_dir().display());
    println!("Cache:         {}", config.cache_dir().display());
    Ok(())
}

pub fn list_tools(config: &AppConfig) -> CliResult {
    let registry = oi_tools::registry_from_config(
        &config.tools,
        Duration::from_secs(config.tool_timeout_secs),
    );
    if registry.is_empty() {
        eprintln!("  No tools configured. Add a [tools.<name>] table to {}", AppConfig::config_path().display());
        return Ok(());
    }
    for tool in registry.definitions() {
        println!("{}\t{}", tool.name, tool.description);
    }
    Ok(())
}

pub fn list_roles(config: &AppConfig) -> CliResult {
    for (name, messages) in &config.roles {
        let marker = if config.role.as_deref() == Some(name.as_str()) { " (default)" } else { "" };
        println!("{name}{marker}\t{} message(s)", messages.len());
    }
    Ok(())
}
