//! Tools the model can call, declared in the `[tools]` config table.
//!
//! Each entry becomes a [`CommandTool`]: a local program that receives the
//! call's JSON arguments on stdin and answers on stdout.

pub mod command;

use std::collections::BTreeMap;
use std::time::Duration;

use oi_config::ToolConfig;
use oi_core::tool::ToolRegistry;

pub use command::CommandTool;

/// Build a registry from the configured tools.
pub fn registry_from_config(tools: &BTreeMap<String, ToolConfig>, default_timeout: Duration) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for (name, config) in tools {
        let timeout = config
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(default_timeout);
        registry.register(Box::new(CommandTool::from_config(name, config).with_timeout(timeout)));
    }
    registry
}
