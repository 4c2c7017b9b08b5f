//! Configuration loading, validation, and management for oi.
//!
//! Loads configuration from `$OI_CONFIG` or `~/.config/oi/config.toml` with
//! `OI_*` environment variable overrides. Command-line flags are applied on
//! top by the binary. Validates all settings at startup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use oi_core::SamplingParams;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MARKDOWN_FORMAT_TEXT: &str =
    "Format the response as markdown without enclosing backticks.";
pub const DEFAULT_JSON_FORMAT_TEXT: &str = "Format the response as json without enclosing backticks.";

/// The root configuration structure.
///
/// Maps directly to `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API used when `--api` is not given
    #[serde(default = "default_api")]
    pub default_api: String,

    /// Model used when `--model` is not given
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Ask the model to format its response as `format_as`
    #[serde(default)]
    pub format: bool,

    #[serde(default = "default_format_as")]
    pub format_as: String,

    /// Instruction text per output format
    #[serde(default = "default_format_text")]
    pub format_text: BTreeMap<String, String>,

    /// Maximum tokens per response. Zero or negative leaves it to the backend.
    #[serde(default)]
    pub max_tokens: i64,

    /// Input characters kept before truncation, unless the model sets its own
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,

    /// Negative values leave sampling parameters to the backend.
    #[serde(default = "default_unset_f32")]
    pub temp: f32,

    #[serde(default = "default_unset_f32")]
    pub topp: f32,

    #[serde(default = "default_unset_i64")]
    pub topk: i64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,

    /// Disable input truncation
    #[serde(default)]
    pub no_limit: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<PathBuf>,

    /// Disable reading and writing conversations
    #[serde(default)]
    pub no_cache: bool,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Suppress tool status output
    #[serde(default)]
    pub quiet: bool,

    /// Echo the first N lines of piped input before the response
    #[serde(default)]
    pub include_prompt: usize,

    /// Echo the prompt prefix before the response
    #[serde(default)]
    pub include_prompt_args: bool,

    /// Upper bound for one backend exchange
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Upper bound for one tool call unless the tool sets its own
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Role preamble used for new conversations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Role name → messages. Each message is literal text, `file://path`
    /// or an `http(s)://` URL.
    #[serde(default)]
    pub roles: BTreeMap<String, Vec<String>>,

    #[serde(default = "default_apis")]
    pub apis: BTreeMap<String, ApiConfig>,

    /// Tools exposed to the model, backed by local commands
    #[serde(default)]
    pub tools: BTreeMap<String, ToolConfig>,
}

fn default_api() -> String {
    "ollama".into()
}
fn default_model() -> String {
    "llama3.2".into()
}
fn default_format_as() -> String {
    "markdown".into()
}
fn default_format_text() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("markdown".to_string(), DEFAULT_MARKDOWN_FORMAT_TEXT.to_string()),
        ("json".to_string(), DEFAULT_JSON_FORMAT_TEXT.to_string()),
    ])
}
fn default_max_input_chars() -> usize {
    12_250
}
fn default_unset_f32() -> f32 {
    -1.0
}
fn default_unset_i64() -> i64 {
    -1
}
fn default_max_retries() -> u32 {
    5
}
fn default_request_timeout_secs() -> u64 {
    600
}
fn default_tool_timeout_secs() -> u64 {
    15
}
fn default_apis() -> BTreeMap<String, ApiConfig> {
    BTreeMap::from([
        (
            "ollama".to_string(),
            ApiConfig {
                kind: ApiKind::Ollama,
                base_url: "http://localhost:11434".into(),
                api_key: None,
                api_key_env: None,
                models: BTreeMap::new(),
            },
        ),
        (
            "openai".to_string(),
            ApiConfig {
                kind: ApiKind::OpenAi,
                base_url: "https://api.openai.com/v1".into(),
                api_key: None,
                api_key_env: Some("OPENAI_API_KEY".into()),
                models: BTreeMap::from([
                    (
                        "gpt-4o-mini".to_string(),
                        ModelConfig {
                            aliases: vec!["4o-mini".into()],
                            max_input_chars: Some(392_000),
                        },
                    ),
                    (
                        "gpt-4o".to_string(),
                        ModelConfig {
                            aliases: vec!["4o".into()],
                            max_input_chars: Some(392_000),
                        },
                    ),
                ]),
            },
        ),
    ])
}

/// Wire protocol spoken by an API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKind {
    Ollama,
    #[serde(alias = "openai-compat")]
    OpenAi,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_kind")]
    pub kind: ApiKind,

    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Known models. An empty table accepts any model name.
    #[serde(default)]
    pub models: BTreeMap<String, ModelConfig>,
}

fn default_api_kind() -> ApiKind {
    ApiKind::OpenAi
}

impl ApiConfig {
    /// The inline key, else the key from `api_key_env`.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.resolve_api_key_with(|name| std::env::var(name).ok())
    }

    fn resolve_api_key_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| self.api_key_env.as_deref().and_then(&lookup))
            .filter(|k| !k.is_empty())
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("api_key_env", &self.api_key_env)
            .field("models", &self.models)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_input_chars: Option<usize>,
}

/// A local command the model can call.
///
/// The command receives the call's JSON arguments on stdin and its stdout
/// becomes the tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub command: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default)]
    pub description: String,

    /// JSON Schema for the arguments
    #[serde(default = "default_tool_parameters")]
    pub parameters: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_tool_parameters() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// A model resolved against the configured APIs.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub api_name: String,
    pub api: ApiConfig,
    pub model: String,
    pub max_input_chars: usize,
}

impl AppConfig {
    /// Load configuration from the default location and apply `OI_*`
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `OI_*` overrides. `lookup` is `std::env::var` outside of tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let var = |name: &str| lookup(&format!("OI_{name}")).filter(|v| !v.is_empty());

        if let Some(v) = var("API") {
            self.default_api = v;
        }
        if let Some(v) = var("MODEL") {
            self.default_model = v;
        }
        if let Some(v) = var("FORMAT") {
            self.format = parse_env("OI_FORMAT", &v)?;
        }
        if let Some(v) = var("FORMAT_AS") {
            self.format_as = v;
        }
        if let Some(v) = var("MAX_TOKENS") {
            self.max_tokens = parse_env("OI_MAX_TOKENS", &v)?;
        }
        if let Some(v) = var("MAX_INPUT_CHARS") {
            self.max_input_chars = parse_env("OI_MAX_INPUT_CHARS", &v)?;
        }
        if let Some(v) = var("TEMP") {
            self.temp = parse_env("OI_TEMP", &v)?;
        }
        if let Some(v) = var("TOPP") {
            self.topp = parse_env("OI_TOPP", &v)?;
        }
        if let Some(v) = var("TOPK") {
            self.topk = parse_env("OI_TOPK", &v)?;
        }
        if let Some(v) = var("STOP") {
            self.stop = v.split(',').map(str::to_string).collect();
        }
        if let Some(v) = var("NO_LIMIT") {
            self.no_limit = parse_env("OI_NO_LIMIT", &v)?;
        }
        if let Some(v) = var("CACHE_PATH") {
            self.cache_path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("NO_CACHE") {
            self.no_cache = parse_env("OI_NO_CACHE", &v)?;
        }
        if let Some(v) = var("MAX_RETRIES") {
            self.max_retries = parse_env("OI_MAX_RETRIES", &v)?;
        }
        if let Some(v) = var("QUIET") {
            self.quiet = parse_env("OI_QUIET", &v)?;
        }
        if let Some(v) = var("ROLE") {
            self.role = Some(v);
        }
        Ok(())
    }

    /// `$OI_CONFIG`, else `config.toml` in [`AppConfig::config_dir`].
    pub fn config_path() -> PathBuf {
        match std::env::var_os("OI_CONFIG") {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => Self::config_dir().join("config.toml"),
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        xdg_dir("XDG_CONFIG_HOME", ".config").join("oi")
    }

    /// Directory holding cached conversations.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_path
            .clone()
            .unwrap_or_else(|| xdg_dir("XDG_CACHE_HOME", ".cache").join("oi"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.temp > 2.0 {
            return Err(ConfigError::ValidationError(
                "temp must be at most 2.0".into(),
            ));
        }

        if self.topp > 1.0 {
            return Err(ConfigError::ValidationError("topp must be at most 1.0".into()));
        }

        if self.max_input_chars == 0 {
            return Err(ConfigError::ValidationError(
                "max_input_chars must be > 0".into(),
            ));
        }

        if self.format && !self.format_text.contains_key(&self.format_as) {
            return Err(ConfigError::ValidationError(format!(
                "format_as {:?} has no entry in format_text",
                self.format_as
            )));
        }

        for (name, api) in &self.apis {
            if api.base_url.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "api {name:?} has an empty base_url"
                )));
            }
        }

        for (name, tool) in &self.tools {
            if tool.command.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "tool {name:?} has an empty command"
                )));
            }
        }

        Ok(())
    }

    /// Sampling parameters with the "unset" sentinels mapped to `None`.
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: (self.temp >= 0.0).then_some(self.temp),
            top_p: (self.topp >= 0.0).then_some(self.topp),
            top_k: u32::try_from(self.topk).ok(),
            stop: self.stop.clone(),
            max_tokens: u32::try_from(self.max_tokens).ok().filter(|&n| n > 0),
        }
    }

    /// The format instruction for new conversations, when enabled.
    pub fn format_instruction(&self) -> Option<&str> {
        if !self.format {
            return None;
        }
        self.format_text
            .get(&self.format_as)
            .map(String::as_str)
            .filter(|t| !t.is_empty())
    }

    /// Find `model` by name or alias.
    ///
    /// With `api` given only that API is searched. Otherwise the default
    /// API is tried first, then the others in name order. An API with an
    /// empty model table accepts any name.
    pub fn resolve_model(&self, api: Option<&str>, model: &str) -> Result<ResolvedModel, ConfigError> {
        let candidates: Vec<(&String, &ApiConfig)> = match api {
            Some(name) => {
                let (key, cfg) = self.apis.get_key_value(name).ok_or_else(|| ConfigError::UnknownApi {
                    name: name.to_string(),
                    available: self.apis.keys().cloned().collect::<Vec<_>>().join(", "),
                })?;
                vec![(key, cfg)]
            }
            None => {
                let mut ordered: Vec<_> = self
                    .apis
                    .iter()
                    .filter(|(name, _)| **name == self.default_api)
                    .collect();
                ordered.extend(self.apis.iter().filter(|(name, _)| **name != self.default_api));
                ordered
            }
        };

        for (api_name, api_cfg) in &candidates {
            for (name, model_cfg) in &api_cfg.models {
                if name == model || model_cfg.aliases.iter().any(|a| a == model) {
                    return Ok(ResolvedModel {
                        api_name: (*api_name).clone(),
                        api: (*api_cfg).clone(),
                        model: name.clone(),
                        max_input_chars: model_cfg.max_input_chars.unwrap_or(self.max_input_chars),
                    });
                }
            }
        }

        // Fall back to the first API that accepts arbitrary models.
        if let Some((api_name, api_cfg)) = candidates.iter().find(|(_, cfg)| cfg.models.is_empty()) {
            return Ok(ResolvedModel {
                api_name: (*api_name).clone(),
                api: (*api_cfg).clone(),
                model: model.to_string(),
                max_input_chars: self.max_input_chars,
            });
        }

        let available = candidates
            .iter()
            .flat_map(|(_, cfg)| cfg.models.keys().cloned())
            .collect::<Vec<_>>()
            .join(", ");
        Err(ConfigError::UnknownModel {
            model: model.to_string(),
            available,
        })
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }

    /// Write the default configuration to `path`, keeping any existing file
    /// as `<path>.bak`.
    pub fn write_default(path: &Path) -> Result<Option<PathBuf>, ConfigError> {
        let write_err = |e: std::io::Error| ConfigError::WriteError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        let backup = if path.exists() {
            let mut name = path.as_os_str().to_owned();
            name.push(".bak");
            let backup = PathBuf::from(name);
            std::fs::rename(path, &backup).map_err(write_err)?;
            Some(backup)
        } else {
            None
        };

        std::fs::write(path, Self::default_toml()).map_err(write_err)?;
        Ok(backup)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_api: default_api(),
            default_model: default_model(),
            format: false,
            format_as: default_format_as(),
            format_text: default_format_text(),
            max_tokens: 0,
            max_input_chars: default_max_input_chars(),
            temp: default_unset_f32(),
            topp: default_unset_f32(),
            topk: default_unset_i64(),
            stop: Vec::new(),
            no_limit: false,
            cache_path: None,
            no_cache: false,
            max_retries: default_max_retries(),
            quiet: false,
            include_prompt: 0,
            include_prompt_args: false,
            request_timeout_secs: default_request_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            role: None,
            roles: BTreeMap::new(),
            apis: default_apis(),
            tools: BTreeMap::new(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::ValidationError(format!("{name}={value:?}: {e}")))
}

/// `$<var>`, else `$HOME/<fallback>`.
fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    match std::env::var_os(var) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs_home().join(fallback),
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Failed to write config file at {path}: {reason}")]
    WriteError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("API {name:?} is not configured (available: {available})")]
    UnknownApi { name: String, available: String },

    #[error("Model {model:?} is not configured (available: {available})")]
    UnknownModel { model: String, available: String },
}

impl From<ConfigError> for oi_core::Error {
    fn from(err: ConfigError) -> Self {
        oi_core::Error::Config {
            message: err.to_string(),
        }
    }
}
