//! oi: pipe text into a chat model from the terminal.
//!
//! ```text
//! git diff | oi "write a commit message for this"
//! oi -C "make it shorter"
//! oi --list
//! ```
//!
//! Output streams to stdout as it arrives; tool activity and errors go to
//! stderr.

use std::process::ExitCode;

use clap::Parser;
use oi_config::AppConfig;
use oi_engine::CancelSet;

mod commands;
mod render;

#[derive(Parser, Debug, Default)]
#[command(
    name = "oi",
    about = "oi: pipe text into a chat model, with tools and saved conversations",
    version
)]
pub struct Cli {
    /// Prompt text, placed before any piped input
    pub prefix: Vec<String>,

    /// Model name or alias
    #[arg(short, long)]
    pub model: Option<String>,

    /// Only look the model up in this API
    #[arg(short, long)]
    pub api: Option<String>,

    /// Ask for formatted output (see --format-as)
    #[arg(short, long)]
    pub format: bool,

    /// Output format requested with --format
    #[arg(long, value_name = "FORMAT")]
    pub format_as: Option<String>,

    /// Role preamble for a new conversation
    #[arg(short = 'R', long)]
    pub role: Option<String>,

    /// List configured roles
    #[arg(long)]
    pub list_roles: bool,

    #[arg(long)]
    pub max_tokens: Option<i64>,

    /// Sampling temperature; negative leaves it to the backend
    #[arg(long, allow_negative_numbers = true)]
    pub temp: Option<f32>,

    #[arg(long, allow_negative_numbers = true)]
    pub topp: Option<f32>,

    #[arg(long, allow_negative_numbers = true)]
    pub topk: Option<i64>,

    /// Stop sequence; may be repeated
    #[arg(long = "stop", value_name = "TEXT")]
    pub stop: Vec<String>,

    /// Do not truncate long input
    #[arg(long)]
    pub no_limit: bool,

    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Neither read nor save conversations
    #[arg(long)]
    pub no_cache: bool,

    /// Continue a conversation by id, id prefix or title. An unknown title
    /// starts a new conversation with that title.
    #[arg(short = 'c', long = "continue", value_name = "ID|TITLE")]
    pub continue_from: Option<String>,

    /// Continue the most recent conversation
    #[arg(short = 'C', long)]
    pub continue_last: bool,

    /// Title for the saved conversation
    #[arg(short, long)]
    pub title: Option<String>,

    /// List saved conversations
    #[arg(short, long)]
    pub list: bool,

    /// Print a saved conversation
    #[arg(short, long, value_name = "ID|TITLE")]
    pub show: Option<String>,

    /// Print the most recent conversation
    #[arg(short = 'S', long)]
    pub show_last: bool,

    /// Delete saved conversations
    #[arg(short, long, value_name = "ID|TITLE")]
    pub delete: Vec<String>,

    /// Echo the first N lines of piped input before the response
    #[arg(short = 'P', long = "prompt", value_name = "N")]
    pub include_prompt: Option<usize>,

    /// Echo the prompt text before the response
    #[arg(short = 'p', long = "prompt-args")]
    pub include_prompt_args: bool,

    /// Hide tool activity
    #[arg(short, long)]
    pub quiet: bool,

    /// List configured tools
    #[arg(long)]
    pub list_tools: bool,

    /// Print the settings file path
    #[arg(long)]
    pub settings: bool,

    /// Print the configuration and cache directories
    #[arg(long)]
    pub dirs: bool,

    /// Replace the settings file with the defaults, keeping a backup
    #[arg(long)]
    pub reset_settings: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Flags win over the config file and the environment.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(model) = &self.model {
            config.default_model = model.clone();
        }
        if let Some(api) = &self.api {
            config.default_api = api.clone();
        }
        if self.format {
            config.format = true;
        }
        if let Some(format_as) = &self.format_as {
            config.format_as = format_as.clone();
        }
        if let Some(role) = &self.role {
            config.role = Some(role.clone());
        }
        if let Some(n) = self.max_tokens {
            config.max_tokens = n;
        }
        if let Some(t) = self.temp {
            config.temp = t;
        }
        if let Some(p) = self.topp {
            config.topp = p;
        }
        if let Some(k) = self.topk {
            config.topk = k;
        }
        if !self.stop.is_empty() {
            config.stop = self.stop.clone();
        }
        if let Some(n) = self.max_retries {
            config.max_retries = n;
        }
        if let Some(n) = self.include_prompt {
            config.include_prompt = n;
        }
        config.no_limit |= self.no_limit;
        config.no_cache |= self.no_cache;
        config.quiet |= self.quiet;
        config.include_prompt_args |= self.include_prompt_args;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancelSet::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel_all();
        }
    });

    match commands::run(cli, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(e.as_ref()),
    }
}

fn report(error: &(dyn std::error::Error + 'static)) -> ExitCode {
    match error.downcast_ref::<oi_core::Error>() {
        Some(oi_core::Error::Cancelled) => ExitCode::from(130),
        Some(e) => {
            eprintln!();
            eprintln!("  {}", e.reason());
            eprintln!();
            eprintln!("  {e}");
            eprintln!();
            ExitCode::FAILURE
        }
        None => {
            eprintln!();
            eprintln!("  {error}");
            eprintln!();
            ExitCode::FAILURE
        }
    }
}
