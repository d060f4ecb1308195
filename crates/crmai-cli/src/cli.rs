//! CLI argument definitions for crmai.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run` | Execute one capability request immediately |
//! | `dispatch` | Invoke a named operation through the dispatch registry |
//! | `queue` | Submit a batch of requests and drain them through the scheduler |
//! | `operations` | List registered operations |
//! | `providers` | Show provider state |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--format` | `json` | Output format (json, table) |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--mock` | `false` | Use deterministic offline providers |
//! | `--strategy` | env or `direct-first` | Provider class preference |
//! | `--log-json` | `false` | Emit logs on stderr as JSON |
//!
//! # Examples
//!
//! ```bash
//! crmai --mock run scoring --payload '{"name":"Jane"}' --subject-id abc
//! crmai --mock dispatch enrich-contact-profile --params '{"payload":{"name":"Jane"}}' --subject-id abc
//! crmai --mock queue requests.json --pretty
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use crmai_core::FallbackStrategy;

#[derive(Debug, Parser)]
#[command(
    name = "crmai",
    author,
    version,
    about = "AI request orchestration for the crmai CRM",
    long_about = "crmai routes typed AI capability requests (scoring, enrichment, email \
generation, ...) to direct model APIs or a server-side functions proxy, with caching, \
retries, timeouts and a single-level fallback.\n\
\n\
Use 'crmai <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Output format for results.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Use deterministic offline providers instead of real credentials.
    #[arg(long, global = true, default_value_t = false)]
    pub mock: bool,

    /// Provider class preference. Overrides CRMAI_FALLBACK_STRATEGY.
    #[arg(long, global = true, value_enum)]
    pub strategy: Option<StrategySelector>,

    /// Emit logs on stderr as JSON lines. Filter with CRMAI_LOG.
    #[arg(long, global = true, default_value_t = false)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Single JSON object output.
    Json,
    /// Plain text for terminal display.
    Table,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategySelector {
    /// Prefer direct model APIs; use the proxy only when none is eligible.
    DirectFirst,
    /// Prefer the functions proxy.
    ProxiedFirst,
    /// Score every eligible provider regardless of class.
    Optimal,
}

impl From<StrategySelector> for FallbackStrategy {
    fn from(value: StrategySelector) -> Self {
        match value {
            StrategySelector::DirectFirst => Self::DirectFirst,
            StrategySelector::ProxiedFirst => Self::ProxiedFirst,
            StrategySelector::Optimal => Self::Optimal,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute one capability request immediately, bypassing the queue.
    ///
    /// # Examples
    ///
    ///   crmai run scoring --payload '{"name":"Jane"}'
    ///   crmai run email-generation --payload '{"purpose":"intro"}' --provider openai
    Run(RunArgs),

    /// Invoke a named operation. Failures are answered by the operation's fallback.
    ///
    /// # Examples
    ///
    ///   crmai dispatch score-contact --subject-id abc
    ///   crmai dispatch analyze-email --params '{"payload":{"content":"Need this ASAP"}}'
    Dispatch(DispatchArgs),

    /// Submit a JSON array of requests and drain them in priority order.
    Queue(QueueArgs),

    /// List registered operations.
    Operations,

    /// Show provider kind, availability, budget and performance estimates.
    Providers,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Capability type (e.g. scoring, enrichment, email-generation).
    pub capability: String,

    /// Request payload as a JSON object.
    #[arg(long, default_value = "{}")]
    pub payload: String,

    /// low, medium, high or urgent.
    #[arg(long, default_value = "medium")]
    pub priority: String,

    /// Force a provider by name, or "auto".
    #[arg(long)]
    pub provider: Option<String>,

    /// Skip the response cache for this request.
    #[arg(long, default_value_t = false)]
    pub no_cache: bool,

    /// Per-attempt timeout in milliseconds.
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Subject (contact, deal) the request is about.
    #[arg(long)]
    pub subject_id: Option<String>,
}

#[derive(Debug, Args)]
pub struct DispatchArgs {
    /// Operation name (see `crmai operations`).
    pub operation: String,

    /// Operation parameters as a JSON object.
    #[arg(long, default_value = "{}")]
    pub params: String,

    #[arg(long)]
    pub subject_id: Option<String>,

    #[arg(long, default_value = "cli")]
    pub user_id: String,

    #[arg(long, default_value = "cli")]
    pub session_id: String,
}

#[derive(Debug, Args)]
pub struct QueueArgs {
    /// JSON file holding an array of requests.
    pub file: PathBuf,

    /// Give up waiting for completions after this many milliseconds.
    #[arg(long, default_value_t = 120_000)]
    pub wait_ms: u64,
}
