mod dispatch;
mod operations;
mod providers;
mod queue;
mod run;

use std::sync::Arc;

use crmai_core::request::generate_request_id;
use crmai_core::{Orchestrator, OrchestratorConfig};
use serde_json::Value;
use time::OffsetDateTime;

use crate::cli::{Cli, Command};
use crate::error::CliError;
use crate::output::{Envelope, EnvelopeError, EnvelopeMeta};

pub struct CommandResult {
    pub data: Value,
    pub warnings: Vec<String>,
    pub errors: Vec<EnvelopeError>,
    pub latency_ms: u64,
    pub served_from_cache: bool,
    pub providers: Vec<String>,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            warnings: Vec::new(),
            errors: Vec::new(),
            latency_ms: 0,
            served_from_cache: false,
            providers: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_errors(mut self, errors: Vec<EnvelopeError>) -> Self {
        self.errors.extend(errors);
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_cache_hit(mut self, served_from_cache: bool) -> Self {
        self.served_from_cache = served_from_cache;
        self
    }

    pub fn with_providers(mut self, providers: Vec<String>) -> Self {
        self.providers = providers;
        self
    }
}

pub fn build_orchestrator(cli: &Cli) -> Arc<Orchestrator> {
    let mut config = OrchestratorConfig::from_env();
    if let Some(strategy) = cli.strategy {
        config = config.with_fallback_strategy(strategy.into());
    }

    let builder = Orchestrator::builder().with_config(config);
    if cli.mock {
        builder.with_mock_mode().build()
    } else {
        builder.with_real_clients().build()
    }
}

pub async fn run(cli: &Cli) -> Result<Envelope, CliError> {
    let orchestrator = build_orchestrator(cli);

    let mut result = match &cli.command {
        Command::Run(args) => run::run(args, &orchestrator).await?,
        Command::Dispatch(args) => dispatch::run(args, &orchestrator).await?,
        Command::Queue(args) => queue::run(args, &orchestrator).await?,
        Command::Operations => operations::run(&orchestrator)?,
        Command::Providers => providers::run(&orchestrator)?,
    };

    if !cli.mock && orchestrator.providers().is_empty() {
        result = result.with_warning(
            "no provider credentials found; set CRMAI_* variables or pass --mock",
        );
    }

    let CommandResult {
        data,
        warnings,
        errors,
        latency_ms,
        served_from_cache,
        providers,
    } = result;

    Ok(Envelope {
        meta: EnvelopeMeta {
            request_id: generate_request_id(),
            generated_at: OffsetDateTime::now_utc(),
            latency_ms,
            served_from_cache,
            providers,
            warnings,
        },
        data,
        errors,
    })
}

/// Distinct providers in the order they first appear in history.
fn providers_used(orchestrator: &Orchestrator) -> Vec<String> {
    let mut providers = Vec::<String>::new();
    for entry in orchestrator.history().entries_snapshot() {
        if let Some(provider) = entry.provider {
            if !providers.contains(&provider) {
                providers.push(provider);
            }
        }
    }
    providers
}
