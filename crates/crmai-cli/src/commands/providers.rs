use crmai_core::Orchestrator;
use serde::Serialize;

use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct ProviderStatus {
    name: String,
    kind: &'static str,
    available: bool,
    circuit: &'static str,
    remaining: u32,
    quota: u32,
    avg_latency_ms: f64,
    success_rate: f64,
    cost_per_unit: f64,
    strengths: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    default_model: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProvidersResponseData {
    strategy: &'static str,
    providers: Vec<ProviderStatus>,
}

pub fn run(orchestrator: &Orchestrator) -> Result<CommandResult, CliError> {
    let providers = orchestrator
        .providers()
        .into_iter()
        .map(|snapshot| ProviderStatus {
            kind: snapshot.kind.as_str(),
            available: snapshot.available,
            circuit: snapshot.circuit.as_str(),
            remaining: snapshot.remaining,
            quota: snapshot.quota,
            avg_latency_ms: snapshot.performance.avg_latency_ms,
            success_rate: snapshot.performance.success_rate,
            cost_per_unit: snapshot.performance.cost_per_unit,
            strengths: snapshot.strengths.iter().map(|capability| capability.as_str()).collect(),
            default_model: snapshot.default_model,
            name: snapshot.name,
        })
        .collect::<Vec<_>>();

    let names = providers.iter().map(|status| status.name.clone()).collect();
    let data = serde_json::to_value(ProvidersResponseData {
        strategy: orchestrator.config().fallback_strategy.as_str(),
        providers,
    })?;
    Ok(CommandResult::ok(data).with_providers(names))
}
