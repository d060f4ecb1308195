use crmai_core::{AiRequest, CapabilityType, Orchestrator, Priority, ProviderOverride};
use serde_json::Value;

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::output::EnvelopeError;

use super::CommandResult;

pub async fn run(args: &RunArgs, orchestrator: &Orchestrator) -> Result<CommandResult, CliError> {
    let capability = args.capability.parse::<CapabilityType>()?;
    let priority = args.priority.parse::<Priority>()?;
    let payload = serde_json::from_str::<Value>(&args.payload)?;
    if !payload.is_object() {
        return Err(CliError::Usage(String::from("--payload must be a JSON object")));
    }

    let mut request = AiRequest::new(capability, payload)
        .with_priority(priority)
        .with_cache(!args.no_cache);
    if let Some(provider) = args.provider.as_deref() {
        request = request.with_provider(provider.parse::<ProviderOverride>()?);
    }
    if let Some(timeout_ms) = args.timeout_ms {
        request = request.with_timeout_ms(timeout_ms);
    }
    if let Some(subject_id) = args.subject_id.as_deref() {
        request = request.with_subject(subject_id);
    }

    match orchestrator.execute_now(request).await {
        Ok(response) => {
            let provider = response.metadata.provider_used.clone();
            let latency_ms = response.metadata.processing_time_ms;
            let served_from_cache = response.metadata.served_from_cache;
            let mut result = CommandResult::ok(serde_json::to_value(&response)?)
                .with_latency(latency_ms)
                .with_cache_hit(served_from_cache)
                .with_providers(vec![provider]);
            if response.metadata.fallback_used {
                result = result
                    .with_warning("direct provider failed; served by the proxied fallback");
            }
            if response.metadata.heuristic {
                result = result.with_warning("result was recovered from a prose reply");
            }
            Ok(result)
        }
        Err(error) => Ok(CommandResult::ok(Value::Null)
            .with_errors(vec![EnvelopeError::from(&error)])
            .with_providers(super::providers_used(orchestrator))),
    }
}
