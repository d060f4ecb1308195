use std::sync::Arc;

use crmai_core::{DispatchContext, DispatchRequest, FunctionRegistry, Orchestrator, TriggerSource};
use serde_json::Value;

use crate::cli::DispatchArgs;
use crate::error::CliError;
use crate::output::EnvelopeError;

use super::CommandResult;

pub async fn run(
    args: &DispatchArgs,
    orchestrator: &Arc<Orchestrator>,
) -> Result<CommandResult, CliError> {
    let parameters = serde_json::from_str::<Value>(&args.params)?;

    let mut context = DispatchContext::new(args.user_id.as_str(), args.session_id.as_str())
        .with_trigger(TriggerSource::Cli);
    if let Some(subject_id) = args.subject_id.as_deref() {
        context = context.with_subject(subject_id);
    }

    let registry = FunctionRegistry::with_default_operations(Arc::clone(orchestrator));
    let response = registry
        .handle(DispatchRequest {
            operation_name: args.operation.clone(),
            parameters,
            context,
        })
        .await;

    let mut result = CommandResult::ok(serde_json::to_value(&response)?)
        .with_latency(response.execution_time_ms)
        .with_cache_hit(
            orchestrator
                .history()
                .entries_snapshot()
                .last()
                .is_some_and(|entry| entry.served_from_cache),
        )
        .with_providers(super::providers_used(orchestrator));

    if response.fallback_used == Some(true) {
        result = result.with_warning(format!(
            "operation '{}' failed; returned its fallback result",
            args.operation
        ));
    }
    if !response.success {
        result = result.with_errors(vec![EnvelopeError {
            code: response.error_code.clone().unwrap_or_default(),
            message: response.error.clone().unwrap_or_default(),
        }]);
    }
    Ok(result)
}
