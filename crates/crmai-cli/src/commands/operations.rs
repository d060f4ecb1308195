use std::sync::Arc;

use crmai_core::{FunctionRegistry, Orchestrator};
use serde_json::json;

use crate::error::CliError;

use super::CommandResult;

pub fn run(orchestrator: &Arc<Orchestrator>) -> Result<CommandResult, CliError> {
    let registry = FunctionRegistry::with_default_operations(Arc::clone(orchestrator));
    let operations = registry.list_operations();
    Ok(CommandResult::ok(json!({ "operations": operations })))
}
