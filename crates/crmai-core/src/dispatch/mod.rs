//! Named-operation dispatch.
//!
//! A [`FunctionRegistry`] maps operation names to [`Operation`] implementations.
//! Dispatch validates parameters, runs the operation against the orchestrator
//! and, if that fails, substitutes the operation's locally computed fallback so
//! callers always receive a well-formed answer.
//!
//! | Failure | Outcome |
//! |---------|---------|
//! | unknown operation name | [`OrchestratorError::UnknownOperation`], no provider call |
//! | parameters rejected by `validate` | [`OrchestratorError::Validation`], no provider call |
//! | `execute` returns an error | fallback result with `fallback_used = true` |

pub mod operations;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::engine::duration_ms;
use crate::error::OrchestratorError;
use crate::orchestrator::Orchestrator;

pub type OperationFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Value, OrchestratorError>> + Send + 'a>>;

/// One named high-level operation.
///
/// `fallback` must not fail or reach a provider, and its output has the same
/// shape as a successful `execute`.
pub trait Operation: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Pre-check run before any provider work. The error is a human-readable reason.
    fn validate(&self, params: &Value, context: &DispatchContext) -> Result<(), String>;

    fn execute<'a>(
        &'a self,
        params: &'a Value,
        context: &'a DispatchContext,
        orchestrator: &'a Orchestrator,
    ) -> OperationFuture<'a>;

    fn fallback(&self, params: &Value, context: &DispatchContext) -> Value;
}

/// Where a dispatch originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Voice,
    Chat,
    #[default]
    Api,
    Cli,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DispatchContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    pub user_id: String,
    pub session_id: String,
    pub trigger_source: TriggerSource,
}

impl DispatchContext {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            subject_id: None,
            user_id: user_id.into(),
            session_id: session_id.into(),
            trigger_source: TriggerSource::default(),
        }
    }

    pub fn with_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn with_trigger(mut self, trigger_source: TriggerSource) -> Self {
        self.trigger_source = trigger_source;
        self
    }
}

/// Successful dispatch, possibly served by the fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub data: Value,
    pub fallback_used: bool,
    pub execution_time_ms: u64,
}

/// Wire form of a dispatch call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub operation_name: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub context: DispatchContext,
}

/// Wire form of a dispatch result. Errors are reported in-band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_used: Option<bool>,
}

/// Catalogue entry exposed to front ends resolving intent into operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationInfo {
    pub name: String,
    pub description: String,
}

pub struct FunctionRegistry {
    orchestrator: Arc<Orchestrator>,
    operations: BTreeMap<String, Arc<dyn Operation>>,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("operations", &self.operations.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl FunctionRegistry {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            operations: BTreeMap::new(),
        }
    }

    /// Registry pre-populated with the built-in CRM operations.
    pub fn with_default_operations(orchestrator: Arc<Orchestrator>) -> Self {
        let mut registry = Self::new(orchestrator);
        for operation in operations::builtin() {
            registry.register(operation);
        }
        registry
    }

    /// Adds an operation, replacing any existing one with the same name.
    pub fn register(&mut self, operation: Arc<dyn Operation>) {
        self.operations.insert(operation.name().to_owned(), operation);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    pub fn list_operations(&self) -> Vec<OperationInfo> {
        self.operations
            .values()
            .map(|operation| OperationInfo {
                name: operation.name().to_owned(),
                description: operation.description().to_owned(),
            })
            .collect()
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub async fn dispatch(
        &self,
        name: &str,
        params: Value,
        context: &DispatchContext,
    ) -> Result<DispatchOutcome, OrchestratorError> {
        let started = Instant::now();
        let Some(operation) = self.operations.get(name) else {
            return Err(OrchestratorError::UnknownOperation {
                name: name.to_owned(),
            });
        };

        let params = match params {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        operation
            .validate(&params, context)
            .map_err(|reason| OrchestratorError::Validation {
                operation: name.to_owned(),
                reason,
            })?;

        let (data, fallback_used) = match operation
            .execute(&params, context, self.orchestrator.as_ref())
            .await
        {
            Ok(data) => (data, false),
            Err(error) => {
                warn!(
                    operation = name,
                    code = error.code(),
                    error = %error.detail(),
                    subject_id = context.subject_id.as_deref().unwrap_or_default(),
                    "operation failed, serving fallback"
                );
                (operation.fallback(&params, context), true)
            }
        };

        let execution_time_ms = duration_ms(started.elapsed());
        debug!(operation = name, fallback_used, execution_time_ms, "operation dispatched");
        Ok(DispatchOutcome {
            data,
            fallback_used,
            execution_time_ms,
        })
    }

    /// Wire entry point; never fails.
    pub async fn handle(&self, request: DispatchRequest) -> DispatchResponse {
        let started = Instant::now();
        match self
            .dispatch(&request.operation_name, request.parameters, &request.context)
            .await
        {
            Ok(outcome) => DispatchResponse {
                success: true,
                data: Some(outcome.data),
                error: None,
                error_code: None,
                execution_time_ms: outcome.execution_time_ms,
                fallback_used: Some(outcome.fallback_used),
            },
            Err(error) => DispatchResponse {
                success: false,
                data: None,
                error: Some(error.to_string()),
                error_code: Some(error.code().to_owned()),
                execution_time_ms: duration_ms(started.elapsed()),
                fallback_used: None,
            },
        }
    }
}
