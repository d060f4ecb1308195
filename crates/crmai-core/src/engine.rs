//! Execution and fallback engine.
//!
//! A direct provider is tried up to `retry.max_attempts` times with backoff
//! between attempts. If every attempt fails, exactly one call is made to the
//! best eligible proxied provider; nothing chains from that call. A proxied
//! provider gets a single call and no fallback.
//!
//! Every call, retries included, is admitted by the registry first: a provider
//! that lost its budget, was disabled, or whose circuit opened mid-request is
//! not called again. A half-open circuit admits a single trial call.
//!
//! Each attempt runs under `tokio::time::timeout`. The in-flight call is
//! dropped when the deadline passes, which aborts the HTTP request, so a
//! timed-out attempt can never complete later in the background.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::backend::{ProviderCall, ProviderReply};
use crate::error::{CallError, OrchestratorError};
use crate::provider::{
    select_of_kind, AttemptReport, ProviderKind, ProviderRegistry, ProviderSnapshot,
    SelectionRequest,
};
use crate::request::AiRequest;
use crate::retry::RetryConfig;

/// Successful provider call and how it was reached.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub provider: String,
    pub reply: ProviderReply,
    pub attempts: u32,
    pub fallback_used: bool,
}

#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    registry: Arc<ProviderRegistry>,
    retry: RetryConfig,
}

impl ExecutionEngine {
    pub fn new(registry: Arc<ProviderRegistry>, retry: RetryConfig) -> Self {
        Self { registry, retry }
    }

    pub fn retry(&self) -> RetryConfig {
        self.retry
    }

    pub async fn execute(
        &self,
        request: &AiRequest,
        provider: &ProviderSnapshot,
    ) -> Result<Execution, OrchestratorError> {
        let call = ProviderCall::from_request(request);
        match provider.kind {
            ProviderKind::Direct => self.execute_direct(request, &call, &provider.name).await,
            ProviderKind::Proxied => {
                if !self.registry.try_admit(&provider.name, Instant::now()) {
                    return Err(OrchestratorError::ProviderCallFailed {
                        provider: provider.name.clone(),
                        attempts: 0,
                        fallback_attempted: false,
                        cause: not_admitting(&provider.name),
                    });
                }
                self.attempt(&provider.name, &call, 1)
                    .await
                    .map(|reply| Execution {
                        provider: provider.name.clone(),
                        reply,
                        attempts: 1,
                        fallback_used: false,
                    })
                    .map_err(|cause| OrchestratorError::ProviderCallFailed {
                        provider: provider.name.clone(),
                        attempts: 1,
                        fallback_attempted: false,
                        cause,
                    })
            }
        }
    }

    async fn execute_direct(
        &self,
        request: &AiRequest,
        call: &ProviderCall,
        provider: &str,
    ) -> Result<Execution, OrchestratorError> {
        let max_attempts = self.retry.attempts();
        let mut attempts = 0;
        let mut last_error = CallError::unavailable("no attempt was made");

        while attempts < max_attempts {
            if !self.registry.try_admit(provider, Instant::now()) {
                debug!(
                    request_id = %call.request_id,
                    provider,
                    attempts,
                    "provider stopped admitting calls"
                );
                if attempts == 0 {
                    last_error = not_admitting(provider);
                }
                break;
            }
            attempts += 1;
            match self.attempt(provider, call, attempts).await {
                Ok(reply) => {
                    return Ok(Execution {
                        provider: provider.to_owned(),
                        reply,
                        attempts,
                        fallback_used: false,
                    });
                }
                Err(error) => {
                    let retryable = error.retryable();
                    last_error = error;
                    if !retryable {
                        break;
                    }
                    if attempts < max_attempts {
                        tokio::time::sleep(self.retry.delay_after(attempts)).await;
                    }
                }
            }
        }

        let snapshots = self.registry.snapshots();
        let selection = SelectionRequest::from(request);
        let fallback = select_of_kind(
            &snapshots,
            &selection,
            ProviderKind::Proxied,
            provider,
            Instant::now(),
        )
        .filter(|fallback| self.registry.try_admit(&fallback.name, Instant::now()));
        let Some(fallback) = fallback else {
            return Err(OrchestratorError::ProviderCallFailed {
                provider: provider.to_owned(),
                attempts,
                fallback_attempted: false,
                cause: last_error,
            });
        };

        info!(
            request_id = %call.request_id,
            capability = %call.capability,
            provider,
            fallback = %fallback.name,
            attempts,
            "direct provider exhausted, falling back"
        );
        match self.attempt(&fallback.name, call, attempts + 1).await {
            Ok(reply) => Ok(Execution {
                provider: fallback.name.clone(),
                reply,
                attempts: attempts + 1,
                fallback_used: true,
            }),
            Err(cause) => Err(OrchestratorError::ProviderCallFailed {
                provider: fallback.name.clone(),
                attempts: attempts + 1,
                fallback_attempted: true,
                cause,
            }),
        }
    }

    /// One call under the request timeout, always reported to the registry.
    async fn attempt(
        &self,
        provider: &str,
        call: &ProviderCall,
        attempt: u32,
    ) -> Result<ProviderReply, CallError> {
        let Some(backend) = self.registry.backend(provider) else {
            return Err(CallError::unavailable(format!("provider '{provider}' is not registered")));
        };

        let mut call = call.clone();
        if call.model.is_none() {
            call.model = self.registry.default_model(provider);
        }

        let started = Instant::now();
        let result = match tokio::time::timeout(call.timeout, backend.invoke(&call)).await {
            Ok(result) => result,
            Err(_) => Err(CallError::timeout(call.timeout)),
        };
        let latency = started.elapsed();

        self.registry.update_performance(
            provider,
            AttemptReport {
                latency,
                success: result.is_ok(),
            },
        );

        if let Err(error) = &result {
            warn!(
                request_id = %call.request_id,
                capability = %call.capability,
                provider,
                attempt,
                error = %error,
                latency_ms = duration_ms(latency),
                "provider attempt failed"
            );
        }
        result
    }
}

fn not_admitting(provider: &str) -> CallError {
    CallError::unavailable(format!("provider '{provider}' is not admitting calls"))
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
