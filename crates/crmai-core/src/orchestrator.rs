//! The orchestrator instance and its builder.
//!
//! One [`Orchestrator`] owns the provider registry, cache handle, history and
//! queue. It is shared as `Arc<Orchestrator>` with the scheduler loop and the
//! dispatch registry; nothing here is process-global.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::backend::ProviderBackend;
use crate::backends::direct::{
    ChatCompletionsBackend, ChatCompletionsConfig, GEMINI_BASE_URL, OPENAI_BASE_URL,
};
use crate::backends::mock::MockBackend;
use crate::backends::proxied::{FunctionsBackend, FunctionsConfig};
use crate::cache::{MemoryCache, ResponseCache};
use crate::cache_policy::{self, TAG_ALL};
use crate::capability::CapabilityType;
use crate::config::{OrchestratorConfig, ProviderCredentials};
use crate::engine::{duration_ms, ExecutionEngine};
use crate::error::OrchestratorError;
use crate::history::{ExecutionHistory, HistoryEntry, OrchestratorMetrics};
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::normalize::normalize;
use crate::provider::{
    select_provider, ProviderDescriptor, ProviderRegistry, ProviderSnapshot, SelectionRequest,
};
use crate::request::AiRequest;
use crate::response::{AiResponse, ResponseMetadata};
use crate::scheduler::{spawn_drain_loop, RequestQueue, SchedulerHandle};

pub const OPENAI_PROVIDER: &str = "openai";
pub const GEMINI_PROVIDER: &str = "gemini";
pub const FUNCTIONS_PROVIDER: &str = "edge-functions";

const SCHEDULER_IDLE: u8 = 0;
const SCHEDULER_RUNNING: u8 = 1;
const SCHEDULER_STOPPED: u8 = 2;

/// Outcome of a queued request, published to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub request_id: String,
    pub capability: CapabilityType,
    pub outcome: Result<AiResponse, OrchestratorError>,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<ProviderRegistry>,
    engine: ExecutionEngine,
    cache: Arc<dyn ResponseCache>,
    history: ExecutionHistory,
    queue: RequestQueue,
    processing: AtomicBool,
    scheduler_state: AtomicU8,
    completions: broadcast::Sender<Completion>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("queue_len", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Assigns an id if absent and fills defaulted options.
    fn prepare(&self, mut request: AiRequest) -> AiRequest {
        request.ensure_id();
        if request.options.timeout_ms.is_none() {
            request.options.timeout_ms = Some(duration_ms(self.config.default_timeout));
        }
        request
    }

    /// Queues a request and returns its id immediately.
    pub fn submit(&self, request: AiRequest) -> Result<String, OrchestratorError> {
        if self.scheduler_state.load(Ordering::SeqCst) == SCHEDULER_STOPPED {
            return Err(OrchestratorError::SchedulerStopped);
        }

        let request = self.prepare(request);
        let request_id = request.id_or_default().to_owned();
        debug!(
            request_id = %request_id,
            capability = %request.capability,
            priority = %request.priority,
            "request queued"
        );
        self.queue.push(request);
        Ok(request_id)
    }

    /// Runs a request immediately, bypassing the queue.
    pub async fn execute_now(&self, request: AiRequest) -> Result<AiResponse, OrchestratorError> {
        let request = self.prepare(request);
        self.run(&request).await
    }

    /// Spawns the drain loop. Only one loop may run per orchestrator.
    pub fn start(self: &Arc<Self>) -> Result<SchedulerHandle, OrchestratorError> {
        match self.scheduler_state.compare_exchange(
            SCHEDULER_IDLE,
            SCHEDULER_RUNNING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => Ok(spawn_drain_loop(Arc::clone(self), self.config.poll_interval)),
            Err(SCHEDULER_RUNNING) => Err(OrchestratorError::SchedulerRunning),
            Err(_) => Err(OrchestratorError::SchedulerStopped),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Completion> {
        self.completions.subscribe()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> OrchestratorMetrics {
        self.history.metrics()
    }

    pub fn history(&self) -> &ExecutionHistory {
        &self.history
    }

    pub fn providers(&self) -> Vec<ProviderSnapshot> {
        self.registry.snapshots()
    }

    pub fn set_available(&self, provider: &str, available: bool) -> bool {
        self.registry.set_available(provider, available)
    }

    /// Drops every cached response about one subject.
    pub async fn invalidate_subject(&self, subject_id: &str) -> usize {
        let removed = self
            .cache
            .delete_by_tag(&cache_policy::subject_tag(subject_id))
            .await;
        debug!(subject_id, removed, "invalidated subject cache entries");
        removed
    }

    pub async fn invalidate_capability(&self, capability: CapabilityType) -> usize {
        self.cache
            .delete_by_tag(&cache_policy::capability_tag(capability))
            .await
    }

    pub async fn clear_cache(&self) -> usize {
        self.cache.delete_by_tag(TAG_ALL).await
    }

    /// One scheduler tick: claims the processing slot and, if work is queued,
    /// runs exactly one request on a spawned task.
    pub(crate) fn process_next(self: &Arc<Self>) {
        if self
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let Some(request) = self.queue.pop() else {
            self.processing.store(false, Ordering::SeqCst);
            return;
        };

        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = orchestrator.run(&request).await;
            let request_id = request.id_or_default().to_owned();
            if let Err(failure) = &outcome {
                error!(
                    request_id = %request_id,
                    capability = %request.capability,
                    code = failure.code(),
                    error = %failure.detail(),
                    "queued request failed and was dropped"
                );
            }
            // No subscribers is not an error.
            let _ = orchestrator.completions.send(Completion {
                request_id,
                capability: request.capability,
                outcome,
            });
            orchestrator.processing.store(false, Ordering::SeqCst);
        });
    }

    pub(crate) fn mark_scheduler_stopped(&self) {
        self.scheduler_state.store(SCHEDULER_STOPPED, Ordering::SeqCst);
    }

    async fn run(&self, request: &AiRequest) -> Result<AiResponse, OrchestratorError> {
        let started = Instant::now();
        let request_id = request.id_or_default();
        let namespace = self.config.cache_namespace.as_str();
        let cache_key = request
            .options
            .use_cache
            .then(|| cache_policy::cache_key(request));

        if let Some(key) = cache_key.as_deref() {
            if let Some(cached) = self.cache.get(namespace, key).await {
                let response = cached.served_from_cache(request_id);
                debug!(
                    request_id,
                    capability = %request.capability,
                    provider = %response.metadata.provider_used,
                    "cache hit"
                );
                self.record(request, Ok(&response), started.elapsed());
                return Ok(response);
            }
            debug!(request_id, capability = %request.capability, "cache miss");
        }

        let outcome = self.execute_uncached(request, started).await;

        if let (Ok(response), Some(key)) = (&outcome, cache_key.as_deref()) {
            self.cache
                .set(
                    namespace,
                    key,
                    response.clone(),
                    cache_policy::ttl_for(request.capability),
                    cache_policy::tags_for(request),
                )
                .await;
        }
        self.record(request, outcome.as_ref(), started.elapsed());

        if let Ok(response) = &outcome {
            info!(
                request_id,
                capability = %request.capability,
                provider = %response.metadata.provider_used,
                fallback_used = response.metadata.fallback_used,
                latency_ms = response.metadata.processing_time_ms,
                "request completed"
            );
        }
        outcome
    }

    async fn execute_uncached(
        &self,
        request: &AiRequest,
        started: Instant,
    ) -> Result<AiResponse, OrchestratorError> {
        let selection = SelectionRequest::from(request);
        let snapshots = self.registry.snapshots();
        let selected = select_provider(
            &snapshots,
            &selection,
            self.config.fallback_strategy,
            Instant::now(),
        )?;
        debug!(
            request_id = request.id_or_default(),
            capability = %request.capability,
            provider = %selected.name,
            strategy = %self.config.fallback_strategy,
            "provider selected"
        );

        let execution = self.engine.execute(request, selected).await?;
        let normalized = normalize(request.capability, &execution.reply.payload)?;
        let cost = execution
            .reply
            .usage_units
            .and_then(|units| self.registry.cost_for(&execution.provider, units));

        Ok(AiResponse {
            id: request.id_or_default().to_owned(),
            capability: request.capability,
            result: normalized.result,
            metadata: ResponseMetadata {
                provider_used: execution.provider,
                model: execution.reply.model,
                processing_time_ms: duration_ms(started.elapsed()),
                confidence: normalized.confidence,
                served_from_cache: false,
                heuristic: normalized.heuristic,
                fallback_used: execution.fallback_used,
                timestamp: OffsetDateTime::now_utc(),
                cost,
            },
        })
    }

    fn record(
        &self,
        request: &AiRequest,
        outcome: Result<&AiResponse, &OrchestratorError>,
        elapsed: Duration,
    ) {
        let entry = match outcome {
            Ok(response) => HistoryEntry {
                request_id: response.id.clone(),
                capability: request.capability,
                provider: Some(response.metadata.provider_used.clone()),
                success: true,
                served_from_cache: response.metadata.served_from_cache,
                fallback_used: response.metadata.fallback_used,
                processing_time_ms: duration_ms(elapsed),
                confidence: Some(response.metadata.confidence),
                error_code: None,
            },
            Err(failure) => {
                let (provider, fallback_used) = match failure {
                    OrchestratorError::ProviderCallFailed {
                        provider,
                        fallback_attempted,
                        ..
                    } => (Some(provider.clone()), *fallback_attempted),
                    _ => (None, false),
                };
                HistoryEntry {
                    request_id: request.id_or_default().to_owned(),
                    capability: request.capability,
                    provider,
                    success: false,
                    served_from_cache: false,
                    fallback_used,
                    processing_time_ms: duration_ms(elapsed),
                    confidence: None,
                    error_code: Some(failure.code()),
                }
            }
        };
        self.history.record(entry);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum BackendMode {
    #[default]
    Manual,
    Mock,
    Real,
}

/// Builds an [`Orchestrator`] from configuration, credentials and explicit backends.
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    mode: BackendMode,
    credentials: ProviderCredentials,
    http: Option<Arc<dyn HttpClient>>,
    cache: Option<Arc<dyn ResponseCache>>,
    providers: Vec<(ProviderDescriptor, Arc<dyn ProviderBackend>)>,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: OrchestratorConfig::default(),
            mode: BackendMode::Manual,
            credentials: ProviderCredentials::default(),
            http: None,
            cache: None,
            providers: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers deterministic offline backends for every built-in provider.
    pub fn with_mock_mode(mut self) -> Self {
        self.mode = BackendMode::Mock;
        self
    }

    /// Registers HTTP backends for every provider with credentials in the environment.
    pub fn with_real_clients(mut self) -> Self {
        self.mode = BackendMode::Real;
        self.credentials = ProviderCredentials::from_env();
        self
    }

    pub fn with_credentials(mut self, credentials: ProviderCredentials) -> Self {
        self.mode = BackendMode::Real;
        self.credentials = credentials;
        self
    }

    pub fn with_http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Registers an additional provider after the built-in ones.
    pub fn with_backend(
        mut self,
        descriptor: ProviderDescriptor,
        backend: Arc<dyn ProviderBackend>,
    ) -> Self {
        self.providers.push((descriptor, backend));
        self
    }

    pub fn build(self) -> Arc<Orchestrator> {
        let mut registry = ProviderRegistry::new(self.config.circuit_breaker);

        match self.mode {
            BackendMode::Manual => {}
            BackendMode::Mock => {
                for descriptor in builtin_descriptors(&ProviderCredentials::default()) {
                    registry.register(descriptor, Arc::new(MockBackend::succeeding()));
                }
            }
            BackendMode::Real => {
                let http = self
                    .http
                    .clone()
                    .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new()));
                for (descriptor, backend) in real_backends(&self.credentials, http) {
                    registry.register(descriptor, backend);
                }
            }
        }
        for (descriptor, backend) in self.providers {
            registry.register(descriptor, backend);
        }
        if registry.is_empty() {
            info!("no providers registered; every request will fail with provider.unavailable");
        }

        let registry = Arc::new(registry);
        let (completions, _) = broadcast::channel(self.config.completion_buffer.max(1));
        Arc::new(Orchestrator {
            engine: ExecutionEngine::new(Arc::clone(&registry), self.config.retry),
            registry,
            cache: self.cache.unwrap_or_else(|| Arc::new(MemoryCache::new())),
            history: ExecutionHistory::new(self.config.history_capacity),
            queue: RequestQueue::new(),
            processing: AtomicBool::new(false),
            scheduler_state: AtomicU8::new(SCHEDULER_IDLE),
            completions,
            config: self.config,
        })
    }
}

fn openai_descriptor(model: &str) -> ProviderDescriptor {
    ProviderDescriptor::direct(OPENAI_PROVIDER)
        .with_quota(60, Duration::from_secs(60))
        .with_performance(1_200.0, 0.95, 0.002)
        .with_strengths([
            CapabilityType::EmailGeneration,
            CapabilityType::InsightGeneration,
            CapabilityType::CommunicationAnalysis,
            CapabilityType::AutomationSuggestion,
        ])
        .with_default_model(model)
}

fn gemini_descriptor(model: &str) -> ProviderDescriptor {
    ProviderDescriptor::direct(GEMINI_PROVIDER)
        .with_quota(60, Duration::from_secs(60))
        .with_performance(900.0, 0.9, 0.0005)
        .with_strengths([
            CapabilityType::Scoring,
            CapabilityType::Enrichment,
            CapabilityType::EmailAnalysis,
            CapabilityType::PredictiveAnalytics,
            CapabilityType::RelationshipMapping,
        ])
        .with_default_model(model)
}

fn functions_descriptor() -> ProviderDescriptor {
    ProviderDescriptor::proxied(FUNCTIONS_PROVIDER)
        .with_quota(100, Duration::from_secs(60))
        .with_performance(1_500.0, 0.98, 0.0)
}

fn builtin_descriptors(credentials: &ProviderCredentials) -> [ProviderDescriptor; 3] {
    [
        openai_descriptor(credentials.openai_model.as_deref().unwrap_or("gpt-4o-mini")),
        gemini_descriptor(credentials.gemini_model.as_deref().unwrap_or("gemini-1.5-flash")),
        functions_descriptor(),
    ]
}

fn real_backends(
    credentials: &ProviderCredentials,
    http: Arc<dyn HttpClient>,
) -> Vec<(ProviderDescriptor, Arc<dyn ProviderBackend>)> {
    let [openai, gemini, functions] = builtin_descriptors(credentials);
    let mut backends: Vec<(ProviderDescriptor, Arc<dyn ProviderBackend>)> = Vec::new();

    if let Some(api_key) = credentials.openai_api_key.as_deref() {
        let base_url = credentials
            .openai_base_url
            .as_deref()
            .unwrap_or(OPENAI_BASE_URL);
        let model = openai.default_model.clone().unwrap_or_default();
        let config = ChatCompletionsConfig::new(base_url, api_key, model);
        backends.push((openai, Arc::new(ChatCompletionsBackend::new(Arc::clone(&http), config))));
    }
    if let Some(api_key) = credentials.gemini_api_key.as_deref() {
        let model = gemini.default_model.clone().unwrap_or_default();
        let config = ChatCompletionsConfig::new(GEMINI_BASE_URL, api_key, model);
        backends.push((gemini, Arc::new(ChatCompletionsBackend::new(Arc::clone(&http), config))));
    }
    if let (Some(base_url), Some(api_key)) = (
        credentials.functions_url.as_deref(),
        credentials.functions_key.as_deref(),
    ) {
        let config = FunctionsConfig::new(base_url, api_key);
        backends.push((functions, Arc::new(FunctionsBackend::new(http, config))));
    }
    backends
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{HttpFuture, HttpRequest, HttpResponse};
    use serde_json::json;

    struct UnreachableHttp;

    impl HttpClient for UnreachableHttp {
        fn execute<'a>(&'a self, _request: HttpRequest) -> HttpFuture<'a> {
            Box::pin(async { Ok(HttpResponse::with_status(500, "offline")) })
        }
    }

    #[test]
    fn mock_mode_registers_three_providers_in_order() {
        let orchestrator = Orchestrator::builder().with_mock_mode().build();
        let names = orchestrator
            .providers()
            .into_iter()
            .map(|snapshot| snapshot.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["openai", "gemini", "edge-functions"]);
    }

    #[test]
    fn real_mode_skips_providers_without_credentials() {
        let orchestrator = Orchestrator::builder()
            .with_credentials(ProviderCredentials {
                gemini_api_key: Some(String::from("g-key")),
                functions_url: Some(String::from("https://project.example")),
                ..ProviderCredentials::default()
            })
            .with_http_client(Arc::new(UnreachableHttp))
            .build();

        let names = orchestrator
            .providers()
            .into_iter()
            .map(|snapshot| snapshot.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["gemini"]);
    }

    #[tokio::test]
    async fn execute_now_assigns_id_and_default_timeout() {
        let orchestrator = Orchestrator::builder().with_mock_mode().build();
        let response = orchestrator
            .execute_now(AiRequest::new(CapabilityType::Scoring, json!({ "name": "Jane" })))
            .await
            .expect("mock request succeeds");

        assert!(response.id.starts_with("req_"));
        assert_eq!(response.metadata.provider_used, "gemini");
        assert!(!response.metadata.served_from_cache);
        assert_eq!(response.metadata.cost, Some(0.5 * 0.0005));
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let orchestrator = Orchestrator::builder().with_mock_mode().build();
        let handle = orchestrator.start().expect("first start");
        assert_eq!(
            orchestrator.start().expect_err("second start fails"),
            OrchestratorError::SchedulerRunning
        );

        handle.shutdown().await;
        assert_eq!(
            orchestrator
                .submit(AiRequest::new(CapabilityType::Scoring, json!({})))
                .expect_err("stopped scheduler rejects work"),
            OrchestratorError::SchedulerStopped
        );
    }

    #[tokio::test]
    async fn subject_invalidation_forces_a_fresh_call() {
        let orchestrator = Orchestrator::builder().with_mock_mode().build();
        let request = AiRequest::new(CapabilityType::Enrichment, json!({ "name": "Jane" }))
            .with_subject("abc");

        orchestrator.execute_now(request.clone()).await.expect("first call");
        assert_eq!(orchestrator.invalidate_subject("abc").await, 1);
        let second = orchestrator.execute_now(request).await.expect("second call");

        assert!(!second.metadata.served_from_cache);
    }
}
