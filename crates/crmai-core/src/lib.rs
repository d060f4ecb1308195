//! # crmai core
//!
//! AI request orchestration for the crmai CRM: typed capability requests are
//! queued by priority, routed to the best provider, executed with retries and
//! a single-level fallback, normalized into one canonical shape per
//! capability, cached and recorded.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`orchestrator`] | Orchestrator instance and builder |
//! | [`scheduler`] | Priority queue and the drain loop |
//! | [`provider`] | Provider registry, scoring and selection |
//! | [`engine`] | Retries, timeouts and fallback |
//! | [`backends`] | Direct, proxied and mock provider backends |
//! | [`cache`] / [`cache_policy`] | Response cache and its key, TTL and tag policy |
//! | [`normalize`] | Canonical result shapes |
//! | [`history`] | Execution history and metrics |
//! | [`dispatch`] | Named operations with validate/execute/fallback |
//!
//! ## Flow
//!
//! ```text
//! submit / dispatch
//!        │
//!        ▼
//! ┌──────────────┐   hit   ┌──────────────┐
//! │ RequestQueue │───────▶│ ResponseCache│
//! └──────┬───────┘         └──────────────┘
//!        │ miss
//!        ▼
//! ┌──────────────┐     ┌──────────────────┐
//! │ select       │────▶│ ExecutionEngine  │──▶ direct ✕ N ──▶ proxied ✕ 1
//! └──────────────┘     └────────┬─────────┘
//!                               ▼
//!                      normalize ─▶ cache ─▶ history
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use crmai_core::{AiRequest, CapabilityType, Orchestrator};
//! use serde_json::json;
//!
//! let orchestrator = Orchestrator::builder().with_mock_mode().build();
//! let response = orchestrator
//!     .execute_now(AiRequest::new(CapabilityType::Scoring, json!({ "name": "Jane" })))
//!     .await?;
//! println!("{}", response.metadata.provider_used);
//! ```

pub mod backend;
pub mod backends;
pub mod cache;
pub mod cache_policy;
pub mod capability;
pub mod circuit_breaker;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod history;
pub mod http_client;
pub mod normalize;
pub mod orchestrator;
pub mod provider;
pub mod request;
pub mod response;
pub mod retry;
pub mod scheduler;
pub mod throttling;

pub use backend::{ProviderBackend, ProviderCall, ProviderReply, RawPayload};
pub use backends::{
    ChatCompletionsBackend, ChatCompletionsConfig, FunctionsBackend, FunctionsConfig, MockBackend,
    MockBehavior,
};
pub use cache::{MemoryCache, ResponseCache};
pub use capability::CapabilityType;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::{OrchestratorConfig, ProviderCredentials};
pub use dispatch::{
    DispatchContext, DispatchOutcome, DispatchRequest, DispatchResponse, FunctionRegistry,
    Operation, OperationInfo, TriggerSource,
};
pub use engine::{Execution, ExecutionEngine};
pub use error::{CallError, CallErrorKind, OrchestratorError, ParseError};
pub use history::{ExecutionHistory, HistoryEntry, OrchestratorMetrics};
pub use http_client::{HttpClient, ReqwestHttpClient};
pub use normalize::{normalize, CanonicalResult, Normalized};
pub use orchestrator::{Completion, Orchestrator, OrchestratorBuilder};
pub use provider::{
    FallbackStrategy, PerformanceStats, ProviderDescriptor, ProviderKind, ProviderRegistry,
    ProviderSnapshot,
};
pub use request::{AiRequest, Priority, ProviderOverride, RequestContext, RequestOptions};
pub use response::{AiResponse, ResponseMetadata};
pub use retry::{Backoff, RetryConfig};
pub use scheduler::{RequestQueue, SchedulerHandle};
