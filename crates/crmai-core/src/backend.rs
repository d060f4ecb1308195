//! Provider backend trait and call/reply types.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;

use crate::capability::CapabilityType;
use crate::error::CallError;
use crate::request::{AiRequest, RequestContext};

pub type BackendFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ProviderReply, CallError>> + Send + 'a>>;

/// One outbound call, derived from a request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCall {
    pub request_id: String,
    pub capability: CapabilityType,
    pub payload: Value,
    pub context: RequestContext,
    pub model: Option<String>,
    pub timeout: Duration,
}

impl ProviderCall {
    pub fn from_request(request: &AiRequest) -> Self {
        Self {
            request_id: request.id_or_default().to_owned(),
            capability: request.capability,
            payload: request.payload.clone(),
            context: request.context.clone(),
            model: request.options.model.clone(),
            timeout: request.options.timeout(),
        }
    }
}

/// Raw provider output before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    Json(Value),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReply {
    pub payload: RawPayload,
    pub model: Option<String>,
    /// Billable units reported by the provider, used for cost accounting.
    pub usage_units: Option<f64>,
}

impl ProviderReply {
    pub fn json(value: Value) -> Self {
        Self {
            payload: RawPayload::Json(value),
            model: None,
            usage_units: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            payload: RawPayload::Text(text.into()),
            model: None,
            usage_units: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_usage(mut self, units: f64) -> Self {
        self.usage_units = Some(units);
        self
    }
}

/// Transport to a single provider.
pub trait ProviderBackend: Send + Sync {
    fn invoke<'a>(&'a self, call: &'a ProviderCall) -> BackendFuture<'a>;
}
