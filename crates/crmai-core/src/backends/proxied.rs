//! Backend for server-side functions at `{base}/functions/v1/{endpoint}`.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::backend::{BackendFuture, ProviderBackend, ProviderCall, ProviderReply};
use crate::error::CallError;
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::throttling::CallThrottle;

#[derive(Clone)]
pub struct FunctionsConfig {
    pub base_url: String,
    pub api_key: String,
    pub requests_per_minute: u32,
}

impl std::fmt::Debug for FunctionsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionsConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("requests_per_minute", &self.requests_per_minute)
            .finish()
    }
}

impl FunctionsConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            requests_per_minute: 100,
        }
    }

    pub fn function_url(&self, endpoint: &str) -> String {
        format!(
            "{}/functions/v1/{endpoint}",
            self.base_url.trim_end_matches('/')
        )
    }
}

#[derive(Debug, Deserialize)]
struct FunctionEnvelope {
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Proxied provider. One capability maps to one named function.
pub struct FunctionsBackend {
    http: Arc<dyn HttpClient>,
    config: FunctionsConfig,
    throttle: CallThrottle,
}

impl std::fmt::Debug for FunctionsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionsBackend")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FunctionsBackend {
    pub fn new(http: Arc<dyn HttpClient>, config: FunctionsConfig) -> Self {
        let throttle = CallThrottle::new(Duration::from_secs(60), config.requests_per_minute);
        Self {
            http,
            config,
            throttle,
        }
    }

    fn build_request(&self, call: &ProviderCall) -> HttpRequest {
        let url = self.config.function_url(call.capability.proxied_endpoint());
        HttpRequest::post_json(url, &request_body(call))
            .with_auth(&HttpAuth::BearerToken(self.config.api_key.clone()))
            .with_timeout(call.timeout)
    }
}

impl ProviderBackend for FunctionsBackend {
    fn invoke<'a>(&'a self, call: &'a ProviderCall) -> BackendFuture<'a> {
        Box::pin(async move {
            self.throttle.acquire().map_err(CallError::rate_limited)?;

            let request = self.build_request(call);
            debug!(
                request_id = %call.request_id,
                capability = %call.capability,
                url = %request.url,
                "invoking server function"
            );
            let response = self.http.execute(request).await?.error_for_status()?;
            parse_envelope(&response.body)
        })
    }
}

/// `{ ...payload, options }`; non-object payloads are nested under `payload`.
fn request_body(call: &ProviderCall) -> Value {
    let mut body = match &call.payload {
        Value::Object(fields) => fields.clone(),
        Value::Null => Map::new(),
        other => {
            let mut fields = Map::new();
            fields.insert(String::from("payload"), other.clone());
            fields
        }
    };

    let mut options = json!({
        "type": call.capability,
        "requestId": call.request_id,
        "context": call.context,
    });
    if let (Some(model), Some(options)) = (&call.model, options.as_object_mut()) {
        options.insert(String::from("model"), Value::String(model.clone()));
    }
    body.insert(String::from("options"), options);
    Value::Object(body)
}

fn parse_envelope(body: &str) -> Result<ProviderReply, CallError> {
    let envelope = serde_json::from_str::<FunctionEnvelope>(body)
        .map_err(|e| CallError::invalid_reply(format!("malformed function reply: {e}")))?;

    if !envelope.success {
        let reason = match envelope.error {
            Some(Value::String(message)) => message,
            Some(other) => other.to_string(),
            None => String::from("function reported failure"),
        };
        return Err(CallError::invalid_reply(reason));
    }

    match envelope.data {
        Some(Value::String(text)) => Ok(ProviderReply::text(text)),
        Some(Value::Null) | None => Err(CallError::invalid_reply("function reply had no data")),
        Some(data) => Ok(ProviderReply::json(data)),
    }
}
