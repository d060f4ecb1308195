//! Chat-completion backend for model APIs called directly from this process.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::backend::{BackendFuture, ProviderBackend, ProviderCall, ProviderReply};
use crate::capability::CapabilityType;
use crate::error::CallError;
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::normalize::strip_code_fence;
use crate::throttling::CallThrottle;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
/// OpenAI-compatible surface of the Gemini API.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

#[derive(Clone)]
pub struct ChatCompletionsConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub requests_per_minute: u32,
}

impl std::fmt::Debug for ChatCompletionsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("requests_per_minute", &self.requests_per_minute)
            .finish()
    }
}

impl ChatCompletionsConfig {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.3,
            max_tokens: 1_000,
            requests_per_minute: 60,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Clone, Deserialize)]
struct Usage {
    total_tokens: u64,
}

/// Direct provider speaking the chat-completions protocol.
pub struct ChatCompletionsBackend {
    http: Arc<dyn HttpClient>,
    config: ChatCompletionsConfig,
    throttle: CallThrottle,
}

impl std::fmt::Debug for ChatCompletionsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsBackend")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ChatCompletionsBackend {
    pub fn new(http: Arc<dyn HttpClient>, config: ChatCompletionsConfig) -> Self {
        let throttle = CallThrottle::new(Duration::from_secs(60), config.requests_per_minute);
        Self {
            http,
            config,
            throttle,
        }
    }

    fn build_request(&self, call: &ProviderCall) -> HttpRequest {
        let model = call.model.as_deref().unwrap_or(&self.config.model);
        let body = CompletionRequest {
            model,
            messages: vec![
                Message {
                    role: String::from("system"),
                    content: system_prompt(call.capability),
                },
                Message {
                    role: String::from("user"),
                    content: user_prompt(call),
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };
        let body = serde_json::to_value(&body).unwrap_or(Value::Null);

        HttpRequest::post_json(self.config.endpoint(), &body)
            .with_auth(&HttpAuth::BearerToken(self.config.api_key.clone()))
            .with_timeout(call.timeout)
    }
}

impl ProviderBackend for ChatCompletionsBackend {
    fn invoke<'a>(&'a self, call: &'a ProviderCall) -> BackendFuture<'a> {
        Box::pin(async move {
            self.throttle.acquire().map_err(CallError::rate_limited)?;

            let request = self.build_request(call);
            debug!(
                request_id = %call.request_id,
                capability = %call.capability,
                url = %request.url,
                "sending chat completion"
            );
            let response = self.http.execute(request).await?.error_for_status()?;
            parse_completion(&response.body)
        })
    }
}

/// First choice content, as JSON when it parses, otherwise as text.
fn parse_completion(body: &str) -> Result<ProviderReply, CallError> {
    let completion = serde_json::from_str::<CompletionResponse>(body)
        .map_err(|e| CallError::invalid_reply(format!("malformed chat completion: {e}")))?;
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| CallError::invalid_reply("chat completion had no choices"))?;

    let content = choice.message.content;
    let mut reply = match serde_json::from_str::<Value>(strip_code_fence(&content)) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => ProviderReply::json(value),
        _ => ProviderReply::text(content),
    };
    if let Some(model) = completion.model {
        reply = reply.with_model(model);
    }
    if let Some(usage) = completion.usage {
        reply = reply.with_usage(usage.total_tokens as f64 / 1_000.0);
    }
    Ok(reply)
}

fn system_prompt(capability: CapabilityType) -> String {
    let shape = match capability {
        CapabilityType::Scoring => {
            r#"{"score": 0-100, "breakdown": {"factor": points}, "reasoning": [string], "recommendations": [string], "nextBestActions": [string], "confidence": 0-1}"#
        }
        CapabilityType::Enrichment => {
            r#"{"enrichedFields": {"field": value}, "sources": [string], "summary": string, "confidence": 0-1}"#
        }
        CapabilityType::EmailGeneration => {
            r#"{"subject": string, "body": string, "tone": string, "callToAction": string}"#
        }
        CapabilityType::EmailAnalysis => {
            r#"{"sentiment": {"label": "positive|neutral|negative", "score": -1..1}, "intent": string, "urgency": "low|normal|high", "keyPoints": [string], "suggestedResponse": string}"#
        }
        CapabilityType::InsightGeneration => {
            r#"{"insights": [{"title": string, "description": string, "impact": "low|medium|high"}]}"#
        }
        CapabilityType::CommunicationAnalysis => {
            r#"{"sentiment": {"label": string, "score": -1..1}, "engagementLevel": "low|medium|high", "patterns": [string], "recommendations": [string]}"#
        }
        CapabilityType::AutomationSuggestion => {
            r#"{"suggestions": [{"name": string, "trigger": string, "action": string, "rationale": string}]}"#
        }
        CapabilityType::PredictiveAnalytics => {
            r#"{"prediction": string, "probability": 0-1, "factors": [string], "timeframe": string}"#
        }
        CapabilityType::RelationshipMapping => {
            r#"{"relationships": [{"entity": string, "relation": string, "strength": 0-1}], "keyInfluencers": [string]}"#
        }
    };
    format!(
        "You are a CRM assistant performing {capability}. \
         Respond with a single JSON object of the form {shape} and nothing else."
    )
}

fn user_prompt(call: &ProviderCall) -> String {
    json!({
        "payload": call.payload,
        "context": call.context,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RawPayload;

    #[test]
    fn parses_fenced_json_content_and_usage() {
        let body = json!({
            "model": "gpt-4o-mini",
            "choices": [{
                "message": { "role": "assistant", "content": "```json\n{\"score\": 70}\n```" }
            }],
            "usage": { "total_tokens": 1500 }
        })
        .to_string();

        let reply = parse_completion(&body).expect("completion parses");

        assert_eq!(reply.payload, RawPayload::Json(json!({ "score": 70 })));
        assert_eq!(reply.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(reply.usage_units, Some(1.5));
    }

    #[test]
    fn prose_content_stays_text() {
        let body = json!({
            "choices": [{ "message": { "role": "assistant", "content": "Score is 70." } }]
        })
        .to_string();

        let reply = parse_completion(&body).expect("completion parses");
        assert_eq!(reply.payload, RawPayload::Text(String::from("Score is 70.")));
    }

    #[test]
    fn empty_choices_is_invalid_reply() {
        let error = parse_completion(r#"{"choices": []}"#).expect_err("must fail");
        assert_eq!(error.code(), "call.invalid_reply");
    }

    #[test]
    fn config_debug_redacts_key() {
        let config = ChatCompletionsConfig::new(OPENAI_BASE_URL, "sk-live-123", "gpt-4o-mini");
        assert!(!format!("{config:?}").contains("sk-live-123"));
        assert_eq!(config.endpoint(), "https://api.openai.com/v1/chat/completions");
    }
}
