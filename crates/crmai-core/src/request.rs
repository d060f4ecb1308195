//! Request model submitted to the orchestrator.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capability::CapabilityType;
use crate::error::ParseError;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Queue priority. Declaration order matches weight so `Ord` ranks urgent highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl Priority {
    pub const fn weight(self) -> u8 {
        match self {
            Self::Urgent => 4,
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "urgent" => Ok(Self::Urgent),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(ParseError::InvalidPriority {
                value: value.to_owned(),
            }),
        }
    }
}

/// Either automatic provider selection or a named provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ProviderOverride {
    #[default]
    Auto,
    Named(String),
}

impl ProviderOverride {
    pub fn named(&self) -> Option<&str> {
        match self {
            Self::Auto => None,
            Self::Named(name) => Some(name.as_str()),
        }
    }

    pub fn as_str(&self) -> &str {
        self.named().unwrap_or("auto")
    }
}

impl FromStr for ProviderOverride {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ParseError::EmptyProviderOverride);
        }
        if trimmed.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        Ok(Self::Named(trimmed.to_ascii_lowercase()))
    }
}

impl TryFrom<String> for ProviderOverride {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProviderOverride> for String {
    fn from(value: ProviderOverride) -> Self {
        value.as_str().to_owned()
    }
}

/// Who and what a request is about. All fields are optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_context: Option<Value>,
}

impl RequestContext {
    pub fn for_subject(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: Some(subject_id.into()),
            ..Self::default()
        }
    }
}

/// Per-request execution options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptions {
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
    #[serde(default)]
    pub provider_override: ProviderOverride,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Per-attempt timeout. Unset means the orchestrator default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            provider_override: ProviderOverride::Auto,
            model: None,
            timeout_ms: None,
        }
    }
}

impl RequestOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS).max(1))
    }
}

fn default_use_cache() -> bool {
    true
}

/// A typed capability request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", alias = "capability")]
    pub capability: CapabilityType,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub context: RequestContext,
    #[serde(default)]
    pub options: RequestOptions,
}

impl AiRequest {
    pub fn new(capability: CapabilityType, payload: Value) -> Self {
        Self {
            id: None,
            capability,
            priority: Priority::default(),
            payload,
            context: RequestContext::default(),
            options: RequestOptions::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.context.subject_id = Some(subject_id.into());
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.options.use_cache = use_cache;
        self
    }

    pub fn with_provider(mut self, provider: ProviderOverride) -> Self {
        self.options.provider_override = provider;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.options.timeout_ms = Some(timeout_ms);
        self
    }

    /// Assigns a fresh id when none is present and returns the effective id.
    pub fn ensure_id(&mut self) -> &str {
        self.id.get_or_insert_with(generate_request_id).as_str()
    }

    pub fn id_or_default(&self) -> &str {
        self.id.as_deref().unwrap_or("unassigned")
    }
}

/// Process-unique request id.
pub fn generate_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn priority_order_matches_weight() {
        let mut priorities =
            vec![Priority::Low, Priority::Urgent, Priority::Medium, Priority::High];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![Priority::Low, Priority::Medium, Priority::High, Priority::Urgent]
        );
        assert_eq!(Priority::Urgent.weight(), 4);
        assert_eq!(Priority::Low.weight(), 1);
    }

    #[test]
    fn ensure_id_is_stable_once_assigned() {
        let mut request = AiRequest::new(CapabilityType::Scoring, json!({}));
        let first = request.ensure_id().to_owned();
        let second = request.ensure_id().to_owned();
        assert_eq!(first, second);
        assert!(first.starts_with("req_"));
    }

    #[test]
    fn generated_ids_are_unique() {
        let ids = (0..500).map(|_| generate_request_id()).collect::<std::collections::HashSet<_>>();
        assert_eq!(ids.len(), 500);
    }

    #[test]
    fn deserializes_with_defaults() {
        let request: AiRequest = serde_json::from_value(json!({
            "type": "scoring",
            "payload": { "name": "Jane" },
            "context": { "subjectId": "abc" }
        }))
        .expect("request deserializes");

        assert_eq!(request.capability, CapabilityType::Scoring);
        assert_eq!(request.priority, Priority::Medium);
        assert!(request.options.use_cache);
        assert_eq!(request.options.provider_override, ProviderOverride::Auto);
        assert_eq!(request.options.timeout_ms, None);
        assert_eq!(request.options.timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert_eq!(request.context.subject_id.as_deref(), Some("abc"));
    }

    #[test]
    fn provider_override_parses_auto_case_insensitively() {
        assert_eq!("AUTO".parse::<ProviderOverride>().expect("parses"), ProviderOverride::Auto);
        assert_eq!(
            "OpenAI".parse::<ProviderOverride>().expect("parses"),
            ProviderOverride::Named(String::from("openai"))
        );
        assert!("  ".parse::<ProviderOverride>().is_err());
    }
}
