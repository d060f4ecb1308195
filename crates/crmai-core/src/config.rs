use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::provider::FallbackStrategy;
use crate::request::DEFAULT_TIMEOUT_MS;
use crate::retry::{Backoff, RetryConfig};

pub const DEFAULT_CACHE_NAMESPACE: &str = "ai";

/// Tunables for one orchestrator instance.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub fallback_strategy: FallbackStrategy,
    pub retry: RetryConfig,
    pub default_timeout: Duration,
    pub poll_interval: Duration,
    pub history_capacity: usize,
    pub cache_namespace: String,
    pub completion_buffer: usize,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            fallback_strategy: FallbackStrategy::default(),
            retry: RetryConfig::default(),
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            poll_interval: Duration::from_millis(100),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            cache_namespace: DEFAULT_CACHE_NAMESPACE.to_owned(),
            completion_buffer: 256,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Defaults overlaid with `CRMAI_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Defaults overlaid with values from `lookup`; malformed values are skipped with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(strategy) = parsed::<FallbackStrategy>(&lookup, "CRMAI_FALLBACK_STRATEGY") {
            config.fallback_strategy = strategy;
        }
        if let Some(attempts) = parsed::<u32>(&lookup, "CRMAI_MAX_RETRIES") {
            config.retry.max_attempts = attempts.max(1);
        }
        if let Some(step_ms) = parsed::<u64>(&lookup, "CRMAI_RETRY_BASE_DELAY_MS") {
            config.retry.backoff = Backoff::Linear {
                step: Duration::from_millis(step_ms),
            };
        }
        if let Some(timeout_ms) = parsed::<u64>(&lookup, "CRMAI_TIMEOUT_MS") {
            config.default_timeout = Duration::from_millis(timeout_ms.max(1));
        }
        if let Some(poll_ms) = parsed::<u64>(&lookup, "CRMAI_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(poll_ms.max(1));
        }
        if let Some(capacity) = parsed::<usize>(&lookup, "CRMAI_HISTORY_CAPACITY") {
            config.history_capacity = capacity.max(1);
        }
        config
    }

    pub fn with_fallback_strategy(mut self, strategy: FallbackStrategy) -> Self {
        self.fallback_strategy = strategy;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(variable = name, value = %raw, %error, "ignoring malformed configuration value");
            None
        }
    }
}

/// Backend credentials discovered in the environment.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProviderCredentials {
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub openai_model: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: Option<String>,
    pub functions_url: Option<String>,
    pub functions_key: Option<String>,
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |value: &Option<String>| value.as_ref().map(|_| "<redacted>");
        f.debug_struct("ProviderCredentials")
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("openai_base_url", &self.openai_base_url)
            .field("openai_model", &self.openai_model)
            .field("gemini_api_key", &redact(&self.gemini_api_key))
            .field("gemini_model", &self.gemini_model)
            .field("functions_url", &self.functions_url)
            .field("functions_key", &redact(&self.functions_key))
            .finish()
    }
}

impl ProviderCredentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let first = |names: &[&str]| {
            names
                .iter()
                .filter_map(|name| lookup(name))
                .map(|value| value.trim().to_owned())
                .find(|value| !value.is_empty())
        };

        Self {
            openai_api_key: first(&["CRMAI_OPENAI_API_KEY", "OPENAI_API_KEY"]),
            openai_base_url: first(&["CRMAI_OPENAI_BASE_URL"]),
            openai_model: first(&["CRMAI_OPENAI_MODEL"]),
            gemini_api_key: first(&["CRMAI_GEMINI_API_KEY", "GEMINI_API_KEY"]),
            gemini_model: first(&["CRMAI_GEMINI_MODEL"]),
            functions_url: first(&["CRMAI_FUNCTIONS_URL", "SUPABASE_URL"]),
            functions_key: first(&["CRMAI_FUNCTIONS_KEY", "SUPABASE_ANON_KEY"]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect::<HashMap<_, _>>();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.fallback_strategy, FallbackStrategy::DirectFirst);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.history_capacity, 1_000);
        assert_eq!(config.default_timeout, Duration::from_secs(30));
    }

    #[test]
    fn env_overrides_apply_and_bad_values_are_ignored() {
        let config = OrchestratorConfig::from_lookup(lookup(&[
            ("CRMAI_FALLBACK_STRATEGY", "optimal"),
            ("CRMAI_MAX_RETRIES", "4"),
            ("CRMAI_RETRY_BASE_DELAY_MS", "250"),
            ("CRMAI_POLL_INTERVAL_MS", "fast"),
        ]));

        assert_eq!(config.fallback_strategy, FallbackStrategy::Optimal);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.delay_after(2), Duration::from_millis(500));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn credentials_prefer_prefixed_names_and_redact_keys() {
        let credentials = ProviderCredentials::from_lookup(lookup(&[
            ("CRMAI_OPENAI_API_KEY", "sk-prefixed"),
            ("OPENAI_API_KEY", "sk-plain"),
            ("SUPABASE_URL", "https://project.supabase.co"),
            ("GEMINI_API_KEY", "  "),
        ]));

        assert_eq!(credentials.openai_api_key.as_deref(), Some("sk-prefixed"));
        assert_eq!(
            credentials.functions_url.as_deref(),
            Some("https://project.supabase.co")
        );
        assert_eq!(credentials.gemini_api_key, None);
        assert!(!format!("{credentials:?}").contains("sk-prefixed"));
    }
}
