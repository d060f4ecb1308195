use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::capability::CapabilityType;
use crate::normalize::CanonicalResult;

/// Normalized result of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub capability: CapabilityType,
    pub result: CanonicalResult,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub provider_used: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub processing_time_ms: u64,
    pub confidence: f64,
    pub served_from_cache: bool,
    /// Result was recovered from prose rather than a structured reply.
    #[serde(default)]
    pub heuristic: bool,
    /// Produced by the proxied fallback after the direct provider failed.
    #[serde(default)]
    pub fallback_used: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl AiResponse {
    /// Copy of a cached response re-addressed to a new request.
    pub fn served_from_cache(&self, request_id: &str) -> Self {
        let mut response = self.clone();
        response.id = request_id.to_owned();
        response.metadata.served_from_cache = true;
        response
    }
}
