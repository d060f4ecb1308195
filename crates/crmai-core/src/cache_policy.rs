//! Cache key derivation, TTL selection and tagging.

use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::capability::CapabilityType;
use crate::request::AiRequest;

pub const TAG_ALL: &str = "ai";

const VOLATILE_TTL: Duration = Duration::from_secs(60 * 60);
const STABLE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Deterministic key over capability, payload and provider override.
///
/// `serde_json` maps are sorted, so payloads that differ only in key order
/// share a key.
pub fn cache_key(request: &AiRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.capability.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(request.payload.to_string().as_bytes());
    hasher.update([0]);
    hasher.update(request.options.provider_override.as_str().as_bytes());
    format!("{}:{}", request.capability, hex::encode(hasher.finalize()))
}

pub fn ttl_for(capability: CapabilityType) -> Duration {
    match capability {
        CapabilityType::Scoring | CapabilityType::PredictiveAnalytics => VOLATILE_TTL,
        CapabilityType::Enrichment | CapabilityType::RelationshipMapping => STABLE_TTL,
        CapabilityType::EmailGeneration
        | CapabilityType::EmailAnalysis
        | CapabilityType::CommunicationAnalysis => DEFAULT_TTL,
        CapabilityType::InsightGeneration | CapabilityType::AutomationSuggestion => DEFAULT_TTL,
    }
}

pub fn capability_tag(capability: CapabilityType) -> String {
    format!("{TAG_ALL}:{capability}")
}

pub fn subject_tag(subject_id: &str) -> String {
    format!("subject:{subject_id}")
}

pub fn tags_for(request: &AiRequest) -> Vec<String> {
    let mut tags = vec![TAG_ALL.to_owned(), capability_tag(request.capability)];
    if let Some(subject_id) = request.context.subject_id.as_deref() {
        tags.push(subject_tag(subject_id));
    }
    tags
}
