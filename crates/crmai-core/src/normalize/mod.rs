//! Reply normalization.
//!
//! Provider replies are either JSON or prose. Each capability has one canonical
//! result shape; structured replies are mapped field by field (accepting common
//! spelling variants) and prose falls back to text heuristics at reduced
//! confidence. A reply that fits neither path is a normalization error carrying
//! the raw payload.

mod heuristics;
mod shapes;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::backend::RawPayload;
use crate::capability::CapabilityType;
use crate::error::OrchestratorError;

pub(crate) use heuristics::{is_urgent, sentiment, strip_code_fence};
use shapes::CanonicalShape;
pub use shapes::{
    AutomationSuggestion, AutomationSuggestions, CommunicationAnalysis, EmailAnalysis, EmailDraft,
    EnrichmentResult, Forecast, Insight, InsightSet, Relationship, RelationshipMap, ScoringResult,
    Sentiment,
};

/// Confidence assigned to structured replies that do not report their own.
pub const STRUCTURED_CONFIDENCE: f64 = 0.85;
/// Confidence assigned to results recovered from prose.
pub const HEURISTIC_CONFIDENCE: f64 = 0.5;

const WRAPPER_KEYS: [&str; 3] = ["result", "data", "analysis"];
const RAW_PREVIEW_CHARS: usize = 2_000;

/// Capability-specific result; the variant always matches the request capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "capability", rename_all = "kebab-case")]
pub enum CanonicalResult {
    Scoring(ScoringResult),
    Enrichment(EnrichmentResult),
    EmailGeneration(EmailDraft),
    EmailAnalysis(EmailAnalysis),
    InsightGeneration(InsightSet),
    CommunicationAnalysis(CommunicationAnalysis),
    AutomationSuggestion(AutomationSuggestions),
    PredictiveAnalytics(Forecast),
    RelationshipMapping(RelationshipMap),
}

impl CanonicalResult {
    pub const fn capability(&self) -> CapabilityType {
        match self {
            Self::Scoring(_) => CapabilityType::Scoring,
            Self::Enrichment(_) => CapabilityType::Enrichment,
            Self::EmailGeneration(_) => CapabilityType::EmailGeneration,
            Self::EmailAnalysis(_) => CapabilityType::EmailAnalysis,
            Self::InsightGeneration(_) => CapabilityType::InsightGeneration,
            Self::CommunicationAnalysis(_) => CapabilityType::CommunicationAnalysis,
            Self::AutomationSuggestion(_) => CapabilityType::AutomationSuggestion,
            Self::PredictiveAnalytics(_) => CapabilityType::PredictiveAnalytics,
            Self::RelationshipMapping(_) => CapabilityType::RelationshipMapping,
        }
    }
}

/// Output of a successful normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub result: CanonicalResult,
    pub confidence: f64,
    pub heuristic: bool,
}

/// Maps a raw provider reply onto the canonical shape for `capability`.
pub fn normalize(
    capability: CapabilityType,
    payload: &RawPayload,
) -> Result<Normalized, OrchestratorError> {
    let outcome = match capability {
        CapabilityType::Scoring => {
            normalize_as::<ScoringResult>(payload).map(|s| s.map(CanonicalResult::Scoring))
        }
        CapabilityType::Enrichment => {
            normalize_as::<EnrichmentResult>(payload).map(|s| s.map(CanonicalResult::Enrichment))
        }
        CapabilityType::EmailGeneration => {
            normalize_as::<EmailDraft>(payload).map(|s| s.map(CanonicalResult::EmailGeneration))
        }
        CapabilityType::EmailAnalysis => {
            normalize_as::<EmailAnalysis>(payload).map(|s| s.map(CanonicalResult::EmailAnalysis))
        }
        CapabilityType::InsightGeneration => {
            normalize_as::<InsightSet>(payload).map(|s| s.map(CanonicalResult::InsightGeneration))
        }
        CapabilityType::CommunicationAnalysis => normalize_as::<CommunicationAnalysis>(payload)
            .map(|s| s.map(CanonicalResult::CommunicationAnalysis)),
        CapabilityType::AutomationSuggestion => normalize_as::<AutomationSuggestions>(payload)
            .map(|s| s.map(CanonicalResult::AutomationSuggestion)),
        CapabilityType::PredictiveAnalytics => {
            normalize_as::<Forecast>(payload).map(|s| s.map(CanonicalResult::PredictiveAnalytics))
        }
        CapabilityType::RelationshipMapping => normalize_as::<RelationshipMap>(payload)
            .map(|s| s.map(CanonicalResult::RelationshipMapping)),
    };

    outcome.map_err(|reason| OrchestratorError::Normalization {
        capability,
        reason,
        raw: raw_preview(payload),
    })
}

struct Shaped<T> {
    value: T,
    confidence: f64,
    heuristic: bool,
}

impl<T> Shaped<T> {
    fn map(self, wrap: impl FnOnce(T) -> CanonicalResult) -> Normalized {
        Normalized {
            result: wrap(self.value),
            confidence: self.confidence,
            heuristic: self.heuristic,
        }
    }
}

fn normalize_as<T: CanonicalShape>(payload: &RawPayload) -> Result<Shaped<T>, String> {
    match payload {
        RawPayload::Json(value) => from_json::<T>(value, 0),
        RawPayload::Text(text) => from_text::<T>(text),
    }
}

fn from_json<T: CanonicalShape>(value: &Value, depth: u8) -> Result<Shaped<T>, String> {
    match value {
        Value::Object(object) => from_object::<T>(object, depth),
        Value::Array(items) if !items.is_empty() => {
            let mut wrapped = Map::new();
            wrapped.insert(T::MARKERS[0].to_owned(), Value::Array(items.clone()));
            from_object::<T>(&wrapped, depth)
        }
        Value::String(text) => from_text::<T>(text),
        Value::Null => Err(String::from("reply was empty")),
        Value::Array(_) => Err(String::from("reply was an empty list")),
        scalar => from_prose::<T>(&scalar.to_string()),
    }
}

fn from_object<T: CanonicalShape>(
    object: &Map<String, Value>,
    depth: u8,
) -> Result<Shaped<T>, String> {
    if object.is_empty() {
        return Err(String::from("reply was an empty object"));
    }

    if T::MARKERS.iter().any(|marker| object.contains_key(*marker)) {
        return match serde_json::from_value::<T>(Value::Object(object.clone())) {
            Ok(value) => Ok(Shaped {
                value: value.finalize(),
                confidence: reported_confidence(object).unwrap_or(STRUCTURED_CONFIDENCE),
                heuristic: false,
            }),
            Err(_) => from_prose::<T>(&Value::Object(object.clone()).to_string()),
        };
    }

    if depth == 0 {
        let nested = WRAPPER_KEYS
            .iter()
            .filter_map(|key| object.get(*key))
            .find(|inner| inner.is_object() || inner.is_array());
        if let Some(inner) = nested {
            return from_json::<T>(inner, depth + 1);
        }
    }

    if let Some(value) = T::from_unmarked(object) {
        return Ok(Shaped {
            value: value.finalize(),
            confidence: reported_confidence(object).unwrap_or(STRUCTURED_CONFIDENCE),
            heuristic: false,
        });
    }

    from_prose::<T>(&Value::Object(object.clone()).to_string())
}

fn from_text<T: CanonicalShape>(text: &str) -> Result<Shaped<T>, String> {
    let stripped = strip_code_fence(text);
    if stripped.is_empty() {
        return Err(String::from("reply was empty"));
    }
    match serde_json::from_str::<Value>(stripped) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => from_json::<T>(&value, 0),
        _ => from_prose::<T>(stripped),
    }
}

fn from_prose<T: CanonicalShape>(text: &str) -> Result<Shaped<T>, String> {
    T::from_text(text)
        .map(|value| Shaped {
            value: value.finalize(),
            confidence: HEURISTIC_CONFIDENCE,
            heuristic: true,
        })
        .ok_or_else(|| String::from("reply did not contain a recognizable result"))
}

fn reported_confidence(object: &Map<String, Value>) -> Option<f64> {
    object
        .get("confidence")
        .and_then(Value::as_f64)
        .filter(|confidence| (0.0..=1.0).contains(confidence))
}

fn raw_preview(payload: &RawPayload) -> String {
    let raw = match payload {
        RawPayload::Json(value) => value.to_string(),
        RawPayload::Text(text) => text.clone(),
    };
    if raw.chars().count() <= RAW_PREVIEW_CHARS {
        raw
    } else {
        raw.chars().take(RAW_PREVIEW_CHARS).collect()
    }
}
