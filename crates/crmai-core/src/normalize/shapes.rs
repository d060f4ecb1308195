//! Canonical result shapes, one per capability.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::heuristics::{
    bullet_lines, first_number_in_range, first_percentage, is_urgent, key_value_lines, sentences,
    sentiment, title_and_body, truncate,
};

/// A result shape the normalizer can build from structured or prose replies.
pub(crate) trait CanonicalShape: DeserializeOwned + Sized {
    /// Keys whose presence marks an object reply as structured for this shape.
    /// The first marker is also used to wrap bare array replies.
    const MARKERS: &'static [&'static str];

    /// Best-effort extraction from prose. `None` means nothing usable was found.
    fn from_text(text: &str) -> Option<Self>;

    /// Object replies that carry no marker keys.
    fn from_unmarked(_object: &Map<String, Value>) -> Option<Self> {
        None
    }

    /// Clamps ranges after deserialization.
    fn finalize(self) -> Self {
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Sentiment {
    pub label: String,
    pub score: f64,
}

impl Sentiment {
    pub(crate) fn from_text(text: &str) -> Self {
        let (label, score) = sentiment(text);
        Self { label, score }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScoringResult {
    #[serde(alias = "leadScore", alias = "lead_score")]
    pub score: f64,
    pub breakdown: BTreeMap<String, f64>,
    #[serde(deserialize_with = "string_or_list")]
    pub reasoning: Vec<String>,
    pub recommendations: Vec<String>,
    #[serde(alias = "next_best_actions", alias = "nextActions")]
    pub next_best_actions: Vec<String>,
}

impl CanonicalShape for ScoringResult {
    const MARKERS: &'static [&'static str] = &["score", "leadScore", "lead_score"];

    fn from_text(text: &str) -> Option<Self> {
        let score = first_number_in_range(text, 0.0, 100.0)?;
        let bullets = bullet_lines(text);
        Some(Self {
            score,
            breakdown: BTreeMap::new(),
            reasoning: sentences(text).into_iter().take(3).collect(),
            next_best_actions: bullets.iter().take(3).cloned().collect(),
            recommendations: bullets,
        })
    }

    fn finalize(mut self) -> Self {
        self.score = self.score.clamp(0.0, 100.0);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EnrichmentResult {
    #[serde(alias = "enrichedData", alias = "enriched_data", alias = "enriched_fields")]
    pub enriched_fields: Map<String, Value>,
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl CanonicalShape for EnrichmentResult {
    const MARKERS: &'static [&'static str] = &[
        "enrichedFields",
        "enrichedData",
        "enriched_data",
        "enriched_fields",
    ];

    fn from_text(text: &str) -> Option<Self> {
        if text.trim().is_empty() {
            return None;
        }
        let enriched_fields = key_value_lines(text)
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect();
        Some(Self {
            enriched_fields,
            sources: Vec::new(),
            summary: Some(truncate(text, 280)),
        })
    }

    fn from_unmarked(object: &Map<String, Value>) -> Option<Self> {
        let enriched_fields = object
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "confidence" | "sources" | "summary"))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect::<Map<_, _>>();
        if enriched_fields.is_empty() {
            return None;
        }
        Some(Self {
            enriched_fields,
            sources: string_list(object.get("sources")),
            summary: object
                .get("summary")
                .and_then(Value::as_str)
                .map(str::to_owned),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EmailDraft {
    pub subject: String,
    #[serde(alias = "content", alias = "text")]
    pub body: String,
    pub tone: String,
    #[serde(
        alias = "call_to_action",
        alias = "cta",
        skip_serializing_if = "Option::is_none"
    )]
    pub call_to_action: Option<String>,
}

impl CanonicalShape for EmailDraft {
    const MARKERS: &'static [&'static str] = &["subject", "body", "content"];

    fn from_text(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }

        let mut lines = trimmed.lines();
        let first = lines.next().unwrap_or_default().trim();
        let (subject, body) = match first
            .strip_prefix("Subject:")
            .or_else(|| first.strip_prefix("subject:"))
        {
            Some(subject) => (
                subject.trim().to_owned(),
                lines.collect::<Vec<_>>().join("\n").trim().to_owned(),
            ),
            None => (truncate(first, 60), trimmed.to_owned()),
        };

        let call_to_action = body
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| line.ends_with('?'))
            .map(str::to_owned);
        Some(Self {
            subject,
            body,
            tone: String::from("professional"),
            call_to_action,
        })
    }

    fn finalize(mut self) -> Self {
        if self.tone.is_empty() {
            self.tone = String::from("professional");
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EmailAnalysis {
    pub sentiment: Sentiment,
    pub intent: String,
    pub urgency: String,
    #[serde(alias = "key_points", alias = "keyTopics", alias = "topics")]
    pub key_points: Vec<String>,
    #[serde(alias = "suggested_response", skip_serializing_if = "Option::is_none")]
    pub suggested_response: Option<String>,
}

impl CanonicalShape for EmailAnalysis {
    const MARKERS: &'static [&'static str] = &["sentiment", "intent", "urgency"];

    fn from_text(text: &str) -> Option<Self> {
        if text.trim().is_empty() {
            return None;
        }
        let mut key_points = bullet_lines(text);
        if key_points.is_empty() {
            key_points = sentences(text).into_iter().take(3).collect();
        }
        Some(Self {
            sentiment: Sentiment::from_text(text),
            intent: detect_intent(text).to_owned(),
            urgency: if is_urgent(text) { "high" } else { "normal" }.to_owned(),
            key_points,
            suggested_response: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Insight {
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InsightSet {
    pub insights: Vec<Insight>,
}

impl CanonicalShape for InsightSet {
    const MARKERS: &'static [&'static str] = &["insights"];

    fn from_text(text: &str) -> Option<Self> {
        let mut items = bullet_lines(text);
        if items.is_empty() {
            items = sentences(text);
        }
        if items.is_empty() {
            return None;
        }
        let insights = items
            .iter()
            .map(|item| {
                let (title, description) = title_and_body(item);
                Insight {
                    title,
                    description,
                    impact: None,
                }
            })
            .collect();
        Some(Self { insights })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CommunicationAnalysis {
    pub sentiment: Sentiment,
    #[serde(alias = "engagement_level", alias = "engagement")]
    pub engagement_level: String,
    pub patterns: Vec<String>,
    pub recommendations: Vec<String>,
}

impl CanonicalShape for CommunicationAnalysis {
    const MARKERS: &'static [&'static str] =
        &["engagementLevel", "engagement_level", "engagement", "patterns"];

    fn from_text(text: &str) -> Option<Self> {
        if text.trim().is_empty() {
            return None;
        }
        let lower = text.to_ascii_lowercase();
        let high = lower.contains("highly engaged") || lower.contains("high engagement");
        let engagement_level = if high {
            "high"
        } else if lower.contains("low engagement") || lower.contains("unresponsive") {
            "low"
        } else {
            "medium"
        };
        Some(Self {
            sentiment: Sentiment::from_text(text),
            engagement_level: engagement_level.to_owned(),
            patterns: sentences(text).into_iter().take(3).collect(),
            recommendations: bullet_lines(text),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutomationSuggestion {
    pub name: String,
    pub trigger: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutomationSuggestions {
    #[serde(alias = "automations")]
    pub suggestions: Vec<AutomationSuggestion>,
}

impl CanonicalShape for AutomationSuggestions {
    const MARKERS: &'static [&'static str] = &["suggestions", "automations"];

    fn from_text(text: &str) -> Option<Self> {
        let items = bullet_lines(text);
        if items.is_empty() {
            return None;
        }
        let suggestions = items
            .iter()
            .map(|item| {
                let (name, action) = title_and_body(item);
                AutomationSuggestion {
                    name,
                    trigger: String::from("manual"),
                    action,
                    rationale: None,
                }
            })
            .collect();
        Some(Self { suggestions })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Forecast {
    pub prediction: String,
    #[serde(alias = "winProbability", alias = "win_probability")]
    pub probability: f64,
    pub factors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
}

impl CanonicalShape for Forecast {
    const MARKERS: &'static [&'static str] =
        &["prediction", "probability", "winProbability", "win_probability"];

    fn from_text(text: &str) -> Option<Self> {
        let prediction = sentences(text).into_iter().next()?;
        Some(Self {
            probability: first_percentage(text).unwrap_or(0.5),
            prediction,
            factors: bullet_lines(text),
            timeframe: None,
        })
    }

    fn finalize(mut self) -> Self {
        // providers sometimes answer 0..100
        if self.probability > 1.0 {
            self.probability /= 100.0;
        }
        self.probability = self.probability.clamp(0.0, 1.0);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Relationship {
    pub entity: String,
    pub relation: String,
    pub strength: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelationshipMap {
    #[serde(alias = "connections")]
    pub relationships: Vec<Relationship>,
    #[serde(alias = "key_influencers", alias = "influencers")]
    pub key_influencers: Vec<String>,
}

impl CanonicalShape for RelationshipMap {
    const MARKERS: &'static [&'static str] = &["relationships", "connections"];

    fn from_text(text: &str) -> Option<Self> {
        let items = bullet_lines(text);
        if items.is_empty() {
            return None;
        }
        let relationships = items
            .iter()
            .map(|item| {
                let (entity, relation) = title_and_body(item);
                Relationship {
                    entity,
                    relation: if relation == *item {
                        String::from("related")
                    } else {
                        relation
                    },
                    strength: 0.5,
                }
            })
            .collect::<Vec<_>>();
        let key_influencers = relationships
            .iter()
            .filter(|relationship| {
                let relation = relationship.relation.to_ascii_lowercase();
                relation.contains("decision") || relation.contains("influenc")
            })
            .map(|relationship| relationship.entity.clone())
            .collect();
        Some(Self {
            relationships,
            key_influencers,
        })
    }

    fn finalize(mut self) -> Self {
        for relationship in &mut self.relationships {
            relationship.strength = relationship.strength.clamp(0.0, 1.0);
        }
        self
    }
}

fn detect_intent(text: &str) -> &'static str {
    let lower = text.to_ascii_lowercase();
    if lower.contains("unsubscribe") || lower.contains("not interested") {
        "opt-out"
    } else if lower.contains("price") || lower.contains("pricing") || lower.contains("quote") {
        "pricing-inquiry"
    } else if lower.contains("meeting") || lower.contains("schedule") || lower.contains("call") {
        "meeting-request"
    } else if lower.contains("issue") || lower.contains("help") || lower.contains("support") {
        "support-request"
    } else {
        "general"
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect(),
        Some(Value::String(item)) => vec![item.clone()],
        _ => Vec::new(),
    }
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(string_list(Some(&value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scoring_accepts_snake_case_and_string_reasoning() {
        let result: ScoringResult = serde_json::from_value(json!({
            "lead_score": 72,
            "reasoning": "Engaged recently",
            "next_best_actions": ["Book demo"]
        }))
        .expect("scoring deserializes");

        assert_eq!(result.score, 72.0);
        assert_eq!(result.reasoning, vec!["Engaged recently"]);
        assert_eq!(result.next_best_actions, vec!["Book demo"]);
    }

    #[test]
    fn scoring_from_text_needs_a_number() {
        assert!(ScoringResult::from_text("Looks promising").is_none());
        let result = ScoringResult::from_text("Score: 81\n- Send pricing").expect("parsed");
        assert_eq!(result.score, 81.0);
        assert_eq!(result.recommendations, vec!["Send pricing"]);
    }

    #[test]
    fn email_from_text_reads_subject_line() {
        let draft = EmailDraft::from_text("Subject: Quick follow-up\nHi Jane,\nCan we talk Friday?")
            .expect("parsed");
        assert_eq!(draft.subject, "Quick follow-up");
        assert!(draft.body.starts_with("Hi Jane"));
        assert_eq!(draft.call_to_action.as_deref(), Some("Can we talk Friday?"));
    }

    #[test]
    fn forecast_rescales_percentages() {
        let forecast = Forecast {
            probability: 70.0,
            ..Forecast::default()
        }
        .finalize();
        assert!((forecast.probability - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn unmarked_enrichment_object_becomes_fields() {
        let object = json!({ "industry": "SaaS", "confidence": 0.9 });
        let result = EnrichmentResult::from_unmarked(object.as_object().expect("object"))
            .expect("enrichment");
        assert_eq!(result.enriched_fields.get("industry"), Some(&json!("SaaS")));
        assert!(!result.enriched_fields.contains_key("confidence"));
    }

    #[test]
    fn relationships_flag_decision_makers() {
        let map =
            RelationshipMap::from_text("- Dana Lee: decision maker\n- Sam: peer").expect("parsed");
        assert_eq!(map.relationships.len(), 2);
        assert_eq!(map.key_influencers, vec!["Dana Lee"]);
    }
}
