//! Built-in CRM operations.
//!
//! Parameters share one layout: `{ subjectId?, payload?, priority?, provider?,
//! useCache?, businessContext? }`. The subject id falls back to the dispatch
//! context when absent from the parameters.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{DispatchContext, Operation, OperationFuture, TriggerSource};
use crate::capability::CapabilityType;
use crate::error::OrchestratorError;
use crate::normalize::{
    is_urgent, sentiment, AutomationSuggestion, AutomationSuggestions, CanonicalResult,
    CommunicationAnalysis, EmailAnalysis, EmailDraft, EnrichmentResult, Forecast, Insight,
    InsightSet, RelationshipMap, ScoringResult, Sentiment,
};
use crate::orchestrator::Orchestrator;
use crate::request::{AiRequest, Priority, ProviderOverride, RequestContext, RequestOptions};

type FallbackFn = fn(&Map<String, Value>, Option<&str>) -> CanonicalResult;

/// What an operation needs before any provider work starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Requirement {
    Subject,
    Payload,
    PayloadField(&'static str),
}

/// Operation that maps its parameters onto one capability request.
pub struct CapabilityOperation {
    name: &'static str,
    description: &'static str,
    capability: CapabilityType,
    requirement: Requirement,
    fallback: FallbackFn,
}

impl std::fmt::Debug for CapabilityOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityOperation")
            .field("name", &self.name)
            .field("capability", &self.capability)
            .finish_non_exhaustive()
    }
}

impl CapabilityOperation {
    pub const fn capability(&self) -> CapabilityType {
        self.capability
    }
}

impl Operation for CapabilityOperation {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn validate(&self, params: &Value, context: &DispatchContext) -> Result<(), String> {
        validate_common(params)?;
        match self.requirement {
            Requirement::Subject => require_subject(params, context),
            Requirement::Payload => {
                if payload_of(params).is_empty() {
                    Err(String::from("payload must contain at least one field"))
                } else {
                    Ok(())
                }
            }
            Requirement::PayloadField(field) => match payload_of(params).get(field) {
                Some(Value::String(text)) if !text.trim().is_empty() => Ok(()),
                Some(Value::Null) | None => Err(format!("payload.{field} is required")),
                Some(Value::String(_)) => Err(format!("payload.{field} must not be empty")),
                Some(_) => Ok(()),
            },
        }
    }

    fn execute<'a>(
        &'a self,
        params: &'a Value,
        context: &'a DispatchContext,
        orchestrator: &'a Orchestrator,
    ) -> OperationFuture<'a> {
        Box::pin(async move {
            let request = build_request(self.capability, payload_of(params), params, context);
            let response = orchestrator.execute_now(request).await?;
            to_data(&response.result, self.capability)
        })
    }

    fn fallback(&self, params: &Value, context: &DispatchContext) -> Value {
        let payload = payload_of(params);
        let subject = subject_id(params, context);
        serde_json::to_value((self.fallback)(&payload, subject.as_deref())).unwrap_or_default()
    }
}

/// Follow-up task proposed for a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowupTask {
    pub subject_id: String,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub due_in_days: u32,
    /// Whether the task text came from a provider.
    pub ai_generated: bool,
}

/// Turns the top insight about a subject into a follow-up task.
#[derive(Debug, Default)]
pub struct CreateFollowupTask;

impl CreateFollowupTask {
    fn default_task(params: &Value, context: &DispatchContext) -> FollowupTask {
        let subject_id = subject_id(params, context).unwrap_or_default();
        let priority = requested_priority(params).unwrap_or_default();
        let title = params
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| format!("Follow up with {}", display_name(&payload_of(params))));
        FollowupTask {
            subject_id,
            title,
            description: String::from(
                "Check in on the latest conversation and confirm next steps.",
            ),
            priority,
            due_in_days: due_in_days(priority),
            ai_generated: false,
        }
    }
}

impl Operation for CreateFollowupTask {
    fn name(&self) -> &str {
        "create-followup-task"
    }

    fn description(&self) -> &str {
        "Create a follow-up task for a contact based on AI insights about recent activity"
    }

    fn validate(&self, params: &Value, context: &DispatchContext) -> Result<(), String> {
        validate_common(params)?;
        require_subject(params, context)?;
        match params.get("title") {
            None | Some(Value::Null) | Some(Value::String(_)) => Ok(()),
            Some(_) => Err(String::from("title must be a string")),
        }
    }

    fn execute<'a>(
        &'a self,
        params: &'a Value,
        context: &'a DispatchContext,
        orchestrator: &'a Orchestrator,
    ) -> OperationFuture<'a> {
        Box::pin(async move {
            let mut payload = payload_of(params);
            payload.insert(String::from("goal"), Value::String(String::from("follow-up")));
            let request =
                build_request(CapabilityType::InsightGeneration, payload, params, context);
            let response = orchestrator.execute_now(request).await?;

            let mut task = Self::default_task(params, context);
            if let CanonicalResult::InsightGeneration(set) = &response.result {
                if let Some(top) = set.insights.first() {
                    let titled = params.get("title").and_then(Value::as_str).is_some();
                    if !titled && !top.title.is_empty() {
                        task.title = format!("Follow up: {}", top.title);
                    }
                    if !top.description.is_empty() {
                        task.description = top.description.clone();
                    }
                    if requested_priority(params).is_none() {
                        task.priority = impact_priority(top.impact.as_deref());
                        task.due_in_days = due_in_days(task.priority);
                    }
                    task.ai_generated = true;
                }
            }
            to_data(&task, CapabilityType::InsightGeneration)
        })
    }

    fn fallback(&self, params: &Value, context: &DispatchContext) -> Value {
        serde_json::to_value(Self::default_task(params, context)).unwrap_or_default()
    }
}

/// Every built-in operation, in catalogue order.
pub fn builtin() -> Vec<Arc<dyn Operation>> {
    let capability_operations = [
        CapabilityOperation {
            name: "enrich-contact-profile",
            description: "Fill in missing company, role and background details on a contact",
            capability: CapabilityType::Enrichment,
            requirement: Requirement::Subject,
            fallback: enrichment_fallback,
        },
        CapabilityOperation {
            name: "score-contact",
            description: "Score a contact 0-100 as a lead with reasoning and next best actions",
            capability: CapabilityType::Scoring,
            requirement: Requirement::Subject,
            fallback: scoring_fallback,
        },
        CapabilityOperation {
            name: "analyze-contact-engagement",
            description: "Summarize sentiment, engagement and patterns in a contact's messages",
            capability: CapabilityType::CommunicationAnalysis,
            requirement: Requirement::Subject,
            fallback: engagement_fallback,
        },
        CapabilityOperation {
            name: "generate-email",
            description: "Draft a personalized email to a contact",
            capability: CapabilityType::EmailGeneration,
            requirement: Requirement::Payload,
            fallback: email_fallback,
        },
        CapabilityOperation {
            name: "analyze-email",
            description: "Classify an email's sentiment, intent and urgency",
            capability: CapabilityType::EmailAnalysis,
            requirement: Requirement::PayloadField("content"),
            fallback: email_analysis_fallback,
        },
        CapabilityOperation {
            name: "generate-insights",
            description: "Produce pipeline or contact insights from supplied CRM data",
            capability: CapabilityType::InsightGeneration,
            requirement: Requirement::Payload,
            fallback: insights_fallback,
        },
        CapabilityOperation {
            name: "predict-deal-outcome",
            description: "Forecast the likely outcome and win probability of a deal",
            capability: CapabilityType::PredictiveAnalytics,
            requirement: Requirement::Subject,
            fallback: forecast_fallback,
        },
        CapabilityOperation {
            name: "map-relationships",
            description: "Map the people and companies connected to a contact",
            capability: CapabilityType::RelationshipMapping,
            requirement: Requirement::Subject,
            fallback: relationships_fallback,
        },
        CapabilityOperation {
            name: "suggest-automations",
            description: "Suggest workflow automations for recurring CRM activity",
            capability: CapabilityType::AutomationSuggestion,
            requirement: Requirement::Payload,
            fallback: automations_fallback,
        },
    ];

    let mut operations = capability_operations
        .into_iter()
        .map(|operation| Arc::new(operation) as Arc<dyn Operation>)
        .collect::<Vec<_>>();
    operations.insert(3, Arc::new(CreateFollowupTask));
    operations
}

fn validate_common(params: &Value) -> Result<(), String> {
    let Some(object) = params.as_object() else {
        return Err(String::from("parameters must be a JSON object"));
    };
    match object.get("payload") {
        None | Some(Value::Null) | Some(Value::Object(_)) => {}
        Some(_) => return Err(String::from("payload must be a JSON object")),
    }
    if let Some(raw) = object.get("priority") {
        let parsed = raw.as_str().map(str::parse::<Priority>);
        if !matches!(parsed, Some(Ok(_))) {
            return Err(format!("priority must be one of low, medium, high, urgent (got {raw})"));
        }
    }
    if let Some(raw) = object.get("provider") {
        let parsed = raw.as_str().map(str::parse::<ProviderOverride>);
        if !matches!(parsed, Some(Ok(_))) {
            return Err(String::from("provider must be a non-empty provider name or \"auto\""));
        }
    }
    if object.get("useCache").is_some_and(|value| !value.is_boolean()) {
        return Err(String::from("useCache must be a boolean"));
    }
    Ok(())
}

fn require_subject(params: &Value, context: &DispatchContext) -> Result<(), String> {
    match subject_id(params, context) {
        Some(subject) if !subject.trim().is_empty() => Ok(()),
        _ => Err(String::from("subjectId is required")),
    }
}

fn subject_id(params: &Value, context: &DispatchContext) -> Option<String> {
    params
        .get("subjectId")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .or_else(|| context.subject_id.clone())
}

fn payload_of(params: &Value) -> Map<String, Value> {
    params
        .get("payload")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn requested_priority(params: &Value) -> Option<Priority> {
    params.get("priority")?.as_str()?.parse().ok()
}

fn build_request(
    capability: CapabilityType,
    mut payload: Map<String, Value>,
    params: &Value,
    context: &DispatchContext,
) -> AiRequest {
    let subject = subject_id(params, context);
    if let Some(subject) = subject.as_deref() {
        payload
            .entry("subjectId")
            .or_insert_with(|| Value::String(subject.to_owned()));
    }

    // Interactive triggers jump ahead of background work.
    let priority = requested_priority(params).unwrap_or(match context.trigger_source {
        TriggerSource::Voice | TriggerSource::Chat => Priority::High,
        TriggerSource::Api | TriggerSource::Cli => Priority::Medium,
    });

    let mut options = RequestOptions::default();
    if let Some(use_cache) = params.get("useCache").and_then(Value::as_bool) {
        options.use_cache = use_cache;
    }
    if let Some(provider) = params
        .get("provider")
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse().ok())
    {
        options.provider_override = provider;
    }

    let non_empty = |value: &str| (!value.is_empty()).then(|| value.to_owned());
    AiRequest::new(capability, Value::Object(payload))
        .with_priority(priority)
        .with_options(options)
        .with_context(RequestContext {
            subject_id: subject,
            user_id: non_empty(&context.user_id),
            session_id: non_empty(&context.session_id),
            business_context: params.get("businessContext").cloned(),
        })
}

fn to_data<T: Serialize>(
    value: &T,
    capability: CapabilityType,
) -> Result<Value, OrchestratorError> {
    serde_json::to_value(value).map_err(|error| OrchestratorError::Normalization {
        capability,
        reason: format!("result could not be serialized: {error}"),
        raw: String::new(),
    })
}

fn display_name(payload: &Map<String, Value>) -> String {
    ["name", "firstName", "contactName", "email"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .filter(|name| !name.trim().is_empty())
        .unwrap_or("the contact")
        .to_owned()
}

fn impact_priority(impact: Option<&str>) -> Priority {
    match impact.map(str::to_ascii_lowercase).as_deref() {
        Some("critical" | "urgent") => Priority::Urgent,
        Some("high") => Priority::High,
        Some("low") => Priority::Low,
        _ => Priority::Medium,
    }
}

const fn due_in_days(priority: Priority) -> u32 {
    match priority {
        Priority::Urgent => 1,
        Priority::High => 2,
        Priority::Medium => 3,
        Priority::Low => 7,
    }
}

fn neutral() -> Sentiment {
    Sentiment {
        label: String::from("neutral"),
        score: 0.0,
    }
}

fn enrichment_fallback(payload: &Map<String, Value>, _subject: Option<&str>) -> CanonicalResult {
    let mut enriched_fields = payload.clone();
    enriched_fields.remove("subjectId");
    CanonicalResult::Enrichment(EnrichmentResult {
        enriched_fields,
        sources: Vec::new(),
        summary: Some(String::from(
            "Enrichment is unavailable right now; showing the details already on record.",
        )),
    })
}

fn scoring_fallback(_payload: &Map<String, Value>, _subject: Option<&str>) -> CanonicalResult {
    CanonicalResult::Scoring(ScoringResult {
        score: 50.0,
        breakdown: BTreeMap::new(),
        reasoning: vec![String::from("AI scoring is unavailable, a neutral score was applied")],
        recommendations: vec![String::from("Review this contact manually")],
        next_best_actions: vec![String::from("Log the next interaction to refine the score")],
    })
}

fn engagement_fallback(_payload: &Map<String, Value>, _subject: Option<&str>) -> CanonicalResult {
    CanonicalResult::CommunicationAnalysis(CommunicationAnalysis {
        sentiment: neutral(),
        engagement_level: String::from("unknown"),
        patterns: Vec::new(),
        recommendations: vec![String::from("Reach out to re-establish contact")],
    })
}

fn email_fallback(payload: &Map<String, Value>, _subject: Option<&str>) -> CanonicalResult {
    let name = display_name(payload);
    let tone = payload
        .get("tone")
        .and_then(Value::as_str)
        .unwrap_or("professional")
        .to_owned();
    let subject = payload
        .get("purpose")
        .and_then(Value::as_str)
        .map(|purpose| format!("Following up: {purpose}"))
        .unwrap_or_else(|| String::from("Following up"));

    CanonicalResult::EmailGeneration(EmailDraft {
        subject,
        body: format!(
            "Hi {name},\n\nI wanted to follow up on our recent conversation. \
             Let me know a good time to connect.\n\nBest regards"
        ),
        tone,
        call_to_action: Some(String::from("Reply with a time that works for you")),
    })
}

fn email_analysis_fallback(
    payload: &Map<String, Value>,
    _subject: Option<&str>,
) -> CanonicalResult {
    let content = payload.get("content").and_then(Value::as_str).unwrap_or_default();
    let (label, score) = sentiment(content);
    CanonicalResult::EmailAnalysis(EmailAnalysis {
        sentiment: Sentiment { label, score },
        intent: String::from("unknown"),
        urgency: if is_urgent(content) { "high" } else { "normal" }.to_owned(),
        key_points: Vec::new(),
        suggested_response: None,
    })
}

fn insights_fallback(_payload: &Map<String, Value>, _subject: Option<&str>) -> CanonicalResult {
    CanonicalResult::InsightGeneration(InsightSet {
        insights: vec![Insight {
            title: String::from("Insights unavailable"),
            description: String::from("AI insights could not be generated; try again shortly."),
            impact: None,
        }],
    })
}

fn forecast_fallback(_payload: &Map<String, Value>, _subject: Option<&str>) -> CanonicalResult {
    CanonicalResult::PredictiveAnalytics(Forecast {
        prediction: String::from("undetermined"),
        probability: 0.5,
        factors: vec![String::from("Not enough information for an AI forecast")],
        timeframe: None,
    })
}

fn relationships_fallback(
    _payload: &Map<String, Value>,
    _subject: Option<&str>,
) -> CanonicalResult {
    CanonicalResult::RelationshipMapping(RelationshipMap::default())
}

fn automations_fallback(_payload: &Map<String, Value>, _subject: Option<&str>) -> CanonicalResult {
    CanonicalResult::AutomationSuggestion(AutomationSuggestions {
        suggestions: vec![AutomationSuggestion {
            name: String::from("Follow-up reminder"),
            trigger: String::from("No reply within 3 days"),
            action: String::from("Create a follow-up task"),
            rationale: Some(String::from("Keeps open conversations from going cold")),
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn operation(name: &str) -> Arc<dyn Operation> {
        builtin()
            .into_iter()
            .find(|operation| operation.name() == name)
            .expect("operation is registered")
    }

    #[test]
    fn subject_can_come_from_params_or_context() {
        let score = operation("score-contact");
        let empty = DispatchContext::default();

        assert!(score.validate(&json!({ "subjectId": "abc" }), &empty).is_ok());
        assert!(score.validate(&json!({}), &empty.clone().with_subject("abc")).is_ok());
        assert!(score.validate(&json!({}), &empty).is_err());
    }

    #[test]
    fn analyze_email_requires_content() {
        let analyze = operation("analyze-email");
        let context = DispatchContext::default();

        assert!(analyze.validate(&json!({ "payload": { "content": "" } }), &context).is_err());
        assert!(analyze
            .validate(&json!({ "payload": { "content": "Need this ASAP" } }), &context)
            .is_ok());
    }

    #[test]
    fn bad_priority_is_rejected() {
        let params = json!({ "payload": { "deals": 3 }, "priority": "soon" });
        let error = operation("generate-insights")
            .validate(&params, &DispatchContext::default())
            .expect_err("unknown priority");
        assert!(error.contains("priority"));
    }

    #[test]
    fn enrichment_fallback_echoes_known_fields() {
        let data = operation("enrich-contact-profile").fallback(
            &json!({ "subjectId": "abc", "payload": { "name": "Jane" } }),
            &DispatchContext::default(),
        );

        assert_eq!(data["capability"], "enrichment");
        assert_eq!(data["enrichedFields"]["name"], "Jane");
    }

    #[test]
    fn email_analysis_fallback_uses_local_heuristics() {
        let data = operation("analyze-email").fallback(
            &json!({ "payload": { "content": "This is urgent, the invoice is wrong" } }),
            &DispatchContext::default(),
        );
        assert_eq!(data["urgency"], "high");
    }

    #[test]
    fn followup_fallback_is_deterministic() {
        let params = json!({
            "subjectId": "abc",
            "payload": { "name": "Jane" },
            "priority": "high"
        });
        let followup = operation("create-followup-task");
        let context = DispatchContext::default();

        let first = followup.fallback(&params, &context);
        assert_eq!(first, followup.fallback(&params, &context));
        assert_eq!(first["title"], "Follow up with Jane");
        assert_eq!(first["dueInDays"], 2);
        assert_eq!(first["aiGenerated"], false);
    }

    #[test]
    fn voice_dispatch_runs_at_high_priority() {
        let context = DispatchContext::new("u1", "s1").with_trigger(TriggerSource::Voice);
        let request = build_request(
            CapabilityType::Scoring,
            Map::new(),
            &json!({ "subjectId": "abc" }),
            &context,
        );

        assert_eq!(request.priority, Priority::High);
        assert_eq!(request.payload["subjectId"], "abc");
        assert_eq!(request.context.user_id.as_deref(), Some("u1"));
    }
}
