use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::backend::{BackendFuture, ProviderBackend, ProviderCall, ProviderReply};
use crate::capability::CapabilityType;
use crate::error::CallError;

/// Scripted behavior of a [`MockBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum MockBehavior {
    /// Deterministic structured reply derived from the payload.
    Succeed,
    /// Fixed JSON reply.
    Json(Value),
    /// Fixed free-text reply.
    Text(String),
    /// Every call fails with this error.
    Fail(CallError),
    /// The first `n` calls fail with a retryable transport error, then succeed.
    FailTimes(usize),
    /// Never completes; only a timeout ends the call.
    Hang,
}

/// Offline backend for mock mode and tests. Counts every invocation.
#[derive(Debug)]
pub struct MockBackend {
    behavior: Mutex<MockBehavior>,
    latency: Duration,
    calls: AtomicUsize,
}

impl MockBackend {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(MockBehavior::Succeed)
    }

    pub fn failing(error: CallError) -> Self {
        Self::new(MockBehavior::Fail(error))
    }

    pub fn hanging() -> Self {
        Self::new(MockBehavior::Hang)
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock().unwrap_or_else(PoisonError::into_inner) = behavior;
    }

    /// Number of invocations so far, including failed and timed-out ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProviderBackend for MockBackend {
    fn invoke<'a>(&'a self, call: &'a ProviderCall) -> BackendFuture<'a> {
        let call_index = self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .behavior
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        Box::pin(async move {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }

            let reply = match behavior {
                MockBehavior::Succeed => synthetic_reply(call),
                MockBehavior::Json(value) => ProviderReply::json(value),
                MockBehavior::Text(text) => ProviderReply::text(text),
                MockBehavior::Fail(error) => return Err(error),
                MockBehavior::FailTimes(failures) if call_index < failures => {
                    return Err(CallError::transport("scripted mock failure"));
                }
                MockBehavior::FailTimes(_) => synthetic_reply(call),
                MockBehavior::Hang => {
                    std::future::pending::<()>().await;
                    return Err(CallError::unavailable("mock hang ended"));
                }
            };
            Ok(reply
                .with_model(call.model.clone().unwrap_or_else(|| String::from("mock-1")))
                .with_usage(0.5))
        })
    }
}

const INDUSTRIES: [&str; 4] = ["Software", "Finance", "Healthcare", "Retail"];
const ENGAGEMENT_LEVELS: [&str; 3] = ["low", "medium", "high"];

fn seed(payload: &Value) -> u64 {
    let digest = Sha256::digest(payload.to_string().as_bytes());
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

fn synthetic_reply(call: &ProviderCall) -> ProviderReply {
    let seed = seed(&call.payload);
    let name = call
        .payload
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("the contact");

    let body = match call.capability {
        CapabilityType::Scoring => {
            let score = 40 + seed % 55;
            json!({
                "score": score,
                "breakdown": { "engagement": score / 2, "fit": score - score / 2 },
                "reasoning": [format!("{name} engaged with recent outreach")],
                "recommendations": ["Schedule a discovery call"],
                "nextBestActions": ["Send case study", "Book demo"],
                "confidence": 0.9
            })
        }
        CapabilityType::Enrichment => {
            let industry = INDUSTRIES[(seed % INDUSTRIES.len() as u64) as usize];
            json!({
                "enrichedFields": {
                    "industry": industry,
                    "companySize": 50 + seed % 950,
                    "seniority": "manager"
                },
                "sources": ["mock-directory"],
                "confidence": 0.88
            })
        }
        CapabilityType::EmailGeneration => json!({
            "subject": format!("Following up, {name}"),
            "body": format!(
                "Hi {name},\n\nThanks for your time last week. Would a short call on Thursday work?"
            ),
            "tone": call.payload.get("tone").and_then(Value::as_str).unwrap_or("professional"),
            "callToAction": "Would a short call on Thursday work?"
        }),
        CapabilityType::EmailAnalysis => json!({
            "sentiment": { "label": "positive", "score": 0.6 },
            "intent": "meeting-request",
            "urgency": "normal",
            "keyPoints": ["Asked about availability next week"]
        }),
        CapabilityType::InsightGeneration => json!({
            "insights": [
                {
                    "title": "Engagement trend",
                    "description": "Reply rate rose over the last 30 days",
                    "impact": "medium"
                },
                {
                    "title": "Pipeline gap",
                    "description": "Few open deals in late stage",
                    "impact": "high"
                }
            ]
        }),
        CapabilityType::CommunicationAnalysis => {
            let engagement = ENGAGEMENT_LEVELS[(seed % ENGAGEMENT_LEVELS.len() as u64) as usize];
            json!({
                "sentiment": { "label": "neutral", "score": 0.1 },
                "engagementLevel": engagement,
                "patterns": ["Responds within one business day"],
                "recommendations": ["Keep messages short"]
            })
        }
        CapabilityType::AutomationSuggestion => json!({
            "suggestions": [{
                "name": "Stale lead nudge",
                "trigger": "no_activity_14_days",
                "action": "create_followup_task",
                "rationale": "Leads without touch for two weeks convert less"
            }]
        }),
        CapabilityType::PredictiveAnalytics => {
            let probability = (50 + seed % 45) as f64 / 100.0;
            json!({
                "prediction": "likely to close",
                "probability": probability,
                "factors": ["Budget confirmed", "Champion identified"],
                "timeframe": "30 days"
            })
        }
        CapabilityType::RelationshipMapping => json!({
            "relationships": [
                { "entity": "Head of Operations", "relation": "decision maker", "strength": 0.8 },
                { "entity": "IT Manager", "relation": "influencer", "strength": 0.5 }
            ],
            "keyInfluencers": ["Head of Operations"]
        }),
    };
    ProviderReply::json(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestContext;

    fn call(capability: CapabilityType, payload: Value) -> ProviderCall {
        ProviderCall {
            request_id: String::from("req_test"),
            capability,
            payload,
            context: RequestContext::default(),
            model: None,
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn synthetic_replies_are_deterministic() {
        let backend = MockBackend::succeeding();
        let call = call(CapabilityType::Scoring, json!({ "name": "Jane" }));

        let first = backend.invoke(&call).await.expect("first call succeeds");
        let second = backend.invoke(&call).await.expect("second call succeeds");

        assert_eq!(first, second);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn fail_times_recovers_after_scripted_failures() {
        let backend = MockBackend::new(MockBehavior::FailTimes(1));
        let call = call(CapabilityType::Enrichment, json!({}));

        assert!(backend.invoke(&call).await.is_err());
        assert!(backend.invoke(&call).await.is_ok());
    }

    #[tokio::test]
    async fn hang_only_ends_by_timeout() {
        let backend = MockBackend::hanging();
        let call = call(CapabilityType::Scoring, json!({}));

        let outcome = tokio::time::timeout(Duration::from_millis(20), backend.invoke(&call)).await;
        assert!(outcome.is_err());
        assert_eq!(backend.calls(), 1);
    }
}
