//! Behavior-driven tests for named-operation dispatch
//!
//! Every built-in operation must answer with a well-formed result even when no
//! provider can serve it, and must reject bad input before any provider work.

use std::sync::Arc;
use std::time::Duration;

use crmai_core::dispatch::operations;
use crmai_core::{
    CallError, DispatchContext, DispatchRequest, FunctionRegistry, MockBackend, Operation,
    Orchestrator, OrchestratorConfig, OrchestratorError, ProviderDescriptor, RetryConfig,
    TriggerSource,
};
use serde_json::{json, Value};

struct Harness {
    registry: FunctionRegistry,
    direct: Arc<MockBackend>,
    proxied: Arc<MockBackend>,
}

fn harness(direct: MockBackend, proxied: MockBackend) -> Harness {
    let direct = Arc::new(direct);
    let proxied = Arc::new(proxied);
    let retry = RetryConfig::linear(2, Duration::from_millis(1));
    let orchestrator = Orchestrator::builder()
        .with_config(OrchestratorConfig::default().with_retry(retry))
        .with_backend(ProviderDescriptor::direct("openai"), direct.clone())
        .with_backend(ProviderDescriptor::proxied("edge-functions"), proxied.clone())
        .build();
    Harness {
        registry: FunctionRegistry::with_default_operations(orchestrator),
        direct,
        proxied,
    }
}

fn offline() -> Harness {
    let h = harness(MockBackend::succeeding(), MockBackend::succeeding());
    h.registry.orchestrator().set_available("openai", false);
    h.registry.orchestrator().set_available("edge-functions", false);
    h
}

fn context() -> DispatchContext {
    DispatchContext::new("user-1", "session-1").with_trigger(TriggerSource::Chat)
}

fn operation(name: &str) -> Arc<dyn Operation> {
    operations::builtin()
        .into_iter()
        .find(|operation| operation.name() == name)
        .expect("built-in operation")
}

/// Parameters that satisfy every built-in operation's validation.
fn universal_params() -> Value {
    json!({
        "subjectId": "contact-42",
        "payload": {
            "name": "Jane Cooper",
            "company": "Acme",
            "content": "Can we get pricing before Friday? This is urgent."
        }
    })
}

// =============================================================================
// Fallback
// =============================================================================

#[tokio::test]
async fn when_no_provider_is_available_enrichment_serves_its_fallback() {
    // Given: Every provider disabled
    let h = offline();
    let params = json!({
        "subjectId": "contact-42",
        "payload": { "name": "Jane", "title": "CTO" }
    });

    // When: The enrichment operation is dispatched
    let outcome = h
        .registry
        .dispatch("enrich-contact-profile", params.clone(), &context())
        .await
        .expect("dispatch always answers");

    // Then: The fallback result is returned and flagged
    assert!(outcome.fallback_used);
    assert_eq!(outcome.data, operation("enrich-contact-profile").fallback(&params, &context()));
    assert_eq!(outcome.data["enrichedFields"]["title"], "CTO");
    assert_eq!(h.direct.calls() + h.proxied.calls(), 0);
}

#[tokio::test]
async fn every_builtin_operation_falls_back_when_providers_fail() {
    // Given: Both provider classes failing
    let h = harness(
        MockBackend::failing(CallError::status(500, "internal error")),
        MockBackend::failing(CallError::status(500, "internal error")),
    );
    let params = universal_params();

    for info in h.registry.list_operations() {
        // When: Each operation is dispatched
        let outcome = h
            .registry
            .dispatch(&info.name, params.clone(), &context())
            .await
            .unwrap_or_else(|error| panic!("{} should fall back, got {error}", info.name));

        // Then: Its own fallback result comes back
        assert!(outcome.fallback_used, "{} did not report fallback", info.name);
        assert_eq!(
            outcome.data,
            operation(&info.name).fallback(&params, &context()),
            "{} returned something other than its fallback",
            info.name
        );
    }
}

#[tokio::test]
async fn successful_operations_return_the_normalized_result() {
    let h = harness(MockBackend::succeeding(), MockBackend::succeeding());

    let outcome = h
        .registry
        .dispatch("score-contact", universal_params(), &context())
        .await
        .expect("dispatch succeeds");

    assert!(!outcome.fallback_used);
    assert_eq!(outcome.data["capability"], "scoring");
    assert!(outcome.data["score"].is_number());
    assert_eq!(h.direct.calls(), 1);
}

#[tokio::test]
async fn followup_task_is_built_from_the_top_insight() {
    let h = harness(MockBackend::succeeding(), MockBackend::succeeding());

    let outcome = h
        .registry
        .dispatch(
            "create-followup-task",
            json!({ "payload": { "name": "Jane" } }),
            &context().with_subject("contact-42"),
        )
        .await
        .expect("dispatch succeeds");

    assert!(!outcome.fallback_used);
    assert_eq!(outcome.data["subjectId"], "contact-42");
    assert_eq!(outcome.data["aiGenerated"], true);
    assert!(outcome.data["dueInDays"].as_u64().is_some_and(|days| days >= 1));
}

// =============================================================================
// Rejection before provider work
// =============================================================================

#[tokio::test]
async fn unknown_operations_are_rejected_without_provider_calls() {
    let h = harness(MockBackend::succeeding(), MockBackend::succeeding());

    let error = h
        .registry
        .dispatch("delete-everything", json!({}), &context())
        .await
        .expect_err("unknown operation");

    assert_eq!(
        error,
        OrchestratorError::UnknownOperation {
            name: String::from("delete-everything")
        }
    );
    assert_eq!(h.direct.calls() + h.proxied.calls(), 0);
}

#[tokio::test]
async fn validation_failures_are_surfaced_without_provider_calls() {
    let h = harness(MockBackend::succeeding(), MockBackend::succeeding());

    // Missing subject, no context subject either
    let error = h
        .registry
        .dispatch("score-contact", json!({ "payload": { "name": "Jane" } }), &context())
        .await
        .expect_err("subject required");
    assert_eq!(error.code(), "dispatch.validation");

    // Wrong parameter types
    for params in [
        json!("not an object"),
        json!({ "subjectId": "c1", "payload": [1, 2] }),
        json!({ "subjectId": "c1", "priority": "whenever" }),
        json!({ "subjectId": "c1", "useCache": "yes" }),
    ] {
        let error = h
            .registry
            .dispatch("map-relationships", params.clone(), &context())
            .await
            .expect_err("invalid parameters");
        assert_eq!(error.code(), "dispatch.validation", "accepted {params}");
    }

    assert_eq!(h.direct.calls() + h.proxied.calls(), 0);
}

// =============================================================================
// Wire surface
// =============================================================================

#[tokio::test]
async fn handle_reports_fallback_in_band() {
    let h = offline();
    let request: DispatchRequest = serde_json::from_value(json!({
        "operationName": "predict-deal-outcome",
        "parameters": { "payload": { "stage": "negotiation" } },
        "context": {
            "subjectId": "deal-9",
            "userId": "u1",
            "sessionId": "s1",
            "triggerSource": "voice"
        }
    }))
    .expect("valid wire request");

    let response = h.registry.handle(request).await;
    let wire = serde_json::to_value(&response).expect("serializes");

    assert_eq!(wire["success"], true);
    assert_eq!(wire["fallbackUsed"], true);
    assert_eq!(wire["data"]["capability"], "predictive-analytics");
    assert!(wire.get("error").is_none());
}

#[tokio::test]
async fn handle_reports_validation_errors_in_band() {
    let h = harness(MockBackend::succeeding(), MockBackend::succeeding());

    let response = h
        .registry
        .handle(DispatchRequest {
            operation_name: String::from("analyze-email"),
            parameters: json!({ "payload": { "content": "   " } }),
            context: context(),
        })
        .await;

    assert!(!response.success);
    assert_eq!(response.error_code.as_deref(), Some("dispatch.validation"));
    assert!(response.data.is_none());
    assert!(response.fallback_used.is_none());
}
