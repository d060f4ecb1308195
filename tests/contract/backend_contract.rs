//! Wire contract tests for the HTTP-backed providers
//!
//! A recording transport captures every outbound request and replays scripted
//! responses, so these tests pin URLs, headers and bodies without a network.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crmai_core::http_client::{HttpFuture, HttpMethod, HttpRequest, HttpResponse};
use crmai_core::{
    AiRequest, CapabilityType, ChatCompletionsBackend, ChatCompletionsConfig, FunctionsBackend,
    FunctionsConfig, HttpClient, Orchestrator, ProviderBackend, ProviderCall, ProviderCredentials,
    RawPayload, RequestContext,
};
use serde_json::{json, Value};

#[derive(Default)]
struct RecordingHttp {
    requests: Mutex<Vec<HttpRequest>>,
    responses: Mutex<VecDeque<HttpResponse>>,
}

impl RecordingHttp {
    fn replying(responses: impl IntoIterator<Item = HttpResponse>) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(responses.into_iter().collect()),
        })
    }

    fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("lock").clone()
    }
}

impl HttpClient for RecordingHttp {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        self.requests.lock().expect("lock").push(request);
        let response = self
            .responses
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| HttpResponse::with_status(503, "no scripted response"));
        Box::pin(async move { Ok(response) })
    }
}

fn call(capability: CapabilityType, payload: Value) -> ProviderCall {
    ProviderCall {
        request_id: String::from("req_contract"),
        capability,
        payload,
        context: RequestContext::for_subject("contact-7"),
        model: None,
        timeout: Duration::from_secs(5),
    }
}

fn completion(content: &str) -> HttpResponse {
    HttpResponse::ok_json(
        json!({
            "model": "gpt-4o-mini",
            "choices": [{ "message": { "role": "assistant", "content": content } }],
            "usage": { "total_tokens": 420 }
        })
        .to_string(),
    )
}

// =============================================================================
// Server functions
// =============================================================================

#[tokio::test]
async fn functions_backend_posts_to_the_capability_endpoint() {
    // Given: A functions backend with a scripted success envelope
    let http = RecordingHttp::replying([HttpResponse::ok_json(
        r#"{"success": true, "data": {"subject": "Hello", "body": "Hi Jane"}}"#,
    )]);
    let config = FunctionsConfig::new("https://crm.example/", "anon-key");
    let backend = FunctionsBackend::new(http.clone(), config);

    // When: An email generation call is made
    let reply = backend
        .invoke(&call(CapabilityType::EmailGeneration, json!({ "recipient": "Jane" })))
        .await
        .expect("call succeeds");

    // Then: The request targets the named function with bearer auth and spread payload
    let requests = http.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, HttpMethod::Post);
    assert_eq!(request.url, "https://crm.example/functions/v1/smart-email-composer");
    assert_eq!(request.headers.get("authorization").map(String::as_str), Some("Bearer anon-key"));
    assert_eq!(request.headers.get("content-type").map(String::as_str), Some("application/json"));

    let body = request.json_body().expect("json body");
    assert_eq!(body["recipient"], "Jane");
    assert_eq!(body["options"]["type"], "email-generation");
    assert_eq!(body["options"]["requestId"], "req_contract");
    assert_eq!(body["options"]["context"]["subjectId"], "contact-7");

    assert_eq!(reply.payload, RawPayload::Json(json!({ "subject": "Hello", "body": "Hi Jane" })));
}

#[tokio::test]
async fn functions_backend_maps_every_capability_to_a_function() {
    let expected = [
        (CapabilityType::Scoring, "ai-enrichment"),
        (CapabilityType::Enrichment, "ai-enrichment"),
        (CapabilityType::RelationshipMapping, "ai-enrichment"),
        (CapabilityType::EmailGeneration, "smart-email-composer"),
        (CapabilityType::EmailAnalysis, "email-analyzer"),
        (CapabilityType::CommunicationAnalysis, "email-analyzer"),
        (CapabilityType::InsightGeneration, "ai-insights"),
        (CapabilityType::AutomationSuggestion, "automation-ai"),
        (CapabilityType::PredictiveAnalytics, "sales-forecasting"),
    ];
    let http = RecordingHttp::replying(
        expected
            .iter()
            .map(|_| HttpResponse::ok_json(r#"{"success": true, "data": "ok"}"#)),
    );
    let config = FunctionsConfig::new("https://crm.example", "k");
    let backend = FunctionsBackend::new(http.clone(), config);

    for (capability, _) in expected {
        backend.invoke(&call(capability, json!({}))).await.expect("call succeeds");
    }

    let urls = http.requests().into_iter().map(|request| request.url).collect::<Vec<_>>();
    for ((_, function), url) in expected.iter().zip(urls) {
        assert_eq!(url, format!("https://crm.example/functions/v1/{function}"));
    }
}

#[tokio::test]
async fn functions_backend_surfaces_in_band_and_http_failures() {
    let http = RecordingHttp::replying([
        HttpResponse::ok_json(r#"{"success": false, "error": {"message": "quota exceeded"}}"#),
        HttpResponse::with_status(401, "invalid JWT"),
    ]);
    let backend = FunctionsBackend::new(http, FunctionsConfig::new("https://crm.example", "k"));

    let in_band = backend
        .invoke(&call(CapabilityType::Scoring, json!({})))
        .await
        .expect_err("success false");
    assert_eq!(in_band.code(), "call.invalid_reply");
    assert!(in_band.message().contains("quota exceeded"));

    let status = backend
        .invoke(&call(CapabilityType::Scoring, json!({})))
        .await
        .expect_err("401");
    assert_eq!(status.code(), "call.status");
    assert!(!status.retryable());
}

// =============================================================================
// Chat completions
// =============================================================================

#[tokio::test]
async fn chat_backend_sends_model_prompts_and_bearer_key() {
    // Given: A chat backend replying with fenced JSON
    let content = "```json\n{\"score\": 77, \"reasoning\": [\"Fits ICP\"]}\n```";
    let http = RecordingHttp::replying([completion(content)]);
    let backend = ChatCompletionsBackend::new(
        http.clone(),
        ChatCompletionsConfig::new("https://llm.example/v1/", "sk-test", "gpt-4o-mini"),
    );

    // When: A scoring call is made
    let reply = backend
        .invoke(&call(CapabilityType::Scoring, json!({ "name": "Jane" })))
        .await
        .expect("call succeeds");

    // Then: The chat-completions request is well formed
    let request = &http.requests()[0];
    assert_eq!(request.url, "https://llm.example/v1/chat/completions");
    assert_eq!(request.headers.get("authorization").map(String::as_str), Some("Bearer sk-test"));
    assert_eq!(request.timeout_ms, 5_000);

    let body = request.json_body().expect("json body");
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["messages"][0]["role"], "system");
    let system = body["messages"][0]["content"].as_str().expect("system prompt");
    assert!(system.contains("scoring"));
    assert_eq!(body["messages"][1]["role"], "user");
    let user = body["messages"][1]["content"].as_str().expect("user prompt");
    let user: Value = serde_json::from_str(user).expect("user prompt is json");
    assert_eq!(user["payload"]["name"], "Jane");

    // And: The fenced content is unwrapped into JSON with usage accounted
    assert_eq!(reply.payload, RawPayload::Json(json!({ "score": 77, "reasoning": ["Fits ICP"] })));
    assert_eq!(reply.model.as_deref(), Some("gpt-4o-mini"));
    assert_eq!(reply.usage_units, Some(0.42));
}

#[tokio::test]
async fn chat_backend_honours_a_per_call_model() {
    let http = RecordingHttp::replying([completion("fine")]);
    let backend = ChatCompletionsBackend::new(
        http.clone(),
        ChatCompletionsConfig::new("https://llm.example/v1", "sk-test", "gpt-4o-mini"),
    );
    let mut scoring = call(CapabilityType::Scoring, json!({}));
    scoring.model = Some(String::from("gpt-4o"));

    let reply = backend.invoke(&scoring).await.expect("call succeeds");

    assert_eq!(http.requests()[0].json_body().expect("body")["model"], "gpt-4o");
    assert_eq!(reply.payload, RawPayload::Text(String::from("fine")));
}

#[tokio::test]
async fn chat_backend_rejects_malformed_completions() {
    let http = RecordingHttp::replying([HttpResponse::ok_json("<html>gateway</html>")]);
    let backend = ChatCompletionsBackend::new(
        http,
        ChatCompletionsConfig::new("https://llm.example/v1", "sk-test", "gpt-4o-mini"),
    );

    let error = backend
        .invoke(&call(CapabilityType::Scoring, json!({})))
        .await
        .expect_err("malformed");
    assert_eq!(error.code(), "call.invalid_reply");
}

// =============================================================================
// End to end through the orchestrator
// =============================================================================

#[tokio::test]
async fn real_mode_routes_through_registered_http_backends() {
    // Given: Only server-function credentials configured
    let http = RecordingHttp::replying([HttpResponse::ok_json(
        r#"{"success": true, "data": {"score": 81, "reasoning": ["Engaged"]}}"#,
    )]);
    let orchestrator = Orchestrator::builder()
        .with_credentials(ProviderCredentials {
            functions_url: Some(String::from("https://crm.example")),
            functions_key: Some(String::from("anon-key")),
            ..ProviderCredentials::default()
        })
        .with_http_client(http.clone())
        .build();

    // When: A scoring request runs
    let response = orchestrator
        .execute_now(
            AiRequest::new(CapabilityType::Scoring, json!({ "name": "Jane" }))
                .with_subject("contact-7"),
        )
        .await
        .expect("request succeeds");

    // Then: The proxied function served it and the reply was normalized
    assert_eq!(response.metadata.provider_used, "edge-functions");
    assert_eq!(response.metadata.confidence, 0.85);
    assert_eq!(http.requests()[0].url, "https://crm.example/functions/v1/ai-enrichment");
    let data = serde_json::to_value(&response.result).expect("serializes");
    assert_eq!(data["score"], 81.0);
}
