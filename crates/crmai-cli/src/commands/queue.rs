use std::sync::Arc;
use std::time::{Duration, Instant};

use crmai_core::{AiRequest, Completion, Orchestrator};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::cli::QueueArgs;
use crate::error::CliError;
use crate::output::EnvelopeError;

use super::CommandResult;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionView {
    request_id: String,
    capability: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<EnvelopeError>,
}

#[derive(Debug, Serialize)]
struct QueueResponseData {
    submitted: usize,
    completions: Vec<CompletionView>,
    metrics: crmai_core::OrchestratorMetrics,
}

pub async fn run(
    args: &QueueArgs,
    orchestrator: &Arc<Orchestrator>,
) -> Result<CommandResult, CliError> {
    let raw = tokio::fs::read_to_string(&args.file).await?;
    let requests = serde_json::from_str::<Vec<AiRequest>>(&raw)?;
    drain(requests, orchestrator, Duration::from_millis(args.wait_ms)).await
}

async fn drain(
    requests: Vec<AiRequest>,
    orchestrator: &Arc<Orchestrator>,
    wait: Duration,
) -> Result<CommandResult, CliError> {
    let started = Instant::now();
    let mut completions_rx = orchestrator.subscribe();

    let mut submitted = 0;
    for request in requests {
        orchestrator.submit(request)?;
        submitted += 1;
    }
    let handle = orchestrator.start()?;

    let mut completions = Vec::with_capacity(submitted);
    let mut errors = Vec::new();
    let mut missed = 0_u64;
    let deadline = tokio::time::Instant::now() + wait;

    while completions.len() + (missed as usize) < submitted {
        let received = match tokio::time::timeout_at(deadline, completions_rx.recv()).await {
            Ok(received) => received,
            Err(_) => break,
        };
        match received {
            Ok(completion) => {
                let view = view(completion)?;
                if let Some(error) = &view.error {
                    errors.push(error.clone());
                }
                completions.push(view);
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "completion receiver lagged");
                missed += skipped;
            }
            Err(RecvError::Closed) => break,
        }
    }
    handle.shutdown().await;

    let received = completions.len();
    let data = serde_json::to_value(QueueResponseData {
        submitted,
        completions,
        metrics: orchestrator.metrics(),
    })?;

    let mut result = CommandResult::ok(data)
        .with_errors(errors)
        .with_latency(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX))
        .with_providers(super::providers_used(orchestrator));
    if missed > 0 {
        result = result.with_warning(format!("{missed} completion event(s) were dropped"));
    }
    if received + (missed as usize) < submitted {
        result = result.with_warning(format!(
            "stopped waiting after {} ms with {} request(s) outstanding",
            wait.as_millis(),
            submitted - received - missed as usize
        ));
    }
    Ok(result)
}

fn view(completion: Completion) -> Result<CompletionView, CliError> {
    let Completion {
        request_id,
        capability,
        outcome,
    } = completion;
    Ok(match outcome {
        Ok(response) => CompletionView {
            request_id,
            capability: capability.to_string(),
            success: true,
            response: Some(serde_json::to_value(&response)?),
            error: None,
        },
        Err(error) => CompletionView {
            request_id,
            capability: capability.to_string(),
            success: false,
            response: None,
            error: Some(EnvelopeError::from(&error)),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crmai_core::{CapabilityType, Priority};
    use serde_json::json;
    use std::io::Write;

    fn mock() -> Arc<Orchestrator> {
        let config = crmai_core::OrchestratorConfig::default()
            .with_poll_interval(Duration::from_millis(5));
        Orchestrator::builder().with_config(config).with_mock_mode().build()
    }

    #[tokio::test]
    async fn drains_in_priority_order() {
        let orchestrator = mock();
        let requests = [
            ("A", "low", Priority::Low),
            ("B", "urgent", Priority::Urgent),
            ("C", "high", Priority::High),
        ]
        .into_iter()
        .map(|(name, id, priority)| {
            AiRequest::new(CapabilityType::Scoring, json!({ "name": name }))
                .with_id(id)
                .with_priority(priority)
        })
        .collect();

        let result = drain(requests, &orchestrator, Duration::from_secs(5))
            .await
            .expect("queue drains");

        let order = result.data["completions"]
            .as_array()
            .expect("completions array")
            .iter()
            .map(|completion| completion["requestId"].as_str().unwrap_or_default().to_owned())
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["urgent", "high", "low"]);
        assert_eq!(result.data["metrics"]["total_requests"], 3);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn reads_requests_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        let requests = json!([{
            "type": "enrichment",
            "payload": { "name": "Jane" },
            "context": { "subjectId": "abc" }
        }]);
        write!(file, "{requests}").expect("write requests");

        let args = QueueArgs {
            file: file.path().to_path_buf(),
            wait_ms: 5_000,
        };
        let result = run(&args, &mock()).await.expect("queue runs");

        assert_eq!(result.data["submitted"], 1);
        assert_eq!(result.data["completions"][0]["success"], true);
    }
}
