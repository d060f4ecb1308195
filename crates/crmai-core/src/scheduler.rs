//! Priority request queue and the polling drain loop.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::orchestrator::Orchestrator;
use crate::request::AiRequest;

#[derive(Debug)]
struct QueuedRequest {
    weight: u8,
    sequence: u64,
    request: AiRequest,
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.weight == other.weight && self.sequence == other.sequence
    }
}

impl Eq for QueuedRequest {}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRequest {
    // Max-heap: higher weight first, then earlier submission.
    fn cmp(&self, other: &Self) -> Ordering {
        self.weight
            .cmp(&other.weight)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Queue ordered by priority weight, FIFO within a priority.
#[derive(Debug, Default)]
pub struct RequestQueue {
    heap: Mutex<BinaryHeap<QueuedRequest>>,
    next_sequence: AtomicU64,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn heap(&self) -> MutexGuard<'_, BinaryHeap<QueuedRequest>> {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, request: AiRequest) {
        let sequence = self.next_sequence.fetch_add(1, AtomicOrdering::SeqCst);
        self.heap().push(QueuedRequest {
            weight: request.priority.weight(),
            sequence,
            request,
        });
    }

    pub fn pop(&self) -> Option<AiRequest> {
        self.heap().pop().map(|queued| queued.request)
    }

    pub fn len(&self) -> usize {
        self.heap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap().is_empty()
    }
}

/// Running drain loop. Dropping the handle also stops the loop.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops polling and waits for the loop to exit. A request already in the
    /// processing slot still runs to completion and publishes its outcome.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(error) = self.task.await {
            debug!(%error, "scheduler loop ended abnormally");
        }
    }
}

pub(crate) fn spawn_drain_loop(
    orchestrator: Arc<Orchestrator>,
    poll_interval: Duration,
) -> SchedulerHandle {
    let (shutdown, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(poll_interval_ms = poll_interval.as_millis() as u64, "scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => orchestrator.process_next(),
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        orchestrator.mark_scheduler_stopped();
        debug!("scheduler stopped");
    });

    SchedulerHandle { shutdown, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityType;
    use crate::request::Priority;
    use serde_json::json;

    fn request(id: &str, priority: Priority) -> AiRequest {
        AiRequest::new(CapabilityType::Scoring, json!({}))
            .with_id(id)
            .with_priority(priority)
    }

    #[test]
    fn pops_by_priority_then_submission_order() {
        let queue = RequestQueue::new();
        queue.push(request("low", Priority::Low));
        queue.push(request("urgent", Priority::Urgent));
        queue.push(request("medium-1", Priority::Medium));
        queue.push(request("medium-2", Priority::Medium));
        queue.push(request("high", Priority::High));

        let order = std::iter::from_fn(|| queue.pop())
            .filter_map(|request| request.id)
            .collect::<Vec<_>>();

        assert_eq!(order, vec!["urgent", "high", "medium-1", "medium-2", "low"]);
        assert!(queue.is_empty());
    }
}
