//! Bounded execution history and the metrics derived from it.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::capability::CapabilityType;

pub const DEFAULT_HISTORY_CAPACITY: usize = 1_000;

/// One completed request, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub request_id: String,
    pub capability: CapabilityType,
    /// Provider that produced the final outcome, if one was reached.
    pub provider: Option<String>,
    pub success: bool,
    pub served_from_cache: bool,
    pub fallback_used: bool,
    pub processing_time_ms: u64,
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct OrchestratorMetrics {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub success_rate: f64,
    pub average_latency_ms: f64,
    pub cache_hit_rate: f64,
    pub fallback_rate: f64,
    /// Fraction of provider-served requests handled by each provider.
    pub provider_share: BTreeMap<String, f64>,
}

/// FIFO history; the oldest entry is evicted once capacity is reached.
#[derive(Debug)]
pub struct ExecutionHistory {
    capacity: usize,
    entries: Mutex<VecDeque<HistoryEntry>>,
}

impl Default for ExecutionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ExecutionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY))),
        }
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<HistoryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, entry: HistoryEntry) {
        let mut entries = self.entries();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn entries_snapshot(&self) -> Vec<HistoryEntry> {
        self.entries().iter().cloned().collect()
    }

    pub fn metrics(&self) -> OrchestratorMetrics {
        let entries = self.entries();
        let total = entries.len();
        if total == 0 {
            return OrchestratorMetrics::default();
        }

        let successful = entries.iter().filter(|entry| entry.success).count();
        let cache_hits = entries.iter().filter(|entry| entry.served_from_cache).count();
        let fallbacks = entries.iter().filter(|entry| entry.fallback_used).count();
        let latency_total = entries
            .iter()
            .map(|entry| entry.processing_time_ms as f64)
            .sum::<f64>();

        let mut per_provider = BTreeMap::<String, usize>::new();
        for entry in entries.iter().filter(|entry| !entry.served_from_cache) {
            if let Some(provider) = &entry.provider {
                *per_provider.entry(provider.clone()).or_default() += 1;
            }
        }
        let served = per_provider.values().sum::<usize>().max(1) as f64;

        OrchestratorMetrics {
            total_requests: total,
            successful_requests: successful,
            success_rate: successful as f64 / total as f64,
            average_latency_ms: latency_total / total as f64,
            cache_hit_rate: cache_hits as f64 / total as f64,
            fallback_rate: fallbacks as f64 / total as f64,
            provider_share: per_provider
                .into_iter()
                .map(|(provider, count)| (provider, count as f64 / served))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: usize, provider: &str, success: bool, cached: bool) -> HistoryEntry {
        HistoryEntry {
            request_id: format!("req_{id}"),
            capability: CapabilityType::Scoring,
            provider: Some(provider.to_owned()),
            success,
            served_from_cache: cached,
            fallback_used: false,
            processing_time_ms: 100,
            confidence: success.then_some(0.85),
            error_code: None,
        }
    }

    #[test]
    fn evicts_oldest_when_full() {
        let history = ExecutionHistory::new(3);
        for id in 0..5 {
            history.record(entry(id, "openai", true, false));
        }

        let ids = history
            .entries_snapshot()
            .into_iter()
            .map(|entry| entry.request_id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["req_2", "req_3", "req_4"]);
    }

    #[test]
    fn metrics_aggregate_rates_and_shares() {
        let history = ExecutionHistory::default();
        history.record(entry(1, "openai", true, false));
        history.record(entry(2, "openai", true, true));
        history.record(entry(3, "gemini", false, false));
        history.record(entry(4, "openai", true, false));

        let metrics = history.metrics();

        assert_eq!(metrics.total_requests, 4);
        assert_eq!(metrics.successful_requests, 3);
        assert!((metrics.success_rate - 0.75).abs() < 1e-9);
        assert!((metrics.cache_hit_rate - 0.25).abs() < 1e-9);
        assert!((metrics.average_latency_ms - 100.0).abs() < 1e-9);
        let openai_share = metrics.provider_share.get("openai").copied().unwrap_or_default();
        assert!((openai_share - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_history_has_zero_metrics() {
        assert_eq!(ExecutionHistory::default().metrics(), OrchestratorMetrics::default());
    }
}
