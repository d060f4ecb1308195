//! Provider registry and scorer.
//!
//! The registry owns live per-provider state (availability, rate budget,
//! moving averages, circuit breaker). Selection is a pure function over
//! immutable [`ProviderSnapshot`]s so it can be tested without any backend.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::ProviderBackend;
use crate::capability::CapabilityType;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::error::{OrchestratorError, ParseError};
use crate::request::{AiRequest, Priority, ProviderOverride};

/// Smoothing factor for latency and success-rate moving averages.
pub const EMA_ALPHA: f64 = 0.1;

const COST_REFERENCE_PER_UNIT: f64 = 0.01;
const AFFINITY_BONUS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Called straight from this process via its native API.
    Direct,
    /// Reached through a server-side function.
    Proxied,
}

impl ProviderKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Proxied => "proxied",
        }
    }
}

impl Display for ProviderKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStats {
    pub avg_latency_ms: f64,
    pub success_rate: f64,
    pub cost_per_unit: f64,
}

impl Default for PerformanceStats {
    fn default() -> Self {
        Self {
            avg_latency_ms: 1_000.0,
            success_rate: 0.95,
            cost_per_unit: 0.0,
        }
    }
}

/// Static identity and initial estimates for one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderDescriptor {
    pub name: String,
    pub kind: ProviderKind,
    pub quota: u32,
    pub quota_window: Duration,
    pub performance: PerformanceStats,
    pub strengths: Vec<CapabilityType>,
    pub default_model: Option<String>,
}

impl ProviderDescriptor {
    pub fn new(name: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            name: name.into().to_ascii_lowercase(),
            kind,
            quota: 60,
            quota_window: Duration::from_secs(60),
            performance: PerformanceStats::default(),
            strengths: Vec::new(),
            default_model: None,
        }
    }

    pub fn direct(name: impl Into<String>) -> Self {
        Self::new(name, ProviderKind::Direct)
    }

    pub fn proxied(name: impl Into<String>) -> Self {
        Self::new(name, ProviderKind::Proxied)
    }

    pub fn with_quota(mut self, quota: u32, window: Duration) -> Self {
        self.quota = quota;
        self.quota_window = window;
        self
    }

    pub fn with_performance(
        mut self,
        avg_latency_ms: f64,
        success_rate: f64,
        cost_per_unit: f64,
    ) -> Self {
        self.performance = PerformanceStats {
            avg_latency_ms,
            success_rate,
            cost_per_unit,
        };
        self
    }

    pub fn with_strengths(mut self, strengths: impl IntoIterator<Item = CapabilityType>) -> Self {
        self.strengths = strengths.into_iter().collect();
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }
}

/// Remaining call budget in the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitState {
    pub remaining: u32,
    pub reset_at: Instant,
}

impl RateLimitState {
    /// An elapsed window counts as a full budget even before the next call restores it.
    pub fn has_budget(&self, now: Instant) -> bool {
        self.remaining > 0 || now >= self.reset_at
    }
}

/// Immutable view of one provider at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderSnapshot {
    pub name: String,
    pub kind: ProviderKind,
    pub available: bool,
    pub circuit: CircuitState,
    pub remaining: u32,
    pub quota: u32,
    #[serde(skip)]
    pub reset_at: Instant,
    pub performance: PerformanceStats,
    pub strengths: Vec<CapabilityType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl ProviderSnapshot {
    pub fn rate_limit(&self) -> RateLimitState {
        RateLimitState {
            remaining: self.remaining,
            reset_at: self.reset_at,
        }
    }

    /// Available, circuit not open, and budget left at `now`.
    pub fn is_eligible(&self, now: Instant) -> bool {
        self.available && self.circuit != CircuitState::Open && self.rate_limit().has_budget(now)
    }
}

/// What the scorer needs to know about a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionRequest {
    pub capability: CapabilityType,
    pub priority: Priority,
    pub provider_override: ProviderOverride,
}

impl From<&AiRequest> for SelectionRequest {
    fn from(request: &AiRequest) -> Self {
        Self {
            capability: request.capability,
            priority: request.priority,
            provider_override: request.options.provider_override.clone(),
        }
    }
}

/// Provider-class preference applied before scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    #[default]
    DirectFirst,
    ProxiedFirst,
    Optimal,
}

impl FallbackStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DirectFirst => "direct_first",
            Self::ProxiedFirst => "proxied_first",
            Self::Optimal => "optimal",
        }
    }

    const fn preferred_kind(self) -> Option<ProviderKind> {
        match self {
            Self::DirectFirst => Some(ProviderKind::Direct),
            Self::ProxiedFirst => Some(ProviderKind::Proxied),
            Self::Optimal => None,
        }
    }
}

impl Display for FallbackStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FallbackStrategy {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "direct_first" => Ok(Self::DirectFirst),
            "proxied_first" => Ok(Self::ProxiedFirst),
            "optimal" => Ok(Self::Optimal),
            _ => Err(ParseError::InvalidStrategy {
                value: value.to_owned(),
            }),
        }
    }
}

/// Selection score; higher is better.
///
/// `success_rate * 40 + (3000 - latency) / 100`, plus a cost bonus of up to 10
/// for low-priority work, +10 when the capability is one of the provider's
/// strengths, and a latency bonus for urgent work on providers under 2 s.
pub fn score_provider(snapshot: &ProviderSnapshot, request: &SelectionRequest) -> f64 {
    let performance = &snapshot.performance;
    let mut score =
        performance.success_rate * 40.0 + (3_000.0 - performance.avg_latency_ms) / 100.0;

    if request.priority == Priority::Low {
        let relative_cost = (performance.cost_per_unit / COST_REFERENCE_PER_UNIT).clamp(0.0, 1.0);
        score += 10.0 * (1.0 - relative_cost);
    }
    if snapshot.strengths.contains(&request.capability) {
        score += AFFINITY_BONUS;
    }
    if request.priority == Priority::Urgent {
        score += (2_000.0 - performance.avg_latency_ms).max(0.0) / 100.0;
    }
    score
}

/// Picks the provider for a request from `snapshots` (in registration order).
///
/// Ties go to the earlier-registered provider.
pub fn select_provider<'a>(
    snapshots: &'a [ProviderSnapshot],
    request: &SelectionRequest,
    strategy: FallbackStrategy,
    now: Instant,
) -> Result<&'a ProviderSnapshot, OrchestratorError> {
    let eligible = snapshots
        .iter()
        .filter(|snapshot| snapshot.is_eligible(now))
        .collect::<Vec<_>>();

    if let Some(name) = request.provider_override.named() {
        if let Some(snapshot) = eligible.iter().find(|snapshot| snapshot.name == name) {
            return Ok(*snapshot);
        }
    }

    let preferred = strategy
        .preferred_kind()
        .map(|kind| {
            eligible
                .iter()
                .copied()
                .filter(|snapshot| snapshot.kind == kind)
                .collect::<Vec<_>>()
        })
        .filter(|preferred| !preferred.is_empty());
    let candidates = preferred.unwrap_or(eligible);

    highest_scoring(candidates, request).ok_or(OrchestratorError::ProviderUnavailable {
        capability: request.capability,
    })
}

/// Best eligible provider of `kind`, excluding `exclude`.
pub fn select_of_kind<'a>(
    snapshots: &'a [ProviderSnapshot],
    request: &SelectionRequest,
    kind: ProviderKind,
    exclude: &str,
    now: Instant,
) -> Option<&'a ProviderSnapshot> {
    let candidates = snapshots
        .iter()
        .filter(|snapshot| {
            snapshot.kind == kind && snapshot.name != exclude && snapshot.is_eligible(now)
        })
        .collect();
    highest_scoring(candidates, request)
}

fn highest_scoring<'a>(
    candidates: Vec<&'a ProviderSnapshot>,
    request: &SelectionRequest,
) -> Option<&'a ProviderSnapshot> {
    let mut best: Option<(&ProviderSnapshot, f64)> = None;
    for candidate in candidates {
        let score = score_provider(candidate, request);
        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((candidate, score));
        }
    }
    best.map(|(snapshot, _)| snapshot)
}

/// Result of one completed attempt, fed back into the registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttemptReport {
    pub latency: Duration,
    pub success: bool,
}

#[derive(Debug)]
struct ProviderState {
    available: bool,
    rate_limit: RateLimitState,
    performance: PerformanceStats,
}

struct ProviderEntry {
    descriptor: ProviderDescriptor,
    state: Mutex<ProviderState>,
    breaker: CircuitBreaker,
    backend: Arc<dyn ProviderBackend>,
}

impl ProviderEntry {
    fn state(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> ProviderSnapshot {
        let state = self.state();
        ProviderSnapshot {
            name: self.descriptor.name.clone(),
            kind: self.descriptor.kind,
            available: state.available,
            circuit: self.breaker.state(),
            remaining: state.rate_limit.remaining,
            quota: self.descriptor.quota,
            reset_at: state.rate_limit.reset_at,
            performance: state.performance,
            strengths: self.descriptor.strengths.clone(),
            default_model: self.descriptor.default_model.clone(),
        }
    }
}

/// Live registry of every configured provider, in registration order.
pub struct ProviderRegistry {
    entries: Vec<ProviderEntry>,
    breaker_config: CircuitBreakerConfig,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field(
                "providers",
                &self
                    .entries
                    .iter()
                    .map(|entry| entry.descriptor.name.as_str())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl ProviderRegistry {
    pub fn new(breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            entries: Vec::new(),
            breaker_config,
        }
    }

    /// Registers a provider. A later registration with the same name replaces the earlier one.
    pub fn register(&mut self, descriptor: ProviderDescriptor, backend: Arc<dyn ProviderBackend>) {
        let state = ProviderState {
            available: true,
            rate_limit: RateLimitState {
                remaining: descriptor.quota,
                reset_at: Instant::now() + descriptor.quota_window,
            },
            performance: descriptor.performance,
        };
        let entry = ProviderEntry {
            descriptor,
            state: Mutex::new(state),
            breaker: CircuitBreaker::new(self.breaker_config),
            backend,
        };

        match self
            .entries
            .iter_mut()
            .find(|existing| existing.descriptor.name == entry.descriptor.name)
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshots(&self) -> Vec<ProviderSnapshot> {
        self.entries.iter().map(ProviderEntry::snapshot).collect()
    }

    pub fn snapshot(&self, name: &str) -> Option<ProviderSnapshot> {
        self.entry(name).map(ProviderEntry::snapshot)
    }

    pub fn backend(&self, name: &str) -> Option<Arc<dyn ProviderBackend>> {
        self.entry(name).map(|entry| Arc::clone(&entry.backend))
    }

    pub fn default_model(&self, name: &str) -> Option<String> {
        self.entry(name)
            .and_then(|entry| entry.descriptor.default_model.clone())
    }

    /// Returns false when no provider has that name.
    pub fn set_available(&self, name: &str, available: bool) -> bool {
        let Some(entry) = self.entry(name) else {
            return false;
        };
        entry.state().available = available;
        debug!(provider = name, available, "provider availability changed");
        true
    }

    /// Admits one call to `name` if it is available, has budget and its circuit
    /// lets the call through. In half-open state this claims the single trial call.
    pub fn try_admit(&self, name: &str, now: Instant) -> bool {
        let Some(entry) = self.entry(name) else {
            return false;
        };
        {
            let state = entry.state();
            if !state.available || !state.rate_limit.has_budget(now) {
                return false;
            }
        }
        entry.breaker.try_acquire()
    }

    /// Applies one attempt's outcome: consumes budget, updates averages and the breaker.
    pub fn update_performance(&self, name: &str, report: AttemptReport) {
        let Some(entry) = self.entry(name) else {
            return;
        };

        {
            let mut state = entry.state();
            let now = Instant::now();
            if now >= state.rate_limit.reset_at {
                state.rate_limit = RateLimitState {
                    remaining: entry.descriptor.quota,
                    reset_at: now + entry.descriptor.quota_window,
                };
            }
            state.rate_limit.remaining = state.rate_limit.remaining.saturating_sub(1);

            let latency_ms = report.latency.as_secs_f64() * 1_000.0;
            let outcome = if report.success { 1.0 } else { 0.0 };
            let performance = &mut state.performance;
            performance.avg_latency_ms = ema(performance.avg_latency_ms, latency_ms);
            performance.success_rate = ema(performance.success_rate, outcome);
        }

        if report.success {
            entry.breaker.record_success();
        } else {
            entry.breaker.record_failure();
        }
    }

    /// Cost of a reply given its reported usage.
    pub fn cost_for(&self, name: &str, usage_units: f64) -> Option<f64> {
        self.entry(name)
            .map(|entry| usage_units * entry.state().performance.cost_per_unit)
    }

    fn entry(&self, name: &str) -> Option<&ProviderEntry> {
        self.entries
            .iter()
            .find(|entry| entry.descriptor.name.eq_ignore_ascii_case(name))
    }
}

fn ema(previous: f64, sample: f64) -> f64 {
    EMA_ALPHA * sample + (1.0 - EMA_ALPHA) * previous
}
