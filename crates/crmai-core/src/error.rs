use std::fmt::{Display, Formatter};
use std::time::Duration;

use thiserror::Error;

use crate::capability::CapabilityType;

const CAPABILITY_NAMES: &str = "scoring, enrichment, email-generation, email-analysis, \
    insight-generation, communication-analysis, automation-suggestion, predictive-analytics, \
    relationship-mapping";

/// Parsing errors for user-supplied identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid capability '{value}', expected one of {}", CAPABILITY_NAMES)]
    InvalidCapability { value: String },
    #[error("invalid priority '{value}', expected one of urgent, high, medium, low")]
    InvalidPriority { value: String },
    #[error(
        "invalid fallback strategy '{value}', expected one of direct_first, proxied_first, optimal"
    )]
    InvalidStrategy { value: String },
    #[error("provider override cannot be empty")]
    EmptyProviderOverride,
}

/// Classification of a single failed provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallErrorKind {
    Transport,
    Timeout,
    Status,
    RateLimited,
    InvalidReply,
    Unavailable,
}

/// Structured error from one backend attempt, consumed by the retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallError {
    kind: CallErrorKind,
    message: String,
    retryable: bool,
}

impl CallError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: CallErrorKind::Transport,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            kind: CallErrorKind::Timeout,
            message: format!("call did not complete within {} ms", after.as_millis()),
            retryable: true,
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        // 4xx other than 408/429 will not improve on retry
        let retryable = status >= 500 || status == 408 || status == 429;
        Self {
            kind: CallErrorKind::Status,
            message: format!("upstream returned status {status}: {}", message.into()),
            retryable,
        }
    }

    pub fn rate_limited(retry_after: Duration) -> Self {
        Self {
            kind: CallErrorKind::RateLimited,
            message: format!(
                "outbound rate budget exhausted, retry after {} ms",
                retry_after.as_millis()
            ),
            retryable: true,
        }
    }

    pub fn invalid_reply(message: impl Into<String>) -> Self {
        Self {
            kind: CallErrorKind::InvalidReply,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: CallErrorKind::Unavailable,
            message: message.into(),
            retryable: false,
        }
    }

    pub const fn kind(&self) -> CallErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            CallErrorKind::Transport => "call.transport",
            CallErrorKind::Timeout => "call.timeout",
            CallErrorKind::Status => "call.status",
            CallErrorKind::RateLimited => "call.rate_limited",
            CallErrorKind::InvalidReply => "call.invalid_reply",
            CallErrorKind::Unavailable => "call.unavailable",
        }
    }
}

impl Display for CallError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for CallError {}

/// Errors surfaced by the orchestrator to its callers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OrchestratorError {
    #[error("parameters for '{operation}' failed validation: {reason}")]
    Validation { operation: String, reason: String },

    #[error("no eligible provider for capability '{capability}'")]
    ProviderUnavailable { capability: CapabilityType },

    #[error("provider '{provider}' failed after {attempts} attempt(s)")]
    ProviderCallFailed {
        provider: String,
        attempts: u32,
        fallback_attempted: bool,
        #[source]
        cause: CallError,
    },

    #[error("could not normalize '{capability}' reply: {reason}")]
    Normalization {
        capability: CapabilityType,
        reason: String,
        raw: String,
    },

    #[error("unknown operation '{name}'")]
    UnknownOperation { name: String },

    #[error("scheduler has been shut down")]
    SchedulerStopped,

    #[error("scheduler is already running")]
    SchedulerRunning,
}

impl OrchestratorError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "dispatch.validation",
            Self::ProviderUnavailable { .. } => "provider.unavailable",
            Self::ProviderCallFailed { .. } => "provider.call_failed",
            Self::Normalization { .. } => "normalize.failed",
            Self::UnknownOperation { .. } => "dispatch.unknown_operation",
            Self::SchedulerStopped => "scheduler.stopped",
            Self::SchedulerRunning => "scheduler.running",
        }
    }

    /// Full message including the underlying call error, for logs and wire output.
    pub fn detail(&self) -> String {
        match self {
            Self::ProviderCallFailed { cause, .. } => format!("{self}: {cause}"),
            other => other.to_string(),
        }
    }
}
