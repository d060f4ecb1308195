//! Capability types: the closed set of AI operations a request can ask for.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Closed category of AI work carried by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityType {
    Scoring,
    Enrichment,
    EmailGeneration,
    EmailAnalysis,
    InsightGeneration,
    CommunicationAnalysis,
    AutomationSuggestion,
    PredictiveAnalytics,
    RelationshipMapping,
}

impl CapabilityType {
    pub const ALL: [Self; 9] = [
        Self::Scoring,
        Self::Enrichment,
        Self::EmailGeneration,
        Self::EmailAnalysis,
        Self::InsightGeneration,
        Self::CommunicationAnalysis,
        Self::AutomationSuggestion,
        Self::PredictiveAnalytics,
        Self::RelationshipMapping,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scoring => "scoring",
            Self::Enrichment => "enrichment",
            Self::EmailGeneration => "email-generation",
            Self::EmailAnalysis => "email-analysis",
            Self::InsightGeneration => "insight-generation",
            Self::CommunicationAnalysis => "communication-analysis",
            Self::AutomationSuggestion => "automation-suggestion",
            Self::PredictiveAnalytics => "predictive-analytics",
            Self::RelationshipMapping => "relationship-mapping",
        }
    }

    /// Server-side function that serves this capability on a proxied backend.
    pub const fn proxied_endpoint(self) -> &'static str {
        match self {
            Self::Scoring | Self::Enrichment | Self::RelationshipMapping => "ai-enrichment",
            Self::EmailGeneration => "smart-email-composer",
            Self::EmailAnalysis | Self::CommunicationAnalysis => "email-analyzer",
            Self::InsightGeneration => "ai-insights",
            Self::AutomationSuggestion => "automation-ai",
            Self::PredictiveAnalytics => "sales-forecasting",
        }
    }
}

impl Display for CapabilityType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityType {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|capability| capability.as_str() == normalized)
            .ok_or_else(|| ParseError::InvalidCapability {
                value: value.to_owned(),
            })
    }
}
