use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use quotegate_core::RemoteError;

use crate::NetworkOrigin;

/// Risk category produced by the risk-scoring collaborator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn is_elevated(&self) -> bool {
        *self >= RiskLevel::High
    }
}

impl core::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Signals sent along with a risk assessment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskContext {
    pub origin: Option<NetworkOrigin>,
    pub user_agent: String,
    pub timestamp: DateTime<Utc>,
}

/// External risk scoring.
///
/// The captcha policy belongs to the collaborator as well; the aggregator
/// only forwards the level it was given.
#[async_trait]
pub trait RiskAssessor: Send + Sync {
    async fn assess_risk(&self, identifier: &str, context: &RiskContext) -> Result<RiskLevel, RemoteError>;

    fn should_require_captcha(&self, level: RiskLevel) -> bool;
}
