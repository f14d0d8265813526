//! Policy vocabulary: trust scopes, tool tiers and execution modes.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ProtocolError;

/// Caller trust scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    Owner,
    General,
    Auto,
    PrivacySafe,
    PrivacyRequest,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "OWNER",
            Self::General => "GENERAL",
            Self::Auto => "AUTO",
            Self::PrivacySafe => "PRIVACY_SAFE",
            Self::PrivacyRequest => "PRIVACY_REQUEST",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Scope {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OWNER" => Ok(Self::Owner),
            "GENERAL" => Ok(Self::General),
            "AUTO" => Ok(Self::Auto),
            "PRIVACY_SAFE" => Ok(Self::PrivacySafe),
            "PRIVACY_REQUEST" => Ok(Self::PrivacyRequest),
            other => Err(ProtocolError::UnknownScope(other.to_string())),
        }
    }
}

/// Tool capability tier. Declaration order is the total order:
/// `None < TierA < TierAB < Full`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ToolTier {
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "TIER_A")]
    TierA,
    #[serde(rename = "TIER_A_B")]
    TierAB,
    #[serde(rename = "FULL")]
    Full,
}

impl Default for ToolTier {
    /// Tools that do not declare a tier require full access.
    fn default() -> Self {
        Self::Full
    }
}

impl std::fmt::Display for ToolTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "NONE",
            Self::TierA => "TIER_A",
            Self::TierAB => "TIER_A_B",
            Self::Full => "FULL",
        };
        write!(f, "{}", s)
    }
}

/// Execution strategy for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Fast,
    Deep,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fast => write!(f, "FAST"),
            Self::Deep => write!(f, "DEEP"),
        }
    }
}

/// Caller's mode preference carried on the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeHint {
    #[default]
    Auto,
    Fast,
    Deep,
}

/// Immutable capability descriptor derived from a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPolicy {
    pub allow_file: bool,
    pub allow_rag: bool,
    pub tool_access_level: ToolTier,
    pub max_tool_rounds: u32,
    pub allow_side_effect_tools: bool,
    pub preferred_mode: Mode,
}

impl ExecutionPolicy {
    /// Whether any tool may be called at all under this policy.
    pub fn tools_enabled(&self) -> bool {
        self.tool_access_level > ToolTier::None && self.max_tool_rounds > 0
    }
}
