//! Artifacts produced by the deep reasoning path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Decomposition of the question produced once per deep run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub objective: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub subtasks: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    /// True when the planner failed and this is the minimal substitute
    #[serde(default)]
    pub fallback: bool,
}

/// Objective length kept in a fallback plan.
pub const FALLBACK_OBJECTIVE_CHARS: usize = 200;

impl Plan {
    /// Minimal plan used when planning fails.
    pub fn fallback(question: &str) -> Self {
        let objective: String = question.trim().chars().take(FALLBACK_OBJECTIVE_CHARS).collect();
        Self {
            objective,
            constraints: Vec::new(),
            subtasks: vec!["direct response".to_string()],
            success_criteria: Vec::new(),
            fallback: true,
        }
    }
}

/// One reasoning round's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningStep {
    pub round: u32,
    pub hypothesis: String,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
    /// Clamped to [0, 1]
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    /// The round needs tool evidence before it can conclude
    #[serde(default)]
    pub evidence_gap: bool,
}

impl ReasoningStep {
    pub fn new(round: u32, hypothesis: impl Into<String>, confidence: f64) -> Self {
        Self {
            round,
            hypothesis: hypothesis.into(),
            evidence_refs: Vec::new(),
            confidence: clamp_unit(confidence),
            timestamp: Utc::now(),
            evidence_gap: false,
        }
    }

    /// Placeholder step for a round whose reasoning call failed.
    pub fn degraded(round: u32) -> Self {
        Self::new(round, String::new(), 0.0)
    }

    pub fn has_output(&self) -> bool {
        !self.hypothesis.trim().is_empty()
    }
}

/// What reflection wants the loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowupAction {
    Continue,
    Retry,
    Proceed,
}

impl std::fmt::Display for FollowupAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::Retry => write!(f, "retry"),
            Self::Proceed => write!(f, "proceed"),
        }
    }
}

/// Exactly one per completed round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectionNote {
    pub contradiction_flag: bool,
    pub followup_action: FollowupAction,
    pub observation: String,
    pub round: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub unresolved_claims: Vec<String>,
}

impl ReflectionNote {
    pub fn new(round: u32, followup_action: FollowupAction, observation: impl Into<String>) -> Self {
        Self {
            contradiction_flag: false,
            followup_action,
            observation: observation.into(),
            round,
            timestamp: Utc::now(),
            unresolved_claims: Vec::new(),
        }
    }
}

/// Summary of the deep loop's consistency. At most one per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub consistency_score: f64,
    #[serde(default)]
    pub contradictions: Vec<String>,
    #[serde(default)]
    pub factuality_flags: Vec<String>,
    #[serde(default)]
    pub unresolved_claims: Vec<String>,
    pub verified: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

/// Clamp a score into [0, 1]; NaN becomes 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_plan_truncates_objective() {
        let question = "x".repeat(500);
        let plan = Plan::fallback(&question);
        assert_eq!(plan.objective.chars().count(), FALLBACK_OBJECTIVE_CHARS);
        assert_eq!(plan.subtasks, vec!["direct response".to_string()]);
        assert!(plan.fallback);
    }

    #[test]
    fn test_step_confidence_is_clamped() {
        assert_eq!(ReasoningStep::new(1, "h", 1.7).confidence, 1.0);
        assert_eq!(ReasoningStep::new(1, "h", -0.2).confidence, 0.0);
        assert_eq!(ReasoningStep::new(1, "h", f64::NAN).confidence, 0.0);
    }

    #[test]
    fn test_degraded_step_has_no_output() {
        assert!(!ReasoningStep::degraded(2).has_output());
    }

    #[test]
    fn test_followup_wire_names() {
        let action: FollowupAction = serde_json::from_str("\"proceed\"").unwrap();
        assert_eq!(action, FollowupAction::Proceed);
    }
}
