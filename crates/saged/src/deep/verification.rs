//! Verification report built once after the loop.
//!
//! Consistency is one minus the mean per-round penalty: a contradiction costs
//! 1.0, a retry request 0.5. A run with no completed round scores 0.

use chrono::Utc;
use sage_shared::reasoning::clamp_unit;
use sage_shared::{FollowupAction, ReasoningStep, ReflectionNote, ToolCallRecord, VerificationReport};

const CONTRADICTION_PENALTY: f64 = 1.0;
const RETRY_PENALTY: f64 = 0.5;

/// Lowest consistency a report can have and still be verified.
pub const VERIFIED_MIN_CONSISTENCY: f64 = 0.75;

pub fn consistency_score(notes: &[ReflectionNote]) -> f64 {
    if notes.is_empty() {
        return 0.0;
    }
    let penalty: f64 = notes
        .iter()
        .map(|note| {
            if note.contradiction_flag {
                CONTRADICTION_PENALTY
            } else if note.followup_action == FollowupAction::Retry {
                RETRY_PENALTY
            } else {
                0.0
            }
        })
        .sum();
    clamp_unit(1.0 - penalty / notes.len() as f64)
}

pub fn verify(
    steps: &[ReasoningStep],
    notes: &[ReflectionNote],
    calls: &[ToolCallRecord],
    round_cap: u32,
) -> VerificationReport {
    let consistency = consistency_score(notes);

    let contradictions: Vec<String> = notes
        .iter()
        .filter(|n| n.contradiction_flag)
        .map(|n| format!("round {}: {}", n.round, n.observation))
        .collect();

    let mut factuality_flags: Vec<String> = Vec::new();
    for call in calls.iter().filter(|c| !c.success) {
        let superseded = calls
            .iter()
            .any(|c| c.success && c.tool_name == call.tool_name && c.timestamp >= call.timestamp);
        let flag = format!(
            "{} returned no evidence: {}",
            call.tool_name,
            call.error.as_ref().map(|e| e.to_string()).unwrap_or_default()
        );
        if !superseded && !factuality_flags.contains(&flag) {
            factuality_flags.push(flag);
        }
    }

    let mut unresolved_claims: Vec<String> = Vec::new();
    for claim in notes.iter().flat_map(|n| n.unresolved_claims.iter()) {
        if !unresolved_claims.contains(claim) {
            unresolved_claims.push(claim.clone());
        }
    }

    let mut issues: Vec<String> = Vec::new();
    let mut recommendations: Vec<String> = Vec::new();

    if notes.is_empty() {
        issues.push("no reasoning round completed".to_string());
    }
    issues.extend(contradictions.iter().map(|c| format!("contradiction in {}", c)));
    issues.extend(factuality_flags.iter().cloned());
    let degraded = steps.iter().filter(|s| !s.has_output()).count();
    if degraded > 0 {
        issues.push(format!("{} round(s) produced no reasoning output", degraded));
    }
    let outstanding = notes
        .last()
        .map(|n| n.followup_action != FollowupAction::Proceed)
        .unwrap_or(false);
    let cap_reached = round_cap > 0 && notes.len() as u32 >= round_cap;
    if cap_reached && outstanding {
        issues.push(format!(
            "round cap of {} reached with outstanding follow-up",
            round_cap
        ));
        recommendations.push("narrow the question or allow more reasoning rounds".to_string());
    }
    if !unresolved_claims.is_empty() {
        issues.push(format!("{} claim(s) left unresolved", unresolved_claims.len()));
    }
    if !contradictions.is_empty() {
        recommendations.push("review the conflicting hypotheses before relying on the answer".to_string());
    }
    if !factuality_flags.is_empty() {
        recommendations.push("retry the failed tools or check the tool service".to_string());
    }

    let last_confidence = steps
        .iter()
        .rev()
        .find(|s| s.has_output())
        .map(|s| s.confidence)
        .unwrap_or(0.0);

    VerificationReport {
        consistency_score: consistency,
        contradictions,
        factuality_flags,
        unresolved_claims,
        verified: issues.is_empty() && consistency >= VERIFIED_MIN_CONSISTENCY,
        issues,
        recommendations,
        confidence: clamp_unit(last_confidence * consistency),
        timestamp: Utc::now(),
    }
}
