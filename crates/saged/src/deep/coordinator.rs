//! The bounded deep reasoning loop.
//!
//! ```text
//! REASON -> [TOOL_ORCH] -> REFLECT -> (REASON | exit)
//! ```
//!
//! Sub-stages run through the same `run_stage` as top-level stages, so each
//! has its own timeout and reports its own failures. The round cap is
//! `min(policy.max_tool_rounds, deep.round_cap)` and always ends the loop.
//! Every round leaves exactly one step and one note, even when a sub-stage
//! failed. The verification report is built once the loop exits.

use async_trait::async_trait;
use sage_shared::{FollowupAction, ReasoningStep, StageName};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::reflection::{fallback_note_for, ReflectionStage};
use super::reasoning::ReasoningStage;
use super::tool_orchestration::ToolOrchestrationStage;
use super::verification::verify;
use crate::config::DeepConfig;
use crate::error::StageError;
use crate::pipeline::memory::keys;
use crate::pipeline::runner::{run_stage, StageOutcome};
use crate::pipeline::{PipelineContext, Stage};

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    RoundCap,
    Proceed,
    Confident,
}

impl LoopExit {
    fn as_str(&self) -> &'static str {
        match self {
            LoopExit::RoundCap => "round_cap",
            LoopExit::Proceed => "proceed",
            LoopExit::Confident => "confident",
        }
    }
}

pub struct DeepReasoningCoordinator {
    reasoning: ReasoningStage,
    tool_orchestration: ToolOrchestrationStage,
    reflection: ReflectionStage,
    round_cap: u32,
    confidence_threshold: f64,
    timeout: Duration,
}

impl DeepReasoningCoordinator {
    pub fn new(
        reasoning: ReasoningStage,
        tool_orchestration: ToolOrchestrationStage,
        reflection: ReflectionStage,
        config: &DeepConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            reasoning,
            tool_orchestration,
            reflection,
            round_cap: config.round_cap,
            confidence_threshold: config.confidence_threshold,
            timeout,
        }
    }

    pub fn round_cap_for(&self, ctx: &PipelineContext) -> u32 {
        ctx.policy.max_tool_rounds.min(self.round_cap)
    }

    async fn run_round(&self, ctx: &mut PipelineContext, round: u32) -> Result<(), StageError> {
        if run_stage(&self.reasoning, ctx).await == StageOutcome::Cancelled {
            return Err(StageError::Cancelled);
        }
        if ctx.list(keys::REASONING).len() < round as usize {
            ctx.append(keys::REASONING, ReasoningStep::degraded(round));
        }

        if run_stage(&self.tool_orchestration, ctx).await == StageOutcome::Cancelled {
            return Err(StageError::Cancelled);
        }

        if run_stage(&self.reflection, ctx).await == StageOutcome::Cancelled {
            return Err(StageError::Cancelled);
        }
        if !ctx.list(keys::REFLECTIONS).iter().any(|n| n.round == round) {
            let note = fallback_note_for(ctx, round, self.confidence_threshold);
            ctx.append(keys::REFLECTIONS, note);
        }
        Ok(())
    }

    fn exit_after(&self, ctx: &PipelineContext, round: u32, cap: u32) -> Option<LoopExit> {
        let action = ctx
            .list(keys::REFLECTIONS)
            .iter()
            .rev()
            .find(|n| n.round == round)
            .map(|n| n.followup_action);
        if action == Some(FollowupAction::Proceed) {
            return Some(LoopExit::Proceed);
        }
        // A retry request overrides the model's own confidence
        let step = ctx.list(keys::REASONING).iter().rev().find(|s| s.round == round);
        if let Some(step) = step {
            if action != Some(FollowupAction::Retry)
                && step.has_output()
                && step.confidence >= self.confidence_threshold
                && !step.evidence_gap
            {
                return Some(LoopExit::Confident);
            }
        }
        if round >= cap {
            return Some(LoopExit::RoundCap);
        }
        None
    }
}

#[async_trait]
impl Stage for DeepReasoningCoordinator {
    fn name(&self) -> &'static str {
        "deep_reasoning"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn process(&self, ctx: &mut PipelineContext) -> Result<(), StageError> {
        let cap = self.round_cap_for(ctx);
        let mut exit = LoopExit::RoundCap;
        let mut rounds = 0;

        for round in 1..=cap {
            self.run_round(ctx, round).await?;
            rounds = round;
            if let Some(reason) = self.exit_after(ctx, round, cap) {
                exit = reason;
                break;
            }
            debug!("[deep] round {} continues", round);
        }

        let report = verify(
            ctx.list(keys::REASONING),
            ctx.list(keys::REFLECTIONS),
            ctx.list(keys::TOOL_CALLS),
            cap,
        );
        info!(
            "[deep] {} round(s) of {}, exit {}, consistency {:.2}, verified {}",
            rounds,
            cap,
            exit.as_str(),
            report.consistency_score,
            report.verified
        );

        let mut payload =
            serde_json::to_value(&report).map_err(|e| StageError::Internal(e.to_string()))?;
        payload["rounds"] = serde_json::json!(rounds);
        payload["exit"] = serde_json::json!(exit.as_str());
        let message = if report.verified {
            "verified".to_string()
        } else {
            format!("{} issue(s)", report.issues.len())
        };
        ctx.put(keys::VERIFICATION, report)?;
        ctx.emit(StageName::Verification, message, payload).await
    }
}
