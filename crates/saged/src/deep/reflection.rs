//! REFLECT: one note per round deciding whether the loop continues.

use async_trait::async_trait;
use sage_shared::{FollowupAction, ReasoningStep, ReflectionNote, StageName, ToolCallRecord};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::tool_orchestration::calls_for_round;
use crate::error::StageError;
use crate::llm::{extract_json_object, LlmClient, LlmRequest, Purpose};
use crate::pipeline::memory::keys;
use crate::pipeline::{PipelineContext, Stage};
use crate::prompts::{self, DeepState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReflectReply {
    #[serde(default)]
    contradiction: bool,
    followup_action: FollowupAction,
    #[serde(default)]
    observation: String,
    #[serde(default)]
    unresolved_claims: Vec<String>,
}

pub fn parse_note(round: u32, raw: &str) -> Option<ReflectionNote> {
    let reply: ReflectReply = serde_json::from_value(extract_json_object(raw)?).ok()?;
    let mut note = ReflectionNote::new(round, reply.followup_action, reply.observation.trim());
    note.contradiction_flag = reply.contradiction;
    note.unresolved_claims = reply
        .unresolved_claims
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    Some(note)
}

/// Tool calls whose last attempt failed, in call order.
fn failed_calls(calls: &[ToolCallRecord]) -> Vec<&ToolCallRecord> {
    calls
        .iter()
        .enumerate()
        .filter(|(i, call)| {
            !call.success
                && !calls[i + 1..]
                    .iter()
                    .any(|later| later.tool_name == call.tool_name)
        })
        .map(|(_, call)| call)
        .collect()
}

/// Note derived from the round's own artifacts, used when the model's
/// critique is unavailable.
pub fn rule_based_note(
    round: u32,
    step: Option<&ReasoningStep>,
    round_calls: &[ToolCallRecord],
    tools_enabled: bool,
    confidence_threshold: f64,
) -> ReflectionNote {
    let step = match step.filter(|s| s.has_output()) {
        Some(step) => step,
        None => {
            return ReflectionNote::new(
                round,
                FollowupAction::Retry,
                format!("round {} produced no usable reasoning", round),
            )
        }
    };

    let failed = failed_calls(round_calls);
    if !failed.is_empty() {
        let mut note = ReflectionNote::new(
            round,
            FollowupAction::Retry,
            format!("{} tool call(s) failed this round", failed.len()),
        );
        note.unresolved_claims = failed
            .iter()
            .map(|call| {
                let reason = call
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                format!("could not confirm with {}: {}", call.tool_name, reason)
            })
            .collect();
        return note;
    }

    if step.evidence_gap && round_calls.is_empty() {
        if !tools_enabled {
            let mut note = ReflectionNote::new(
                round,
                FollowupAction::Proceed,
                "evidence gap cannot be filled without tools",
            );
            note.unresolved_claims = vec![step.hypothesis.clone()];
            return note;
        }
        return ReflectionNote::new(
            round,
            FollowupAction::Continue,
            "evidence gap flagged but no tool was called",
        );
    }

    if step.confidence >= confidence_threshold {
        return ReflectionNote::new(
            round,
            FollowupAction::Proceed,
            format!("confidence {:.2} meets threshold", step.confidence),
        );
    }
    ReflectionNote::new(
        round,
        FollowupAction::Continue,
        format!("confidence {:.2} below threshold", step.confidence),
    )
}

/// Fallback note for the latest round of `ctx`.
pub fn fallback_note_for(ctx: &PipelineContext, round: u32, confidence_threshold: f64) -> ReflectionNote {
    let step = ctx.list(keys::REASONING).iter().rev().find(|s| s.round == round);
    rule_based_note(
        round,
        step,
        calls_for_round(ctx, round),
        ctx.policy.tools_enabled(),
        confidence_threshold,
    )
}

pub struct ReflectionStage {
    llm: Arc<dyn LlmClient>,
    confidence_threshold: f64,
    timeout: Duration,
}

impl ReflectionStage {
    pub fn new(llm: Arc<dyn LlmClient>, confidence_threshold: f64, timeout: Duration) -> Self {
        Self {
            llm,
            confidence_threshold,
            timeout,
        }
    }
}

#[async_trait]
impl Stage for ReflectionStage {
    fn name(&self) -> &'static str {
        "reflection"
    }

    fn is_enabled(&self, ctx: &PipelineContext) -> bool {
        let round = match ctx.list(keys::REASONING).last() {
            Some(step) => step.round,
            None => return false,
        };
        !ctx.list(keys::REFLECTIONS).iter().any(|n| n.round == round)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn process(&self, ctx: &mut PipelineContext) -> Result<(), StageError> {
        let round = match ctx.list(keys::REASONING).last() {
            Some(step) => step.round,
            None => return Ok(()),
        };

        let prompt = prompts::reflect_prompt(
            &ctx.request.question,
            &DeepState {
                plan: ctx.get(keys::PLAN),
                steps: ctx.list(keys::REASONING),
                notes: ctx.list(keys::REFLECTIONS),
                tool_calls: calls_for_round(ctx, round),
            },
        );
        let request = LlmRequest::new(Purpose::Reflect, prompts::REFLECT_SYSTEM, prompt)
            .with_model(ctx.request.model.clone())
            .expect_json();

        let note = match self.llm.complete(&request).await {
            Ok(raw) => match parse_note(round, &raw) {
                Some(note) => note,
                None => {
                    warn!("[deep] reflection reply unusable, using rule-based note");
                    fallback_note_for(ctx, round, self.confidence_threshold)
                }
            },
            Err(e) => {
                warn!("[deep] reflection failed, using rule-based note: {}", e);
                fallback_note_for(ctx, round, self.confidence_threshold)
            }
        };

        let payload =
            serde_json::to_value(&note).map_err(|e| StageError::Internal(e.to_string()))?;
        let message = format!("round {}: {}", round, note.followup_action);
        ctx.append(keys::REFLECTIONS, note);
        ctx.emit(StageName::Reflection, message, payload).await
    }
}
