//! REASON: one hypothesis per round.

use async_trait::async_trait;
use sage_shared::{ReasoningStep, StageName};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::StageError;
use crate::llm::{extract_json_object, LlmClient, LlmRequest, Purpose};
use crate::pipeline::memory::keys;
use crate::pipeline::{PipelineContext, Stage};
use crate::prompts::{self, DeepState};
use crate::tools::ToolDispatcher;

/// Confidence given to a prose reply that carried no JSON.
const PROSE_CONFIDENCE: f64 = 0.5;

/// A tool call requested by a reasoning round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedToolCall {
    pub round: u32,
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallReply {
    tool: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepReply {
    #[serde(default)]
    hypothesis: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    evidence_refs: Vec<String>,
    #[serde(default)]
    evidence_gap: bool,
    #[serde(default)]
    tool_calls: Vec<ToolCallReply>,
}

/// Step and tool requests from model output.
pub fn parse_step(round: u32, raw: &str) -> (ReasoningStep, Vec<PlannedToolCall>) {
    let reply = extract_json_object(raw).and_then(|v| serde_json::from_value::<StepReply>(v).ok());
    match reply {
        Some(reply) if !reply.hypothesis.trim().is_empty() => {
            let mut step = ReasoningStep::new(round, reply.hypothesis.trim(), reply.confidence);
            step.evidence_refs = reply.evidence_refs;
            let calls: Vec<PlannedToolCall> = reply
                .tool_calls
                .into_iter()
                .filter(|c| !c.tool.trim().is_empty())
                .map(|c| PlannedToolCall {
                    round,
                    tool: c.tool.trim().to_string(),
                    args: if c.args.is_null() { serde_json::json!({}) } else { c.args },
                })
                .collect();
            step.evidence_gap = reply.evidence_gap || !calls.is_empty();
            (step, calls)
        }
        _ if !raw.trim().is_empty() && extract_json_object(raw).is_none() => {
            (ReasoningStep::new(round, raw.trim(), PROSE_CONFIDENCE), Vec::new())
        }
        _ => (ReasoningStep::degraded(round), Vec::new()),
    }
}

/// Appends exactly one step for the next round. The round number is one past
/// the steps already recorded.
pub struct ReasoningStage {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolDispatcher>,
    timeout: Duration,
}

impl ReasoningStage {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<ToolDispatcher>, timeout: Duration) -> Self {
        Self {
            llm,
            tools,
            timeout,
        }
    }
}

pub fn next_round(ctx: &PipelineContext) -> u32 {
    ctx.list(keys::REASONING).len() as u32 + 1
}

#[async_trait]
impl Stage for ReasoningStage {
    fn name(&self) -> &'static str {
        "reasoning"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn process(&self, ctx: &mut PipelineContext) -> Result<(), StageError> {
        let round = next_round(ctx);

        let tools = if ctx.policy.tools_enabled() {
            let access = ctx.tool_access();
            self.tools
                .registry()
                .ensure_fresh(access.scope, &access.profile, &access.trace_id, &access.session_id)
                .await
        } else {
            Arc::new(Vec::new())
        };

        let prompt = prompts::reason_prompt(
            &ctx.request.question,
            round,
            &DeepState {
                plan: ctx.get(keys::PLAN),
                steps: ctx.list(keys::REASONING),
                notes: ctx.list(keys::REFLECTIONS),
                tool_calls: ctx.list(keys::TOOL_CALLS),
            },
            &tools,
        );
        let request = LlmRequest::new(Purpose::Reason, prompts::REASON_SYSTEM, prompt)
            .with_model(ctx.request.model.clone())
            .expect_json();

        let raw = match self.llm.complete(&request).await {
            Ok(raw) => raw,
            Err(e) => {
                ctx.append(keys::REASONING, ReasoningStep::degraded(round));
                return Err(e.into());
            }
        };

        let (step, calls) = parse_step(round, &raw);
        if !step.has_output() {
            ctx.append(keys::REASONING, step);
            return Err(StageError::Internal(format!(
                "round {} reasoning reply was empty",
                round
            )));
        }

        debug!(
            "[deep] round {} confidence {:.2} gap {} ({} tool request(s))",
            round,
            step.confidence,
            step.evidence_gap,
            calls.len()
        );
        let payload = serde_json::json!({
            "round": round,
            "hypothesis": step.hypothesis,
            "confidence": step.confidence,
            "evidenceRefs": step.evidence_refs,
            "evidenceGap": step.evidence_gap,
            "requestedTools": calls.iter().map(|c| c.tool.as_str()).collect::<Vec<_>>(),
        });
        ctx.append(keys::REASONING, step);
        ctx.extend(keys::PENDING_TOOLS, calls);
        ctx.emit(StageName::Reasoning, format!("round {}", round), payload)
            .await
    }
}
