//! PLAN: decompose the question once per deep run.

use async_trait::async_trait;
use sage_shared::{Plan, StageName};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

use crate::error::StageError;
use crate::llm::{extract_json_object, LlmClient, LlmRequest, Purpose};
use crate::pipeline::memory::keys;
use crate::pipeline::{PipelineContext, Stage};
use crate::prompts::{self, AnswerContext};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanReply {
    #[serde(default)]
    objective: String,
    #[serde(default)]
    constraints: Vec<String>,
    #[serde(default)]
    subtasks: Vec<String>,
    #[serde(default, alias = "success_criteria")]
    success_criteria: Vec<String>,
}

/// Plan from model output; `None` when nothing usable came back.
pub fn parse_plan(raw: &str) -> Option<Plan> {
    let reply: PlanReply = serde_json::from_value(extract_json_object(raw)?).ok()?;
    let objective = reply.objective.trim().to_string();
    let subtasks: Vec<String> = reply
        .subtasks
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if objective.is_empty() || subtasks.is_empty() {
        return None;
    }
    Some(Plan {
        objective,
        constraints: reply.constraints,
        subtasks,
        success_criteria: reply.success_criteria,
        fallback: false,
    })
}

/// Always leaves a plan in memory; a failed planner yields the fallback plan.
pub struct PlanStage {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl PlanStage {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// The planner gets half the stage budget so the fallback plan still lands.
    fn llm_timeout(&self) -> Duration {
        self.timeout / 2
    }
}

#[async_trait]
impl Stage for PlanStage {
    fn name(&self) -> &'static str {
        "plan"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn process(&self, ctx: &mut PipelineContext) -> Result<(), StageError> {
        let prompt = prompts::plan_prompt(
            &ctx.request.question,
            &AnswerContext {
                history: ctx.list(keys::HISTORY),
                files: ctx.list(keys::FILES),
                passages: ctx.list(keys::RAG_CHUNKS),
                tool_calls: &[],
            },
        );
        let request = LlmRequest::new(Purpose::Plan, prompts::PLAN_SYSTEM, prompt)
            .with_model(ctx.request.model.clone())
            .expect_json();

        let plan = match timeout(self.llm_timeout(), self.llm.complete(&request)).await {
            Ok(Ok(raw)) => parse_plan(&raw).unwrap_or_else(|| {
                warn!("[deep] planner reply unusable, using fallback plan");
                Plan::fallback(&ctx.request.question)
            }),
            Ok(Err(e)) => {
                warn!("[deep] planner failed, using fallback plan: {}", e);
                Plan::fallback(&ctx.request.question)
            }
            Err(_) => {
                warn!(
                    "[deep] planner gave no reply within {}ms, using fallback plan",
                    self.llm_timeout().as_millis()
                );
                Plan::fallback(&ctx.request.question)
            }
        };

        let payload =
            serde_json::to_value(&plan).map_err(|e| StageError::Internal(e.to_string()))?;
        let message = if plan.fallback {
            "fallback plan".to_string()
        } else {
            format!("plan with {} subtask(s)", plan.subtasks.len())
        };
        ctx.put(keys::PLAN, plan)?;
        ctx.emit(StageName::Plan, message, payload).await
    }
}
