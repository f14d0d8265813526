//! TOOL_ORCH: the round's requested tool calls, run concurrently.
//!
//! Calls are authorized one by one first, so a blocked call never reaches
//! the invoker. Authorized calls run as spawned tasks under a semaphore and
//! their results are reported in request order. If the stage is dropped
//! (timeout or disconnect) the tasks are detached, not aborted, and their
//! results are discarded.

use async_trait::async_trait;
use sage_shared::StageName;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::StageError;
use crate::pipeline::memory::keys;
use crate::pipeline::{PipelineContext, Stage};
use crate::stages::tool_dispatch::{tool_result_payload, tool_start_payload};
use crate::tools::ToolDispatcher;

/// Slice of `tools.calls` produced by one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundCalls {
    pub round: u32,
    pub start: usize,
    pub end: usize,
}

/// Tool call records made in `round`, empty when the round called nothing.
pub fn calls_for_round(ctx: &PipelineContext, round: u32) -> &[sage_shared::ToolCallRecord] {
    let calls = ctx.list(keys::TOOL_CALLS);
    ctx.list(keys::ROUND_CALLS)
        .iter()
        .find(|marker| marker.round == round)
        .and_then(|marker| calls.get(marker.start..marker.end))
        .unwrap_or(&[])
}

pub struct ToolOrchestrationStage {
    dispatcher: Arc<ToolDispatcher>,
    max_calls: usize,
    max_concurrent: usize,
    timeout: Duration,
}

impl ToolOrchestrationStage {
    pub fn new(
        dispatcher: Arc<ToolDispatcher>,
        max_calls: usize,
        max_concurrent: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            dispatcher,
            max_calls,
            max_concurrent: max_concurrent.max(1),
            timeout,
        }
    }
}

#[async_trait]
impl Stage for ToolOrchestrationStage {
    fn name(&self) -> &'static str {
        "tool_orchestration"
    }

    fn is_enabled(&self, ctx: &PipelineContext) -> bool {
        ctx.policy.tools_enabled()
            && ctx
                .list(keys::REASONING)
                .last()
                .map(|step| step.evidence_gap)
                .unwrap_or(false)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn process(&self, ctx: &mut PipelineContext) -> Result<(), StageError> {
        let round = match ctx.list(keys::REASONING).last() {
            Some(step) => step.round,
            None => return Ok(()),
        };
        let requests: Vec<_> = ctx
            .list(keys::PENDING_TOOLS)
            .iter()
            .filter(|call| call.round == round)
            .take(self.max_calls)
            .cloned()
            .collect();
        if requests.is_empty() {
            debug!("[deep] round {} flagged a gap but requested no tools", round);
            return Ok(());
        }

        let access = ctx.tool_access();
        let mut authorized = Vec::new();
        for request in requests {
            match self.dispatcher.authorize(&access, &request.tool).await {
                Ok(tool) => authorized.push((tool, request.args)),
                Err(rejection) => {
                    warn!("[deep] {} rejected: {}", request.tool, rejection);
                    let err = StageError::from(rejection);
                    ctx.emit_error(err.code(), self.name(), &err.to_string(), false)
                        .await?;
                }
            }
        }

        for (tool, args) in &authorized {
            ctx.emit(
                StageName::ToolCallStart,
                format!("calling {}", tool.name),
                tool_start_payload(tool, args),
            )
            .await?;
        }

        let start = ctx.list(keys::TOOL_CALLS).len();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let handles: Vec<_> = authorized
            .into_iter()
            .map(|(tool, args)| {
                let dispatcher = self.dispatcher.clone();
                let access = access.clone();
                let semaphore = semaphore.clone();
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let invocation = dispatcher.invoke(&access, &tool, args).await;
                    (tool.name, invocation)
                })
            })
            .collect();

        for handle in handles {
            match handle.await {
                Ok((tool_name, invocation)) => {
                    let payload = tool_result_payload(&tool_name, &invocation);
                    let message = if invocation.response.ok {
                        format!("{} succeeded", tool_name)
                    } else {
                        format!("{} failed", tool_name)
                    };
                    ctx.extend(keys::TOOL_CALLS, invocation.records);
                    ctx.emit(StageName::ToolCallResult, message, payload).await?;
                }
                Err(e) => {
                    warn!("[deep] tool task ended abnormally: {}", e);
                    ctx.emit_error(
                        sage_shared::ErrorCode::InternalError,
                        self.name(),
                        &e.to_string(),
                        false,
                    )
                    .await?;
                }
            }
        }

        let end = ctx.list(keys::TOOL_CALLS).len();
        ctx.append(keys::ROUND_CALLS, RoundCalls { round, start, end });
        Ok(())
    }
}
