//! Stage scheduler.
//!
//! Runs an ordered stage list against one context. Each enabled stage runs
//! under its timeout while the client connection is watched. A non-fatal
//! failure becomes one `error` envelope and the run continues; a fatal one
//! becomes a terminal `error` envelope and the run stops. A completed list
//! ends with exactly one `answer_final`.

use sage_shared::envelope::FinalPayload;
use sage_shared::{ErrorCode, StageName};
use std::sync::Arc;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use super::context::PipelineContext;
use super::memory::keys;
use super::stage::Stage;
use crate::error::StageError;
use crate::telemetry::{RunOutcome, TelemetrySink};

/// Answer used when no stage produced one.
pub const PLACEHOLDER_ANSWER: &str =
    "I could not put together an answer to this question. Please try again or rephrase it.";

/// Result of running a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    Skipped,
    Degraded(ErrorCode),
    Fatal(ErrorCode),
    Cancelled,
}

/// Run one stage: enablement check, timeout, disconnect watch, error report.
pub async fn run_stage(stage: &dyn Stage, ctx: &mut PipelineContext) -> StageOutcome {
    let name = stage.name();
    if ctx.is_cancelled() {
        ctx.mark_cancelled();
        return StageOutcome::Cancelled;
    }
    if !stage.is_enabled(ctx) {
        debug!("[stage] {} skipped", name);
        return StageOutcome::Skipped;
    }

    let limit = stage.timeout();
    let watch = ctx.disconnect_watch();
    let started = Instant::now();

    let result = tokio::select! {
        result = timeout(limit, stage.process(ctx)) => match result {
            Ok(result) => result,
            Err(_) => Err(StageError::Timeout(limit.as_millis() as u64)),
        },
        _ = watch.closed() => Err(StageError::Cancelled),
    };
    drop(watch);
    let elapsed = started.elapsed().as_millis();

    let err = match result {
        Ok(()) => {
            debug!("[stage] {} done in {}ms", name, elapsed);
            return StageOutcome::Completed;
        }
        Err(err) => err,
    };

    if err.is_cancelled() {
        info!("[stage] client disconnected during {}", name);
        ctx.mark_cancelled();
        return StageOutcome::Cancelled;
    }

    let code = err.code();
    let fatal = stage.is_fatal();
    if fatal {
        error!("[stage] {} failed after {}ms: {}", name, elapsed, err);
    } else {
        warn!("[stage] {} degraded after {}ms: {}", name, elapsed, err);
    }
    ctx.mark_degraded(name);

    if ctx.emit_error(code, name, &err.to_string(), fatal).await.is_err() {
        return StageOutcome::Cancelled;
    }
    if fatal {
        StageOutcome::Fatal(code)
    } else {
        StageOutcome::Degraded(code)
    }
}

pub struct PipelineRunner {
    stages: Vec<Arc<dyn Stage>>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl PipelineRunner {
    pub fn new(stages: Vec<Arc<dyn Stage>>, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self { stages, telemetry }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, mut ctx: PipelineContext) -> RunOutcome {
        let mut outcome = RunOutcome::Completed;
        for stage in &self.stages {
            match run_stage(stage.as_ref(), &mut ctx).await {
                StageOutcome::Cancelled => {
                    outcome = RunOutcome::Cancelled;
                    break;
                }
                StageOutcome::Fatal(_) => {
                    outcome = RunOutcome::Failed;
                    break;
                }
                _ => {}
            }
        }

        if outcome == RunOutcome::Completed && emit_final(&mut ctx).await.is_err() {
            debug!("[run] {} lost its client at answer_final", ctx.run_id);
            outcome = RunOutcome::Cancelled;
        }

        self.telemetry
            .run_finished(&ctx.run_info(), outcome, &ctx.stats())
            .await;

        info!(
            "[run] {} {} ({} envelopes, {}ms)",
            ctx.run_id,
            outcome,
            ctx.seq(),
            ctx.elapsed_ms()
        );
        outcome
    }
}

async fn emit_final(ctx: &mut PipelineContext) -> Result<(), StageError> {
    let answer = ctx
        .get(keys::ANSWER)
        .filter(|a| !a.trim().is_empty())
        .cloned();
    let placeholder = answer
        .as_deref()
        .map_or(true, |a| a.starts_with(PLACEHOLDER_ANSWER));
    let payload = FinalPayload {
        answer: answer.unwrap_or_else(|| PLACEHOLDER_ANSWER.to_string()),
        run_id: ctx.run_id.clone(),
        mode: ctx.mode,
        placeholder,
        degraded_stages: ctx.degraded_stages().to_vec(),
    };
    let payload =
        serde_json::to_value(&payload).map_err(|e| StageError::Internal(e.to_string()))?;
    ctx.emit(StageName::AnswerFinal, "answer complete", payload)
        .await
}
