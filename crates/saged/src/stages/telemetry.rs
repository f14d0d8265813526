//! Run start and finish signals.

use async_trait::async_trait;
use sage_shared::{StageName, PROTOCOL_VERSION};
use std::sync::Arc;
use std::time::Duration;

use crate::error::StageError;
use crate::pipeline::memory::keys;
use crate::pipeline::{PipelineContext, Stage};
use crate::telemetry::TelemetrySink;

/// Emits the `start` envelope. Fatal: a run that cannot announce itself
/// does not continue.
pub struct TelemetryStartStage {
    sink: Arc<dyn TelemetrySink>,
    timeout: Duration,
}

impl TelemetryStartStage {
    pub fn new(sink: Arc<dyn TelemetrySink>, timeout: Duration) -> Self {
        Self { sink, timeout }
    }
}

#[async_trait]
impl Stage for TelemetryStartStage {
    fn name(&self) -> &'static str {
        "telemetry_start"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn is_fatal(&self) -> bool {
        true
    }

    async fn process(&self, ctx: &mut PipelineContext) -> Result<(), StageError> {
        self.sink.run_started(&ctx.run_info()).await;

        let payload = serde_json::json!({
            "runId": ctx.run_id,
            "parentRunId": ctx.parent_run_id,
            "scope": ctx.scope,
            "mode": ctx.mode,
            "policy": ctx.policy,
            "complexity": ctx.get(keys::COMPLEXITY).copied(),
            "toolProfile": ctx.tool_profile,
            "protocolVersion": PROTOCOL_VERSION,
        });
        let message = format!("{} run started", ctx.mode);
        ctx.emit(StageName::Start, message, payload).await
    }
}

/// Tells the telemetry sink the stage list is done. Emits no envelope; the
/// runner reports the terminal outcome after `answer_final`.
pub struct TelemetryFinalStage {
    sink: Arc<dyn TelemetrySink>,
    timeout: Duration,
}

impl TelemetryFinalStage {
    pub fn new(sink: Arc<dyn TelemetrySink>, timeout: Duration) -> Self {
        Self { sink, timeout }
    }
}

#[async_trait]
impl Stage for TelemetryFinalStage {
    fn name(&self) -> &'static str {
        "telemetry_final"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn process(&self, ctx: &mut PipelineContext) -> Result<(), StageError> {
        self.sink.stages_finished(&ctx.run_info(), &ctx.stats()).await;
        Ok(())
    }
}
