//! Run telemetry collaborator.
//!
//! Receives a start signal and exactly one terminal signal per run, including
//! runs the client abandoned. Completed is only reported once `answer_final`
//! reached the client.

use async_trait::async_trait;
use sage_shared::{Mode, Scope};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Identity of a run as reported to telemetry.
#[derive(Debug, Clone, Serialize)]
pub struct RunInfo {
    pub run_id: String,
    pub parent_run_id: Option<String>,
    pub trace_id: String,
    pub session_id: String,
    pub scope: Scope,
    pub mode: Mode,
}

/// Counters gathered over a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub envelopes: u64,
    pub tool_calls: usize,
    pub degraded_stages: Vec<String>,
    pub elapsed_ms: u64,
}

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn run_started(&self, run: &RunInfo);

    /// The stage list ran to its end; the final answer is not sent yet.
    async fn stages_finished(&self, _run: &RunInfo, _stats: &RunStats) {}

    async fn run_finished(&self, run: &RunInfo, outcome: RunOutcome, stats: &RunStats);
}

/// Sink that writes run lifecycle to the tracing log.
#[derive(Debug, Default)]
pub struct TracingTelemetry;

#[async_trait]
impl TelemetrySink for TracingTelemetry {
    async fn run_started(&self, run: &RunInfo) {
        info!(
            run_id = %run.run_id,
            trace_id = %run.trace_id,
            scope = %run.scope,
            mode = %run.mode,
            "[T]  run started"
        );
    }

    async fn stages_finished(&self, run: &RunInfo, stats: &RunStats) {
        debug!(
            run_id = %run.run_id,
            envelopes = stats.envelopes,
            "[T]  stages finished"
        );
    }

    async fn run_finished(&self, run: &RunInfo, outcome: RunOutcome, stats: &RunStats) {
        if outcome == RunOutcome::Completed {
            info!(
                run_id = %run.run_id,
                envelopes = stats.envelopes,
                tool_calls = stats.tool_calls,
                elapsed_ms = stats.elapsed_ms,
                "[T]  run {}",
                outcome
            );
        } else {
            warn!(
                run_id = %run.run_id,
                envelopes = stats.envelopes,
                degraded = ?stats.degraded_stages,
                elapsed_ms = stats.elapsed_ms,
                "[T]  run {}",
                outcome
            );
        }
    }
}
