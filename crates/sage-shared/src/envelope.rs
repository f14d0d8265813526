//! Event envelope: the unit of the output stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::stage::StageName;

/// One event on a run's stream. `seq` starts at 1 and strictly increases
/// within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Registry name; kept as a string so unknown names round-trip
    pub stage: String,
    pub message: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub trace_id: String,
    pub session_id: String,
}

impl Envelope {
    pub fn new(
        stage: StageName,
        message: impl Into<String>,
        payload: serde_json::Value,
        seq: u64,
        trace_id: &str,
        session_id: &str,
    ) -> Self {
        Self {
            stage: stage.as_str().to_string(),
            message: message.into(),
            payload,
            seq,
            ts: Utc::now(),
            trace_id: trace_id.to_string(),
            session_id: session_id.to_string(),
        }
    }

    /// Registry entry for this envelope, `None` for names this build does not know.
    pub fn stage_name(&self) -> Option<StageName> {
        StageName::parse(&self.stage)
    }

    /// `answer_final`, or an `error` whose payload marks it terminal.
    pub fn is_terminal(&self) -> bool {
        match self.stage_name() {
            Some(StageName::AnswerFinal) => true,
            Some(StageName::Error) => self
                .payload
                .get("terminal")
                .and_then(|t| t.as_bool())
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Error code of an `error` envelope.
    pub fn error_code(&self) -> Option<ErrorCode> {
        if self.stage_name() != Some(StageName::Error) {
            return None;
        }
        self.payload
            .get("code")
            .and_then(|c| serde_json::from_value(c.clone()).ok())
    }
}

/// Payload of an `error` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: ErrorCode,
    /// Pipeline stage that failed
    pub stage: String,
    pub terminal: bool,
    #[serde(default)]
    pub detail: String,
}

/// Payload of the terminal `answer_final` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalPayload {
    pub answer: String,
    pub run_id: String,
    pub mode: crate::policy::Mode,
    /// True when no stage produced an answer and the placeholder was used
    #[serde(default)]
    pub placeholder: bool,
    #[serde(default)]
    pub degraded_stages: Vec<String>,
}
