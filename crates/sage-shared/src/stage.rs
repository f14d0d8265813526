//! Stage-name registry for the event stream.
//!
//! Names are additive-only: a variant may be added, never renamed or removed.
//! Envelopes carry the name as a plain string so consumers built against an
//! older registry can skip names they do not know.

use serde::{Deserialize, Serialize};

/// Every stage name the daemon may put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Start,
    FileExtract,
    Rag,
    ToolCallStart,
    ToolCallResult,
    AnswerDelta,
    AnswerFinal,
    Error,
    Plan,
    Reasoning,
    Reflection,
    Verification,
    Synthesis,
}

impl StageName {
    /// Registry in declaration order. New names are appended.
    pub const ALL: &'static [StageName] = &[
        Self::Start,
        Self::FileExtract,
        Self::Rag,
        Self::ToolCallStart,
        Self::ToolCallResult,
        Self::AnswerDelta,
        Self::AnswerFinal,
        Self::Error,
        Self::Plan,
        Self::Reasoning,
        Self::Reflection,
        Self::Verification,
        Self::Synthesis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::FileExtract => "file_extract",
            Self::Rag => "rag",
            Self::ToolCallStart => "tool_call_start",
            Self::ToolCallResult => "tool_call_result",
            Self::AnswerDelta => "answer_delta",
            Self::AnswerFinal => "answer_final",
            Self::Error => "error",
            Self::Plan => "plan",
            Self::Reasoning => "reasoning",
            Self::Reflection => "reflection",
            Self::Verification => "verification",
            Self::Synthesis => "synthesis",
        }
    }

    /// Look up a wire name. Unknown names yield `None` and must be ignored.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_str() == name)
    }

    /// Whether this stage is one of the tool-call events.
    pub fn is_tool_event(&self) -> bool {
        matches!(self, Self::ToolCallStart | Self::ToolCallResult)
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
