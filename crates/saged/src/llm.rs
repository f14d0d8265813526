//! LLM client abstraction.
//!
//! Stages talk to the model through `LlmClient` so tests can script answers
//! per purpose without a running backend.

use async_trait::async_trait;
use std::pin::Pin;
use tokio_stream::Stream;

use crate::error::LlmError;

/// Stream of answer chunks, in model order.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Why a stage is calling the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    Answer,
    Plan,
    Reason,
    Reflect,
    Synthesize,
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Answer => "answer",
            Self::Plan => "plan",
            Self::Reason => "reason",
            Self::Reflect => "reflect",
            Self::Synthesize => "synthesize",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub purpose: Purpose,
    /// Model override; the client's default when `None`
    pub model: Option<String>,
    pub system: String,
    pub prompt: String,
    /// Ask the backend for a JSON object
    pub json: bool,
}

impl LlmRequest {
    pub fn new(purpose: Purpose, system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            purpose,
            model: None,
            system: system.into(),
            prompt: prompt.into(),
            json: false,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn expect_json(mut self) -> Self {
        self.json = true;
        self
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Full response in one piece
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError>;

    /// Response as it is generated
    async fn stream(&self, request: &LlmRequest) -> Result<ChunkStream, LlmError>;
}

/// Pull the first JSON object out of model output that may wrap it in prose
/// or code fences.
pub fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_fenced_output() {
        let raw = "Sure:\n```json\n{\"objective\": \"x\", \"subtasks\": [\"a\"]}\n```";
        let value = extract_json_object(raw).unwrap();
        assert_eq!(value["objective"], "x");
    }

    #[test]
    fn test_extract_json_rejects_garbage() {
        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_object("} backwards {").is_none());
        assert!(extract_json_object("{not: valid}").is_none());
    }
}
