//! Request types for `/answer/stream` and replay.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::policy::{ModeHint, Scope};

/// Longest question accepted, in characters.
pub const MAX_QUESTION_CHARS: usize = 16_000;

/// Retrieval options on a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagOptions {
    #[serde(default = "default_rag_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub top_k: Option<usize>,
}

fn default_rag_enabled() -> bool {
    true
}

impl Default for RagOptions {
    fn default() -> Self {
        Self {
            enabled: default_rag_enabled(),
            top_k: None,
        }
    }
}

/// Body of `POST /answer/stream`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    pub question: String,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Model hint; the daemon's configured model is used when absent
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub file_urls: Vec<String>,
    #[serde(default)]
    pub scope: Option<Scope>,
    #[serde(default)]
    pub tool_profile: Option<String>,
    #[serde(default)]
    pub mode_hint: ModeHint,
    #[serde(default)]
    pub rag: RagOptions,
}

impl AnswerRequest {
    pub fn new(question: &str) -> Self {
        Self {
            question: question.to_string(),
            ..Default::default()
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_mode_hint(mut self, hint: ModeHint) -> Self {
        self.mode_hint = hint;
        self
    }

    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    /// Reject requests that cannot start a run.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.question.trim().is_empty() {
            return Err(ProtocolError::InvalidRequest("question is empty".to_string()));
        }
        if self.question.chars().count() > MAX_QUESTION_CHARS {
            return Err(ProtocolError::InvalidRequest(format!(
                "question exceeds {} characters",
                MAX_QUESTION_CHARS
            )));
        }
        Ok(())
    }
}

/// How a replayed run chooses its mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayMode {
    /// Decide the mode again exactly as a live request would
    #[default]
    Same,
    Fast,
    Deep,
}

/// Command issued by the replay collaborator. The collaborator reconstructs
/// the original request from its own run storage. The caller identity is not
/// part of the command; it comes from the authenticated transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayCommand {
    pub parent_run_id: String,
    #[serde(default)]
    pub new_run_id: Option<String>,
    #[serde(default)]
    pub replay_mode: ReplayMode,
    /// When present, only these tools may be called during the replay
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
    pub request: AnswerRequest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_request_parses_with_defaults() {
        let req: AnswerRequest = serde_json::from_str(r#"{"question":"hi"}"#).unwrap();
        assert_eq!(req.mode_hint, ModeHint::Auto);
        assert!(req.rag.enabled);
        assert!(req.file_urls.is_empty());
        assert!(req.scope.is_none());
    }

    #[test]
    fn test_camel_case_fields() {
        let req: AnswerRequest = serde_json::from_str(
            r#"{"question":"hi","sessionId":"s1","modeHint":"deep","toolProfile":"ADVANCED","scope":"OWNER"}"#,
        )
        .unwrap();
        assert_eq!(req.session_id.as_deref(), Some("s1"));
        assert_eq!(req.mode_hint, ModeHint::Deep);
        assert_eq!(req.tool_profile.as_deref(), Some("ADVANCED"));
        assert_eq!(req.scope, Some(Scope::Owner));
    }

    #[test]
    fn test_validate_rejects_blank_question() {
        assert!(AnswerRequest::new("   ").validate().is_err());
        assert!(AnswerRequest::new("why?").validate().is_ok());
    }
}
