//! Error taxonomies for Sage.
//!
//! Two vocabularies exist on the wire: the tool-boundary codes returned by the
//! tool service, and the stage codes carried in `error` envelopes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stage/protocol-level error codes carried in `error` envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    UpstreamTimeout,
    ToolFailed,
    RagFailed,
    FileExtractFailed,
    PolicyBlock,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            Self::ToolFailed => "TOOL_FAILED",
            Self::RagFailed => "RAG_FAILED",
            Self::FileExtractFailed => "FILE_EXTRACT_FAILED",
            Self::PolicyBlock => "POLICY_BLOCK",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tool-boundary error codes. Every tool failure is normalized to one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolErrorCode {
    BadArgs,
    NotFound,
    Timeout,
    Internal,
}

impl std::fmt::Display for ToolErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BadArgs => "BAD_ARGS",
            Self::NotFound => "NOT_FOUND",
            Self::Timeout => "TIMEOUT",
            Self::Internal => "INTERNAL",
        };
        write!(f, "{}", s)
    }
}

/// Structured tool error as returned by `call_tool`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    pub code: ToolErrorCode,
    pub message: String,
    #[serde(default)]
    pub retryable: bool,
}

impl ToolError {
    pub fn new(code: ToolErrorCode, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code,
            message: message.into(),
            retryable,
        }
    }

    /// The normalized error used for every locally observed failure
    /// (timeout, transport, undecodable response).
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ToolErrorCode::Timeout, message, true)
    }

    pub fn not_found(tool: &str) -> Self {
        Self::new(
            ToolErrorCode::NotFound,
            format!("tool '{}' is not offered for this scope", tool),
            false,
        )
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Errors decoding protocol values.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown scope '{0}'")]
    UnknownScope(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_wire_names() {
        let json = serde_json::to_string(&ErrorCode::FileExtractFailed).unwrap();
        assert_eq!(json, "\"FILE_EXTRACT_FAILED\"");
        assert_eq!(ErrorCode::PolicyBlock.to_string(), "POLICY_BLOCK");
    }

    #[test]
    fn test_tool_error_timeout_is_retryable() {
        let err = ToolError::timeout("no response");
        assert_eq!(err.code, ToolErrorCode::Timeout);
        assert!(err.retryable);
        assert_eq!(err.to_string(), "TIMEOUT: no response");
    }

    #[test]
    fn test_tool_error_retryable_defaults_false() {
        let err: ToolError =
            serde_json::from_str(r#"{"code":"BAD_ARGS","message":"missing field"}"#).unwrap();
        assert_eq!(err.code, ToolErrorCode::BadArgs);
        assert!(!err.retryable);
    }
}
