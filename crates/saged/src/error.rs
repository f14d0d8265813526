//! Error types for the daemon's internal boundaries.
//!
//! Each error maps onto the wire taxonomy with `code()`; nothing here leaves
//! the daemon as a raised error, only as an `error` envelope.

use sage_shared::{ErrorCode, ProtocolError};
use thiserror::Error;

/// Failure talking to the tool service.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tool service returned status {0}")]
    Status(u16),

    #[error("undecodable response: {0}")]
    Decode(String),

    #[error("no response within {0}ms")]
    Timeout(u64),
}

/// Failure talking to the LLM backend.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM request failed with status {0}")]
    Status(u16),

    #[error("LLM stream error: {0}")]
    Stream(String),

    #[error("LLM backend unavailable: {0}")]
    Unavailable(String),
}

/// Failure in a retrieval, file or history collaborator.
#[derive(Error, Debug)]
pub enum CollabError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("collaborator returned status {0}")]
    Status(u16),

    #[error("{0}")]
    Other(String),
}

/// Stage failure as seen by the runner.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("stage timed out after {0}ms")]
    Timeout(u64),

    #[error("tool failed: {0}")]
    Tool(String),

    #[error("retrieval failed: {0}")]
    Rag(#[source] CollabError),

    #[error("file extraction failed: {0}")]
    FileExtract(String),

    #[error("blocked by policy: {0}")]
    PolicyBlock(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("internal error: {0}")]
    Internal(String),

    /// The client went away; not reported as an error envelope
    #[error("run cancelled")]
    Cancelled,
}

impl StageError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StageError::Timeout(_) => ErrorCode::UpstreamTimeout,
            StageError::Tool(_) => ErrorCode::ToolFailed,
            StageError::Rag(_) => ErrorCode::RagFailed,
            StageError::FileExtract(_) => ErrorCode::FileExtractFailed,
            StageError::PolicyBlock(_) => ErrorCode::PolicyBlock,
            StageError::Llm(LlmError::Http(e)) if e.is_timeout() => ErrorCode::UpstreamTimeout,
            StageError::Llm(_) => ErrorCode::InternalError,
            StageError::Internal(_) => ErrorCode::InternalError,
            StageError::Cancelled => ErrorCode::InternalError,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StageError::Cancelled)
    }
}

/// Failure before a run's first event. Fatal: the stream carries one
/// terminal error envelope.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] ProtocolError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn code(&self) -> ErrorCode {
        match self {
            OrchestratorError::InvalidRequest(_) => ErrorCode::InternalError,
            OrchestratorError::Internal(_) => ErrorCode::InternalError,
        }
    }
}
