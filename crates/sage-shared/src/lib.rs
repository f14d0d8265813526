//! Shared types for Sage components.
//!
//! Everything a stream consumer needs to decode the daemon's output lives here:
//! the event envelope, the stage-name registry, both error taxonomies, the
//! policy vocabulary, the tool protocol and the reasoning artifacts.

pub mod envelope;
pub mod error;
pub mod policy;
pub mod reasoning;
pub mod request;
pub mod stage;
pub mod tool;

pub use envelope::Envelope;
pub use error::{ErrorCode, ProtocolError, ToolError, ToolErrorCode};
pub use policy::{ExecutionPolicy, Mode, ModeHint, Scope, ToolTier};
pub use reasoning::{FollowupAction, Plan, ReasoningStep, ReflectionNote, VerificationReport};
pub use request::{AnswerRequest, RagOptions, ReplayCommand, ReplayMode};
pub use stage::StageName;
pub use tool::{
    CallToolRequest, CallToolResponse, ListToolsRequest, ListToolsResponse, ToolCallRecord,
    ToolDescriptor,
};

/// Crate version, reported by the health endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Envelope protocol version. Bumped only on breaking wire changes, which the
/// additive-only stage registry is meant to avoid.
pub const PROTOCOL_VERSION: u32 = 1;

/// Tool profile used when a request does not name one.
pub const DEFAULT_TOOL_PROFILE: &str = "BASIC";
