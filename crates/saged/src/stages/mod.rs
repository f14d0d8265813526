//! FAST path stages and the stages both paths share.

pub mod file_extract;
pub mod history;
pub mod llm_stream;
pub mod rag;
pub mod telemetry;
pub mod tool_dispatch;

pub use file_extract::FileExtractStage;
pub use history::{ConversationSaveStage, HistoryRetrieveStage};
pub use llm_stream::LlmStreamStage;
pub use rag::RagRetrieveStage;
pub use telemetry::{TelemetryFinalStage, TelemetryStartStage};
pub use tool_dispatch::ToolDispatchStage;
