//! Conversation history load and save.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::conversation::{ChatTurn, ConversationStore};
use crate::error::StageError;
use crate::pipeline::memory::keys;
use crate::pipeline::{PipelineContext, Stage};

/// Loads recent turns for the request's session. Runs without a
/// caller-supplied session id have no history.
pub struct HistoryRetrieveStage {
    store: Arc<dyn ConversationStore>,
    max_turns: usize,
    timeout: Duration,
}

impl HistoryRetrieveStage {
    pub fn new(store: Arc<dyn ConversationStore>, max_turns: usize, timeout: Duration) -> Self {
        Self {
            store,
            max_turns,
            timeout,
        }
    }
}

#[async_trait]
impl Stage for HistoryRetrieveStage {
    fn name(&self) -> &'static str {
        "history_retrieve"
    }

    fn is_enabled(&self, ctx: &PipelineContext) -> bool {
        ctx.request.session_id.is_some() && self.max_turns > 0
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn process(&self, ctx: &mut PipelineContext) -> Result<(), StageError> {
        let turns = self
            .store
            .load(&ctx.session_id, self.max_turns)
            .await
            .map_err(|e| StageError::Internal(format!("history unavailable: {}", e)))?;
        debug!("[history] {} turns for {}", turns.len(), ctx.session_id);
        ctx.extend(keys::HISTORY, turns);
        Ok(())
    }
}

/// Appends the question and the answer to the session.
pub struct ConversationSaveStage {
    store: Arc<dyn ConversationStore>,
    timeout: Duration,
}

impl ConversationSaveStage {
    pub fn new(store: Arc<dyn ConversationStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }
}

#[async_trait]
impl Stage for ConversationSaveStage {
    fn name(&self) -> &'static str {
        "conversation_save"
    }

    fn is_enabled(&self, ctx: &PipelineContext) -> bool {
        ctx.request.session_id.is_some() && ctx.get(keys::ANSWER).is_some()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn process(&self, ctx: &mut PipelineContext) -> Result<(), StageError> {
        let answer = ctx.get(keys::ANSWER).cloned().unwrap_or_default();
        let turns = vec![
            ChatTurn::user(&ctx.request.question),
            ChatTurn::assistant(&answer),
        ];
        self.store
            .append(&ctx.session_id, turns)
            .await
            .map_err(|e| StageError::Internal(format!("history not saved: {}", e)))
    }
}
