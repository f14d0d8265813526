//! Retrieval of supporting passages.

use async_trait::async_trait;
use sage_shared::StageName;
use std::sync::Arc;
use std::time::Duration;

use crate::error::StageError;
use crate::pipeline::memory::keys;
use crate::pipeline::{PipelineContext, Stage};
use crate::retrieval::Retriever;

pub struct RagRetrieveStage {
    retriever: Option<Arc<dyn Retriever>>,
    default_top_k: usize,
    timeout: Duration,
}

impl RagRetrieveStage {
    pub fn new(retriever: Option<Arc<dyn Retriever>>, default_top_k: usize, timeout: Duration) -> Self {
        Self {
            retriever,
            default_top_k,
            timeout,
        }
    }
}

#[async_trait]
impl Stage for RagRetrieveStage {
    fn name(&self) -> &'static str {
        "rag_retrieve"
    }

    fn is_enabled(&self, ctx: &PipelineContext) -> bool {
        self.retriever.is_some() && ctx.policy.allow_rag && ctx.request.rag.enabled
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn process(&self, ctx: &mut PipelineContext) -> Result<(), StageError> {
        let retriever = match &self.retriever {
            Some(r) => r,
            None => return Ok(()),
        };
        let top_k = ctx.request.rag.top_k.unwrap_or(self.default_top_k).max(1);
        let chunks = retriever
            .retrieve(&ctx.request.question, top_k, &ctx.session_id)
            .await
            .map_err(StageError::Rag)?;

        let sources: Vec<_> = chunks
            .iter()
            .map(|c| serde_json::json!({ "id": c.id, "source": c.source, "score": c.score }))
            .collect();
        let message = format!("retrieved {} passage(s)", chunks.len());
        ctx.extend(keys::RAG_CHUNKS, chunks);
        ctx.emit(
            StageName::Rag,
            message,
            serde_json::json!({ "count": sources.len(), "sources": sources }),
        )
        .await
    }
}
