//! Stage lists for FAST and DEEP runs.
//!
//! FAST: telemetry_start, history_retrieve, file_extract, rag_retrieve,
//! tool_dispatch, llm_stream, conversation_save, telemetry_final.
//!
//! DEEP: telemetry_start, history_retrieve, file_extract, rag_retrieve, plan,
//! deep_reasoning, synthesis, conversation_save, telemetry_final.
//!
//! Optional stages are always in the list and decide for themselves whether
//! they run.

use sage_shared::Mode;
use std::sync::Arc;
use std::time::Duration;

use super::runner::PipelineRunner;
use super::stage::Stage;
use crate::config::Config;
use crate::conversation::ConversationStore;
use crate::deep::{
    DeepReasoningCoordinator, PlanStage, ReasoningStage, ReflectionStage, SynthesisStage,
    ToolOrchestrationStage,
};
use crate::llm::LlmClient;
use crate::retrieval::{FileExtractor, Retriever};
use crate::stages::{
    ConversationSaveStage, FileExtractStage, HistoryRetrieveStage, LlmStreamStage,
    RagRetrieveStage, TelemetryFinalStage, TelemetryStartStage, ToolDispatchStage,
};
use crate::telemetry::TelemetrySink;
use crate::tools::ToolDispatcher;

/// Collaborators shared by every run.
#[derive(Clone)]
pub struct Services {
    pub llm: Arc<dyn LlmClient>,
    pub tools: Arc<ToolDispatcher>,
    pub retriever: Option<Arc<dyn Retriever>>,
    pub files: Arc<dyn FileExtractor>,
    pub conversations: Arc<dyn ConversationStore>,
    pub telemetry: Arc<dyn TelemetrySink>,
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

pub struct PipelineFactory {
    services: Services,
    config: Arc<Config>,
}

impl PipelineFactory {
    pub fn new(services: Services, config: Arc<Config>) -> Self {
        Self { services, config }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Stages both lists open with.
    fn leading_stages(&self) -> Vec<Arc<dyn Stage>> {
        let s = &self.services;
        let t = &self.config.stages;
        vec![
            Arc::new(TelemetryStartStage::new(s.telemetry.clone(), ms(t.telemetry_ms))),
            Arc::new(HistoryRetrieveStage::new(
                s.conversations.clone(),
                self.config.history.max_turns,
                ms(t.history_ms),
            )),
            Arc::new(FileExtractStage::new(
                s.files.clone(),
                self.config.files.clone(),
                ms(t.file_extract_ms),
            )),
            Arc::new(RagRetrieveStage::new(
                s.retriever.clone(),
                self.config.retrieval.top_k,
                ms(t.rag_ms),
            )),
        ]
    }

    /// Stages both lists close with.
    fn trailing_stages(&self) -> Vec<Arc<dyn Stage>> {
        let s = &self.services;
        let t = &self.config.stages;
        vec![
            Arc::new(ConversationSaveStage::new(
                s.conversations.clone(),
                ms(t.conversation_save_ms),
            )),
            Arc::new(TelemetryFinalStage::new(s.telemetry.clone(), ms(t.telemetry_ms))),
        ]
    }

    pub fn fast_stages(&self) -> Vec<Arc<dyn Stage>> {
        let s = &self.services;
        let t = &self.config.stages;
        let mut stages = self.leading_stages();
        stages.push(Arc::new(ToolDispatchStage::new(
            s.tools.clone(),
            ms(t.tool_dispatch_ms),
        )));
        stages.push(Arc::new(LlmStreamStage::new(s.llm.clone(), ms(t.llm_stream_ms))));
        stages.extend(self.trailing_stages());
        stages
    }

    pub fn deep_stages(&self) -> Vec<Arc<dyn Stage>> {
        let s = &self.services;
        let t = &self.config.stages;
        let deep = &self.config.deep;
        let tools = &self.config.tools;

        let coordinator = DeepReasoningCoordinator::new(
            ReasoningStage::new(s.llm.clone(), s.tools.clone(), ms(t.reasoning_ms)),
            ToolOrchestrationStage::new(
                s.tools.clone(),
                tools.max_calls_per_round,
                tools.max_concurrent_calls,
                ms(t.tool_orchestration_ms),
            ),
            ReflectionStage::new(s.llm.clone(), deep.confidence_threshold, ms(t.reflection_ms)),
            deep,
            ms(t.deep_loop_ms),
        );

        let mut stages = self.leading_stages();
        stages.push(Arc::new(PlanStage::new(s.llm.clone(), ms(t.plan_ms))));
        stages.push(Arc::new(coordinator));
        stages.push(Arc::new(SynthesisStage::new(
            s.llm.clone(),
            deep.synthesis_chunk_chars,
            ms(t.synthesis_ms),
        )));
        stages.extend(self.trailing_stages());
        stages
    }

    pub fn stages_for(&self, mode: Mode) -> Vec<Arc<dyn Stage>> {
        match mode {
            Mode::Fast => self.fast_stages(),
            Mode::Deep => self.deep_stages(),
        }
    }

    pub fn runner(&self, mode: Mode) -> PipelineRunner {
        PipelineRunner::new(self.stages_for(mode), self.services.telemetry.clone())
    }
}
