//! Per-run state.
//!
//! One context per run, owned by the run's task and never shared. Every
//! envelope leaves through `emit`, which assigns the sequence number and
//! writes to the run's bounded channel; a full channel makes the producer
//! wait for the client.

use sage_shared::envelope::ErrorPayload;
use sage_shared::{
    AnswerRequest, Envelope, ErrorCode, ExecutionPolicy, Mode, Scope, StageName,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::memory::{keys, AlreadySet, MemoryKey, WorkingMemory};
use crate::error::StageError;
use crate::telemetry::{RunInfo, RunStats};
use crate::tools::ToolAccess;

pub struct PipelineContext {
    pub run_id: String,
    pub parent_run_id: Option<String>,
    pub trace_id: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub scope: Scope,
    pub policy: ExecutionPolicy,
    pub mode: Mode,
    pub request: AnswerRequest,
    pub tool_profile: String,
    /// Replay filter; `None` allows every tool the policy allows
    pub allowed_tools: Option<Arc<HashSet<String>>>,
    memory: WorkingMemory,
    seq: u64,
    sender: mpsc::Sender<Envelope>,
    cancelled: bool,
    degraded: Vec<String>,
    started: Instant,
}

impl PipelineContext {
    pub fn new(
        request: AnswerRequest,
        scope: Scope,
        policy: ExecutionPolicy,
        mode: Mode,
        sender: mpsc::Sender<Envelope>,
    ) -> Self {
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let tool_profile = request
            .tool_profile
            .clone()
            .unwrap_or_else(|| sage_shared::DEFAULT_TOOL_PROFILE.to_string());
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            parent_run_id: None,
            trace_id: uuid::Uuid::new_v4().to_string(),
            session_id,
            user_id: None,
            scope,
            policy,
            mode,
            request,
            tool_profile,
            allowed_tools: None,
            memory: WorkingMemory::new(),
            seq: 0,
            sender,
            cancelled: false,
            degraded: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn with_run_id(mut self, run_id: String) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_parent(mut self, parent_run_id: String) -> Self {
        self.parent_run_id = Some(parent_run_id);
        self
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_profile(mut self, profile: &str) -> Self {
        if self.request.tool_profile.is_none() {
            self.tool_profile = profile.to_string();
        }
        self
    }

    pub fn with_allowed_tools(mut self, tools: Option<Vec<String>>) -> Self {
        self.allowed_tools = tools.map(|t| Arc::new(t.into_iter().collect()));
        self
    }

    // --- envelopes ---

    /// Send one envelope. Fails with `Cancelled` once the client is gone.
    pub async fn emit(
        &mut self,
        stage: StageName,
        message: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<(), StageError> {
        if self.cancelled {
            return Err(StageError::Cancelled);
        }
        self.seq += 1;
        let envelope = Envelope::new(
            stage,
            message,
            payload,
            self.seq,
            &self.trace_id,
            &self.session_id,
        );
        if self.sender.send(envelope).await.is_err() {
            self.cancelled = true;
            return Err(StageError::Cancelled);
        }
        Ok(())
    }

    /// Send an `error` envelope for a failed stage.
    pub async fn emit_error(
        &mut self,
        code: ErrorCode,
        stage: &str,
        detail: &str,
        terminal: bool,
    ) -> Result<(), StageError> {
        let payload = ErrorPayload {
            code,
            stage: stage.to_string(),
            terminal,
            detail: detail.to_string(),
        };
        let payload = serde_json::to_value(&payload)
            .map_err(|e| StageError::Internal(e.to_string()))?;
        self.emit(StageName::Error, format!("{} failed: {}", stage, code), payload)
            .await
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Handle for watching client disconnect while a stage runs.
    pub fn disconnect_watch(&self) -> mpsc::Sender<Envelope> {
        self.sender.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled || self.sender.is_closed()
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    // --- working memory ---

    pub fn get<T: Send + Sync + 'static>(&self, key: MemoryKey<T>) -> Option<&T> {
        self.memory.get(key)
    }

    pub fn put<T: Send + Sync + 'static>(
        &mut self,
        key: MemoryKey<T>,
        value: T,
    ) -> Result<(), StageError> {
        self.memory
            .put(key, value)
            .map_err(|AlreadySet(name)| StageError::Internal(format!("{} written twice", name)))
    }

    pub fn append<T: Send + Sync + 'static>(&mut self, key: MemoryKey<Vec<T>>, item: T) {
        self.memory.append(key, item);
    }

    pub fn extend<T, I>(&mut self, key: MemoryKey<Vec<T>>, items: I)
    where
        T: Send + Sync + 'static,
        I: IntoIterator<Item = T>,
    {
        self.memory.extend(key, items);
    }

    pub fn list<T: Send + Sync + 'static>(&self, key: MemoryKey<Vec<T>>) -> &[T] {
        self.memory.list(key)
    }

    pub fn memory(&self) -> &WorkingMemory {
        &self.memory
    }

    // --- run bookkeeping ---

    pub fn mark_degraded(&mut self, stage: &str) {
        if !self.degraded.iter().any(|s| s == stage) {
            self.degraded.push(stage.to_string());
        }
    }

    pub fn degraded_stages(&self) -> &[String] {
        &self.degraded
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn tool_access(&self) -> ToolAccess {
        ToolAccess {
            scope: self.scope,
            profile: self.tool_profile.clone(),
            trace_id: self.trace_id.clone(),
            session_id: self.session_id.clone(),
            policy: self.policy.clone(),
            allowed_tools: self.allowed_tools.clone(),
        }
    }

    pub fn run_info(&self) -> RunInfo {
        RunInfo {
            run_id: self.run_id.clone(),
            parent_run_id: self.parent_run_id.clone(),
            trace_id: self.trace_id.clone(),
            session_id: self.session_id.clone(),
            scope: self.scope,
            mode: self.mode,
        }
    }

    pub fn stats(&self) -> RunStats {
        RunStats {
            envelopes: self.seq,
            tool_calls: self.list(keys::TOOL_CALLS).len(),
            degraded_stages: self.degraded.clone(),
            elapsed_ms: self.elapsed_ms(),
        }
    }
}
