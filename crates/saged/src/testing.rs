//! Test doubles for the daemon's collaborators.
//!
//! Provides scripted implementations of the tool transport, LLM client,
//! retrieval, file extraction and telemetry seams, with call counters for
//! assertions. No network is touched.
//!
//! ## Example
//!
//! ```rust,ignore
//! let transport = FakeToolTransport::new()
//!     .tool(ToolDescriptor::new("system.ping", ToolTier::TierA))
//!     .respond("system.ping", CallToolResponse::success(json!("pong")));
//!
//! let listed = transport.list_tools(&request).await?;
//! assert_eq!(transport.list_calls(), 1);
//! ```

use async_trait::async_trait;
use sage_shared::{
    AnswerRequest, CallToolRequest, CallToolResponse, Envelope, ListToolsRequest,
    ListToolsResponse, Mode, Scope, ToolDescriptor, ToolError,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::conversation::LruConversationStore;
use crate::error::{CollabError, LlmError, TransportError};
use crate::llm::{ChunkStream, LlmClient, LlmRequest, Purpose};
use crate::pipeline::{PipelineContext, Services};
use crate::policy::PolicyBuilder;
use crate::retrieval::{FileExtractor, FileText, RetrievedChunk, Retriever};
use crate::telemetry::{RunInfo, RunOutcome, RunStats, TelemetrySink};
use crate::tools::{ToolDispatcher, ToolInvoker, ToolRegistry, ToolTransport};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pop the next scripted item, repeating the last one once the script runs dry.
fn next_scripted<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

// ============================================================================
// Tool transport
// ============================================================================

/// Scripted tool service.
///
/// Unscripted calls to a listed tool succeed with `{"tool": name}`; calls to
/// an unlisted tool fail with `NOT_FOUND`.
#[derive(Default)]
pub struct FakeToolTransport {
    tools: Mutex<Vec<ToolDescriptor>>,
    ttl_seconds: Option<u64>,
    responses: Mutex<HashMap<String, VecDeque<CallToolResponse>>>,
    delays: HashMap<String, Duration>,
    hanging: HashSet<String>,
    fail_listing: AtomicBool,
    hang_listing: AtomicBool,
    list_calls: AtomicUsize,
    call_counts: Arc<Mutex<HashMap<String, usize>>>,
    requests: Mutex<Vec<CallToolRequest>>,
}

impl FakeToolTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool to the listing
    pub fn tool(self, descriptor: ToolDescriptor) -> Self {
        lock(&self.tools).push(descriptor);
        self
    }

    /// TTL sent with every listing
    pub fn ttl_seconds(mut self, ttl: u64) -> Self {
        self.ttl_seconds = Some(ttl);
        self
    }

    /// Queue a response for `tool`; the last queued response repeats
    pub fn respond(self, tool: &str, response: CallToolResponse) -> Self {
        lock(&self.responses)
            .entry(tool.to_string())
            .or_default()
            .push_back(response);
        self
    }

    /// Wait `delay` before answering calls to `tool`
    pub fn delay(mut self, tool: &str, delay: Duration) -> Self {
        self.delays.insert(tool.to_string(), delay);
        self
    }

    /// Never answer calls to `tool`
    pub fn hang(mut self, tool: &str) -> Self {
        self.hanging.insert(tool.to_string());
        self
    }

    /// Make listings fail with a 503 until switched back
    pub fn set_list_failure(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Make listings never answer until switched back
    pub fn set_list_hang(&self, hang: bool) {
        self.hang_listing.store(hang, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Get the number of calls to a specific tool
    pub fn call_count(&self, tool: &str) -> usize {
        lock(&self.call_counts).get(tool).copied().unwrap_or(0)
    }

    /// Get total call count across all tools
    pub fn total_calls(&self) -> usize {
        lock(&self.call_counts).values().sum()
    }

    pub fn requests(&self) -> Vec<CallToolRequest> {
        lock(&self.requests).clone()
    }

    fn is_listed(&self, tool: &str) -> bool {
        lock(&self.tools).iter().any(|t| t.name == tool)
    }
}

#[async_trait]
impl ToolTransport for FakeToolTransport {
    async fn list_tools(
        &self,
        _request: &ListToolsRequest,
    ) -> Result<ListToolsResponse, TransportError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(TransportError::Status(503));
        }
        if self.hang_listing.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(ListToolsResponse {
            tools: lock(&self.tools).clone(),
            ttl_seconds: self.ttl_seconds,
        })
    }

    async fn call_tool(&self, request: &CallToolRequest) -> Result<CallToolResponse, TransportError> {
        let name = request.tool_name.clone();
        {
            let mut counts = lock(&self.call_counts);
            *counts.entry(name.clone()).or_insert(0) += 1;
        }
        lock(&self.requests).push(request.clone());

        if self.hanging.contains(&name) {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delays.get(&name) {
            tokio::time::sleep(*delay).await;
        }

        let scripted = lock(&self.responses)
            .get_mut(&name)
            .and_then(next_scripted);
        Ok(match scripted {
            Some(response) => response,
            None if self.is_listed(&name) => {
                CallToolResponse::success(serde_json::json!({ "tool": name }))
            }
            None => CallToolResponse::failure(ToolError::not_found(&name)),
        })
    }
}

// ============================================================================
// LLM client
// ============================================================================

/// LLM client scripted per purpose.
///
/// `complete` pops the purpose's script (the last entry repeats); an
/// unscripted purpose fails as unavailable. `stream` yields the scripted
/// chunks, or the `Answer` script as one chunk.
#[derive(Default)]
pub struct FakeLlmClient {
    scripts: Mutex<HashMap<Purpose, VecDeque<Result<String, String>>>>,
    stream_chunks: Option<Vec<String>>,
    stream_error: Option<String>,
    hanging: HashSet<Purpose>,
    calls: Mutex<HashMap<Purpose, usize>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl FakeLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `purpose`
    pub fn reply(self, purpose: Purpose, text: &str) -> Self {
        lock(&self.scripts)
            .entry(purpose)
            .or_default()
            .push_back(Ok(text.to_string()));
        self
    }

    /// Queue a failure for `purpose`
    pub fn fail(self, purpose: Purpose, message: &str) -> Self {
        lock(&self.scripts)
            .entry(purpose)
            .or_default()
            .push_back(Err(message.to_string()));
        self
    }

    /// Never answer `complete` calls for `purpose`
    pub fn hang(mut self, purpose: Purpose) -> Self {
        self.hanging.insert(purpose);
        self
    }

    /// Chunks produced by `stream`
    pub fn stream_chunks(mut self, chunks: &[&str]) -> Self {
        self.stream_chunks = Some(chunks.iter().map(|c| c.to_string()).collect());
        self
    }

    /// End the stream with an error after the chunks
    pub fn stream_error(mut self, message: &str) -> Self {
        self.stream_error = Some(message.to_string());
        self
    }

    /// Get the number of calls made for a purpose
    pub fn call_count(&self, purpose: Purpose) -> usize {
        lock(&self.calls).get(&purpose).copied().unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        lock(&self.requests).clone()
    }

    fn record(&self, request: &LlmRequest) {
        *lock(&self.calls).entry(request.purpose).or_insert(0) += 1;
        lock(&self.requests).push(request.clone());
    }

    fn scripted(&self, purpose: Purpose) -> Result<String, LlmError> {
        let next = lock(&self.scripts).get_mut(&purpose).and_then(next_scripted);
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(LlmError::Unavailable(message)),
            None => Err(LlmError::Unavailable(format!("no script for {}", purpose))),
        }
    }
}

#[async_trait]
impl LlmClient for FakeLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        self.record(request);
        if self.hanging.contains(&request.purpose) {
            std::future::pending::<()>().await;
        }
        self.scripted(request.purpose)
    }

    async fn stream(&self, request: &LlmRequest) -> Result<ChunkStream, LlmError> {
        self.record(request);
        let chunks = match &self.stream_chunks {
            Some(chunks) => chunks.clone(),
            None => vec![self.scripted(request.purpose)?],
        };
        let mut items: Vec<Result<String, LlmError>> = chunks.into_iter().map(Ok).collect();
        if let Some(message) = &self.stream_error {
            items.push(Err(LlmError::Stream(message.clone())));
        }
        Ok(Box::pin(tokio_stream::iter(items)))
    }
}

// ============================================================================
// Retrieval and files
// ============================================================================

/// Retriever returning fixed chunks, or failing with a status.
pub struct FakeRetriever {
    chunks: Vec<RetrievedChunk>,
    fail_status: Option<u16>,
    calls: AtomicUsize,
}

impl FakeRetriever {
    pub fn with_chunks(chunks: Vec<RetrievedChunk>) -> Self {
        Self {
            chunks,
            fail_status: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(status: u16) -> Self {
        Self {
            chunks: Vec::new(),
            fail_status: Some(status),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Retriever for FakeRetriever {
    async fn retrieve(
        &self,
        _query: &str,
        top_k: usize,
        _session_id: &str,
    ) -> Result<Vec<RetrievedChunk>, CollabError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.fail_status {
            return Err(CollabError::Status(status));
        }
        Ok(self.chunks.iter().take(top_k).cloned().collect())
    }
}

/// File extractor serving text per URL; unknown URLs answer 404.
#[derive(Default)]
pub struct FakeFileExtractor {
    files: HashMap<String, String>,
}

impl FakeFileExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, url: &str, text: &str) -> Self {
        self.files.insert(url.to_string(), text.to_string());
        self
    }
}

#[async_trait]
impl FileExtractor for FakeFileExtractor {
    async fn extract(&self, url: &str, max_bytes: usize) -> Result<FileText, CollabError> {
        let text = self.files.get(url).ok_or(CollabError::Status(404))?;
        let (kept, truncated) = crate::retrieval::truncate_utf8(text, max_bytes);
        Ok(FileText {
            url: url.to_string(),
            text: kept.to_string(),
            truncated,
        })
    }
}

// ============================================================================
// Telemetry
// ============================================================================

/// Sink that keeps every lifecycle signal it receives.
#[derive(Default)]
pub struct RecordingTelemetry {
    started: Mutex<Vec<RunInfo>>,
    stages_finished: AtomicUsize,
    finished: Mutex<Vec<(RunInfo, RunOutcome, RunStats)>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&self) -> Vec<RunInfo> {
        lock(&self.started).clone()
    }

    /// How many runs reached the end of their stage list
    pub fn stages_finished(&self) -> usize {
        self.stages_finished.load(Ordering::SeqCst)
    }

    /// Terminal outcomes in report order
    pub fn outcomes(&self) -> Vec<RunOutcome> {
        lock(&self.finished).iter().map(|(_, o, _)| *o).collect()
    }

    pub fn finished(&self) -> Vec<(RunInfo, RunOutcome, RunStats)> {
        lock(&self.finished).clone()
    }
}

#[async_trait]
impl TelemetrySink for RecordingTelemetry {
    async fn run_started(&self, run: &RunInfo) {
        lock(&self.started).push(run.clone());
    }

    async fn stages_finished(&self, _run: &RunInfo, _stats: &RunStats) {
        self.stages_finished.fetch_add(1, Ordering::SeqCst);
    }

    async fn run_finished(&self, run: &RunInfo, outcome: RunOutcome, stats: &RunStats) {
        lock(&self.finished).push((run.clone(), outcome, stats.clone()));
    }
}

// ============================================================================
// Wiring helpers
// ============================================================================

/// Dispatcher over `transport` configured from `config.tools`.
pub fn dispatcher(transport: Arc<dyn ToolTransport>, config: &Config) -> Arc<ToolDispatcher> {
    let registry = Arc::new(
        ToolRegistry::new(transport.clone(), config.tools.registry_ttl())
            .with_list_timeout(config.tools.list_timeout()),
    );
    let invoker = Arc::new(ToolInvoker::new(transport, &config.tools));
    Arc::new(ToolDispatcher::new(registry, invoker))
}

/// Services backed by fakes: no retriever, no files, in-memory history.
pub fn services(
    llm: Arc<dyn LlmClient>,
    transport: Arc<dyn ToolTransport>,
    telemetry: Arc<dyn TelemetrySink>,
    config: &Config,
) -> Services {
    Services {
        llm,
        tools: dispatcher(transport, config),
        retriever: None,
        files: Arc::new(FakeFileExtractor::new()),
        conversations: Arc::new(LruConversationStore::new(config.history.max_sessions)),
        telemetry,
    }
}

/// Context for `scope`'s policy with a channel large enough that a whole run
/// fits without a reader.
pub fn run_context(
    request: AnswerRequest,
    scope: Scope,
    mode: Mode,
) -> (PipelineContext, mpsc::Receiver<Envelope>) {
    let (tx, rx) = mpsc::channel(512);
    let ctx = PipelineContext::new(request, scope, PolicyBuilder::build(scope), mode, tx);
    (ctx, rx)
}

/// Everything currently buffered in `rx`, after the sender side is gone.
pub async fn drain(mut rx: mpsc::Receiver<Envelope>) -> Vec<Envelope> {
    let mut events = Vec::new();
    while let Some(envelope) = rx.recv().await {
        events.push(envelope);
    }
    events
}

/// Stage names of `events`, in order.
pub fn stages_of(events: &[Envelope]) -> Vec<&str> {
    events.iter().map(|e| e.stage.as_str()).collect()
}
