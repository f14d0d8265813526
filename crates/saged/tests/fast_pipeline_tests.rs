//! FAST pipeline tests.
//!
//! Drives the real FAST stage list against fake collaborators and checks the
//! envelope stream: order, sequence numbers, the single terminal event, policy
//! gating and degradation. No LLM or network is required.

use async_trait::async_trait;
use saged::config::Config;
use saged::error::StageError;
use saged::llm::Purpose;
use saged::pipeline::{PipelineContext, PipelineFactory, PipelineRunner, Stage};
use saged::retrieval::RetrievedChunk;
use saged::stages::{TelemetryFinalStage, TelemetryStartStage};
use saged::telemetry::{RunOutcome, TelemetrySink};
use saged::testing::{
    drain, run_context, services, stages_of, FakeLlmClient, FakeRetriever, FakeToolTransport,
    RecordingTelemetry,
};
use saged::tools::ToolTransport;
use sage_shared::{
    AnswerRequest, CallToolResponse, Envelope, ErrorCode, Mode, Scope, ToolDescriptor, ToolTier,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    factory: PipelineFactory,
    transport: Arc<FakeToolTransport>,
    llm: Arc<FakeLlmClient>,
    telemetry: Arc<RecordingTelemetry>,
}

fn tool_service() -> FakeToolTransport {
    FakeToolTransport::new()
        .tool(ToolDescriptor::new("system.ping", ToolTier::TierA))
        .tool(ToolDescriptor::new("kb.lookup", ToolTier::TierAB))
        .respond("system.ping", CallToolResponse::success(json!("pong")))
}

fn harness_with(llm: FakeLlmClient, transport: FakeToolTransport) -> Harness {
    let config = Config::default();
    let transport = Arc::new(transport);
    let llm = Arc::new(llm);
    let telemetry = Arc::new(RecordingTelemetry::new());
    let tool_transport: Arc<dyn ToolTransport> = transport.clone();
    let sink: Arc<dyn TelemetrySink> = telemetry.clone();
    let services = services(llm.clone(), tool_transport, sink, &config);
    Harness {
        factory: PipelineFactory::new(services, Arc::new(config)),
        transport,
        llm,
        telemetry,
    }
}

fn harness() -> Harness {
    harness_with(
        FakeLlmClient::new().stream_chunks(&["The tool ", "answered pong."]),
        tool_service(),
    )
}

async fn run_fast(h: &Harness, request: AnswerRequest, scope: Scope) -> Vec<Envelope> {
    let (ctx, rx) = run_context(request, scope, Mode::Fast);
    h.factory.runner(Mode::Fast).run(ctx).await;
    drain(rx).await
}

/// seq starts at 1 and strictly increases; the last event is the only terminal one
fn assert_well_formed(events: &[Envelope]) {
    assert!(!events.is_empty());
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.seq, i as u64 + 1, "seq gap at {}", event.stage);
    }
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1, "expected exactly one terminal event");
    assert!(events.last().unwrap().is_terminal());
}

fn tool_events(events: &[Envelope]) -> usize {
    events
        .iter()
        .filter(|e| e.stage_name().map_or(false, |s| s.is_tool_event()))
        .count()
}

fn errors(events: &[Envelope]) -> Vec<&Envelope> {
    events.iter().filter(|e| e.stage == "error").collect()
}

// ============================================================================
// Scenario: /ping
// ============================================================================

/// `/ping` runs one tool call and streams the answer after it
#[tokio::test]
async fn test_ping_event_order() {
    let h = harness();
    let events = run_fast(&h, AnswerRequest::new("/ping"), Scope::General).await;
    assert_well_formed(&events);

    let stages = stages_of(&events);
    assert_eq!(stages[0], "start");
    assert_eq!(stages[1], "tool_call_start");
    assert_eq!(stages[2], "tool_call_result");
    assert!(stages[3..stages.len() - 1].iter().all(|s| *s == "answer_delta"));
    assert!(stages.len() >= 5, "at least one answer_delta");
    assert_eq!(*stages.last().unwrap(), "answer_final");

    assert_eq!(events[1].payload["toolName"], "system.ping");
    assert_eq!(events[2].payload["ok"], true);
    assert_eq!(events[2].payload["result"], "pong");
    assert_eq!(h.transport.total_calls(), 1);
    assert_eq!(h.transport.call_count("system.ping"), 1);

    let last = events.last().unwrap();
    assert_eq!(last.payload["answer"], "The tool answered pong.");
    assert_eq!(last.payload["placeholder"], false);
    assert_eq!(last.payload["mode"], "FAST");
}

/// The answer prompt is grounded on the tool result
#[tokio::test]
async fn test_tool_result_reaches_answer_prompt() {
    let h = harness();
    run_fast(&h, AnswerRequest::new("/ping"), Scope::General).await;

    let requests = h.llm.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].purpose, Purpose::Answer);
    assert!(requests[0].prompt.contains("system.ping"));
}

/// A plain question makes no tool traffic at all
#[tokio::test]
async fn test_plain_question_skips_tools() {
    let h = harness();
    let events = run_fast(&h, AnswerRequest::new("hello there"), Scope::General).await;
    assert_well_formed(&events);
    assert_eq!(tool_events(&events), 0);
    assert_eq!(h.transport.list_calls(), 0);
    assert_eq!(h.telemetry.outcomes(), vec![RunOutcome::Completed]);
}

// ============================================================================
// Policy gate
// ============================================================================

/// TIER_A caller asking for a TIER_A_B tool is blocked before any call
#[tokio::test]
async fn test_tier_gate_blocks_before_invoker() {
    let h = harness();
    let events = run_fast(
        &h,
        AnswerRequest::new("/kb.lookup rust async"),
        Scope::PrivacySafe,
    )
    .await;
    assert_well_formed(&events);

    assert_eq!(tool_events(&events), 0);
    assert_eq!(h.transport.total_calls(), 0);

    let errors = errors(&events);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_code(), Some(ErrorCode::PolicyBlock));
    assert_eq!(errors[0].payload["terminal"], false);
    assert_eq!(errors[0].payload["stage"], "tool_dispatch");

    // The run still answers
    assert_eq!(events.last().unwrap().stage, "answer_final");
}

/// No tool access means no tool events and no registry traffic
#[tokio::test]
async fn test_no_tool_access_emits_no_tool_events() {
    let h = harness();
    let events = run_fast(&h, AnswerRequest::new("/ping"), Scope::PrivacyRequest).await;
    assert_well_formed(&events);

    assert_eq!(tool_events(&events), 0);
    assert_eq!(h.transport.list_calls(), 0);
    assert_eq!(h.transport.total_calls(), 0);
    assert_eq!(errors(&events)[0].error_code(), Some(ErrorCode::PolicyBlock));
}

/// An unknown tool degrades with TOOL_FAILED
#[tokio::test]
async fn test_unknown_tool_is_tool_failed() {
    let h = harness();
    let events = run_fast(&h, AnswerRequest::new("/weather"), Scope::General).await;
    assert_well_formed(&events);
    assert_eq!(tool_events(&events), 0);
    assert_eq!(errors(&events)[0].error_code(), Some(ErrorCode::ToolFailed));
}

/// A tool service that never lists degrades to an unknown tool, not a stage timeout
#[tokio::test(start_paused = true)]
async fn test_hanging_tool_listing_fails_open() {
    let h = harness();
    h.transport.set_list_hang(true);
    let started = tokio::time::Instant::now();
    let events = run_fast(&h, AnswerRequest::new("/ping"), Scope::General).await;
    assert_well_formed(&events);

    assert!(started.elapsed() < Duration::from_secs(8));
    assert_eq!(tool_events(&events), 0);
    let errors = errors(&events);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_code(), Some(ErrorCode::ToolFailed));
    assert_eq!(errors[0].payload["stage"], "tool_dispatch");
    assert_eq!(events.last().unwrap().payload["answer"], "The tool answered pong.");
}

/// A failing tool still produces a result event with ok=false
#[tokio::test(start_paused = true)]
async fn test_failing_tool_reports_result() {
    let h = harness_with(
        FakeLlmClient::new().reply(Purpose::Answer, "The ping did not come back."),
        FakeToolTransport::new()
            .tool(ToolDescriptor::new("report.build", ToolTier::TierA))
            .hang("report.build"),
    );
    let events = run_fast(&h, AnswerRequest::new("/report.build"), Scope::General).await;
    assert_well_formed(&events);

    let result = events.iter().find(|e| e.stage == "tool_call_result").unwrap();
    assert_eq!(result.payload["ok"], false);
    assert_eq!(result.payload["error"]["code"], "TIMEOUT");
    assert_eq!(result.payload["attempts"], 1);
}

// ============================================================================
// Degradation
// ============================================================================

/// A failing retriever yields one non-terminal RAG_FAILED and the run answers
#[tokio::test]
async fn test_rag_failure_degrades() {
    let config = Config::default();
    let transport: Arc<dyn ToolTransport> = Arc::new(tool_service());
    let telemetry = Arc::new(RecordingTelemetry::new());
    let sink: Arc<dyn TelemetrySink> = telemetry.clone();
    let llm = Arc::new(FakeLlmClient::new().reply(Purpose::Answer, "Answer without passages."));
    let mut services = services(llm, transport, sink, &config);
    services.retriever = Some(Arc::new(FakeRetriever::failing(503)));
    let factory = PipelineFactory::new(services, Arc::new(config));

    let (ctx, rx) = run_context(AnswerRequest::new("what is tokio"), Scope::Owner, Mode::Fast);
    let outcome = factory.runner(Mode::Fast).run(ctx).await;
    let events = drain(rx).await;
    assert_well_formed(&events);

    assert_eq!(outcome, RunOutcome::Completed);
    let errors = errors(&events);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_code(), Some(ErrorCode::RagFailed));
    assert_eq!(errors[0].payload["terminal"], false);

    let last = events.last().unwrap();
    assert_eq!(last.payload["answer"], "Answer without passages.");
    assert_eq!(last.payload["degradedStages"], json!(["rag_retrieve"]));
}

/// Retrieved passages are announced and grounded into the prompt
#[tokio::test]
async fn test_rag_passages_are_used() {
    let config = Config::default();
    let transport: Arc<dyn ToolTransport> = Arc::new(tool_service());
    let sink: Arc<dyn TelemetrySink> = Arc::new(RecordingTelemetry::new());
    let llm = Arc::new(FakeLlmClient::new().reply(Purpose::Answer, "Grounded."));
    let mut services = services(llm.clone(), transport, sink, &config);
    services.retriever = Some(Arc::new(FakeRetriever::with_chunks(vec![RetrievedChunk {
        id: "c1".to_string(),
        text: "tokio is an async runtime".to_string(),
        source: "docs/tokio.md".to_string(),
        score: 0.9,
    }])));
    let factory = PipelineFactory::new(services, Arc::new(config));

    let (ctx, rx) = run_context(AnswerRequest::new("what is tokio"), Scope::Owner, Mode::Fast);
    factory.runner(Mode::Fast).run(ctx).await;
    let events = drain(rx).await;
    assert_well_formed(&events);

    let rag = events.iter().find(|e| e.stage == "rag").unwrap();
    assert_eq!(rag.payload["count"], 1);
    assert!(llm.requests()[0].prompt.contains("tokio is an async runtime"));
}

/// When the model fails outright the placeholder answer is sent
#[tokio::test]
async fn test_llm_failure_yields_placeholder() {
    let h = harness_with(
        FakeLlmClient::new().fail(Purpose::Answer, "backend down"),
        tool_service(),
    );
    let events = run_fast(&h, AnswerRequest::new("hello"), Scope::General).await;
    assert_well_formed(&events);

    assert_eq!(errors(&events).len(), 1);
    let last = events.last().unwrap();
    assert_eq!(last.stage, "answer_final");
    assert_eq!(last.payload["placeholder"], true);
}

/// A stream that breaks midway keeps what was already sent
#[tokio::test]
async fn test_partial_stream_keeps_answer() {
    let h = harness_with(
        FakeLlmClient::new()
            .stream_chunks(&["Partial ", "answer"])
            .stream_error("connection reset"),
        tool_service(),
    );
    let events = run_fast(&h, AnswerRequest::new("hello"), Scope::General).await;
    assert_well_formed(&events);

    let last = events.last().unwrap();
    assert_eq!(last.payload["answer"], "Partial answer");
    assert_eq!(last.payload["placeholder"], false);
    assert_eq!(last.payload["degradedStages"], json!(["llm_stream"]));
}

// ============================================================================
// History
// ============================================================================

/// A second run in the same session sees the first exchange
#[tokio::test]
async fn test_history_carries_across_runs() {
    let h = harness_with(
        FakeLlmClient::new().reply(Purpose::Answer, "Tokio is a runtime."),
        tool_service(),
    );
    run_fast(&h, AnswerRequest::new("what is tokio").with_session("s-1"), Scope::General).await;
    let events = run_fast(
        &h,
        AnswerRequest::new("and async-std?").with_session("s-1"),
        Scope::General,
    )
    .await;
    assert_well_formed(&events);
    assert!(events.iter().all(|e| e.session_id == "s-1"));

    let requests = h.llm.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].prompt.contains("what is tokio"));
    assert!(requests[1].prompt.contains("Tokio is a runtime."));
}

// ============================================================================
// Runner contract
// ============================================================================

struct FailingStage {
    fatal: bool,
}

#[async_trait]
impl Stage for FailingStage {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(1)
    }

    fn is_fatal(&self) -> bool {
        self.fatal
    }

    async fn process(&self, _ctx: &mut PipelineContext) -> Result<(), StageError> {
        Err(StageError::Internal("boom".to_string()))
    }
}

struct SlowStage;

#[async_trait]
impl Stage for SlowStage {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(50)
    }

    async fn process(&self, _ctx: &mut PipelineContext) -> Result<(), StageError> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(())
    }
}

/// A fatal failure ends the stream with a terminal error and reports Failed
#[tokio::test]
async fn test_fatal_stage_ends_run() {
    let telemetry = Arc::new(RecordingTelemetry::new());
    let stages: Vec<Arc<dyn Stage>> = vec![
        Arc::new(FailingStage { fatal: true }),
        Arc::new(FailingStage { fatal: false }),
    ];
    let runner = PipelineRunner::new(stages, telemetry.clone());
    let (ctx, rx) = run_context(AnswerRequest::new("hi"), Scope::General, Mode::Fast);
    let outcome = runner.run(ctx).await;
    let events = drain(rx).await;

    assert_eq!(outcome, RunOutcome::Failed);
    assert_eq!(events.len(), 1);
    assert!(events[0].is_terminal());
    assert_eq!(events[0].error_code(), Some(ErrorCode::InternalError));
    assert_eq!(telemetry.outcomes(), vec![RunOutcome::Failed]);
}

/// A stage past its timeout degrades with UPSTREAM_TIMEOUT
#[tokio::test(start_paused = true)]
async fn test_stage_timeout_degrades() {
    let telemetry = Arc::new(RecordingTelemetry::new());
    let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(SlowStage)];
    let runner = PipelineRunner::new(stages, telemetry.clone());
    let (ctx, rx) = run_context(AnswerRequest::new("hi"), Scope::General, Mode::Fast);
    let outcome = runner.run(ctx).await;
    let events = drain(rx).await;
    assert_well_formed(&events);

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(events[0].error_code(), Some(ErrorCode::UpstreamTimeout));
    assert_eq!(events[0].payload["terminal"], false);
    assert_eq!(events[1].payload["placeholder"], true);
    assert_eq!(telemetry.outcomes(), vec![RunOutcome::Completed]);
    assert_eq!(telemetry.stages_finished(), 0);
}

/// A client gone before the run starts is reported as Cancelled
#[tokio::test]
async fn test_disconnect_reports_cancelled() {
    let h = harness();
    let (ctx, rx) = run_context(AnswerRequest::new("/ping"), Scope::General, Mode::Fast);
    drop(rx);
    let outcome = h.factory.runner(Mode::Fast).run(ctx).await;

    assert_eq!(outcome, RunOutcome::Cancelled);
    assert_eq!(h.telemetry.outcomes(), vec![RunOutcome::Cancelled]);
    assert_eq!(h.transport.total_calls(), 0);
}

/// A completed run reports exactly one terminal signal
#[tokio::test]
async fn test_completed_run_reports_once() {
    let h = harness();
    let events = run_fast(&h, AnswerRequest::new("/ping"), Scope::General).await;
    assert_well_formed(&events);

    assert_eq!(h.telemetry.started().len(), 1);
    let finished = h.telemetry.finished();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].1, RunOutcome::Completed);
    assert_eq!(finished[0].2.tool_calls, 1);
    assert_eq!(finished[0].2.envelopes, events.len() as u64);
    assert_eq!(h.telemetry.stages_finished(), 1);
}

/// Drops the client's receiver when it runs.
struct HangUpStage {
    rx: std::sync::Mutex<Option<mpsc::Receiver<Envelope>>>,
}

#[async_trait]
impl Stage for HangUpStage {
    fn name(&self) -> &'static str {
        "hang_up"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(1)
    }

    async fn process(&self, _ctx: &mut PipelineContext) -> Result<(), StageError> {
        let rx = self.rx.lock().unwrap().take();
        drop(rx);
        Ok(())
    }
}

/// A client gone by the time answer_final is sent makes the run Cancelled
#[tokio::test]
async fn test_disconnect_at_answer_final_reports_cancelled() {
    let telemetry = Arc::new(RecordingTelemetry::new());
    let sink: Arc<dyn TelemetrySink> = telemetry.clone();
    let (ctx, rx) = run_context(AnswerRequest::new("hi"), Scope::General, Mode::Fast);
    let stages: Vec<Arc<dyn Stage>> = vec![
        Arc::new(TelemetryStartStage::new(sink.clone(), Duration::from_secs(1))),
        Arc::new(TelemetryFinalStage::new(sink.clone(), Duration::from_secs(1))),
        Arc::new(HangUpStage {
            rx: std::sync::Mutex::new(Some(rx)),
        }),
    ];
    let outcome = PipelineRunner::new(stages, sink).run(ctx).await;

    assert_eq!(outcome, RunOutcome::Cancelled);
    assert_eq!(telemetry.stages_finished(), 1);
    assert_eq!(telemetry.outcomes(), vec![RunOutcome::Cancelled]);
}
