//! DEEP pipeline tests.
//!
//! Scripted model replies per purpose drive the plan, the bounded
//! reason/tool/reflect loop, verification and synthesis.

use saged::config::Config;
use saged::llm::Purpose;
use saged::pipeline::{PipelineContext, PipelineFactory};
use saged::policy::PolicyBuilder;
use saged::telemetry::{RunOutcome, TelemetrySink};
use saged::testing::{
    drain, services, stages_of, FakeLlmClient, FakeToolTransport, RecordingTelemetry,
};
use saged::tools::ToolTransport;
use sage_shared::{
    AnswerRequest, CallToolResponse, Envelope, ExecutionPolicy, Mode, Scope, ToolDescriptor,
    ToolTier,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

const PLAN: &str = r#"{"objective":"pick a runtime","subtasks":["compare ecosystems","compare latency"],
    "constraints":["proxy workload"],"successCriteria":["a clear pick"]}"#;
const CONFIDENT_STEP: &str = r#"{"hypothesis":"Tokio has the larger ecosystem","confidence":0.9}"#;
const RETRY: &str = r#"{"followupAction":"retry","observation":"latency claim unsupported"}"#;
const PROCEED: &str = r#"{"followupAction":"proceed","observation":"well supported"}"#;
const CONTINUE: &str = r#"{"followupAction":"continue","observation":"could go further"}"#;

const QUESTION: &str = "Compare tokio and async-std for a latency sensitive proxy";

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    factory: PipelineFactory,
    transport: Arc<FakeToolTransport>,
    llm: Arc<FakeLlmClient>,
    telemetry: Arc<RecordingTelemetry>,
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

fn harness(llm: FakeLlmClient) -> Harness {
    harness_with(
        llm,
        FakeToolTransport::new().tool(ToolDescriptor::new("system.time", ToolTier::TierA)),
    )
}

async fn run_deep(h: &Harness, policy: ExecutionPolicy) -> Vec<Envelope> {
    let (tx, rx) = mpsc::channel(512);
    let ctx = PipelineContext::new(AnswerRequest::new(QUESTION), Scope::Owner, policy, Mode::Deep, tx);
    h.factory.runner(Mode::Deep).run(ctx).await;
    drain(rx).await
}

fn owner_policy() -> ExecutionPolicy {
    PolicyBuilder::build(Scope::Owner)
}

fn with_rounds(rounds: u32) -> ExecutionPolicy {
    ExecutionPolicy {
        max_tool_rounds: rounds,
        ..owner_policy()
    }
}

fn assert_well_formed(events: &[Envelope]) {
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.seq, i as u64 + 1, "seq gap at {}", event.stage);
    }
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert_eq!(events.last().unwrap().stage, "answer_final");
}

fn find<'a>(events: &'a [Envelope], stage: &str) -> &'a Envelope {
    events
        .iter()
        .find(|e| e.stage == stage)
        .unwrap_or_else(|| panic!("no {} event", stage))
}

fn count(events: &[Envelope], stage: &str) -> usize {
    events.iter().filter(|e| e.stage == stage).count()
}

// ============================================================================
// Scenario: constant retry under a two-round policy
// ============================================================================

/// Reflection always asking to retry stops at the policy's two rounds
#[tokio::test]
async fn test_constant_retry_stops_at_policy_rounds() {
    let h = harness(
        FakeLlmClient::new()
            .reply(Purpose::Plan, PLAN)
            .reply(Purpose::Reason, CONFIDENT_STEP)
            .reply(Purpose::Reflect, RETRY)
            .reply(Purpose::Synthesize, "Tokio, for its ecosystem."),
    );
    let events = run_deep(&h, with_rounds(2)).await;
    assert_well_formed(&events);

    assert_eq!(count(&events, "reasoning"), 2);
    assert_eq!(count(&events, "reflection"), 2);
    assert_eq!(h.llm.call_count(Purpose::Reason), 2);
    assert_eq!(h.llm.call_count(Purpose::Reflect), 2);

    let verification = find(&events, "verification");
    assert_eq!(verification.payload["rounds"], 2);
    assert_eq!(verification.payload["exit"], "round_cap");
    assert_eq!(verification.payload["verified"], false);
    let consistency = verification.payload["consistencyScore"].as_f64().unwrap();
    assert!(consistency < 1.0, "consistency {}", consistency);
    assert!(!verification.payload["issues"].as_array().unwrap().is_empty());

    // synthesis runs after verification
    let stages = stages_of(&events);
    let verify_at = stages.iter().position(|s| *s == "verification").unwrap();
    let synth_at = stages.iter().position(|s| *s == "synthesis").unwrap();
    assert!(verify_at < synth_at);
    assert_eq!(find(&events, "synthesis").payload["source"], "llm");
}

/// The whole event order of a two-round run
#[tokio::test]
async fn test_deep_event_order() {
    let h = harness(
        FakeLlmClient::new()
            .reply(Purpose::Plan, PLAN)
            .reply(Purpose::Reason, CONFIDENT_STEP)
            .reply(Purpose::Reflect, RETRY)
            .reply(Purpose::Synthesize, "Tokio."),
    );
    let events = run_deep(&h, with_rounds(2)).await;
    let stages = stages_of(&events);
    assert_eq!(
        stages,
        vec![
            "start",
            "plan",
            "reasoning",
            "reflection",
            "reasoning",
            "reflection",
            "verification",
            "answer_delta",
            "synthesis",
            "answer_final",
        ]
    );
    assert_eq!(events[0].payload["mode"], "DEEP");
}

/// The configured cap bounds the loop even when the policy allows more
#[tokio::test]
async fn test_round_cap_bounds_constant_retry() {
    let h = harness(
        FakeLlmClient::new()
            .reply(Purpose::Plan, PLAN)
            .reply(Purpose::Reason, CONFIDENT_STEP)
            .reply(Purpose::Reflect, RETRY)
            .reply(Purpose::Synthesize, "Tokio."),
    );
    let events = run_deep(&h, owner_policy()).await;
    assert_well_formed(&events);

    // owner allows 5 rounds, the default cap is 4
    assert_eq!(count(&events, "reasoning"), 4);
    assert_eq!(find(&events, "verification").payload["rounds"], 4);
}

// ============================================================================
// Loop exits
// ============================================================================

/// A proceed note ends the loop after one round
#[tokio::test]
async fn test_proceed_exits_after_one_round() {
    let h = harness(
        FakeLlmClient::new()
            .reply(Purpose::Plan, PLAN)
            .reply(Purpose::Reason, CONFIDENT_STEP)
            .reply(Purpose::Reflect, PROCEED)
            .reply(Purpose::Synthesize, "Tokio."),
    );
    let events = run_deep(&h, owner_policy()).await;
    assert_well_formed(&events);

    let verification = find(&events, "verification");
    assert_eq!(verification.payload["rounds"], 1);
    assert_eq!(verification.payload["exit"], "proceed");
    assert_eq!(verification.payload["verified"], true);
    assert_eq!(events.last().unwrap().payload["answer"], "Tokio.");
}

/// A confident step without a gap ends the loop unless reflection retries
#[tokio::test]
async fn test_confident_step_exits() {
    let h = harness(
        FakeLlmClient::new()
            .reply(Purpose::Plan, PLAN)
            .reply(Purpose::Reason, CONFIDENT_STEP)
            .reply(Purpose::Reflect, CONTINUE)
            .reply(Purpose::Synthesize, "Tokio."),
    );
    let events = run_deep(&h, owner_policy()).await;

    let verification = find(&events, "verification");
    assert_eq!(verification.payload["rounds"], 1);
    assert_eq!(verification.payload["exit"], "confident");
}

// ============================================================================
// Tools inside the loop
// ============================================================================

/// Tool requests from a round are called and grounded into the next prompt
#[tokio::test]
async fn test_round_tool_calls() {
    let h = harness_with(
        FakeLlmClient::new()
            .reply(Purpose::Plan, PLAN)
            .reply(
                Purpose::Reason,
                r#"{"hypothesis":"depends on the time","confidence":0.4,
                    "toolCalls":[{"tool":"system.time","args":{}}]}"#,
            )
            .reply(Purpose::Reflect, PROCEED)
            .reply(Purpose::Synthesize, "It is noon."),
        FakeToolTransport::new()
            .tool(ToolDescriptor::new("system.time", ToolTier::TierA))
            .respond("system.time", CallToolResponse::success(json!("12:00"))),
    );
    let events = run_deep(&h, owner_policy()).await;
    assert_well_formed(&events);

    let stages = stages_of(&events);
    let reasoning_at = stages.iter().position(|s| *s == "reasoning").unwrap();
    assert_eq!(stages[reasoning_at + 1], "tool_call_start");
    assert_eq!(stages[reasoning_at + 2], "tool_call_result");
    assert_eq!(stages[reasoning_at + 3], "reflection");
    assert_eq!(h.transport.call_count("system.time"), 1);
    assert_eq!(find(&events, "tool_call_result").payload["result"], "12:00");

    let synth_prompt = h
        .llm
        .requests()
        .into_iter()
        .find(|r| r.purpose == Purpose::Synthesize)
        .unwrap()
        .prompt;
    assert!(synth_prompt.contains("12:00"));
}

/// A tool outside the caller's tier is blocked inside the loop too
#[tokio::test]
async fn test_loop_respects_tool_tier() {
    let h = harness_with(
        FakeLlmClient::new()
            .reply(Purpose::Plan, PLAN)
            .reply(
                Purpose::Reason,
                r#"{"hypothesis":"needs a write","confidence":0.4,
                    "toolCalls":[{"tool":"fs.write","args":{}}]}"#,
            )
            .reply(Purpose::Reflect, PROCEED)
            .reply(Purpose::Synthesize, "Cannot write."),
        FakeToolTransport::new()
            .tool(ToolDescriptor::new("fs.write", ToolTier::TierA).side_effecting()),
    );
    let events = run_deep(&h, owner_policy()).await;
    assert_well_formed(&events);

    assert_eq!(count(&events, "tool_call_start"), 0);
    assert_eq!(h.transport.total_calls(), 0);
    let error = find(&events, "error");
    assert_eq!(error.payload["code"], "POLICY_BLOCK");
    assert_eq!(error.payload["terminal"], false);
}

// ============================================================================
// Degradation
// ============================================================================

/// A planner failure falls back to a one-subtask plan
#[tokio::test]
async fn test_fallback_plan() {
    let h = harness(
        FakeLlmClient::new()
            .fail(Purpose::Plan, "planner down")
            .reply(Purpose::Reason, CONFIDENT_STEP)
            .reply(Purpose::Reflect, PROCEED)
            .reply(Purpose::Synthesize, "Tokio."),
    );
    let events = run_deep(&h, owner_policy()).await;
    assert_well_formed(&events);

    let plan = find(&events, "plan");
    assert_eq!(plan.payload["fallback"], true);
    assert_eq!(plan.payload["subtasks"], json!(["direct response"]));
}

/// A planner that never answers still leaves the fallback plan, without a stage error
#[tokio::test(start_paused = true)]
async fn test_silent_planner_falls_back() {
    let h = harness(
        FakeLlmClient::new()
            .hang(Purpose::Plan)
            .reply(Purpose::Reason, CONFIDENT_STEP)
            .reply(Purpose::Reflect, PROCEED)
            .reply(Purpose::Synthesize, "Tokio."),
    );
    let events = run_deep(&h, owner_policy()).await;
    assert_well_formed(&events);

    let stages = stages_of(&events);
    assert_eq!(stages[0], "start");
    assert_eq!(stages[1], "plan");
    assert_eq!(count(&events, "error"), 0);
    let plan = find(&events, "plan");
    assert_eq!(plan.payload["fallback"], true);
    assert_eq!(plan.payload["objective"], QUESTION);
    assert_eq!(events.last().unwrap().payload["answer"], "Tokio.");
}

/// With every model call failing the run still ends with the placeholder
#[tokio::test]
async fn test_model_outage_yields_placeholder() {
    let h = harness(FakeLlmClient::new());
    let events = run_deep(&h, with_rounds(3)).await;
    assert_well_formed(&events);

    assert_eq!(find(&events, "plan").payload["fallback"], true);
    // one reasoning failure per round, reflection falls back without an error
    assert_eq!(count(&events, "error"), 3);
    assert_eq!(count(&events, "reflection"), 3);

    let verification = find(&events, "verification");
    let issues = verification.payload["issues"].as_array().unwrap();
    assert!(issues
        .iter()
        .any(|i| i.as_str() == Some("3 round(s) produced no reasoning output")));

    let last = events.last().unwrap();
    assert_eq!(last.payload["placeholder"], true);
    assert_eq!(h.telemetry.outcomes(), vec![RunOutcome::Completed]);
}

/// Synthesis falls back to the last hypothesis when the model fails
#[tokio::test]
async fn test_synthesis_falls_back_to_hypothesis() {
    let h = harness(
        FakeLlmClient::new()
            .reply(Purpose::Plan, PLAN)
            .reply(Purpose::Reason, CONFIDENT_STEP)
            .reply(Purpose::Reflect, PROCEED)
            .fail(Purpose::Synthesize, "synth down"),
    );
    let events = run_deep(&h, owner_policy()).await;
    assert_well_formed(&events);

    assert_eq!(find(&events, "synthesis").payload["source"], "hypothesis");
    let last = events.last().unwrap();
    assert_eq!(last.payload["answer"], "Tokio has the larger ecosystem");
    assert_eq!(last.payload["placeholder"], false);
}

/// Unresolved claims from reflection are listed after the answer
#[tokio::test]
async fn test_unresolved_claims_are_appended() {
    let h = harness(
        FakeLlmClient::new()
            .reply(Purpose::Plan, PLAN)
            .reply(Purpose::Reason, CONFIDENT_STEP)
            .reply(
                Purpose::Reflect,
                r#"{"followupAction":"proceed","observation":"mostly fine",
                    "unresolvedClaims":["latency figures unverified"]}"#,
            )
            .reply(Purpose::Synthesize, "Tokio."),
    );
    let events = run_deep(&h, owner_policy()).await;
    assert_well_formed(&events);

    let answer = events.last().unwrap().payload["answer"].as_str().unwrap().to_string();
    assert!(answer.starts_with("Tokio."));
    assert!(answer.contains("The following issues are unresolved:"));
    assert!(answer.contains("- latency figures unverified"));
}
