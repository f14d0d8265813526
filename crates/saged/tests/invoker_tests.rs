//! Tool invoker tests: timeout, retry and response normalization.
//!
//! Runs on a paused tokio clock; a hanging fake tool makes the call timeout
//! fire at exactly the configured instant.

use saged::config::ToolsConfig;
use saged::testing::FakeToolTransport;
use saged::tools::{ToolInvoker, ToolTransport};
use sage_shared::{
    CallToolRequest, CallToolResponse, Scope, ToolDescriptor, ToolError, ToolErrorCode, ToolTier,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Allowed scheduling overhead on top of the call timeout
const OVERHEAD_MS: u64 = 100;

fn request(tool: &str) -> CallToolRequest {
    CallToolRequest {
        tool_name: tool.to_string(),
        args: json!({}),
        scope: Scope::General,
        profile: "BASIC".to_string(),
        trace_id: "trace".to_string(),
        session_id: "session".to_string(),
    }
}

fn invoker(transport: &Arc<FakeToolTransport>) -> ToolInvoker {
    let transport: Arc<dyn ToolTransport> = transport.clone();
    ToolInvoker::new(transport, &ToolsConfig::default())
}

// ============================================================================
// Timeout
// ============================================================================

/// A tool that never answers fails with a retryable TIMEOUT at 1200ms
#[tokio::test(start_paused = true)]
async fn test_hanging_tool_times_out_at_call_timeout() {
    let transport = Arc::new(
        FakeToolTransport::new()
            .tool(ToolDescriptor::new("report.build", ToolTier::TierA))
            .hang("report.build"),
    );
    let invoker = invoker(&transport);
    assert!(!invoker.is_idempotent("report.build"));

    let started = Instant::now();
    let invocation = invoker.invoke(&request("report.build")).await;
    let elapsed = started.elapsed().as_millis() as u64;

    assert!(!invocation.response.ok);
    let error = invocation.response.error.as_ref().unwrap();
    assert_eq!(error.code, ToolErrorCode::Timeout);
    assert!(error.retryable);
    assert!(error.message.contains("1200ms"));

    assert_eq!(invocation.attempts(), 1, "non-idempotent tools are not retried");
    assert!(elapsed >= 1_200 && elapsed <= 1_200 + OVERHEAD_MS, "took {}ms", elapsed);

    let record = invocation.last_record().unwrap();
    assert!(!record.success);
    assert!(record.result.is_none());
    assert!(record.latency_ms >= 1_200);
    assert_eq!(transport.call_count("report.build"), 1);
}

/// Idempotent tools retry while the error is retryable, up to max_retries
#[tokio::test(start_paused = true)]
async fn test_idempotent_tool_retries_until_exhausted() {
    let transport = Arc::new(
        FakeToolTransport::new()
            .tool(ToolDescriptor::new("system.ping", ToolTier::TierA))
            .hang("system.ping"),
    );
    let invoker = invoker(&transport);

    let started = Instant::now();
    let invocation = invoker.invoke(&request("system.ping")).await;
    let elapsed = started.elapsed().as_millis() as u64;

    assert_eq!(invocation.attempts(), 3);
    assert_eq!(transport.call_count("system.ping"), 3);
    let attempts: Vec<u32> = invocation.records.iter().map(|r| r.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    // three timeouts plus backoff of 100ms and 200ms
    assert!(elapsed >= 3_900 && elapsed <= 3_900 + OVERHEAD_MS, "took {}ms", elapsed);
}

// ============================================================================
// Retry policy
// ============================================================================

/// A retry that succeeds ends the invocation with ok
#[tokio::test(start_paused = true)]
async fn test_retry_then_success() {
    let transport = Arc::new(
        FakeToolTransport::new()
            .tool(ToolDescriptor::new("system.time", ToolTier::TierA))
            .respond(
                "system.time",
                CallToolResponse::failure(ToolError::timeout("busy")),
            )
            .respond("system.time", CallToolResponse::success(json!("12:00"))),
    );
    let invocation = invoker(&transport).invoke(&request("system.time")).await;

    assert!(invocation.response.ok);
    assert_eq!(invocation.response.result, Some(json!("12:00")));
    assert_eq!(invocation.attempts(), 2);
    assert!(!invocation.records[0].success);
    assert!(invocation.records[1].success);
}

/// An unbounded retry setting still stops at the first success
#[tokio::test(start_paused = true)]
async fn test_max_retries_at_upper_bound() {
    let transport = Arc::new(
        FakeToolTransport::new()
            .tool(ToolDescriptor::new("system.time", ToolTier::TierA))
            .respond(
                "system.time",
                CallToolResponse::failure(ToolError::timeout("busy")),
            )
            .respond("system.time", CallToolResponse::success(json!("12:00"))),
    );
    let config = ToolsConfig {
        max_retries: u32::MAX,
        ..ToolsConfig::default()
    };
    let tool_transport: Arc<dyn ToolTransport> = transport.clone();
    let invocation = ToolInvoker::new(tool_transport, &config)
        .invoke(&request("system.time"))
        .await;

    assert!(invocation.response.ok);
    assert_eq!(invocation.attempts(), 2);
}

/// Errors marked non-retryable are returned after one attempt
#[tokio::test(start_paused = true)]
async fn test_non_retryable_error_is_not_retried() {
    let transport = Arc::new(
        FakeToolTransport::new()
            .tool(ToolDescriptor::new("kb.lookup", ToolTier::TierAB))
            .respond(
                "kb.lookup",
                CallToolResponse::failure(ToolError::new(
                    ToolErrorCode::BadArgs,
                    "missing query",
                    false,
                )),
            ),
    );
    let invocation = invoker(&transport).invoke(&request("kb.lookup")).await;

    assert_eq!(invocation.attempts(), 1);
    let error = invocation.response.error.unwrap();
    assert_eq!(error.code, ToolErrorCode::BadArgs);
    assert_eq!(error.message, "missing query");
}

// ============================================================================
// Normalization
// ============================================================================

/// A malformed response becomes the fallback TIMEOUT failure
#[tokio::test(start_paused = true)]
async fn test_malformed_response_is_normalized() {
    let malformed = CallToolResponse {
        ok: true,
        result: Some(json!(1)),
        error: Some(ToolError::timeout("contradictory")),
    };
    let transport = Arc::new(
        FakeToolTransport::new()
            .tool(ToolDescriptor::new("report.build", ToolTier::TierA))
            .respond("report.build", malformed),
    );
    let invocation = invoker(&transport).invoke(&request("report.build")).await;

    assert!(!invocation.response.ok);
    assert!(invocation.response.is_well_formed());
    assert_eq!(
        invocation.response.error.unwrap().code,
        ToolErrorCode::Timeout
    );
}

/// A tool answering inside the timeout is reported with its latency
#[tokio::test(start_paused = true)]
async fn test_slow_tool_inside_timeout_succeeds() {
    let transport = Arc::new(
        FakeToolTransport::new()
            .tool(ToolDescriptor::new("search.web", ToolTier::TierAB))
            .delay("search.web", Duration::from_millis(800)),
    );
    let invocation = invoker(&transport).invoke(&request("search.web")).await;

    assert!(invocation.response.ok);
    assert_eq!(invocation.attempts(), 1);
    assert!(invocation.records[0].latency_ms >= 800);
}
