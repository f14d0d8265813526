//! Serde round-trip tests for the wire types consumers persist or forward.

use chrono::Utc;
use sage_shared::{
    Envelope, StageName, ToolCallRecord, ToolError, ToolErrorCode, VerificationReport,
};
use serde_json::json;

#[test]
fn test_envelope_round_trip() {
    let env = Envelope::new(
        StageName::ToolCallResult,
        "system.ping returned",
        json!({"tool": "system.ping", "ok": true, "result": {"pong": true}}),
        3,
        "trace-1",
        "session-1",
    );

    let json = serde_json::to_string(&env).unwrap();
    let back: Envelope = serde_json::from_str(&json).unwrap();
    assert_eq!(back, env);
}

#[test]
fn test_envelope_wire_field_names() {
    let env = Envelope::new(StageName::Start, "run started", json!({}), 1, "tr", "se");
    let value = serde_json::to_value(&env).unwrap();

    for field in ["stage", "message", "payload", "seq", "ts", "traceId", "sessionId"] {
        assert!(value.get(field).is_some(), "missing field {}", field);
    }
    assert_eq!(value["stage"], "start");
}

#[test]
fn test_tool_call_record_round_trip_success() {
    let record = ToolCallRecord::succeeded(
        "search.web",
        json!({"q": "rust"}),
        json!({"hits": 3}),
        42,
        1,
    );
    let json = serde_json::to_string(&record).unwrap();
    let back: ToolCallRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(back, record);
    assert!(back.is_consistent());
}

#[test]
fn test_tool_call_record_round_trip_failure() {
    let record = ToolCallRecord::failed(
        "search.web",
        json!({"q": "rust"}),
        ToolError::new(ToolErrorCode::BadArgs, "q too long", false),
        7,
        2,
    );
    let json = serde_json::to_string(&record).unwrap();
    assert!(!json.contains("\"result\""));

    let back: ToolCallRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(back, record);
    assert_eq!(back.attempt, 2);
}

#[test]
fn test_verification_report_round_trip() {
    let report = VerificationReport {
        consistency_score: 0.5,
        contradictions: vec!["round 1 contradicts round 2".to_string()],
        factuality_flags: vec!["search.web failed: TIMEOUT".to_string()],
        unresolved_claims: vec!["release date".to_string()],
        verified: false,
        issues: vec!["round cap reached".to_string()],
        recommendations: vec!["verify the release date".to_string()],
        confidence: 0.25,
        timestamp: Utc::now(),
    };

    let json = serde_json::to_string(&report).unwrap();
    let back: VerificationReport = serde_json::from_str(&json).unwrap();
    assert_eq!(back, report);
}

#[test]
fn test_stage_registry_is_additive() {
    // Names published to consumers. Entries may be appended, never changed.
    let published = [
        "start",
        "file_extract",
        "rag",
        "tool_call_start",
        "tool_call_result",
        "answer_delta",
        "answer_final",
        "error",
        "plan",
        "reasoning",
        "reflection",
        "verification",
        "synthesis",
    ];

    for (i, name) in published.iter().enumerate() {
        assert_eq!(StageName::ALL[i].as_str(), *name);
    }
    assert!(StageName::ALL.len() >= published.len());
}
