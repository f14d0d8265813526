//! FAST single tool dispatch.
//!
//! A question of the form `/name rest` names a tool. At most one call is
//! made per run, gated by the run's policy before anything is sent.

use async_trait::async_trait;
use sage_shared::{StageName, ToolDescriptor};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::error::StageError;
use crate::pipeline::memory::keys;
use crate::pipeline::{PipelineContext, Stage};
use crate::tools::{ToolDispatcher, ToolInvocation};

/// Tool named by a command-prefixed question.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCommand {
    pub name: String,
    pub args: Value,
}

/// `/ping` → (`ping`, `{}`); `/kb.lookup rust async` → (`kb.lookup`,
/// `{"input": "rust async"}`).
pub fn parse_command(question: &str) -> Option<ToolCommand> {
    let rest = question.trim().strip_prefix('/')?;
    let (name, input) = match rest.split_once(char::is_whitespace) {
        Some((name, input)) => (name, input.trim()),
        None => (rest, ""),
    };
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !valid {
        return None;
    }
    let args = if input.is_empty() {
        json!({})
    } else {
        json!({ "input": input })
    };
    Some(ToolCommand {
        name: name.to_string(),
        args,
    })
}

pub fn tool_start_payload(tool: &ToolDescriptor, args: &Value) -> Value {
    json!({
        "toolName": tool.name,
        "args": args,
        "tier": tool.tier,
    })
}

pub fn tool_result_payload(tool_name: &str, invocation: &ToolInvocation) -> Value {
    let latency_ms: u64 = invocation.records.iter().map(|r| r.latency_ms).sum();
    json!({
        "toolName": tool_name,
        "ok": invocation.response.ok,
        "result": invocation.response.result,
        "error": invocation.response.error,
        "attempts": invocation.attempts(),
        "latencyMs": latency_ms,
    })
}

pub struct ToolDispatchStage {
    dispatcher: Arc<ToolDispatcher>,
    timeout: Duration,
}

impl ToolDispatchStage {
    pub fn new(dispatcher: Arc<ToolDispatcher>, timeout: Duration) -> Self {
        Self {
            dispatcher,
            timeout,
        }
    }
}

#[async_trait]
impl Stage for ToolDispatchStage {
    fn name(&self) -> &'static str {
        "tool_dispatch"
    }

    fn is_enabled(&self, ctx: &PipelineContext) -> bool {
        parse_command(&ctx.request.question).is_some()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn process(&self, ctx: &mut PipelineContext) -> Result<(), StageError> {
        let command = match parse_command(&ctx.request.question) {
            Some(c) => c,
            None => return Ok(()),
        };
        let access = ctx.tool_access();
        let tool = self.dispatcher.authorize(&access, &command.name).await?;

        ctx.emit(
            StageName::ToolCallStart,
            format!("calling {}", tool.name),
            tool_start_payload(&tool, &command.args),
        )
        .await?;

        let invocation = self.dispatcher.invoke(&access, &tool, command.args).await;
        let payload = tool_result_payload(&tool.name, &invocation);
        let message = if invocation.response.ok {
            format!("{} succeeded", tool.name)
        } else {
            format!("{} failed", tool.name)
        };
        ctx.extend(keys::TOOL_CALLS, invocation.records);
        ctx.emit(StageName::ToolCallResult, message, payload).await
    }
}
