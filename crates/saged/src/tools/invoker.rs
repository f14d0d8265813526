//! Single tool invocation: retry(timeout(call)) with one fallback constructor.
//!
//! The invoker never fails. Timeouts, transport errors and malformed
//! responses all become `ok=false` with a retryable `TIMEOUT` error; a
//! structured error from the tool service passes through as sent. Only tools
//! on the idempotent allow-list are retried, and only while the error says
//! it is retryable.

use sage_shared::{CallToolRequest, CallToolResponse, ToolCallRecord, ToolError};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use super::transport::ToolTransport;
use crate::config::ToolsConfig;

/// Outcome of one invocation: the final response and one record per attempt.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub response: CallToolResponse,
    pub records: Vec<ToolCallRecord>,
}

impl ToolInvocation {
    pub fn attempts(&self) -> usize {
        self.records.len()
    }

    pub fn last_record(&self) -> Option<&ToolCallRecord> {
        self.records.last()
    }
}

pub struct ToolInvoker {
    transport: Arc<dyn ToolTransport>,
    call_timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
    idempotent: HashSet<String>,
}

/// The one place a locally observed failure becomes a response.
fn fallback_response(message: impl Into<String>) -> CallToolResponse {
    CallToolResponse::failure(ToolError::timeout(message))
}

impl ToolInvoker {
    pub fn new(transport: Arc<dyn ToolTransport>, config: &ToolsConfig) -> Self {
        Self {
            transport,
            call_timeout: config.call_timeout(),
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff(),
            idempotent: config.idempotent_tools.iter().cloned().collect(),
        }
    }

    pub fn is_idempotent(&self, tool_name: &str) -> bool {
        self.idempotent.contains(tool_name)
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// One attempt under the call timeout.
    async fn attempt(&self, request: &CallToolRequest) -> CallToolResponse {
        match timeout(self.call_timeout, self.transport.call_tool(request)).await {
            Ok(Ok(response)) if response.is_well_formed() => response,
            Ok(Ok(_)) => fallback_response("malformed tool response"),
            Ok(Err(e)) => fallback_response(format!("transport error: {}", e)),
            Err(_) => fallback_response(format!(
                "no response within {}ms",
                self.call_timeout.as_millis()
            )),
        }
    }

    pub async fn invoke(&self, request: &CallToolRequest) -> ToolInvocation {
        let max_attempts = if self.is_idempotent(&request.tool_name) {
            self.max_retries.saturating_add(1)
        } else {
            1
        };

        let mut records = Vec::new();
        let mut attempt = 1;
        loop {
            let started = Instant::now();
            let response = self.attempt(request).await;
            let latency_ms = started.elapsed().as_millis() as u64;
            records.push(ToolCallRecord::from_response(
                &request.tool_name,
                request.args.clone(),
                &response,
                latency_ms,
                attempt,
            ));

            let retryable = response.error.as_ref().map(|e| e.retryable).unwrap_or(false);
            if response.ok || !retryable || attempt >= max_attempts {
                if response.ok {
                    debug!(
                        "[tools] {} ok in {}ms (attempt {})",
                        request.tool_name, latency_ms, attempt
                    );
                } else if let Some(err) = &response.error {
                    warn!(
                        "[tools] {} failed after {} attempt(s): {}",
                        request.tool_name, attempt, err
                    );
                }
                return ToolInvocation { response, records };
            }

            sleep(self.retry_backoff * attempt).await;
            attempt += 1;
        }
    }
}
