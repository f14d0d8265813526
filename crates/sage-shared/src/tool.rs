//! Tool service protocol (`/mcp/list_tools`, `/mcp/call_tool`) and the
//! per-attempt call record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::policy::{Scope, ToolTier};

/// Descriptor for one callable tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub input_schema: serde_json::Value,
    #[serde(default)]
    pub output_schema: serde_json::Value,
    /// Calls per minute advertised by the tool service, if any
    #[serde(default)]
    pub rate_limit: Option<u32>,
    #[serde(default)]
    pub ttl_hint_seconds: Option<u64>,
    /// Capability tier required to call the tool
    #[serde(default)]
    pub tier: ToolTier,
    #[serde(default)]
    pub side_effecting: bool,
}

impl ToolDescriptor {
    pub fn new(name: &str, tier: ToolTier) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            version: "1".to_string(),
            input_schema: serde_json::Value::Null,
            output_schema: serde_json::Value::Null,
            rate_limit: None,
            ttl_hint_seconds: None,
            tier,
            side_effecting: false,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn side_effecting(mut self) -> Self {
        self.side_effecting = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsRequest {
    pub scope: Scope,
    pub profile: String,
    pub trace_id: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResponse {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    /// Cache lifetime suggested by the tool service
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolRequest {
    pub tool_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    pub scope: Scope,
    pub profile: String,
    pub trace_id: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

impl CallToolResponse {
    pub fn success(result: serde_json::Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: ToolError) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error),
        }
    }

    /// A response is well formed when `ok` agrees with which side is present.
    pub fn is_well_formed(&self) -> bool {
        if self.ok {
            self.error.is_none()
        } else {
            self.error.is_some() && self.result.is_none()
        }
    }
}

/// Record of one tool invocation attempt. Exactly one of `result` / `error`
/// is present; the constructors are the only way the daemon builds one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub args: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
    pub latency_ms: u64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    /// 1-based attempt number within one invocation
    #[serde(default = "default_attempt")]
    pub attempt: u32,
}

fn default_attempt() -> u32 {
    1
}

impl ToolCallRecord {
    pub fn succeeded(
        tool_name: &str,
        args: serde_json::Value,
        result: serde_json::Value,
        latency_ms: u64,
        attempt: u32,
    ) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            args,
            result: Some(result),
            error: None,
            latency_ms,
            success: true,
            timestamp: Utc::now(),
            attempt,
        }
    }

    pub fn failed(
        tool_name: &str,
        args: serde_json::Value,
        error: ToolError,
        latency_ms: u64,
        attempt: u32,
    ) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            args,
            result: None,
            error: Some(error),
            latency_ms,
            success: false,
            timestamp: Utc::now(),
            attempt,
        }
    }

    /// Build a record from a response, keeping the one-of invariant even for
    /// a malformed response.
    pub fn from_response(
        tool_name: &str,
        args: serde_json::Value,
        response: &CallToolResponse,
        latency_ms: u64,
        attempt: u32,
    ) -> Self {
        match (response.ok, &response.result, &response.error) {
            (true, result, None) => Self::succeeded(
                tool_name,
                args,
                result.clone().unwrap_or(serde_json::Value::Null),
                latency_ms,
                attempt,
            ),
            (_, _, Some(error)) => Self::failed(tool_name, args, error.clone(), latency_ms, attempt),
            (false, _, None) => Self::failed(
                tool_name,
                args,
                ToolError::timeout("tool response carried no error detail"),
                latency_ms,
                attempt,
            ),
        }
    }

    /// Check the one-of invariant.
    pub fn is_consistent(&self) -> bool {
        self.result.is_some() != self.error.is_some() && self.success == self.result.is_some()
    }
}
