//! Policy gate in front of the invoker.
//!
//! Order is fixed: the run must have tool access at all, the tool must be in
//! the registry for the run's scope and profile, `can_use_tool` must pass,
//! and a replay's allowed-tools filter must list it. Only then does the call
//! reach the invoker, so a rejected call never consumes an attempt.

use sage_shared::{CallToolRequest, ExecutionPolicy, Scope, ToolDescriptor};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::invoker::{ToolInvocation, ToolInvoker};
use super::registry::ToolRegistry;
use crate::error::StageError;
use crate::policy::can_use_tool;

/// Why a call was refused before invocation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchRejection {
    #[error("tool access is disabled for this run")]
    ToolsDisabled,

    #[error("tool '{0}' is not offered for this scope")]
    NotFound(String),

    #[error("tool '{tool}' requires tier {required}, run has {granted}")]
    TierTooLow {
        tool: String,
        required: sage_shared::ToolTier,
        granted: sage_shared::ToolTier,
    },

    #[error("tool '{0}' has side effects")]
    SideEffecting(String),

    #[error("tool '{0}' is outside the replay's allowed tools")]
    NotAllowed(String),
}

impl DispatchRejection {
    /// A missing tool is not a policy decision; everything else is.
    pub fn is_policy_block(&self) -> bool {
        !matches!(self, DispatchRejection::NotFound(_))
    }
}

impl From<DispatchRejection> for StageError {
    fn from(rejection: DispatchRejection) -> Self {
        match rejection {
            DispatchRejection::NotFound(tool) => {
                StageError::Tool(format!("tool '{}' is not offered for this scope", tool))
            }
            other => StageError::PolicyBlock(other.to_string()),
        }
    }
}

/// What a run may do with tools, detached from the run's context so that
/// concurrent calls can carry it into spawned tasks.
#[derive(Debug, Clone)]
pub struct ToolAccess {
    pub scope: Scope,
    pub profile: String,
    pub trace_id: String,
    pub session_id: String,
    pub policy: ExecutionPolicy,
    pub allowed_tools: Option<Arc<HashSet<String>>>,
}

pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    invoker: Arc<ToolInvoker>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, invoker: Arc<ToolInvoker>) -> Self {
        Self { registry, invoker }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Resolve `name` and check it against the run's policy.
    pub async fn authorize(
        &self,
        access: &ToolAccess,
        name: &str,
    ) -> Result<ToolDescriptor, DispatchRejection> {
        if !access.policy.tools_enabled() {
            return Err(DispatchRejection::ToolsDisabled);
        }

        let tool = self
            .registry
            .resolve(
                access.scope,
                &access.profile,
                name,
                &access.trace_id,
                &access.session_id,
            )
            .await
            .ok_or_else(|| DispatchRejection::NotFound(name.to_string()))?;

        check_policy(access, &tool)?;
        Ok(tool)
    }

    /// Invoke an already authorized tool.
    pub async fn invoke(
        &self,
        access: &ToolAccess,
        tool: &ToolDescriptor,
        args: serde_json::Value,
    ) -> ToolInvocation {
        let request = CallToolRequest {
            tool_name: tool.name.clone(),
            args,
            scope: access.scope,
            profile: access.profile.clone(),
            trace_id: access.trace_id.clone(),
            session_id: access.session_id.clone(),
        };
        info!("[tools] calling {}", tool.name);
        self.invoker.invoke(&request).await
    }

    pub async fn dispatch(
        &self,
        access: &ToolAccess,
        name: &str,
        args: serde_json::Value,
    ) -> Result<ToolInvocation, DispatchRejection> {
        let tool = self.authorize(access, name).await?;
        Ok(self.invoke(access, &tool, args).await)
    }
}

fn check_policy(access: &ToolAccess, tool: &ToolDescriptor) -> Result<(), DispatchRejection> {
    let policy = &access.policy;
    if !can_use_tool(
        policy.tool_access_level,
        tool.tier,
        tool.side_effecting,
        policy.allow_side_effect_tools,
    ) {
        debug!(
            "[tools] {} blocked: tier {} side_effecting {}",
            tool.name, tool.tier, tool.side_effecting
        );
        if tool.side_effecting && !policy.allow_side_effect_tools {
            return Err(DispatchRejection::SideEffecting(tool.name.clone()));
        }
        return Err(DispatchRejection::TierTooLow {
            tool: tool.name.clone(),
            required: tool.tier,
            granted: policy.tool_access_level,
        });
    }

    if let Some(allowed) = &access.allowed_tools {
        if !allowed.contains(&tool.name) {
            return Err(DispatchRejection::NotAllowed(tool.name.clone()));
        }
    }
    Ok(())
}
