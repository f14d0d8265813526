//! Tool descriptor cache, keyed by (scope, profile).
//!
//! Shared by every run. A fresh entry is served without touching the tool
//! service; an expired or missing entry triggers one `list_tools`. When the
//! refresh fails or outlasts the list timeout, the stale entry is kept and
//! served, and with nothing cached the lookup yields an empty list. The lock is never held across the
//! upstream call, so concurrent refreshes may race and the last successful
//! write wins.

use sage_shared::{ListToolsRequest, Scope, ToolDescriptor};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use super::transport::ToolTransport;
use crate::error::TransportError;

/// List timeout used unless configured otherwise.
pub const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(2);

struct CacheEntry {
    tools: Arc<Vec<ToolDescriptor>>,
    expires_at: Instant,
}

pub struct ToolRegistry {
    transport: Arc<dyn ToolTransport>,
    default_ttl: Duration,
    list_timeout: Duration,
    entries: RwLock<HashMap<(Scope, String), CacheEntry>>,
}

impl ToolRegistry {
    pub fn new(transport: Arc<dyn ToolTransport>, default_ttl: Duration) -> Self {
        Self {
            transport,
            default_ttl,
            list_timeout: DEFAULT_LIST_TIMEOUT,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_list_timeout(mut self, list_timeout: Duration) -> Self {
        self.list_timeout = list_timeout;
        self
    }

    /// Descriptors for (scope, profile), refreshing when expired.
    pub async fn ensure_fresh(
        &self,
        scope: Scope,
        profile: &str,
        trace_id: &str,
        session_id: &str,
    ) -> Arc<Vec<ToolDescriptor>> {
        let key = (scope, profile.to_string());
        let stale = {
            let entries = self.entries.read().await;
            match entries.get(&key) {
                Some(entry) if Instant::now() < entry.expires_at => {
                    debug!("[tools] registry hit {}/{}", scope, profile);
                    return entry.tools.clone();
                }
                Some(entry) => Some(entry.tools.clone()),
                None => None,
            }
        };

        let request = ListToolsRequest {
            scope,
            profile: profile.to_string(),
            trace_id: trace_id.to_string(),
            session_id: session_id.to_string(),
        };

        let listed = timeout(self.list_timeout, self.transport.list_tools(&request))
            .await
            .unwrap_or_else(|_| {
                Err(TransportError::Timeout(self.list_timeout.as_millis() as u64))
            });

        match listed {
            Ok(response) => {
                let ttl = match response.ttl_seconds {
                    Some(secs) if secs > 0 => Duration::from_secs(secs),
                    _ => self.default_ttl,
                };
                let tools = Arc::new(response.tools);
                debug!(
                    "[tools] registry refreshed {}/{}: {} tools, ttl {}s",
                    scope,
                    profile,
                    tools.len(),
                    ttl.as_secs()
                );
                self.entries.write().await.insert(
                    key,
                    CacheEntry {
                        tools: tools.clone(),
                        expires_at: Instant::now() + ttl,
                    },
                );
                tools
            }
            Err(e) => {
                warn!("[tools] list_tools failed for {}/{}: {}", scope, profile, e);
                stale.unwrap_or_default()
            }
        }
    }

    /// Resolve a tool by exact name, or by a `.name` suffix when no exact
    /// match exists (`ping` finds `system.ping`).
    pub async fn resolve(
        &self,
        scope: Scope,
        profile: &str,
        name: &str,
        trace_id: &str,
        session_id: &str,
    ) -> Option<ToolDescriptor> {
        let tools = self.ensure_fresh(scope, profile, trace_id, session_id).await;
        find_tool(&tools, name).cloned()
    }

    /// Drop every cached entry.
    pub async fn invalidate(&self) {
        self.entries.write().await.clear();
    }
}

pub fn find_tool<'a>(tools: &'a [ToolDescriptor], name: &str) -> Option<&'a ToolDescriptor> {
    if let Some(exact) = tools.iter().find(|t| t.name == name) {
        return Some(exact);
    }
    let suffix = format!(".{}", name);
    tools.iter().find(|t| t.name.ends_with(&suffix))
}
