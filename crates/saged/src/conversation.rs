//! Conversation history per session.
//!
//! Durable storage is an external collaborator; the daemon ships an LRU
//! bounded in-memory store behind the same trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use tokio::sync::Mutex;

use crate::error::CollabError;

/// Turns retained per session in memory
const MAX_TURNS_PER_SESSION: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    pub at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn user(content: &str) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
            at: Utc::now(),
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: content.to_string(),
            at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Most recent `limit` turns, oldest first
    async fn load(&self, session_id: &str, limit: usize) -> Result<Vec<ChatTurn>, CollabError>;

    async fn append(&self, session_id: &str, turns: Vec<ChatTurn>) -> Result<(), CollabError>;
}

pub struct LruConversationStore {
    sessions: Mutex<LruCache<String, Vec<ChatTurn>>>,
}

impl LruConversationStore {
    pub fn new(max_sessions: usize) -> Self {
        let capacity = NonZeroUsize::new(max_sessions).unwrap_or(NonZeroUsize::MIN);
        Self {
            sessions: Mutex::new(LruCache::new(capacity)),
        }
    }
}

#[async_trait]
impl ConversationStore for LruConversationStore {
    async fn load(&self, session_id: &str, limit: usize) -> Result<Vec<ChatTurn>, CollabError> {
        let mut sessions = self.sessions.lock().await;
        let turns = match sessions.get(session_id) {
            Some(turns) => turns,
            None => return Ok(Vec::new()),
        };
        let skip = turns.len().saturating_sub(limit);
        Ok(turns[skip..].to_vec())
    }

    async fn append(&self, session_id: &str, turns: Vec<ChatTurn>) -> Result<(), CollabError> {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions.get_or_insert_mut(session_id.to_string(), Vec::new);
        entry.extend(turns);
        if entry.len() > MAX_TURNS_PER_SESSION {
            let excess = entry.len() - MAX_TURNS_PER_SESSION;
            entry.drain(..excess);
        }
        Ok(())
    }
}
