//! Typed per-run working memory.
//!
//! Keys carry their value type, so a stage cannot read back a different type
//! than the one stored. Scalar values are write-once; list values only grow.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;

/// Namespaced key for a value of type `T`.
pub struct MemoryKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> MemoryKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for MemoryKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for MemoryKey<T> {}

impl<T> std::fmt::Debug for MemoryKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MemoryKey({})", self.name)
    }
}

/// A write-once key already holds a value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("memory key '{0}' is already set")]
pub struct AlreadySet(pub &'static str);

#[derive(Default)]
pub struct WorkingMemory {
    values: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: Send + Sync + 'static>(&self, key: MemoryKey<T>) -> Option<&T> {
        self.values
            .get(key.name)
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn contains<T: Send + Sync + 'static>(&self, key: MemoryKey<T>) -> bool {
        self.get(key).is_some()
    }

    /// Store a write-once value.
    pub fn put<T: Send + Sync + 'static>(
        &mut self,
        key: MemoryKey<T>,
        value: T,
    ) -> Result<(), AlreadySet> {
        if self.values.contains_key(key.name) {
            return Err(AlreadySet(key.name));
        }
        self.values.insert(key.name, Box::new(value));
        Ok(())
    }

    /// Append to a list value, creating it on first use.
    pub fn append<T: Send + Sync + 'static>(&mut self, key: MemoryKey<Vec<T>>, item: T) {
        self.extend(key, std::iter::once(item));
    }

    pub fn extend<T, I>(&mut self, key: MemoryKey<Vec<T>>, items: I)
    where
        T: Send + Sync + 'static,
        I: IntoIterator<Item = T>,
    {
        let entry = self
            .values
            .entry(key.name)
            .or_insert_with(|| Box::new(Vec::<T>::new()));
        if let Some(list) = entry.downcast_mut::<Vec<T>>() {
            list.extend(items);
        }
    }

    /// List value, empty when never written.
    pub fn list<T: Send + Sync + 'static>(&self, key: MemoryKey<Vec<T>>) -> &[T] {
        self.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn keys(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.values.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// Keys used by the stages.
pub mod keys {
    use super::MemoryKey;
    use crate::conversation::ChatTurn;
    use crate::deep::reasoning::PlannedToolCall;
    use crate::deep::tool_orchestration::RoundCalls;
    use crate::retrieval::{FileText, RetrievedChunk};
    use sage_shared::{Plan, ReasoningStep, ReflectionNote, ToolCallRecord, VerificationReport};

    pub const COMPLEXITY: MemoryKey<f64> = MemoryKey::new("mode.complexity");
    pub const HISTORY: MemoryKey<Vec<ChatTurn>> = MemoryKey::new("fast.history");
    pub const FILES: MemoryKey<Vec<FileText>> = MemoryKey::new("fast.files");
    pub const RAG_CHUNKS: MemoryKey<Vec<RetrievedChunk>> = MemoryKey::new("fast.rag");
    pub const TOOL_CALLS: MemoryKey<Vec<ToolCallRecord>> = MemoryKey::new("tools.calls");
    pub const PLAN: MemoryKey<Plan> = MemoryKey::new("deep.plan");
    pub const REASONING: MemoryKey<Vec<ReasoningStep>> = MemoryKey::new("deep.reasoning");
    pub const PENDING_TOOLS: MemoryKey<Vec<PlannedToolCall>> = MemoryKey::new("deep.tool_requests");
    pub const ROUND_CALLS: MemoryKey<Vec<RoundCalls>> = MemoryKey::new("deep.round_calls");
    pub const REFLECTIONS: MemoryKey<Vec<ReflectionNote>> = MemoryKey::new("deep.reflections");
    pub const VERIFICATION: MemoryKey<VerificationReport> = MemoryKey::new("deep.verification");
    /// User-facing answer text, from llm_stream or synthesis
    pub const ANSWER: MemoryKey<String> = MemoryKey::new("answer.text");
}
