//! Configuration management for saged.
//!
//! Loads settings from /etc/sage/config.toml or uses defaults.
//! Every field has a serde default so partial files are valid.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/sage/config.toml";

/// Default config file path for fallback
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/sage/config.toml";

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Envelopes buffered per run before the producer waits on the client
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_bind() -> String {
    "127.0.0.1:7870".to_string()
}

fn default_event_buffer() -> usize {
    32
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// Tool service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Base URL of the tool service (`/mcp/list_tools`, `/mcp/call_tool`)
    #[serde(default = "default_tools_base_url")]
    pub base_url: String,

    /// Registry cache lifetime when the tool service sends no TTL
    #[serde(default = "default_registry_ttl")]
    pub registry_ttl_secs: u64,

    /// Upper bound on one `list_tools` refresh
    #[serde(default = "default_list_timeout")]
    pub list_timeout_ms: u64,

    /// Per-attempt tool call timeout
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,

    /// Retries after the first attempt, idempotent tools only
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pause between attempts, multiplied by the attempt number
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Tools safe to call more than once
    #[serde(default = "default_idempotent_tools")]
    pub idempotent_tools: Vec<String>,

    /// Profile used when the request names none
    #[serde(default = "default_profile")]
    pub default_profile: String,

    /// Upper bound on tool calls in one deep round
    #[serde(default = "default_max_calls_per_round")]
    pub max_calls_per_round: usize,

    /// Tool calls in flight at once within one round
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
}

fn default_tools_base_url() -> String {
    "http://127.0.0.1:8090".to_string()
}

fn default_registry_ttl() -> u64 {
    300
}

fn default_list_timeout() -> u64 {
    2_000
}

fn default_call_timeout() -> u64 {
    1_200
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff() -> u64 {
    100
}

fn default_idempotent_tools() -> Vec<String> {
    vec![
        "system.ping".to_string(),
        "system.time".to_string(),
        "search.web".to_string(),
        "kb.lookup".to_string(),
    ]
}

fn default_profile() -> String {
    sage_shared::DEFAULT_TOOL_PROFILE.to_string()
}

fn default_max_calls_per_round() -> usize {
    3
}

fn default_max_concurrent_calls() -> usize {
    2
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            base_url: default_tools_base_url(),
            registry_ttl_secs: default_registry_ttl(),
            list_timeout_ms: default_list_timeout(),
            call_timeout_ms: default_call_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff(),
            idempotent_tools: default_idempotent_tools(),
            default_profile: default_profile(),
            max_calls_per_round: default_max_calls_per_round(),
            max_concurrent_calls: default_max_concurrent_calls(),
        }
    }
}

impl ToolsConfig {
    pub fn registry_ttl(&self) -> Duration {
        Duration::from_secs(self.registry_ttl_secs)
    }

    pub fn list_timeout(&self) -> Duration {
        Duration::from_millis(self.list_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Deep reasoning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepConfig {
    /// Hard cap on reasoning rounds, applied on top of the policy's rounds
    #[serde(default = "default_round_cap")]
    pub round_cap: u32,

    /// Confidence that ends the loop when no evidence gap is open
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Complexity scorer: "keyword" or "weighted"
    #[serde(default = "default_scorer")]
    pub scorer: String,

    /// Threshold for the weighted scorer
    #[serde(default = "default_complexity_threshold")]
    pub complexity_threshold: f64,

    /// Characters per answer_delta emitted by synthesis
    #[serde(default = "default_chunk_chars")]
    pub synthesis_chunk_chars: usize,
}

fn default_round_cap() -> u32 {
    4
}

fn default_confidence_threshold() -> f64 {
    0.8
}

fn default_scorer() -> String {
    "keyword".to_string()
}

fn default_complexity_threshold() -> f64 {
    0.62
}

fn default_chunk_chars() -> usize {
    160
}

impl Default for DeepConfig {
    fn default() -> Self {
        Self {
            round_cap: default_round_cap(),
            confidence_threshold: default_confidence_threshold(),
            scorer: default_scorer(),
            complexity_threshold: default_complexity_threshold(),
            synthesis_chunk_chars: default_chunk_chars(),
        }
    }
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Ollama API base URL
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model used when the request gives no hint
    #[serde(default = "default_model")]
    pub model: String,

    /// HTTP timeout for a single LLM request
    #[serde(default = "default_llm_timeout")]
    pub request_timeout_secs: u64,
}

fn default_llm_base_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_model() -> String {
    "qwen2.5:7b-instruct".to_string()
}

fn default_llm_timeout() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_model(),
            request_timeout_secs: default_llm_timeout(),
        }
    }
}

/// Per-stage timeouts in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTimeouts {
    #[serde(default = "default_quick_stage")]
    pub telemetry_ms: u64,

    #[serde(default = "default_quick_stage")]
    pub history_ms: u64,

    #[serde(default = "default_file_extract_stage")]
    pub file_extract_ms: u64,

    #[serde(default = "default_rag_stage")]
    pub rag_ms: u64,

    #[serde(default = "default_tool_dispatch_stage")]
    pub tool_dispatch_ms: u64,

    #[serde(default = "default_llm_stream_stage")]
    pub llm_stream_ms: u64,

    #[serde(default = "default_quick_stage")]
    pub conversation_save_ms: u64,

    #[serde(default = "default_plan_stage")]
    pub plan_ms: u64,

    #[serde(default = "default_reasoning_stage")]
    pub reasoning_ms: u64,

    #[serde(default = "default_tool_orchestration_stage")]
    pub tool_orchestration_ms: u64,

    #[serde(default = "default_reflection_stage")]
    pub reflection_ms: u64,

    /// Whole deep loop, all rounds
    #[serde(default = "default_deep_loop_stage")]
    pub deep_loop_ms: u64,

    #[serde(default = "default_synthesis_stage")]
    pub synthesis_ms: u64,
}

fn default_quick_stage() -> u64 {
    2_000
}

fn default_file_extract_stage() -> u64 {
    10_000
}

fn default_rag_stage() -> u64 {
    5_000
}

fn default_tool_dispatch_stage() -> u64 {
    8_000
}

fn default_llm_stream_stage() -> u64 {
    90_000
}

fn default_plan_stage() -> u64 {
    20_000
}

fn default_reasoning_stage() -> u64 {
    30_000
}

fn default_tool_orchestration_stage() -> u64 {
    15_000
}

fn default_reflection_stage() -> u64 {
    20_000
}

fn default_deep_loop_stage() -> u64 {
    240_000
}

fn default_synthesis_stage() -> u64 {
    60_000
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            telemetry_ms: default_quick_stage(),
            history_ms: default_quick_stage(),
            file_extract_ms: default_file_extract_stage(),
            rag_ms: default_rag_stage(),
            tool_dispatch_ms: default_tool_dispatch_stage(),
            llm_stream_ms: default_llm_stream_stage(),
            conversation_save_ms: default_quick_stage(),
            plan_ms: default_plan_stage(),
            reasoning_ms: default_reasoning_stage(),
            tool_orchestration_ms: default_tool_orchestration_stage(),
            reflection_ms: default_reflection_stage(),
            deep_loop_ms: default_deep_loop_stage(),
            synthesis_ms: default_synthesis_stage(),
        }
    }
}

/// Retrieval collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Retrieval service base URL; RAG is unavailable when unset
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    4
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            top_k: default_top_k(),
        }
    }
}

/// File extraction limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Text kept per file
    #[serde(default = "default_max_file_bytes")]
    pub max_bytes: usize,
}

fn default_max_files() -> usize {
    4
}

fn default_max_file_bytes() -> usize {
    32_768
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            max_bytes: default_max_file_bytes(),
        }
    }
}

/// Conversation history limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Turns loaded into a run
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Sessions kept in memory before the least recent is evicted
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_max_turns() -> usize {
    12
}

fn default_max_sessions() -> usize {
    1_024
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// Caller access configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    /// User ids promoted to the OWNER scope
    #[serde(default)]
    pub owner_ids: Vec<String>,
}

/// Full daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub deep: DeepConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub stages: StageTimeouts,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub files: FilesConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub access: AccessConfig,
}

impl Config {
    /// Load config from file, or return defaults
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_PATH)
            .or_else(|_| Self::load_from_path(DEFAULT_CONFIG_PATH))
            .unwrap_or_else(|e| {
                warn!("Config not found, using defaults: {}", e);
                Config::default()
            })
    }

    /// Load config from specific path
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Render as TOML (used by `--print-config`)
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
