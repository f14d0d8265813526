//! Sage Daemon library
//!
//! Answer orchestration: scope and policy resolution, mode selection, the
//! staged FAST and DEEP pipelines, tool access and the SSE surface.

pub mod config;
pub mod conversation;
pub mod deep;
pub mod error;
pub mod llm;
pub mod mode;
pub mod ollama;
pub mod orchestrator;
pub mod pipeline;
pub mod policy;
pub mod prompts;
pub mod retrieval;
pub mod routes;
pub mod server;
pub mod stages;
pub mod telemetry;
pub mod testing;
pub mod tools;
