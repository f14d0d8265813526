//! The stage contract shared by FAST and DEEP stages.

use async_trait::async_trait;
use std::time::Duration;

use super::context::PipelineContext;
use crate::error::StageError;

#[async_trait]
pub trait Stage: Send + Sync {
    /// Pipeline stage name, used in logs and `error` payloads
    fn name(&self) -> &'static str;

    /// Skipped stages emit nothing
    fn is_enabled(&self, _ctx: &PipelineContext) -> bool {
        true
    }

    fn timeout(&self) -> Duration;

    /// A fatal failure ends the run with a terminal error
    fn is_fatal(&self) -> bool {
        false
    }

    async fn process(&self, ctx: &mut PipelineContext) -> Result<(), StageError>;
}
