//! Run context, stage contract, scheduler and stage lists.

pub mod context;
pub mod factory;
pub mod memory;
pub mod runner;
pub mod stage;

pub use context::PipelineContext;
pub use factory::{PipelineFactory, Services};
pub use memory::{keys, MemoryKey, WorkingMemory};
pub use runner::{run_stage, PipelineRunner, StageOutcome, PLACEHOLDER_ANSWER};
pub use stage::Stage;
