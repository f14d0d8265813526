//! DEEP path: plan, bounded reasoning loop, synthesis.

pub mod coordinator;
pub mod plan;
pub mod reasoning;
pub mod reflection;
pub mod synthesis;
pub mod tool_orchestration;
pub mod verification;

pub use coordinator::DeepReasoningCoordinator;
pub use plan::PlanStage;
pub use reasoning::ReasoningStage;
pub use reflection::ReflectionStage;
pub use synthesis::SynthesisStage;
pub use tool_orchestration::ToolOrchestrationStage;
