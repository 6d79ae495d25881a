//! Core orchestration logic.
//!
//! This module contains:
//! - Registry: Task trait and the set of registered tasks
//! - Workflow: Workflow definitions, phase grouping and the catalog
//! - Orchestrator: Phase-by-phase concurrent execution engine
//! - Conflicts: Disagreement detection across task conclusions
//! - Synthesis: Final aggregation call with deterministic fallback
//! - Usage: Token and cost aggregation
//! - EventBus: Progress notifications

pub mod conflicts;
pub mod event_bus;
pub mod orchestrator;
pub mod registry;
pub mod synthesis;
pub mod usage;
pub mod workflow;

// Re-export commonly used types
pub use conflicts::{detect_conflicts, positions_by_subject};
pub use event_bus::EventBus;
pub use orchestrator::{build_context, Orchestrator, OrchestratorSettings, StepError};
pub use registry::{RegistryError, Task, TaskRegistry};
pub use synthesis::{
    fallback_synthesis, SynthesisError, SynthesisInput, SynthesisOutcome, SynthesisSettings,
    Synthesizer, FALLBACK_DISCLAIMER,
};
pub use usage::{aggregate_usage, PricingTable};
pub use workflow::{
    PhaseGroup, PipelineStep, WorkflowCatalog, WorkflowDefinition, WorkflowError,
    SYNTHESIS_TASK_ID,
};
