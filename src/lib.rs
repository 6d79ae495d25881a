//! advisors - Tiered analyst pipeline engine
//!
//! Runs a team of analyst tasks over a set of subjects, phase by phase,
//! then synthesizes their conclusions into one report.
//!
//! # Architecture
//!
//! - Workflows group steps into phases; a phase starts only after every
//!   step of the previous phase has settled
//! - Steps run concurrently within a phase, each under its own timeout
//! - Failed steps are recorded, never fatal; dependents simply see no context
//! - Synthesis falls back to a deterministic aggregation when the
//!   reasoning service is unavailable
//!
//! # Modules
//!
//! - `adapters`: External systems (reasoning service, reference data, history)
//! - `core`: Registry, workflow catalog, orchestrator, conflicts, synthesis, usage
//! - `domain`: Data structures (TaskResult, Recommendation, FinalReport, events)
//! - `tasks`: Reasoning-backed analyst tasks and the built-in roster
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run a workflow
//! advisors run full-analysis --subjects AAPL,MSFT
//!
//! # Inspect the catalog
//! advisors workflows
//! advisors show earnings-preview
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod tasks;

// Re-export commonly used types
pub use core::{Orchestrator, Task, TaskRegistry, WorkflowCatalog, WorkflowDefinition};
pub use domain::{AnalysisRequest, FinalReport, PipelineEvent, Recommendation, TaskResult};
