//! Domain types for the advisors pipeline.
//!
//! This module contains the core data structures:
//! - Task: identifiers, requests and reference data handed to analysts
//! - Recommendation: per-subject actions and their stance
//! - Result: task output, per-step records and usage metering
//! - Report: conflicts and the final synthesized report
//! - Events: progress notifications emitted during a run

pub mod events;
pub mod recommendation;
pub mod report;
pub mod result;
pub mod task;

// Re-export commonly used types
pub use events::{PhaseProgress, PipelineEvent};
pub use recommendation::{Action, Recommendation, Stance};
pub use report::{
    AgentStance, Conflict, ConflictLevel, FinalReport, ResolvedRecommendation, SynthesisSource,
    TimelineItem,
};
pub use result::{PipelineResult, TaskResult, TaskStatus, Usage, UsageSummary};
pub use task::{
    AnalysisRequest, DataCategory, DependencySnapshot, HistoryRecord, InvestmentHorizon,
    Preferences, ReferenceBundle, RiskTolerance, TaskId, TaskState,
};
