//! Progress events emitted while a pipeline runs.
//!
//! Events form a closed set; each variant carries its own typed payload.
//! Delivery is best-effort: subscribers that are absent or lagging miss events.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::report::FinalReport;
use super::task::TaskId;

/// Progress snapshot emitted after every non-empty phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseProgress {
    /// Tasks that have completed successfully so far in this run
    pub completed_task_ids: Vec<TaskId>,

    pub total_steps: usize,

    /// Zero-based index of the phase that just finished
    pub current_phase: usize,

    pub total_phases: usize,
}

/// A single event in a run's lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// The run resolved its workflow and is about to prefetch
    RunStarted {
        run_id: Uuid,
        workflow_id: String,
        total_steps: usize,
        total_phases: usize,
    },

    /// One step settled (success, failure or timeout)
    StepFinished {
        run_id: Uuid,
        task_id: TaskId,
        success: bool,
        duration_ms: u64,
        error: Option<String>,
    },

    /// Every step of a phase has settled
    PhaseCompleted(PhaseProgress),

    /// Synthesis call is starting
    SynthesisStarted { run_id: Uuid },

    /// Partial synthesis output (streaming mode only)
    SynthesisChunk { run_id: Uuid, text: String },

    /// Terminal event carrying the finished report
    RunCompleted { report: Box<FinalReport> },
}

impl PipelineEvent {
    /// Short name of the variant (for logging)
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::StepFinished { .. } => "step_finished",
            Self::PhaseCompleted(_) => "phase_completed",
            Self::SynthesisStarted { .. } => "synthesis_started",
            Self::SynthesisChunk { .. } => "synthesis_chunk",
            Self::RunCompleted { .. } => "run_completed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_progress_serialization() {
        let event = PipelineEvent::PhaseCompleted(PhaseProgress {
            completed_task_ids: vec![TaskId::from("technical")],
            total_steps: 4,
            current_phase: 0,
            total_phases: 2,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "phase_completed");
        assert_eq!(json["completed_task_ids"][0], "technical");
        assert_eq!(json["total_phases"], 2);
        assert_eq!(event.kind(), "phase_completed");
    }

    #[test]
    fn test_step_finished_roundtrip() {
        let event = PipelineEvent::StepFinished {
            run_id: Uuid::new_v4(),
            task_id: TaskId::from("news"),
            success: false,
            duration_ms: 10,
            error: Some("task 'news' timed out after 10ms".to_string()),
        };

        let json = serde_json::to_string(&event).unwrap();
        let parsed: PipelineEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, PipelineEvent::StepFinished { success: false, .. }));
    }
}
