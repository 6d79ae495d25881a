//! Conflicts between analysts and the final synthesized report.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::recommendation::{Action, Stance};
use super::result::{PipelineResult, UsageSummary};
use super::task::TaskId;

/// Disagreement between tasks about one subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub subject: String,
    pub favorable: BTreeSet<TaskId>,
    pub unfavorable: BTreeSet<TaskId>,
    pub neutral: BTreeSet<TaskId>,

    /// 0.0 (no disagreement) ..= 1.0 (evenly split)
    pub severity: f64,

    /// Filled in by synthesis; empty until then
    #[serde(default)]
    pub resolution: String,
}

impl Conflict {
    pub fn contributors(&self) -> usize {
        self.favorable.len() + self.unfavorable.len() + self.neutral.len()
    }

    pub fn level(&self) -> ConflictLevel {
        ConflictLevel::from_severity(self.severity)
    }
}

/// Coarse severity bucket for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictLevel {
    Low,
    Medium,
    High,
}

impl ConflictLevel {
    pub fn from_severity(severity: f64) -> Self {
        if severity >= 0.67 {
            Self::High
        } else if severity >= 0.34 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// One task's position on a subject, as listed in the final report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStance {
    pub task_id: TaskId,
    pub action: Action,
    pub stance: Stance,
    pub confidence: f64,
    pub weight: f64,
}

/// Final recommendation for a subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRecommendation {
    pub subject: String,
    pub action: Action,
    pub confidence: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_price: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,

    #[serde(default)]
    pub rationale: String,

    /// Number of contributing tasks whose action matches `action`
    pub consensus_count: usize,

    pub agent_breakdown: Vec<AgentStance>,
}

/// An entry in the prioritized action timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineItem {
    /// 1 is most urgent
    pub priority: u32,
    pub subject: String,
    pub action: Action,

    #[serde(default)]
    pub timeframe: String,

    #[serde(default)]
    pub note: String,
}

/// Where the report's conclusions came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisSource {
    /// The reasoning service produced the synthesis
    Model,
    /// Deterministic aggregation was used instead
    Fallback,
}

/// The aggregate result of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalReport {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub subjects: Vec<String>,
    pub pipeline_results: Vec<PipelineResult>,
    pub recommendations: Vec<ResolvedRecommendation>,
    pub action_timeline: Vec<TimelineItem>,
    pub summary: String,
    pub risk_assessment: String,
    pub conflicts: Vec<Conflict>,
    pub warnings: Vec<String>,
    pub synthesis_source: SynthesisSource,
    pub usage: UsageSummary,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl FinalReport {
    pub fn recommendation_for(&self, subject: &str) -> Option<&ResolvedRecommendation> {
        self.recommendations.iter().find(|r| r.subject == subject)
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &PipelineResult> {
        self.pipeline_results.iter().filter(|r| !r.success)
    }
}
