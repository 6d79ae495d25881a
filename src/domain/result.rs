//! Task output, per-step execution records and usage metering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::recommendation::Recommendation;
use super::task::{DependencySnapshot, TaskId};

/// Token counters reported by one reasoning-service call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Usage aggregated across a whole run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub estimated_cost_usd: f64,

    /// Number of calls that contributed metering data
    pub metered_calls: u32,
}

/// Outcome status of a task invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Error,
}

/// Output of one task invocation. Never mutated after it is produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub summary: String,

    /// Overall confidence, 0.0 ..= 1.0
    pub confidence: f64,

    #[serde(default)]
    pub recommendations: Vec<Recommendation>,

    #[serde(default)]
    pub warnings: Vec<String>,

    /// Task-specific structured data
    #[serde(default)]
    pub payload: serde_json::Value,

    #[serde(default)]
    pub usage: Option<Usage>,

    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    /// Create a successful result with no recommendations yet
    pub fn success(task_id: TaskId, summary: impl Into<String>, confidence: f64) -> Self {
        Self {
            task_id,
            status: TaskStatus::Success,
            summary: summary.into(),
            confidence: confidence.clamp(0.0, 1.0),
            recommendations: Vec::new(),
            warnings: Vec::new(),
            payload: serde_json::Value::Null,
            usage: None,
            completed_at: Utc::now(),
        }
    }

    pub fn with_recommendation(mut self, recommendation: Recommendation) -> Self {
        self.recommendations.push(recommendation);
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }

    /// Read-only projection handed to dependent tasks
    pub fn snapshot(&self) -> DependencySnapshot {
        DependencySnapshot {
            summary: self.summary.clone(),
            confidence: self.confidence,
            recommendations: self.recommendations.clone(),
            payload: self.payload.clone(),
        }
    }
}

/// Record of one executed workflow step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub task_id: TaskId,
    pub phase: u32,
    pub optional: bool,

    /// The task's output, `None` when the step failed
    pub result: Option<TaskResult>,

    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Action;

    #[test]
    fn test_snapshot_projects_fields() {
        let result = TaskResult::success(TaskId::from("fundamental"), "Solid balance sheet", 0.8)
            .with_recommendation(Recommendation::new("MSFT", Action::Buy, 0.7))
            .with_payload(serde_json::json!({"pe": 31.2}))
            .with_usage(Usage::new(1200, 300));

        let snapshot = result.snapshot();
        assert_eq!(snapshot.summary, "Solid balance sheet");
        assert_eq!(snapshot.confidence, 0.8);
        assert_eq!(snapshot.recommendations.len(), 1);
        assert_eq!(snapshot.payload["pe"], 31.2);
    }

    #[test]
    fn test_usage_total() {
        assert_eq!(Usage::new(10, 5).total(), 15);
    }
}
