//! Workflow definitions and the catalog that holds them.
//!
//! Workflows are defined in YAML and consist of steps grouped into phases.
//! Steps in the same phase run concurrently; phases run in ascending order.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::registry::TaskRegistry;
use crate::domain::{DataCategory, TaskId};

/// Reserved task id marking the terminal synthesis placeholder.
/// Synthesis is handled by the synthesizer, never executed as a step.
pub const SYNTHESIS_TASK_ID: &str = "final_synthesis";

const BUILTIN_WORKFLOWS: &str = include_str!("../../workflows/builtin.yaml");

fn default_timeout_ms() -> u64 {
    120_000
}

/// A single step in a workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStep {
    pub task_id: TaskId,

    /// Execution tier; lower phases run first
    pub phase: u32,

    /// Tasks whose results are threaded into this step's context
    #[serde(default)]
    pub depends_on: Vec<TaskId>,

    /// Failures of optional steps are tolerated quietly
    #[serde(default)]
    pub optional: bool,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl PipelineStep {
    pub fn new(task_id: impl Into<TaskId>, phase: u32) -> Self {
        Self {
            task_id: task_id.into(),
            phase,
            depends_on: Vec::new(),
            optional: false,
            timeout_ms: default_timeout_ms(),
        }
    }

    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.depends_on = ids.iter().map(|id| TaskId::from(*id)).collect();
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn is_synthesis(&self) -> bool {
        self.task_id.as_str() == SYNTHESIS_TASK_ID
    }
}

/// Steps sharing one phase number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseGroup {
    pub phase: u32,
    pub steps: Vec<PipelineStep>,
}

/// A named pipeline variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Identifier (used in CLI)
    pub id: String,

    /// Human-readable name
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub estimated_duration_secs: u64,

    /// Whether every step is expected to succeed for a complete report
    #[serde(default)]
    pub all_required: bool,

    pub steps: Vec<PipelineStep>,
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>, steps: Vec<PipelineStep>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            estimated_duration_secs: 0,
            all_required: false,
            steps,
        }
    }

    /// Group steps by phase, ascending
    pub fn phases(&self) -> Vec<PhaseGroup> {
        let mut grouped: BTreeMap<u32, Vec<PipelineStep>> = BTreeMap::new();
        for step in &self.steps {
            grouped.entry(step.phase).or_default().push(step.clone());
        }

        grouped
            .into_iter()
            .map(|(phase, steps)| PhaseGroup { phase, steps })
            .collect()
    }

    /// Task ids in definition order, deduplicated
    pub fn task_ids(&self) -> Vec<TaskId> {
        let mut seen = HashSet::new();
        self.steps
            .iter()
            .filter(|s| seen.insert(&s.task_id))
            .map(|s| s.task_id.clone())
            .collect()
    }

    /// Task ids that must resolve to registered tasks
    pub fn executable_task_ids(&self) -> Vec<TaskId> {
        self.task_ids()
            .into_iter()
            .filter(|id| id.as_str() != SYNTHESIS_TASK_ID)
            .collect()
    }

    /// Number of steps the executor will actually run
    pub fn executable_step_count(&self) -> usize {
        self.steps.iter().filter(|s| !s.is_synthesis()).count()
    }

    /// Check structural rules; dependencies must point at strictly earlier phases
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let invalid = |reason: String| WorkflowError::Invalid {
            workflow: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("workflow id cannot be empty".to_string()));
        }

        if self.steps.is_empty() {
            return Err(invalid("workflow must have at least one step".to_string()));
        }

        let mut phase_of: HashMap<&TaskId, u32> = HashMap::new();
        for step in &self.steps {
            if step.task_id.as_str().trim().is_empty() {
                return Err(invalid("step has an empty task id".to_string()));
            }
            if phase_of.insert(&step.task_id, step.phase).is_some() {
                return Err(invalid(format!(
                    "task '{}' appears more than once",
                    step.task_id
                )));
            }
            if step.timeout_ms == 0 {
                return Err(invalid(format!(
                    "step '{}' has a zero timeout",
                    step.task_id
                )));
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                match phase_of.get(dep) {
                    None => {
                        return Err(invalid(format!(
                            "step '{}' depends on '{}', which is not part of the workflow",
                            step.task_id, dep
                        )));
                    }
                    Some(&dep_phase) if dep_phase >= step.phase => {
                        return Err(invalid(format!(
                            "step '{}' (phase {}) depends on '{}' (phase {}); dependencies must be in an earlier phase",
                            step.task_id, step.phase, dep, dep_phase
                        )));
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(())
    }
}

/// Workflow lookup and validation errors
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    #[error("Unknown workflow '{id}' (available: {available})")]
    UnknownWorkflow { id: String, available: String },

    #[error("Invalid workflow '{workflow}': {reason}")]
    Invalid { workflow: String, reason: String },
}

/// YAML document shape: `workflows: [ ... ]`
#[derive(Debug, Deserialize)]
struct WorkflowFile {
    workflows: Vec<WorkflowDefinition>,
}

/// Set of named workflows, loaded once at startup
#[derive(Debug, Clone, Default)]
pub struct WorkflowCatalog {
    workflows: BTreeMap<String, WorkflowDefinition>,
}

impl WorkflowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Workflows shipped with the crate
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_WORKFLOWS).context("Failed to load built-in workflows")
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: WorkflowFile =
            serde_yaml::from_str(content).context("Failed to parse workflow YAML")?;

        let mut catalog = Self::new();
        for workflow in file.workflows {
            catalog.insert(workflow)?;
        }
        Ok(catalog)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow file: {}", path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Invalid workflow file: {}", path.display()))
    }

    /// Merge every `*.yaml`/`*.yml` file of a directory into this catalog.
    /// Later definitions override earlier ones with the same id.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read workflows directory: {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            let other = Self::from_file(&path)?;
            loaded += other.workflows.len();
            self.workflows.extend(other.workflows);
        }
        Ok(loaded)
    }

    /// Validate and add a workflow, replacing any with the same id
    pub fn insert(&mut self, workflow: WorkflowDefinition) -> Result<(), WorkflowError> {
        workflow.validate()?;
        self.workflows.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&WorkflowDefinition, WorkflowError> {
        self.workflows
            .get(id)
            .ok_or_else(|| WorkflowError::UnknownWorkflow {
                id: id.to_string(),
                available: self.workflows.keys().cloned().collect::<Vec<_>>().join(", "),
            })
    }

    pub fn list(&self) -> impl Iterator<Item = &WorkflowDefinition> {
        self.workflows.values()
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    pub fn steps_for_workflow(&self, id: &str) -> Result<&[PipelineStep], WorkflowError> {
        Ok(&self.get(id)?.steps)
    }

    pub fn phases(&self, id: &str) -> Result<Vec<PhaseGroup>, WorkflowError> {
        Ok(self.get(id)?.phases())
    }

    pub fn task_ids(&self, id: &str) -> Result<Vec<TaskId>, WorkflowError> {
        Ok(self.get(id)?.task_ids())
    }

    /// Union of data categories needed by every task in a workflow
    pub fn required_data(
        &self,
        id: &str,
        registry: &TaskRegistry,
    ) -> Result<BTreeSet<DataCategory>, WorkflowError> {
        let ids = self.task_ids(id)?;
        Ok(registry.required_data_for(&ids))
    }
}
