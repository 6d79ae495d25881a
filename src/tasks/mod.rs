//! Analyst task implementations.
//!
//! Analysts are declared in YAML (`analysts: [...]`) and executed by
//! [`PromptTask`], which sends the request, dependency context and the
//! relevant slice of reference data to the reasoning service and parses a
//! structured result back.

pub mod prompt;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::ReasoningClient;
use crate::core::TaskRegistry;
use crate::domain::{DataCategory, TaskId};

pub use prompt::PromptTask;

const BUILTIN_ANALYSTS: &str = include_str!("../../analysts/builtin.yaml");

/// Declarative description of one analyst
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalystSpec {
    pub id: TaskId,

    #[serde(default)]
    pub title: String,

    /// Role-specific guidance appended to the system prompt
    #[serde(default)]
    pub instructions: String,

    /// Reference data categories the analyst reads
    #[serde(default)]
    pub data: Vec<DataCategory>,

    /// Whether past recommendations should be attached to requests
    #[serde(default)]
    pub uses_history: bool,
}

#[derive(Debug, Deserialize)]
struct AnalystFile {
    analysts: Vec<AnalystSpec>,
}

/// Parse an analyst roster
pub fn roster_from_yaml(content: &str) -> Result<Vec<AnalystSpec>> {
    let file: AnalystFile =
        serde_yaml::from_str(content).context("Failed to parse analyst roster YAML")?;
    Ok(file.analysts)
}

/// The roster shipped with the crate
pub fn builtin_roster() -> Result<Vec<AnalystSpec>> {
    roster_from_yaml(BUILTIN_ANALYSTS).context("Failed to load built-in analysts")
}

pub fn roster_from_file(path: &Path) -> Result<Vec<AnalystSpec>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read analyst roster: {}", path.display()))?;
    roster_from_yaml(&content).with_context(|| format!("Invalid analyst roster: {}", path.display()))
}

/// Build a registry with one [`PromptTask`] per analyst.
///
/// Duplicate ids in `roster` are a setup error.
pub fn build_registry(
    roster: Vec<AnalystSpec>,
    client: Arc<dyn ReasoningClient>,
) -> Result<TaskRegistry> {
    let mut registry = TaskRegistry::new();
    for spec in roster {
        registry.register(Arc::new(PromptTask::new(spec, client.clone())))?;
    }
    Ok(registry)
}

/// Overlay `overrides` onto an existing registry, replacing tasks with the same id
pub fn apply_overrides(
    registry: &mut TaskRegistry,
    overrides: Vec<AnalystSpec>,
    client: Arc<dyn ReasoningClient>,
) {
    for spec in overrides {
        registry.replace(Arc::new(PromptTask::new(spec, client.clone())));
    }
}
