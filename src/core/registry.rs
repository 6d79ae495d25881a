//! Task trait and the registry of available task implementations.
//!
//! The registry is an explicitly constructed value: build one at startup,
//! register every task, then share it (usually behind an `Arc`) with the
//! orchestrator.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{AnalysisRequest, DataCategory, ReferenceBundle, TaskId, TaskResult, TaskState};

/// One unit of analysis work
#[async_trait]
pub trait Task: Send + Sync {
    /// Stable identifier
    fn id(&self) -> &TaskId;

    /// Reference data categories this task reads
    fn required_data(&self) -> &[DataCategory];

    /// Whether the orchestrator should attach recommendation history to requests
    fn uses_history(&self) -> bool {
        false
    }

    /// Current status, for progress reporting
    fn status(&self) -> TaskState {
        TaskState::Idle
    }

    /// Run the analysis.
    ///
    /// "No strong opinion" is a valid low-confidence result, not an error.
    async fn execute(&self, request: &AnalysisRequest, data: &ReferenceBundle)
        -> Result<TaskResult>;
}

/// Registration errors (fatal at setup time)
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("Task '{0}' is already registered")]
    Duplicate(TaskId),

    #[error("Task '{id}' is not registered (known tasks: {})", format_ids(.known))]
    Unregistered { id: TaskId, known: Vec<TaskId> },
}

fn format_ids(ids: &[TaskId]) -> String {
    if ids.is_empty() {
        return "none".to_string();
    }
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Set of available tasks keyed by id
#[derive(Default, Clone)]
pub struct TaskRegistry {
    tasks: HashMap<TaskId, Arc<dyn Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task; fails if the id is taken
    pub fn register(&mut self, task: Arc<dyn Task>) -> Result<(), RegistryError> {
        let id = task.id().clone();
        if self.tasks.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        self.tasks.insert(id, task);
        Ok(())
    }

    /// Register or overwrite a task, returning the one it replaced
    pub fn replace(&mut self, task: Arc<dyn Task>) -> Option<Arc<dyn Task>> {
        self.tasks.insert(task.id().clone(), task)
    }

    pub fn get(&self, id: &TaskId) -> Option<Arc<dyn Task>> {
        self.tasks.get(id).cloned()
    }

    pub fn get_or_fail(&self, id: &TaskId) -> Result<Arc<dyn Task>, RegistryError> {
        self.get(id).ok_or_else(|| RegistryError::Unregistered {
            id: id.clone(),
            known: self.ids(),
        })
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    /// All registered ids, sorted
    pub fn ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.tasks.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Ids from `ids` that have no registered task (input order, deduplicated)
    pub fn unregistered<'a>(&self, ids: impl IntoIterator<Item = &'a TaskId>) -> Vec<TaskId> {
        let mut seen = HashSet::new();
        ids.into_iter()
            .filter(|id| !self.contains(id) && seen.insert(*id))
            .cloned()
            .collect()
    }

    /// Union of data categories declared by every registered task
    pub fn all_required_data(&self) -> BTreeSet<DataCategory> {
        self.tasks
            .values()
            .flat_map(|t| t.required_data().iter().copied())
            .collect()
    }

    /// Union of data categories declared by the given tasks (unknown ids are ignored)
    pub fn required_data_for<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a TaskId>,
    ) -> BTreeSet<DataCategory> {
        ids.into_iter()
            .filter_map(|id| self.tasks.get(id))
            .flat_map(|t| t.required_data().iter().copied())
            .collect()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        id: TaskId,
        data: Vec<DataCategory>,
    }

    impl Fixed {
        fn arc(id: &str, data: &[DataCategory]) -> Arc<dyn Task> {
            Arc::new(Self {
                id: TaskId::from(id),
                data: data.to_vec(),
            })
        }
    }

    #[async_trait]
    impl Task for Fixed {
        fn id(&self) -> &TaskId {
            &self.id
        }

        fn required_data(&self) -> &[DataCategory] {
            &self.data
        }

        async fn execute(
            &self,
            _request: &AnalysisRequest,
            _data: &ReferenceBundle,
        ) -> Result<TaskResult> {
            Ok(TaskResult::success(self.id.clone(), "fixed", 0.5))
        }
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = TaskRegistry::new();
        registry.register(Fixed::arc("technical", &[])).unwrap();

        let result = registry.register(Fixed::arc("technical", &[]));
        assert!(matches!(result, Err(RegistryError::Duplicate(ref id)) if id.as_str() == "technical"));
    }

    #[test]
    fn test_replace_overwrites() {
        let mut registry = TaskRegistry::new();
        assert!(registry.replace(Fixed::arc("news", &[])).is_none());

        let previous = registry.replace(Fixed::arc("news", &[DataCategory::News]));
        assert!(previous.is_some());
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(&TaskId::from("news")).unwrap().required_data(),
            &[DataCategory::News]
        );
    }

    #[test]
    fn test_get_or_fail_lists_known_ids() {
        let mut registry = TaskRegistry::new();
        registry.register(Fixed::arc("technical", &[])).unwrap();
        registry.register(Fixed::arc("fundamental", &[])).unwrap();

        let err = registry
            .get_or_fail(&TaskId::from("sentiment"))
            .err()
            .unwrap();
        let message = err.to_string();
        assert!(message.contains("sentiment"));
        assert!(message.contains("fundamental, technical"));
    }

    #[test]
    fn test_unregistered_set_difference() {
        let mut registry = TaskRegistry::new();
        registry.register(Fixed::arc("technical", &[])).unwrap();

        let wanted = [
            TaskId::from("technical"),
            TaskId::from("news"),
            TaskId::from("macro"),
            TaskId::from("news"),
        ];
        assert_eq!(
            registry.unregistered(&wanted),
            vec![TaskId::from("news"), TaskId::from("macro")]
        );
    }

    #[test]
    fn test_required_data_union() {
        let mut registry = TaskRegistry::new();
        registry
            .register(Fixed::arc("technical", &[DataCategory::PriceHistory, DataCategory::Quote]))
            .unwrap();
        registry
            .register(Fixed::arc("fundamental", &[DataCategory::Quote, DataCategory::Financials]))
            .unwrap();

        let all = registry.all_required_data();
        assert_eq!(all.len(), 3);

        let only_technical = registry.required_data_for(&[TaskId::from("technical")]);
        assert!(only_technical.contains(&DataCategory::PriceHistory));
        assert!(!only_technical.contains(&DataCategory::Financials));
    }
}
