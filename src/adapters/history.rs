//! History provider serving past recommendations from a JSON file.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::HistoryProvider;
use crate::domain::HistoryRecord;

/// In-memory list of past recommendations
#[derive(Debug, Default, Clone)]
pub struct StaticHistory {
    records: Vec<HistoryRecord>,
}

impl StaticHistory {
    pub fn new(records: Vec<HistoryRecord>) -> Self {
        Self { records }
    }

    /// Load a JSON array of history records
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read history file: {}", path.display()))?;

        let records = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse history file: {}", path.display()))?;

        Ok(Self { records })
    }
}

#[async_trait]
impl HistoryProvider for StaticHistory {
    async fn history(&self, subjects: &[String]) -> Result<Vec<HistoryRecord>> {
        let mut matching: Vec<HistoryRecord> = self
            .records
            .iter()
            .filter(|r| subjects.contains(&r.subject))
            .cloned()
            .collect();

        // Most recent first
        matching.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, TaskId};
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_history_filters_and_sorts() {
        let now = Utc::now();
        let record = |subject: &str, age_days: i64| HistoryRecord {
            subject: subject.to_string(),
            task_id: TaskId::from("technical"),
            action: Action::Buy,
            confidence: 0.6,
            return_pct: Some(4.2),
            recorded_at: now - Duration::days(age_days),
        };

        let provider = StaticHistory::new(vec![
            record("AAPL", 10),
            record("MSFT", 1),
            record("AAPL", 2),
        ]);

        let history = provider.history(&["AAPL".to_string()]).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].recorded_at > history[1].recorded_at);
    }
}
