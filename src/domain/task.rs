//! Inputs handed to analyst tasks.
//!
//! A task receives an [`AnalysisRequest`] describing what to analyse and a
//! [`ReferenceBundle`] of prefetched market data, keyed by subject and category.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::recommendation::{Action, Recommendation};

/// Stable identifier of a task (and of the workflow step that runs it)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Categories of reference data a task can ask the prefetcher for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    Quote,
    Fundamentals,
    Financials,
    PriceHistory,
    Technicals,
    News,
    Insider,
    Options,
    Earnings,
    AnalystRatings,
    MacroEconomic,
    Sector,
}

impl DataCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Fundamentals => "fundamentals",
            Self::Financials => "financials",
            Self::PriceHistory => "price_history",
            Self::Technicals => "technicals",
            Self::News => "news",
            Self::Insider => "insider",
            Self::Options => "options",
            Self::Earnings => "earnings",
            Self::AnalystRatings => "analyst_ratings",
            Self::MacroEconomic => "macro_economic",
            Self::Sector => "sector",
        }
    }
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prefetched reference data: subject -> category -> raw payload
pub type ReferenceBundle = HashMap<String, HashMap<DataCategory, serde_json::Value>>;

/// Read-only projection of a dependency's result, threaded into a task's context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencySnapshot {
    pub summary: String,
    pub confidence: f64,
    pub recommendations: Vec<Recommendation>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// How much risk the requester is willing to take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTolerance {
    Conservative,
    Moderate,
    Aggressive,
}

/// Holding period the requester has in mind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentHorizon {
    Short,
    Medium,
    Long,
}

/// Optional requester preferences
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_tolerance: Option<RiskTolerance>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizon: Option<InvestmentHorizon>,
}

/// A past recommendation and how it played out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub subject: String,
    pub task_id: TaskId,
    pub action: Action,
    pub confidence: f64,

    /// Realised return since the recommendation, in percent
    #[serde(default)]
    pub return_pct: Option<f64>,

    pub recorded_at: DateTime<Utc>,
}

/// Everything a task is asked to analyse
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Subjects (tickers) under analysis
    pub subjects: Vec<String>,

    /// Free-form question from the requester
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// Results of the step's dependencies, keyed by task id.
    /// A missing entry means the dependency failed or never ran.
    #[serde(default)]
    pub context: BTreeMap<String, DependencySnapshot>,

    /// Past recommendations, attached only for tasks that ask for them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<HistoryRecord>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Preferences>,
}

impl AnalysisRequest {
    pub fn new(subjects: Vec<String>) -> Self {
        Self {
            subjects,
            ..Default::default()
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_preferences(mut self, preferences: Preferences) -> Self {
        self.preferences = Some(preferences);
        self
    }
}

/// What a task is currently doing (used for progress reporting)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Idle,
    Running,
    Completed,
    Failed,
}

impl Default for TaskState {
    fn default() -> Self {
        Self::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_is_transparent() {
        let id = TaskId::from("technical");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"technical\"");
        assert_eq!(id.to_string(), "technical");
    }

    #[test]
    fn test_data_category_yaml_names() {
        let parsed: Vec<DataCategory> =
            serde_yaml::from_str("[quote, price_history, macro_economic]").unwrap();
        assert_eq!(
            parsed,
            vec![
                DataCategory::Quote,
                DataCategory::PriceHistory,
                DataCategory::MacroEconomic
            ]
        );
        assert_eq!(DataCategory::AnalystRatings.to_string(), "analyst_ratings");
    }

    #[test]
    fn test_request_builder() {
        let request = AnalysisRequest::new(vec!["AAPL".to_string()])
            .with_query("Is it a buy?")
            .with_preferences(Preferences {
                risk_tolerance: Some(RiskTolerance::Moderate),
                horizon: None,
            });

        assert_eq!(request.query.as_deref(), Some("Is it a buy?"));
        assert!(request.context.is_empty());
        assert!(request.history.is_none());
    }
}
