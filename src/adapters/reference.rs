//! Reference data providers.
//!
//! `StaticReferenceData` serves a JSON snapshot of market data from disk,
//! filtered to the categories and subjects a run asks for.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::ReferenceDataProvider;
use crate::domain::{DataCategory, ReferenceBundle};

/// Provider that always returns an empty bundle
#[derive(Debug, Default, Clone)]
pub struct EmptyReferenceData;

#[async_trait]
impl ReferenceDataProvider for EmptyReferenceData {
    async fn fetch_bundle(
        &self,
        _categories: &[DataCategory],
        _subjects: &[String],
    ) -> Result<ReferenceBundle> {
        Ok(ReferenceBundle::new())
    }
}

/// Provider backed by an in-memory snapshot
#[derive(Debug, Default, Clone)]
pub struct StaticReferenceData {
    snapshot: ReferenceBundle,
}

impl StaticReferenceData {
    pub fn new(snapshot: ReferenceBundle) -> Self {
        Self { snapshot }
    }

    /// Load a snapshot shaped `{ "AAPL": { "quote": {...}, "news": [...] } }`
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read reference data: {}", path.display()))?;

        Self::from_json(&content)
            .with_context(|| format!("Failed to parse reference data: {}", path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let snapshot: ReferenceBundle = serde_json::from_str(content)?;
        Ok(Self { snapshot })
    }
}

#[async_trait]
impl ReferenceDataProvider for StaticReferenceData {
    async fn fetch_bundle(
        &self,
        categories: &[DataCategory],
        subjects: &[String],
    ) -> Result<ReferenceBundle> {
        let mut bundle = ReferenceBundle::new();

        for subject in subjects {
            let Some(available) = self.snapshot.get(subject) else {
                continue;
            };

            let selected: HashMap<DataCategory, serde_json::Value> = available
                .iter()
                .filter(|(category, _)| categories.contains(category))
                .map(|(category, value)| (*category, value.clone()))
                .collect();

            bundle.insert(subject.clone(), selected);
        }

        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = r#"{
        "AAPL": { "quote": {"price": 190.1}, "news": [] },
        "MSFT": { "quote": {"price": 410.5} }
    }"#;

    #[tokio::test]
    async fn test_static_bundle_is_filtered() {
        let provider = StaticReferenceData::from_json(SNAPSHOT).unwrap();
        let bundle = provider
            .fetch_bundle(&[DataCategory::Quote], &["AAPL".to_string(), "NVDA".to_string()])
            .await
            .unwrap();

        assert_eq!(bundle.len(), 1);
        let aapl = &bundle["AAPL"];
        assert_eq!(aapl.len(), 1);
        assert_eq!(aapl[&DataCategory::Quote]["price"], 190.1);
    }

    #[tokio::test]
    async fn test_empty_provider() {
        let bundle = EmptyReferenceData
            .fetch_bundle(&[DataCategory::News], &["AAPL".to_string()])
            .await
            .unwrap();
        assert!(bundle.is_empty());
    }
}
