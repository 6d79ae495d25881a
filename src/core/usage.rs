//! Usage metering aggregation across a run.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::{TaskId, TaskResult, Usage, UsageSummary};

fn default_input_price() -> f64 {
    3.0
}
fn default_output_price() -> f64 {
    15.0
}

/// Per-token pricing, in USD per million tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    #[serde(default = "default_input_price")]
    pub input_per_million: f64,

    #[serde(default = "default_output_price")]
    pub output_per_million: f64,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            input_per_million: default_input_price(),
            output_per_million: default_output_price(),
        }
    }
}

impl PricingTable {
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        input_tokens as f64 / 1_000_000.0 * self.input_per_million
            + output_tokens as f64 / 1_000_000.0 * self.output_per_million
    }
}

/// Sum metering across successful task results and the synthesis call
pub fn aggregate_usage(
    outputs: &HashMap<TaskId, TaskResult>,
    synthesis: Option<&Usage>,
    pricing: &PricingTable,
) -> UsageSummary {
    let metered = outputs
        .values()
        .filter(|r| r.is_success())
        .filter_map(|r| r.usage.as_ref())
        .chain(synthesis);

    let mut summary = UsageSummary::default();
    for usage in metered {
        summary.input_tokens += usage.input_tokens;
        summary.output_tokens += usage.output_tokens;
        summary.metered_calls += 1;
    }

    summary.total_tokens = summary.input_tokens + summary.output_tokens;
    summary.estimated_cost_usd = pricing.cost(summary.input_tokens, summary.output_tokens);
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs() -> HashMap<TaskId, TaskResult> {
        [
            ("technical", Some(Usage::new(1_000, 200))),
            ("fundamental", Some(Usage::new(2_000, 400))),
            ("news", None),
        ]
        .into_iter()
        .map(|(id, usage)| {
            let mut result = TaskResult::success(TaskId::from(id), id, 0.5);
            result.usage = usage;
            (TaskId::from(id), result)
        })
        .collect()
    }

    #[test]
    fn test_totals_include_synthesis() {
        let synthesis = Usage::new(500, 100);
        let summary = aggregate_usage(&outputs(), Some(&synthesis), &PricingTable::default());

        assert_eq!(summary.input_tokens, 3_500);
        assert_eq!(summary.output_tokens, 700);
        assert_eq!(summary.total_tokens, 4_200);
        assert_eq!(summary.metered_calls, 3);
    }

    #[test]
    fn test_cost_from_pricing_table() {
        let pricing = PricingTable {
            input_per_million: 1.0,
            output_per_million: 10.0,
        };
        let summary = aggregate_usage(&outputs(), None, &pricing);

        let expected = 3_000.0 / 1_000_000.0 + 600.0 / 1_000_000.0 * 10.0;
        assert!((summary.estimated_cost_usd - expected).abs() < 1e-12);
    }

    #[test]
    fn test_aggregation_is_pure() {
        let data = outputs();
        let synthesis = Usage::new(10, 10);
        let first = aggregate_usage(&data, Some(&synthesis), &PricingTable::default());
        let second = aggregate_usage(&data, Some(&synthesis), &PricingTable::default());
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_run() {
        let summary = aggregate_usage(&HashMap::new(), None, &PricingTable::default());
        assert_eq!(summary, UsageSummary::default());
    }
}
