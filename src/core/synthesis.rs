//! Final synthesis of all task outputs into one report.
//!
//! One structured call to the reasoning service produces per-subject
//! recommendations, an action timeline and narrative. Any failure falls back
//! to a deterministic aggregation that cannot fail.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use super::conflicts::positions_by_subject;
use crate::adapters::{collect_stream, ReasoningClient, ReasoningError, ReasoningRequest};
use crate::domain::{
    Action, AgentStance, Conflict, PipelineResult, Recommendation, ResolvedRecommendation,
    SynthesisSource, TaskId, TaskResult, TimelineItem, Usage,
};

/// Fixed narrative used whenever automated synthesis is unavailable
pub const FALLBACK_DISCLAIMER: &str = "Automated synthesis was unavailable for this run. \
Each subject defaults to HOLD with confidence averaged across the analysts that covered it. \
Review the individual analyst results before acting.";

const SYSTEM_PROMPT: &str = "You are the lead portfolio strategist. Combine the analyst \
reports into one recommendation per subject, resolve any conflicts between analysts, and \
produce a prioritized action timeline. Respond only through the provided schema.";

const SCHEMA_NAME: &str = "final_report";

/// Why synthesis did not produce a usable result
#[derive(Debug, Clone, Error)]
pub enum SynthesisError {
    #[error("synthesis call failed: {0}")]
    Call(#[from] ReasoningError),

    #[error("synthesis timed out after {0}ms")]
    Timeout(u64),

    #[error("synthesis returned unusable output: {0}")]
    Malformed(String),

    #[error("synthesis returned no recommendations")]
    Empty,
}

/// Synthesis behaviour knobs
#[derive(Debug, Clone)]
pub struct SynthesisSettings {
    pub timeout: Duration,

    /// Use the streaming call and forward partial output
    pub stream: bool,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(180),
            stream: false,
        }
    }
}

/// Inputs to one synthesis pass
#[derive(Debug, Clone, Copy)]
pub struct SynthesisInput<'a> {
    pub subjects: &'a [String],
    pub outputs: &'a HashMap<TaskId, TaskResult>,
    pub conflicts: &'a [Conflict],
    pub pipeline_results: &'a [PipelineResult],
}

/// The synthesized portion of a final report
#[derive(Debug, Clone)]
pub struct SynthesisOutcome {
    pub recommendations: Vec<ResolvedRecommendation>,
    pub action_timeline: Vec<TimelineItem>,
    pub summary: String,
    pub risk_assessment: String,

    /// Conflicts with resolution notes filled in where available
    pub conflicts: Vec<Conflict>,

    pub warnings: Vec<String>,
    pub source: SynthesisSource,

    /// Metering of the synthesis call, if one completed
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct SynthesisPayload {
    #[serde(default)]
    recommendations: Vec<SynthesizedRecommendation>,
    #[serde(default)]
    action_timeline: Vec<TimelineItem>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    risk_assessment: String,
    #[serde(default)]
    conflict_resolutions: Vec<ConflictResolution>,
}

#[derive(Debug, Deserialize)]
struct SynthesizedRecommendation {
    subject: String,
    action: Action,
    confidence: f64,
    #[serde(default)]
    target_price: Option<f64>,
    #[serde(default)]
    stop_loss: Option<f64>,
    #[serde(default)]
    rationale: String,
}

#[derive(Debug, Deserialize)]
struct ConflictResolution {
    subject: String,
    resolution: String,
}

/// Analyst output as presented to the reasoning service
#[derive(Serialize)]
struct AnalystDigest<'a> {
    task_id: &'a TaskId,
    summary: &'a str,
    confidence: f64,
    recommendations: &'a [Recommendation],
    warnings: &'a [String],
}

/// Issues the final aggregation call
pub struct Synthesizer {
    client: Arc<dyn ReasoningClient>,
    settings: SynthesisSettings,
}

impl Synthesizer {
    pub fn new(client: Arc<dyn ReasoningClient>, settings: SynthesisSettings) -> Self {
        Self { client, settings }
    }

    /// Synthesize a report; never fails, falling back on any problem
    #[instrument(skip_all, fields(subjects = input.subjects.len(), outputs = input.outputs.len()))]
    pub async fn synthesize<F>(&self, input: SynthesisInput<'_>, on_chunk: F) -> SynthesisOutcome
    where
        F: FnMut(&str) + Send,
    {
        let response = match self.call(&input, on_chunk).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Synthesis failed, using fallback aggregation");
                return fallback_synthesis(input, &e.to_string());
            }
        };

        match parse_payload(&response.content).and_then(|payload| map_payload(input, payload)) {
            Ok(mut outcome) => {
                info!(
                    recommendations = outcome.recommendations.len(),
                    "Synthesis completed"
                );
                outcome.usage = Some(response.usage);
                outcome
            }
            Err(e) => {
                warn!(error = %e, "Synthesis output unusable, using fallback aggregation");
                let mut outcome = fallback_synthesis(input, &e.to_string());
                outcome.usage = Some(response.usage);
                outcome
            }
        }
    }

    async fn call<F>(
        &self,
        input: &SynthesisInput<'_>,
        on_chunk: F,
    ) -> Result<crate::adapters::ReasoningResponse, SynthesisError>
    where
        F: FnMut(&str) + Send,
    {
        let request = ReasoningRequest::new(SYSTEM_PROMPT, build_user_message(input))
            .with_schema(SCHEMA_NAME, payload_schema());
        let limit_ms = self.settings.timeout.as_millis() as u64;

        let call = async {
            if self.settings.stream {
                match self.client.call_streaming(request).await {
                    Ok(rx) => collect_stream(rx, on_chunk).await,
                    Err(e) => Err(e),
                }
            } else {
                self.client.call(request).await
            }
        };

        match timeout(self.settings.timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SynthesisError::Timeout(limit_ms)),
        }
    }
}

fn build_user_message(input: &SynthesisInput<'_>) -> String {
    let mut analysts: Vec<AnalystDigest<'_>> = input
        .outputs
        .iter()
        .filter(|(_, r)| r.is_success())
        .map(|(id, r)| AnalystDigest {
            task_id: id,
            summary: &r.summary,
            confidence: r.confidence,
            recommendations: &r.recommendations,
            warnings: &r.warnings,
        })
        .collect();
    analysts.sort_by(|a, b| a.task_id.cmp(b.task_id));

    let failed: Vec<_> = input
        .pipeline_results
        .iter()
        .filter(|r| !r.success)
        .map(|r| json!({ "task_id": r.task_id, "error": r.error }))
        .collect();

    json!({
        "subjects": input.subjects,
        "analysts": analysts,
        "conflicts": input.conflicts,
        "failed_analysts": failed,
    })
    .to_string()
}

fn payload_schema() -> serde_json::Value {
    let action = json!({
        "type": "string",
        "enum": ["strong_buy", "buy", "hold", "sell", "strong_sell"]
    });

    json!({
        "type": "object",
        "required": ["recommendations", "action_timeline", "summary", "risk_assessment"],
        "properties": {
            "recommendations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["subject", "action", "confidence", "rationale"],
                    "properties": {
                        "subject": { "type": "string" },
                        "action": action,
                        "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                        "target_price": { "type": "number" },
                        "stop_loss": { "type": "number" },
                        "rationale": { "type": "string" }
                    }
                }
            },
            "action_timeline": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["priority", "subject", "action"],
                    "properties": {
                        "priority": { "type": "integer", "minimum": 1 },
                        "subject": { "type": "string" },
                        "action": action,
                        "timeframe": { "type": "string" },
                        "note": { "type": "string" }
                    }
                }
            },
            "summary": { "type": "string" },
            "risk_assessment": { "type": "string" },
            "conflict_resolutions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["subject", "resolution"],
                    "properties": {
                        "subject": { "type": "string" },
                        "resolution": { "type": "string" }
                    }
                }
            }
        }
    })
}

fn parse_payload(content: &str) -> Result<SynthesisPayload, SynthesisError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(SynthesisError::Malformed("empty content".to_string()));
    }

    let payload: SynthesisPayload =
        serde_json::from_str(trimmed).map_err(|e| SynthesisError::Malformed(e.to_string()))?;

    if payload.recommendations.is_empty() {
        return Err(SynthesisError::Empty);
    }

    Ok(payload)
}

/// Each contributing task's stance on a subject, at equal weight
fn breakdown(by_task: Option<&BTreeMap<TaskId, Recommendation>>) -> Vec<AgentStance> {
    let Some(by_task) = by_task else {
        return Vec::new();
    };
    let weight = if by_task.is_empty() {
        0.0
    } else {
        1.0 / by_task.len() as f64
    };

    by_task
        .iter()
        .map(|(task_id, rec)| AgentStance {
            task_id: task_id.clone(),
            action: rec.action,
            stance: rec.action.stance(),
            confidence: rec.confidence,
            weight,
        })
        .collect()
}

fn consensus_count(breakdown: &[AgentStance], action: Action) -> usize {
    breakdown.iter().filter(|s| s.action == action).count()
}

fn step_warnings(pipeline_results: &[PipelineResult]) -> Vec<String> {
    pipeline_results
        .iter()
        .filter(|r| !r.success)
        .map(|r| {
            format!(
                "{} analyst '{}' failed: {}",
                if r.optional { "Optional" } else { "Required" },
                r.task_id,
                r.error.as_deref().unwrap_or("unknown error")
            )
        })
        .collect()
}

/// Keeps only subjects the run asked about or an analyst covered; fails if
/// nothing survives
fn map_payload(
    input: SynthesisInput<'_>,
    payload: SynthesisPayload,
) -> Result<SynthesisOutcome, SynthesisError> {
    let positions = positions_by_subject(input.outputs);
    let mut seen = HashSet::new();

    let recommendations: Vec<ResolvedRecommendation> = payload
        .recommendations
        .into_iter()
        .filter(|r| seen.insert(r.subject.clone()))
        .filter(|r| input.subjects.contains(&r.subject) || positions.contains_key(&r.subject))
        .map(|r| {
            let agent_breakdown = breakdown(positions.get(&r.subject));
            ResolvedRecommendation {
                consensus_count: consensus_count(&agent_breakdown, r.action),
                agent_breakdown,
                subject: r.subject,
                action: r.action,
                confidence: r.confidence.clamp(0.0, 1.0),
                target_price: r.target_price,
                stop_loss: r.stop_loss,
                rationale: r.rationale,
            }
        })
        .collect();

    if recommendations.is_empty() {
        return Err(SynthesisError::Empty);
    }

    let kept: HashSet<&str> = recommendations.iter().map(|r| r.subject.as_str()).collect();
    let mut action_timeline: Vec<TimelineItem> = payload
        .action_timeline
        .into_iter()
        .filter(|item| kept.contains(item.subject.as_str()))
        .collect();
    action_timeline.sort_by_key(|item| item.priority);

    let resolutions: HashMap<String, String> = payload
        .conflict_resolutions
        .into_iter()
        .map(|c| (c.subject, c.resolution))
        .collect();

    let conflicts = input
        .conflicts
        .iter()
        .cloned()
        .map(|mut conflict| {
            if let Some(resolution) = resolutions.get(&conflict.subject) {
                conflict.resolution = resolution.clone();
            }
            conflict
        })
        .collect();

    Ok(SynthesisOutcome {
        recommendations,
        action_timeline,
        summary: payload.summary,
        risk_assessment: payload.risk_assessment,
        conflicts,
        warnings: step_warnings(input.pipeline_results),
        source: SynthesisSource::Model,
        usage: None,
    })
}

/// Deterministic aggregation used when synthesis is unavailable.
///
/// Every subject any task mentioned gets a HOLD whose confidence is the
/// mean of the contributing tasks' confidences.
pub fn fallback_synthesis(input: SynthesisInput<'_>, reason: &str) -> SynthesisOutcome {
    let positions = positions_by_subject(input.outputs);

    let recommendations: Vec<ResolvedRecommendation> = positions
        .iter()
        .map(|(subject, by_task)| {
            let confidence = if by_task.is_empty() {
                0.0
            } else {
                by_task.values().map(|r| r.confidence).sum::<f64>() / by_task.len() as f64
            };
            let agent_breakdown = breakdown(Some(by_task));

            ResolvedRecommendation {
                subject: subject.clone(),
                action: Action::Hold,
                confidence,
                target_price: None,
                stop_loss: None,
                rationale: format!(
                    "Fallback aggregation across {} analyst(s)",
                    by_task.len()
                ),
                consensus_count: consensus_count(&agent_breakdown, Action::Hold),
                agent_breakdown,
            }
        })
        .collect();

    let risk_assessment = if input.conflicts.is_empty() {
        "No automated risk assessment is available for this run.".to_string()
    } else {
        let subjects: Vec<&str> = input.conflicts.iter().map(|c| c.subject.as_str()).collect();
        format!(
            "No automated risk assessment is available for this run. Analysts disagree on: {}.",
            subjects.join(", ")
        )
    };

    let mut warnings = vec![format!("Synthesis unavailable: {}", reason)];
    warnings.extend(step_warnings(input.pipeline_results));

    SynthesisOutcome {
        recommendations,
        action_timeline: Vec::new(),
        summary: FALLBACK_DISCLAIMER.to_string(),
        risk_assessment,
        conflicts: input.conflicts.to_vec(),
        warnings,
        source: SynthesisSource::Fallback,
        usage: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs() -> HashMap<TaskId, TaskResult> {
        let technical = TaskResult::success(TaskId::from("technical"), "uptrend", 0.8)
            .with_recommendation(Recommendation::new("AAPL", Action::Buy, 0.8));
        let fundamental = TaskResult::success(TaskId::from("fundamental"), "pricey", 0.6)
            .with_recommendation(Recommendation::new("AAPL", Action::Hold, 0.4));
        [technical, fundamental]
            .into_iter()
            .map(|r| (r.task_id.clone(), r))
            .collect()
    }

    fn input<'a>(
        subjects: &'a [String],
        outputs: &'a HashMap<TaskId, TaskResult>,
    ) -> SynthesisInput<'a> {
        SynthesisInput {
            subjects,
            outputs,
            conflicts: &[],
            pipeline_results: &[],
        }
    }

    #[test]
    fn test_fallback_averages_confidence() {
        let subjects = vec!["AAPL".to_string()];
        let data = outputs();
        let outcome = fallback_synthesis(input(&subjects, &data), "service down");

        assert_eq!(outcome.source, SynthesisSource::Fallback);
        assert_eq!(outcome.summary, FALLBACK_DISCLAIMER);
        let rec = &outcome.recommendations[0];
        assert_eq!(rec.action, Action::Hold);
        assert!((rec.confidence - 0.6).abs() < 1e-9);
        assert_eq!(rec.consensus_count, 1);
        assert_eq!(rec.agent_breakdown.len(), 2);
        assert!(outcome.warnings[0].contains("service down"));
    }

    #[test]
    fn test_map_payload_counts_consensus() {
        let subjects = vec!["AAPL".to_string()];
        let data = outputs();
        let payload = parse_payload(
            r#"{
                "recommendations": [
                    {"subject": "AAPL", "action": "buy", "confidence": 0.7, "rationale": "trend"},
                    {"subject": "ZZZZ", "action": "sell", "confidence": 0.9, "rationale": "invented"}
                ],
                "action_timeline": [
                    {"priority": 2, "subject": "AAPL", "action": "buy", "timeframe": "next week"},
                    {"priority": 1, "subject": "AAPL", "action": "hold"},
                    {"priority": 1, "subject": "ZZZZ", "action": "sell"}
                ],
                "summary": "Constructive",
                "risk_assessment": "Valuation risk"
            }"#,
        )
        .unwrap();

        let outcome = map_payload(input(&subjects, &data), payload).unwrap();
        assert_eq!(outcome.source, SynthesisSource::Model);
        assert_eq!(outcome.recommendations.len(), 1);

        let rec = &outcome.recommendations[0];
        assert_eq!(rec.consensus_count, 1);
        assert!(rec.agent_breakdown.iter().all(|s| (s.weight - 0.5).abs() < 1e-9));
        assert_eq!(outcome.action_timeline.len(), 2);
        assert_eq!(outcome.action_timeline[0].priority, 1);
        assert!(outcome.action_timeline.iter().all(|t| t.subject == "AAPL"));
    }

    #[test]
    fn test_map_payload_rejects_only_invented_subjects() {
        let subjects = vec!["AAPL".to_string()];
        let data = outputs();
        let payload = parse_payload(
            r#"{"recommendations": [{"subject": "ZZZZ", "action": "buy", "confidence": 0.9}]}"#,
        )
        .unwrap();

        assert!(matches!(
            map_payload(input(&subjects, &data), payload),
            Err(SynthesisError::Empty)
        ));
    }

    #[test]
    fn test_parse_rejects_empty_and_garbage() {
        assert!(matches!(parse_payload("  "), Err(SynthesisError::Malformed(_))));
        assert!(matches!(parse_payload("not json"), Err(SynthesisError::Malformed(_))));
        assert!(matches!(
            parse_payload(r#"{"recommendations": [], "summary": "nothing"}"#),
            Err(SynthesisError::Empty)
        ));
    }
}
