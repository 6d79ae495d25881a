//! Reasoning-service backed analyst.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use super::AnalystSpec;
use crate::adapters::{ReasoningClient, ReasoningRequest};
use crate::core::Task;
use crate::domain::{
    AnalysisRequest, DataCategory, Recommendation, ReferenceBundle, TaskId, TaskResult, TaskState,
};

const SCHEMA_NAME: &str = "analyst_report";

const BASE_PROMPT: &str = "You are one analyst on an investment research team. Analyse only \
the subjects listed, using the reference data and the conclusions of the analysts you \
depend on. A low-confidence HOLD is an acceptable answer when the evidence is thin. \
Respond only through the provided schema.";

#[derive(Debug, Deserialize)]
struct AnalystOutput {
    summary: String,
    confidence: f64,
    #[serde(default)]
    recommendations: Vec<Recommendation>,
    #[serde(default)]
    warnings: Vec<String>,
    #[serde(default)]
    findings: serde_json::Value,
}

/// An analyst whose reasoning is delegated to a [`ReasoningClient`]
pub struct PromptTask {
    spec: AnalystSpec,
    client: Arc<dyn ReasoningClient>,
    state: Mutex<TaskState>,
}

impl PromptTask {
    pub fn new(spec: AnalystSpec, client: Arc<dyn ReasoningClient>) -> Self {
        Self {
            spec,
            client,
            state: Mutex::new(TaskState::Idle),
        }
    }

    pub fn spec(&self) -> &AnalystSpec {
        &self.spec
    }

    fn system_prompt(&self) -> String {
        let mut prompt = format!("{BASE_PROMPT}\n\nRole: {}.", self.role());
        if !self.spec.instructions.is_empty() {
            prompt.push(' ');
            prompt.push_str(&self.spec.instructions);
        }
        prompt
    }

    fn role(&self) -> &str {
        if self.spec.title.is_empty() {
            self.spec.id.as_str()
        } else {
            &self.spec.title
        }
    }

    /// Request, dependency context and the categories this analyst reads
    fn user_message(&self, request: &AnalysisRequest, data: &ReferenceBundle) -> String {
        let mut relevant = serde_json::Map::new();
        for subject in &request.subjects {
            let Some(categories) = data.get(subject) else {
                continue;
            };
            let slice: serde_json::Map<String, serde_json::Value> = categories
                .iter()
                .filter(|(category, _)| self.spec.data.contains(category))
                .map(|(category, value)| (category.as_str().to_string(), value.clone()))
                .collect();
            if !slice.is_empty() {
                relevant.insert(subject.clone(), slice.into());
            }
        }

        json!({
            "subjects": request.subjects,
            "query": request.query,
            "preferences": request.preferences,
            "dependencies": request.context,
            "history": request.history,
            "reference_data": relevant,
        })
        .to_string()
    }

    fn parse(&self, content: &str, subjects: &[String]) -> Result<TaskResult> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            bail!("Analyst '{}' returned empty content", self.spec.id);
        }

        let output: AnalystOutput = serde_json::from_str(trimmed)
            .with_context(|| format!("Analyst '{}' returned malformed output", self.spec.id))?;

        let mut result = TaskResult::success(self.spec.id.clone(), output.summary, output.confidence)
            .with_payload(output.findings);

        for rec in output.recommendations {
            if !subjects.iter().any(|s| s == &rec.subject) {
                result = result.with_warning(format!(
                    "Ignored recommendation for unrequested subject {}",
                    rec.subject
                ));
                continue;
            }
            let confidence = rec.confidence;
            result = result.with_recommendation(Recommendation {
                confidence: confidence.clamp(0.0, 1.0),
                ..rec
            });
        }
        for warning in output.warnings {
            result = result.with_warning(warning);
        }

        Ok(result)
    }
}

fn set_state(slot: &Mutex<TaskState>, state: TaskState) {
    *slot.lock().unwrap_or_else(|e| e.into_inner()) = state;
}

/// Marks the task Running for as long as it lives. Dropped without
/// [`RunGuard::finish`] (the call was cancelled), the task reads as Failed.
struct RunGuard<'a> {
    slot: &'a Mutex<TaskState>,
    finished: bool,
}

impl<'a> RunGuard<'a> {
    fn start(slot: &'a Mutex<TaskState>) -> Self {
        set_state(slot, TaskState::Running);
        Self {
            slot,
            finished: false,
        }
    }

    fn finish(mut self, state: TaskState) {
        set_state(self.slot, state);
        self.finished = true;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            set_state(self.slot, TaskState::Failed);
        }
    }
}

#[async_trait]
impl Task for PromptTask {
    fn id(&self) -> &TaskId {
        &self.spec.id
    }

    fn required_data(&self) -> &[DataCategory] {
        &self.spec.data
    }

    fn uses_history(&self) -> bool {
        self.spec.uses_history
    }

    fn status(&self) -> TaskState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[instrument(skip_all, fields(task = %self.spec.id))]
    async fn execute(&self, request: &AnalysisRequest, data: &ReferenceBundle) -> Result<TaskResult> {
        let guard = RunGuard::start(&self.state);

        let reasoning = ReasoningRequest::new(self.system_prompt(), self.user_message(request, data))
            .with_schema(SCHEMA_NAME, output_schema());

        let outcome = match self.client.call(reasoning).await {
            Ok(response) => {
                debug!(
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    "Analyst call complete"
                );
                self.parse(&response.content, &request.subjects)
                    .map(|r| r.with_usage(response.usage))
            }
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("Reasoning call failed for analyst '{}'", self.spec.id))),
        };

        guard.finish(if outcome.is_ok() {
            TaskState::Completed
        } else {
            TaskState::Failed
        });
        outcome
    }
}

impl std::fmt::Debug for PromptTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptTask")
            .field("id", &self.spec.id)
            .field("client", &self.client.name())
            .finish()
    }
}

fn output_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "required": ["summary", "confidence", "recommendations"],
        "properties": {
            "summary": { "type": "string" },
            "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
            "recommendations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["subject", "action", "confidence", "rationale"],
                    "properties": {
                        "subject": { "type": "string" },
                        "action": {
                            "type": "string",
                            "enum": ["strong_buy", "buy", "hold", "sell", "strong_sell"]
                        },
                        "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                        "target_price": { "type": "number" },
                        "stop_loss": { "type": "number" },
                        "rationale": { "type": "string" }
                    }
                }
            },
            "warnings": { "type": "array", "items": { "type": "string" } },
            "findings": { "type": "object" }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ReasoningError, ReasoningResponse};
    use crate::domain::{Action, Usage};
    use std::collections::HashMap;

    struct Scripted {
        reply: Result<String, ReasoningError>,
        seen: Mutex<Vec<ReasoningRequest>>,
    }

    impl Scripted {
        fn new(reply: Result<String, ReasoningError>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ReasoningClient for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn call(&self, request: ReasoningRequest) -> Result<ReasoningResponse, ReasoningError> {
            self.seen.lock().unwrap().push(request);
            self.reply.clone().map(|content| ReasoningResponse {
                content,
                usage: Usage::new(120, 40),
            })
        }
    }

    fn spec() -> AnalystSpec {
        AnalystSpec {
            id: TaskId::from("technical"),
            title: "Technical analyst".to_string(),
            instructions: "Read the chart.".to_string(),
            data: vec![DataCategory::Quote, DataCategory::Technicals],
            uses_history: false,
        }
    }

    #[tokio::test]
    async fn test_execute_parses_structured_output() {
        let client = Scripted::new(Ok(json!({
            "summary": "Uptrend intact",
            "confidence": 0.8,
            "recommendations": [
                { "subject": "AAPL", "action": "buy", "confidence": 1.4, "rationale": "trend" },
                { "subject": "TSLA", "action": "sell", "confidence": 0.6, "rationale": "not asked" }
            ]
        })
        .to_string()));
        let task = PromptTask::new(spec(), client.clone());

        let request = AnalysisRequest::new(vec!["AAPL".to_string()]);
        let result = task.execute(&request, &HashMap::new()).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.recommendations.len(), 1);
        assert_eq!(result.recommendations[0].action, Action::Buy);
        assert_eq!(result.recommendations[0].confidence, 1.0);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.usage, Some(Usage::new(120, 40)));
        assert_eq!(task.status(), TaskState::Completed);
    }

    #[tokio::test]
    async fn test_user_message_only_carries_own_categories() {
        let client = Scripted::new(Ok(r#"{"summary":"ok","confidence":0.5}"#.to_string()));
        let task = PromptTask::new(spec(), client.clone());

        let mut data: ReferenceBundle = HashMap::new();
        data.entry("AAPL".to_string()).or_default().extend([
            (DataCategory::Quote, json!({ "price": 190.0 })),
            (DataCategory::News, json!(["headline"])),
        ]);

        let request = AnalysisRequest::new(vec!["AAPL".to_string()]);
        task.execute(&request, &data).await.unwrap();

        let seen = client.seen.lock().unwrap();
        let message: serde_json::Value = serde_json::from_str(&seen[0].user_message).unwrap();
        assert_eq!(message["reference_data"]["AAPL"]["quote"]["price"], 190.0);
        assert!(message["reference_data"]["AAPL"].get("news").is_none());
        assert!(seen[0].system_prompt.contains("Read the chart."));
        assert_eq!(seen[0].schema.as_ref().unwrap().name, SCHEMA_NAME);
    }

    #[tokio::test]
    async fn test_malformed_output_fails() {
        let client = Scripted::new(Ok("not json".to_string()));
        let task = PromptTask::new(spec(), client);

        let request = AnalysisRequest::new(vec!["AAPL".to_string()]);
        let err = task.execute(&request, &HashMap::new()).await.unwrap_err();

        assert!(err.to_string().contains("technical"));
        assert_eq!(task.status(), TaskState::Failed);
    }

    #[tokio::test]
    async fn test_reasoning_error_propagates() {
        let client = Scripted::new(Err(ReasoningError::RateLimited("slow down".to_string())));
        let task = PromptTask::new(spec(), client);

        let request = AnalysisRequest::new(vec!["AAPL".to_string()]);
        let err = task.execute(&request, &HashMap::new()).await.unwrap_err();

        assert!(err.downcast_ref::<ReasoningError>().is_some());
    }

    struct Stalled;

    #[async_trait]
    impl ReasoningClient for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn call(&self, _request: ReasoningRequest) -> Result<ReasoningResponse, ReasoningError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_execution_does_not_stay_running() {
        let task = PromptTask::new(spec(), Arc::new(Stalled));
        let request = AnalysisRequest::new(vec!["AAPL".to_string()]);
        let data = HashMap::new();

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            task.execute(&request, &data),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(task.status(), TaskState::Failed);
    }
}
