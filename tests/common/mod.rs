//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::Instant;

use advisors::adapters::{
    EmptyReferenceData, ReasoningClient, ReasoningError, ReasoningRequest, ReasoningResponse,
};
use advisors::core::{Orchestrator, Task, TaskRegistry, WorkflowCatalog};
use advisors::domain::{
    AnalysisRequest, DataCategory, Recommendation, ReferenceBundle, TaskId, TaskResult, Usage,
};

/// What a mock task was asked to do, and when
#[derive(Debug, Clone)]
pub struct Invocation {
    pub task_id: TaskId,
    pub started: Instant,
    pub finished: Instant,
    pub context_keys: Vec<String>,
    pub had_history: bool,
}

pub type InvocationLog = Arc<Mutex<Vec<Invocation>>>;

#[derive(Debug, Clone)]
enum Outcome {
    Succeed,
    Fail(String),
}

/// Configurable task: sleeps, then succeeds or fails
pub struct MockTask {
    id: TaskId,
    data: Vec<DataCategory>,
    delay: Duration,
    outcome: Outcome,
    confidence: f64,
    recommendations: Vec<Recommendation>,
    usage: Option<Usage>,
    uses_history: bool,
    log: InvocationLog,
}

impl MockTask {
    pub fn new(id: &str, log: &InvocationLog) -> Self {
        Self {
            id: TaskId::from(id),
            data: Vec::new(),
            delay: Duration::from_millis(5),
            outcome: Outcome::Succeed,
            confidence: 0.5,
            recommendations: Vec::new(),
            usage: None,
            uses_history: false,
            log: log.clone(),
        }
    }

    pub fn delay_ms(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.outcome = Outcome::Fail(message.to_string());
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn recommends(mut self, recommendation: Recommendation) -> Self {
        self.recommendations.push(recommendation);
        self
    }

    pub fn data(mut self, data: &[DataCategory]) -> Self {
        self.data = data.to_vec();
        self
    }

    pub fn usage(mut self, input: u64, output: u64) -> Self {
        self.usage = Some(Usage::new(input, output));
        self
    }

    pub fn with_history(mut self) -> Self {
        self.uses_history = true;
        self
    }
}

#[async_trait]
impl Task for MockTask {
    fn id(&self) -> &TaskId {
        &self.id
    }

    fn required_data(&self) -> &[DataCategory] {
        &self.data
    }

    fn uses_history(&self) -> bool {
        self.uses_history
    }

    async fn execute(&self, request: &AnalysisRequest, _data: &ReferenceBundle) -> Result<TaskResult> {
        let started = Instant::now();
        tokio::time::sleep(self.delay).await;

        self.log.lock().unwrap().push(Invocation {
            task_id: self.id.clone(),
            started,
            finished: Instant::now(),
            context_keys: request.context.keys().cloned().collect(),
            had_history: request.history.is_some(),
        });

        match &self.outcome {
            Outcome::Fail(message) => anyhow::bail!("{}", message),
            Outcome::Succeed => {
                let mut result =
                    TaskResult::success(self.id.clone(), format!("{} done", self.id), self.confidence);
                for rec in &self.recommendations {
                    result = result.with_recommendation(rec.clone());
                }
                if let Some(usage) = self.usage {
                    result = result.with_usage(usage);
                }
                Ok(result)
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Content(String),
    Error(ReasoningError),
    Hang,
}

/// Reasoning client with a canned reply
pub struct MockReasoning {
    reply: Reply,
    usage: Usage,
    pub calls: Mutex<Vec<ReasoningRequest>>,
}

impl MockReasoning {
    pub fn replying(content: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            reply: Reply::Content(content.into()),
            usage: Usage::new(1_000, 500),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(error: ReasoningError) -> Arc<Self> {
        Arc::new(Self {
            reply: Reply::Error(error),
            usage: Usage::default(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn hanging() -> Arc<Self> {
        Arc::new(Self {
            reply: Reply::Hang,
            usage: Usage::default(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ReasoningClient for MockReasoning {
    fn name(&self) -> &str {
        "mock"
    }

    async fn call(&self, request: ReasoningRequest) -> Result<ReasoningResponse, ReasoningError> {
        self.calls.lock().unwrap().push(request);
        match &self.reply {
            Reply::Content(content) => Ok(ReasoningResponse {
                content: content.clone(),
                usage: self.usage,
            }),
            Reply::Error(e) => Err(e.clone()),
            Reply::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

pub fn new_log() -> InvocationLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn registry(tasks: Vec<MockTask>) -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    for task in tasks {
        registry.register(Arc::new(task)).unwrap();
    }
    registry
}

pub fn catalog(yaml: &str) -> WorkflowCatalog {
    WorkflowCatalog::from_yaml(yaml).unwrap()
}

pub fn orchestrator(
    registry: TaskRegistry,
    catalog: WorkflowCatalog,
    reasoning: Arc<dyn ReasoningClient>,
) -> Orchestrator {
    Orchestrator::new(
        Arc::new(registry),
        Arc::new(catalog),
        reasoning,
        Arc::new(EmptyReferenceData),
    )
}

pub fn request(subjects: &[&str]) -> AnalysisRequest {
    AnalysisRequest::new(subjects.iter().map(|s| s.to_string()).collect())
}

pub fn invocations_by_id(log: &InvocationLog) -> HashMap<String, Invocation> {
    log.lock()
        .unwrap()
        .iter()
        .map(|i| (i.task_id.to_string(), i.clone()))
        .collect()
}
