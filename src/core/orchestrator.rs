//! Main orchestrator for tiered pipeline execution.
//!
//! A run goes `prefetch -> phase[0] -> ... -> phase[n-1] -> synthesis`.
//! All steps of a phase run concurrently on the current task; the next
//! phase starts only after every step of the previous one has settled.
//! Step failures are recorded and never abort the run.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{HistoryProvider, ReasoningClient, ReferenceDataProvider};
use crate::domain::{
    AnalysisRequest, DependencySnapshot, FinalReport, HistoryRecord, PhaseProgress,
    PipelineEvent, PipelineResult, ReferenceBundle, TaskId, TaskResult,
};

use super::conflicts::detect_conflicts;
use super::event_bus::EventBus;
use super::registry::{RegistryError, Task, TaskRegistry};
use super::synthesis::{SynthesisInput, SynthesisSettings, Synthesizer};
use super::usage::{aggregate_usage, PricingTable};
use super::workflow::{PipelineStep, WorkflowCatalog, WorkflowDefinition};

/// Why a single step did not produce a result
#[derive(Debug, Clone, Error)]
pub enum StepError {
    #[error("task '{task_id}' timed out after {timeout_ms}ms")]
    Timeout { task_id: TaskId, timeout_ms: u64 },

    #[error("task '{task_id}' failed: {message}")]
    Failed { task_id: TaskId, message: String },

    #[error("task '{task_id}' returned an error result: {message}")]
    ErrorResult { task_id: TaskId, message: String },

    #[error(transparent)]
    Unregistered(#[from] RegistryError),
}

/// Tunables that are not part of a workflow definition
#[derive(Debug, Clone, Default)]
pub struct OrchestratorSettings {
    pub pricing: PricingTable,
    pub synthesis: SynthesisSettings,
}

/// Build the dependency context for a step.
///
/// Dependencies without a result (failed, skipped or never run) are omitted.
pub fn build_context(
    step: &PipelineStep,
    outputs: &HashMap<TaskId, TaskResult>,
) -> BTreeMap<String, DependencySnapshot> {
    step.depends_on
        .iter()
        .filter_map(|dep| {
            outputs
                .get(dep)
                .map(|result| (dep.to_string(), result.snapshot()))
        })
        .collect()
}

/// Main pipeline orchestrator
pub struct Orchestrator {
    registry: Arc<TaskRegistry>,
    catalog: Arc<WorkflowCatalog>,
    reasoning: Arc<dyn ReasoningClient>,
    reference: Arc<dyn ReferenceDataProvider>,
    history: Option<Arc<dyn HistoryProvider>>,
    events: EventBus,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    /// Create a new orchestrator
    pub fn new(
        registry: Arc<TaskRegistry>,
        catalog: Arc<WorkflowCatalog>,
        reasoning: Arc<dyn ReasoningClient>,
        reference: Arc<dyn ReferenceDataProvider>,
    ) -> Self {
        Self {
            registry,
            catalog,
            reasoning,
            reference,
            history: None,
            events: EventBus::new(),
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryProvider>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &WorkflowCatalog {
        &self.catalog
    }

    /// Subscribe to progress events; drop the receiver to unsubscribe
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Execute a catalog workflow
    pub async fn run(&self, workflow_id: &str, request: AnalysisRequest) -> Result<FinalReport> {
        let workflow = self.catalog.get(workflow_id)?.clone();
        self.run_workflow(&workflow, request).await
    }

    /// Execute a workflow definition.
    ///
    /// Fails only for setup problems (invalid workflow, unregistered tasks,
    /// no subjects). Everything after setup degrades gracefully.
    #[instrument(skip(self, workflow, request), fields(workflow = %workflow.id))]
    pub async fn run_workflow(
        &self,
        workflow: &WorkflowDefinition,
        request: AnalysisRequest,
    ) -> Result<FinalReport> {
        workflow.validate()?;

        if request.subjects.is_empty() {
            anyhow::bail!("At least one subject is required");
        }

        // Registration problems are fatal at setup time
        for id in workflow.executable_task_ids() {
            self.registry.get_or_fail(&id)?;
        }

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let run_start = Instant::now();

        let phases: Vec<Vec<PipelineStep>> = workflow
            .phases()
            .into_iter()
            .map(|group| {
                group
                    .steps
                    .into_iter()
                    .filter(|s| !s.is_synthesis())
                    .collect::<Vec<_>>()
            })
            .filter(|steps| !steps.is_empty())
            .collect();
        let total_steps = workflow.executable_step_count();
        let total_phases = phases.len();

        info!(%run_id, total_steps, total_phases, "Starting pipeline execution");
        self.events.publish(PipelineEvent::RunStarted {
            run_id,
            workflow_id: workflow.id.clone(),
            total_steps,
            total_phases,
        });

        let mut warnings = Vec::new();
        let bundle = self.prefetch(workflow, &request, &mut warnings).await;
        let history = self.fetch_history(workflow, &request, &mut warnings).await;

        let mut outputs: HashMap<TaskId, TaskResult> = HashMap::new();
        let mut pipeline_results: Vec<PipelineResult> = Vec::with_capacity(total_steps);

        for (phase_index, steps) in phases.iter().enumerate() {
            debug!(phase = phase_index, steps = steps.len(), "Starting phase");

            let futures: Vec<_> = steps
                .iter()
                .map(|step| {
                    let task = self.registry.get_or_fail(&step.task_id);
                    let wants_history = task.as_ref().map(|t| t.uses_history()).unwrap_or(false);

                    let mut step_request = request.clone();
                    step_request.context = build_context(step, &outputs);
                    step_request.history = if wants_history {
                        history.clone()
                    } else {
                        None
                    };

                    self.execute_step(run_id, step, task, step_request, &bundle)
                })
                .collect();

            // Barrier: wait for every step, whatever its outcome
            let results = join_all(futures).await;

            for result in results {
                if let Some(task_result) = &result.result {
                    outputs.insert(result.task_id.clone(), task_result.clone());
                }
                pipeline_results.push(result);
            }

            let completed_task_ids: Vec<TaskId> = pipeline_results
                .iter()
                .filter(|r| r.success)
                .map(|r| r.task_id.clone())
                .collect();

            info!(
                phase = phase_index,
                completed = completed_task_ids.len(),
                total_steps,
                "Phase completed"
            );
            self.events.publish(PipelineEvent::PhaseCompleted(PhaseProgress {
                completed_task_ids,
                total_steps,
                current_phase: phase_index,
                total_phases,
            }));
        }

        let failed = pipeline_results.iter().filter(|r| !r.success).count();
        if workflow.all_required && failed > 0 {
            warnings.push(format!(
                "Workflow '{}' expects every step to succeed; {} of {} failed, report is incomplete",
                workflow.id, failed, total_steps
            ));
        }

        let conflicts = detect_conflicts(&outputs);
        if !conflicts.is_empty() {
            info!(count = conflicts.len(), "Conflicting analyst views detected");
        }

        self.events.publish(PipelineEvent::SynthesisStarted { run_id });

        let synthesizer =
            Synthesizer::new(self.reasoning.clone(), self.settings.synthesis.clone());
        let chunk_events = self.events.clone();
        let outcome = synthesizer
            .synthesize(
                SynthesisInput {
                    subjects: &request.subjects,
                    outputs: &outputs,
                    conflicts: &conflicts,
                    pipeline_results: &pipeline_results,
                },
                move |text| {
                    chunk_events.publish(PipelineEvent::SynthesisChunk {
                        run_id,
                        text: text.to_string(),
                    })
                },
            )
            .await;

        let usage = aggregate_usage(&outputs, outcome.usage.as_ref(), &self.settings.pricing);
        warnings.extend(outcome.warnings);

        let report = FinalReport {
            run_id,
            workflow_id: workflow.id.clone(),
            subjects: request.subjects.clone(),
            pipeline_results,
            recommendations: outcome.recommendations,
            action_timeline: outcome.action_timeline,
            summary: outcome.summary,
            risk_assessment: outcome.risk_assessment,
            conflicts: outcome.conflicts,
            warnings,
            synthesis_source: outcome.source,
            usage,
            started_at,
            completed_at: Utc::now(),
            duration_ms: run_start.elapsed().as_millis() as u64,
        };

        info!(
            %run_id,
            duration_ms = report.duration_ms,
            failed_steps = report.failed_steps().count(),
            source = ?report.synthesis_source,
            "Run completed"
        );
        self.events.publish(PipelineEvent::RunCompleted {
            report: Box::new(report.clone()),
        });

        Ok(report)
    }

    /// Fetch reference data once for the whole run
    async fn prefetch(
        &self,
        workflow: &WorkflowDefinition,
        request: &AnalysisRequest,
        warnings: &mut Vec<String>,
    ) -> ReferenceBundle {
        let categories: Vec<_> = self
            .registry
            .required_data_for(&workflow.executable_task_ids())
            .into_iter()
            .collect();

        debug!(categories = categories.len(), "Prefetching reference data");
        match self
            .reference
            .fetch_bundle(&categories, &request.subjects)
            .await
        {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!(error = %e, "Reference data prefetch failed, continuing without it");
                warnings.push(format!("Reference data unavailable: {:#}", e));
                ReferenceBundle::new()
            }
        }
    }

    /// Look up recommendation history if any task in the workflow wants it
    async fn fetch_history(
        &self,
        workflow: &WorkflowDefinition,
        request: &AnalysisRequest,
        warnings: &mut Vec<String>,
    ) -> Option<Vec<HistoryRecord>> {
        let provider = self.history.as_ref()?;
        let wanted = workflow
            .executable_task_ids()
            .iter()
            .filter_map(|id| self.registry.get(id))
            .any(|task| task.uses_history());
        if !wanted {
            return None;
        }

        match provider.history(&request.subjects).await {
            Ok(records) => Some(records),
            Err(e) => {
                warn!(error = %e, "History lookup failed, continuing without it");
                warnings.push(format!("Recommendation history unavailable: {:#}", e));
                None
            }
        }
    }

    /// Execute a single step under its timeout
    async fn execute_step(
        &self,
        run_id: Uuid,
        step: &PipelineStep,
        task: Result<Arc<dyn Task>, RegistryError>,
        request: AnalysisRequest,
        bundle: &ReferenceBundle,
    ) -> PipelineResult {
        let started_at = Utc::now();
        let step_start = Instant::now();
        debug!(task = %step.task_id, context = request.context.len(), "Step started");

        let outcome = match task {
            Ok(task) => {
                let budget = Duration::from_millis(step.timeout_ms);
                match timeout(budget, task.execute(&request, bundle)).await {
                    Ok(Ok(result)) if result.is_success() => Ok(result),
                    Ok(Ok(result)) => Err(StepError::ErrorResult {
                        task_id: step.task_id.clone(),
                        message: result.summary,
                    }),
                    Ok(Err(e)) => Err(StepError::Failed {
                        task_id: step.task_id.clone(),
                        message: format!("{:#}", e),
                    }),
                    Err(_) => Err(StepError::Timeout {
                        task_id: step.task_id.clone(),
                        timeout_ms: step.timeout_ms,
                    }),
                }
            }
            Err(e) => Err(StepError::from(e)),
        };

        let duration_ms = step_start.elapsed().as_millis() as u64;

        let (result, error_message) = match outcome {
            Ok(result) => {
                info!(task = %step.task_id, duration_ms, "Step completed");
                (Some(result), None)
            }
            Err(e) => {
                if step.optional {
                    warn!(task = %step.task_id, duration_ms, error = %e, "Optional step failed");
                } else {
                    error!(task = %step.task_id, duration_ms, error = %e, "Required step failed");
                }
                (None, Some(e.to_string()))
            }
        };

        let success = result.is_some();
        self.events.publish(PipelineEvent::StepFinished {
            run_id,
            task_id: step.task_id.clone(),
            success,
            duration_ms,
            error: error_message.clone(),
        });

        PipelineResult {
            task_id: step.task_id.clone(),
            phase: step.phase,
            optional: step.optional,
            result,
            duration_ms,
            success,
            error: error_message,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("workflows", &self.catalog.len())
            .field("reasoning", &self.reasoning.name())
            .field("history", &self.history.is_some())
            .finish()
    }
}
