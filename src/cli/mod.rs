//! Command-line interface for advisors.
//!
//! Provides commands for running analysis workflows, inspecting the
//! workflow catalog and analyst roster, and validating workflow files.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;

use crate::adapters::{
    AnthropicClient, EmptyReferenceData, ReasoningClient, ReasoningError, ReasoningRequest,
    ReasoningResponse, ReferenceDataProvider, StaticHistory, StaticReferenceData,
};
use crate::config::{config, ResolvedConfig};
use crate::core::{Orchestrator, TaskRegistry, WorkflowCatalog};
use crate::domain::{
    AnalysisRequest, FinalReport, InvestmentHorizon, PipelineEvent, Preferences, RiskTolerance,
};
use crate::tasks::{self, AnalystSpec};

/// advisors - Tiered analyst pipeline engine
#[derive(Parser, Debug)]
#[command(name = "advisors")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a workflow over one or more subjects
    Run {
        /// Workflow id (see `advisors workflows`)
        workflow: String,

        /// Subjects to analyse (comma-separated tickers)
        #[arg(short, long, value_delimiter = ',', required = true)]
        subjects: Vec<String>,

        /// Free-form question for the analysts
        #[arg(short, long)]
        query: Option<String>,

        /// Risk tolerance
        #[arg(long, value_enum)]
        risk: Option<RiskArg>,

        /// Investment horizon
        #[arg(long, value_enum)]
        horizon: Option<HorizonArg>,

        /// Reference data snapshot (JSON), overrides the configured one
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Also write the JSON report to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List available workflows
    Workflows,

    /// Show the phases and steps of a workflow
    Show {
        /// Workflow id
        workflow: String,
    },

    /// Validate a workflow file (or the whole catalog) against the analyst roster
    Validate {
        /// Workflow YAML file
        file: Option<PathBuf>,
    },

    /// List registered analysts
    Analysts,

    /// Show resolved configuration (debug)
    Config,
}

/// Risk tolerance for CLI (maps to RiskTolerance)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RiskArg {
    Conservative,
    Moderate,
    Aggressive,
}

impl From<RiskArg> for RiskTolerance {
    fn from(r: RiskArg) -> Self {
        match r {
            RiskArg::Conservative => RiskTolerance::Conservative,
            RiskArg::Moderate => RiskTolerance::Moderate,
            RiskArg::Aggressive => RiskTolerance::Aggressive,
        }
    }
}

/// Investment horizon for CLI (maps to InvestmentHorizon)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum HorizonArg {
    Short,
    Medium,
    Long,
}

impl From<HorizonArg> for InvestmentHorizon {
    fn from(h: HorizonArg) -> Self {
        match h {
            HorizonArg::Short => InvestmentHorizon::Short,
            HorizonArg::Medium => InvestmentHorizon::Medium,
            HorizonArg::Long => InvestmentHorizon::Long,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                workflow,
                subjects,
                query,
                risk,
                horizon,
                data,
                json,
                output,
            } => {
                let mut request = AnalysisRequest::new(normalize_subjects(subjects));
                if let Some(query) = query {
                    request = request.with_query(query);
                }
                if risk.is_some() || horizon.is_some() {
                    request = request.with_preferences(Preferences {
                        risk_tolerance: risk.map(Into::into),
                        horizon: horizon.map(Into::into),
                    });
                }
                run_workflow(&workflow, request, data, json, output).await
            }
            Commands::Workflows => list_workflows(),
            Commands::Show { workflow } => show_workflow(&workflow),
            Commands::Validate { file } => validate(file.as_deref()),
            Commands::Analysts => list_analysts(),
            Commands::Config => show_config(),
        }
    }
}

/// Log filter directive: `ADVISORS_LOG`, then `RUST_LOG`, then `info`
pub fn log_directive(advisors_log: Option<String>, rust_log: Option<String>) -> String {
    advisors_log
        .into_iter()
        .chain(rust_log)
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
        .unwrap_or_else(|| "info".to_string())
}

/// Stand-in client for commands that inspect the roster but never call out
struct OfflineClient;

#[async_trait]
impl ReasoningClient for OfflineClient {
    fn name(&self) -> &str {
        "offline"
    }

    async fn call(&self, _request: ReasoningRequest) -> Result<ReasoningResponse, ReasoningError> {
        Err(ReasoningError::Authentication(
            "ANTHROPIC_API_KEY is not set".to_string(),
        ))
    }
}

/// Upper-case, trim and de-duplicate subjects, keeping first-seen order
fn normalize_subjects(subjects: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(subjects.len());
    for subject in subjects {
        let subject = subject.trim().to_uppercase();
        if !subject.is_empty() && !seen.contains(&subject) {
            seen.push(subject);
        }
    }
    seen
}

/// Built-in workflows plus any found in the configured workflows directory
fn load_catalog(config: &ResolvedConfig) -> Result<WorkflowCatalog> {
    let mut catalog = WorkflowCatalog::builtin()?;
    if config.workflows_dir.is_dir() {
        let loaded = catalog.load_dir(&config.workflows_dir)?;
        tracing::debug!(loaded, dir = %config.workflows_dir.display(), "Loaded user workflows");
    }
    Ok(catalog)
}

/// Built-in roster with the configured analyst file layered on top
fn load_roster(config: &ResolvedConfig) -> Result<(Vec<AnalystSpec>, Vec<AnalystSpec>)> {
    let builtin = tasks::builtin_roster()?;
    let overrides = if config.analysts_file.is_file() {
        tasks::roster_from_file(&config.analysts_file)?
    } else {
        Vec::new()
    };
    Ok((builtin, overrides))
}

fn build_registry(config: &ResolvedConfig, client: Arc<dyn ReasoningClient>) -> Result<TaskRegistry> {
    let (builtin, overrides) = load_roster(config)?;
    let mut registry = tasks::build_registry(builtin, client.clone())?;
    tasks::apply_overrides(&mut registry, overrides, client);
    Ok(registry)
}

async fn run_workflow(
    workflow_id: &str,
    request: AnalysisRequest,
    data: Option<PathBuf>,
    json: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let config = config()?;

    let client: Arc<dyn ReasoningClient> =
        Arc::new(AnthropicClient::new(config.reasoning.anthropic_config()?)?);
    let registry = build_registry(config, client.clone())?;
    let catalog = load_catalog(config)?;

    let reference: Arc<dyn ReferenceDataProvider> =
        match data.as_deref().or(config.reference_data.as_deref()) {
            Some(path) => Arc::new(StaticReferenceData::from_file(path)?),
            None => {
                tracing::warn!("No reference data configured; analysts will work without it");
                Arc::new(EmptyReferenceData)
            }
        };

    let mut orchestrator = Orchestrator::new(Arc::new(registry), Arc::new(catalog), client, reference)
        .with_settings(config.orchestrator_settings());
    if let Some(path) = &config.history {
        orchestrator = orchestrator.with_history(Arc::new(StaticHistory::from_file(path)?));
    }

    let progress = tokio::spawn(print_progress(orchestrator.subscribe()));
    let report = orchestrator.run(workflow_id, request).await;
    drop(orchestrator);
    let _ = progress.await;
    let report = report?;

    if let Some(path) = output {
        let body = serde_json::to_string_pretty(&report)?;
        std::fs::write(&path, body)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        eprintln!("Report written to {}", path.display());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_report(&report));
    }

    Ok(())
}

/// Print progress to stderr until the run completes or the bus closes
async fn print_progress(mut rx: tokio::sync::broadcast::Receiver<PipelineEvent>) {
    loop {
        match rx.recv().await {
            Ok(PipelineEvent::RunStarted {
                workflow_id,
                total_steps,
                total_phases,
                ..
            }) => {
                eprintln!("[{workflow_id}] {total_steps} steps in {total_phases} phases");
            }
            Ok(PipelineEvent::StepFinished {
                task_id,
                success,
                duration_ms,
                error,
                ..
            }) => {
                if success {
                    eprintln!("  ✓ {task_id} ({duration_ms}ms)");
                } else {
                    eprintln!("  ✗ {task_id}: {}", error.unwrap_or_default());
                }
            }
            Ok(PipelineEvent::PhaseCompleted(progress)) => {
                eprintln!(
                    "Phase {}/{} complete ({}/{} steps succeeded)",
                    progress.current_phase + 1,
                    progress.total_phases,
                    progress.completed_task_ids.len(),
                    progress.total_steps
                );
            }
            Ok(PipelineEvent::SynthesisStarted { .. }) => eprintln!("Synthesizing..."),
            Ok(PipelineEvent::SynthesisChunk { .. }) => {}
            Ok(PipelineEvent::RunCompleted { .. }) => break,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
}

/// Human-readable rendering of a report
pub fn render_report(report: &FinalReport) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Run {} ({})", report.run_id, report.workflow_id);
    let _ = writeln!(out, "Subjects: {}", report.subjects.join(", "));
    let _ = writeln!(out);

    let _ = writeln!(out, "{:<8} {:<12} {:>10} {:>10}", "SUBJECT", "ACTION", "CONFIDENCE", "CONSENSUS");
    let _ = writeln!(out, "{}", "-".repeat(44));
    for rec in &report.recommendations {
        let _ = writeln!(
            out,
            "{:<8} {:<12} {:>9.0}% {:>6}/{}",
            rec.subject,
            rec.action,
            rec.confidence * 100.0,
            rec.consensus_count,
            rec.agent_breakdown.len()
        );
    }

    if !report.action_timeline.is_empty() {
        let _ = writeln!(out, "\nAction timeline:");
        for item in &report.action_timeline {
            let _ = writeln!(
                out,
                "  {}. {} {} {}",
                item.priority, item.action, item.subject, item.timeframe
            );
        }
    }

    if !report.conflicts.is_empty() {
        let _ = writeln!(out, "\nConflicts:");
        for conflict in &report.conflicts {
            let _ = writeln!(
                out,
                "  {} ({:?}, severity {:.2}) {}",
                conflict.subject,
                conflict.level(),
                conflict.severity,
                conflict.resolution
            );
        }
    }

    let _ = writeln!(out, "\nSummary:\n{}", report.summary);
    if !report.risk_assessment.is_empty() {
        let _ = writeln!(out, "\nRisk:\n{}", report.risk_assessment);
    }

    if !report.warnings.is_empty() {
        let _ = writeln!(out, "\nWarnings:");
        for warning in &report.warnings {
            let _ = writeln!(out, "  - {}", warning);
        }
    }

    let _ = writeln!(
        out,
        "\n{} tokens, ~${:.4}, {}ms",
        report.usage.total_tokens, report.usage.estimated_cost_usd, report.duration_ms
    );
    out
}

fn list_workflows() -> Result<()> {
    let catalog = load_catalog(config()?)?;

    println!("{:<20} {:>6} {:>7}  {}", "WORKFLOW", "STEPS", "PHASES", "NAME");
    println!("{}", "-".repeat(70));
    for workflow in catalog.list() {
        println!(
            "{:<20} {:>6} {:>7}  {}",
            workflow.id,
            workflow.executable_step_count(),
            workflow.phases().len(),
            workflow.name
        );
    }
    Ok(())
}

fn show_workflow(id: &str) -> Result<()> {
    let config = config()?;
    let catalog = load_catalog(config)?;
    let registry = build_registry(config, Arc::new(OfflineClient))?;
    let workflow = catalog.get(id)?;

    println!("{} - {}", workflow.id, workflow.name);
    if !workflow.description.is_empty() {
        println!("{}", workflow.description);
    }
    if workflow.estimated_duration_secs > 0 {
        println!("Estimated duration: ~{}s", workflow.estimated_duration_secs);
    }

    for group in workflow.phases() {
        println!("\nPhase {}:", group.phase);
        for step in &group.steps {
            let mut line = format!("  {}", step.task_id);
            if step.optional {
                line.push_str(" (optional)");
            }
            if !step.depends_on.is_empty() {
                let deps: Vec<&str> = step.depends_on.iter().map(|d| d.as_str()).collect();
                let _ = write!(line, " <- {}", deps.join(", "));
            }
            if !step.is_synthesis() {
                let _ = write!(line, " [timeout {}ms]", step.timeout_ms);
            }
            println!("{}", line);
        }
    }

    let data: Vec<&str> = catalog
        .required_data(id, &registry)?
        .into_iter()
        .map(|c| c.as_str())
        .collect();
    println!("\nReference data: {}", data.join(", "));
    Ok(())
}

fn validate(file: Option<&Path>) -> Result<()> {
    let config = config()?;
    let registry = build_registry(config, Arc::new(OfflineClient))?;

    let catalog = match file {
        Some(path) => WorkflowCatalog::from_file(path)?,
        None => load_catalog(config)?,
    };

    let mut problems = 0;
    for workflow in catalog.list() {
        let missing = registry.unregistered(workflow.executable_task_ids().iter());
        if missing.is_empty() {
            println!("✓ {}", workflow.id);
        } else {
            problems += 1;
            let names: Vec<&str> = missing.iter().map(|id| id.as_str()).collect();
            println!("✗ {}: unregistered tasks {}", workflow.id, names.join(", "));
        }
    }

    if problems > 0 {
        anyhow::bail!("{} workflow(s) reference unregistered tasks", problems);
    }
    Ok(())
}

fn list_analysts() -> Result<()> {
    let (builtin, overrides) = load_roster(config()?)?;

    let mut roster = builtin;
    for spec in overrides {
        match roster.iter_mut().find(|a| a.id == spec.id) {
            Some(existing) => *existing = spec,
            None => roster.push(spec),
        }
    }

    println!("{:<16} {:<28} {}", "ID", "TITLE", "DATA");
    println!("{}", "-".repeat(80));
    for analyst in roster {
        let data: Vec<&str> = analyst.data.iter().map(|c| c.as_str()).collect();
        let history = if analyst.uses_history { " +history" } else { "" };
        println!(
            "{:<16} {:<28} {}{}",
            analyst.id,
            analyst.title,
            data.join(", "),
            history
        );
    }
    Ok(())
}

fn show_config() -> Result<()> {
    let config = config()?;

    println!("Configuration:");
    println!(
        "  config file:    {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none)".to_string())
    );
    println!("  home:           {}", config.home.display());
    println!("  workflows dir:  {}", config.workflows_dir.display());
    println!("  analysts file:  {}", config.analysts_file.display());
    println!("  model:          {}", config.reasoning.model);
    println!("  base url:       {}", config.reasoning.base_url);
    println!(
        "  api key:        {}",
        if config.reasoning.api_key.is_some() { "set" } else { "missing" }
    );
    println!(
        "  synthesis:      {}ms timeout, streaming {}",
        config.pipeline.synthesis_timeout_ms, config.pipeline.stream_synthesis
    );
    println!(
        "  pricing:        ${}/M input, ${}/M output",
        config.pricing.input_per_million, config.pricing.output_per_million
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, ResolvedRecommendation, SynthesisSource, UsageSummary};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_log_directive_precedence() {
        assert_eq!(log_directive(None, None), "info");
        assert_eq!(log_directive(None, Some("warn".to_string())), "warn");
        assert_eq!(
            log_directive(Some("advisors=debug".to_string()), Some("warn".to_string())),
            "advisors=debug"
        );
        assert_eq!(log_directive(Some("  ".to_string()), Some("error".to_string())), "error");
    }

    #[test]
    fn test_normalize_subjects() {
        let subjects = vec![" aapl".to_string(), "MSFT".to_string(), "AAPL".to_string(), "".to_string()];
        assert_eq!(normalize_subjects(subjects), vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "advisors", "run", "quick-scan", "--subjects", "AAPL,MSFT", "--risk", "aggressive", "--json",
        ])
        .unwrap();

        match cli.command {
            Commands::Run { workflow, subjects, risk, json, .. } => {
                assert_eq!(workflow, "quick-scan");
                assert_eq!(subjects, vec!["AAPL", "MSFT"]);
                assert!(matches!(risk, Some(RiskArg::Aggressive)));
                assert!(json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_render_report() {
        let now = Utc::now();
        let report = FinalReport {
            run_id: Uuid::new_v4(),
            workflow_id: "quick-scan".to_string(),
            subjects: vec!["AAPL".to_string()],
            pipeline_results: Vec::new(),
            recommendations: vec![ResolvedRecommendation {
                subject: "AAPL".to_string(),
                action: Action::Buy,
                confidence: 0.72,
                target_price: None,
                stop_loss: None,
                rationale: String::new(),
                consensus_count: 2,
                agent_breakdown: Vec::new(),
            }],
            action_timeline: Vec::new(),
            summary: "Constructive".to_string(),
            risk_assessment: String::new(),
            conflicts: Vec::new(),
            warnings: vec!["news timed out".to_string()],
            synthesis_source: SynthesisSource::Model,
            usage: UsageSummary::default(),
            started_at: now,
            completed_at: now,
            duration_ms: 1500,
        };

        let text = render_report(&report);
        assert!(text.contains("AAPL"));
        assert!(text.contains("72%"));
        assert!(text.contains("news timed out"));
    }
}
