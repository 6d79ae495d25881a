//! Configuration for advisors.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (ADVISORS_HOME, ADVISORS_MODEL, ANTHROPIC_API_KEY, ANTHROPIC_BASE_URL)
//! 2. Config file (.advisors/config.yaml)
//! 3. Defaults (~/.advisors)
//!
//! Config file discovery:
//! - Searches current directory and parents for .advisors/config.yaml
//! - Paths in config file are relative to the project root (parent of .advisors/)

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::AnthropicConfig;
use crate::core::{OrchestratorSettings, PricingTable, SynthesisSettings};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".advisors";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub pricing: Option<PricingTable>,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReasoningConfig {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    pub synthesis_timeout_ms: Option<u64>,
    pub stream_synthesis: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .advisors/)
    pub home: Option<String>,
    /// Directory of extra workflow YAML files
    pub workflows_dir: Option<String>,
    /// Analyst roster overriding or extending the built-in one
    pub analysts_file: Option<String>,
    /// JSON snapshot of reference data
    pub reference_data: Option<String>,
    /// JSON list of past recommendations
    pub history: Option<String>,
}

/// Values read from the process environment
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub home: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            home: var("ADVISORS_HOME"),
            model: var("ADVISORS_MODEL"),
            api_key: var("ANTHROPIC_API_KEY"),
            base_url: var("ANTHROPIC_BASE_URL"),
        }
    }
}

/// Resolved reasoning-service settings (API key is never serialized)
#[derive(Debug, Clone, Serialize)]
pub struct ReasoningSettings {
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl ReasoningSettings {
    pub fn anthropic_config(&self) -> Result<AnthropicConfig> {
        let api_key = self
            .api_key
            .clone()
            .context("ANTHROPIC_API_KEY is not set")?;

        Ok(AnthropicConfig {
            api_key,
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSettings {
    pub synthesis_timeout_ms: u64,
    pub stream_synthesis: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            synthesis_timeout_ms: SynthesisSettings::default().timeout.as_millis() as u64,
            stream_synthesis: false,
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub home: PathBuf,
    pub workflows_dir: PathBuf,
    pub analysts_file: PathBuf,
    pub reference_data: Option<PathBuf>,
    pub history: Option<PathBuf>,
    pub reasoning: ReasoningSettings,
    pub pipeline: PipelineSettings,
    pub pricing: PricingTable,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            pricing: self.pricing,
            synthesis: SynthesisSettings {
                timeout: Duration::from_millis(self.pipeline.synthesis_timeout_ms),
                stream: self.pipeline.stream_synthesis,
            },
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge a config file (if any), environment overrides and defaults
fn resolve(
    config_path: Option<PathBuf>,
    env: EnvOverrides,
    default_home: PathBuf,
) -> Result<ResolvedConfig> {
    let file = match config_path {
        Some(ref path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    // .advisors/ and the project root above it
    let config_dir = config_path
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new("."));
    let base_dir = config_dir.parent().unwrap_or(Path::new("."));

    let home = if let Some(env_home) = env.home {
        PathBuf::from(env_home)
    } else if let Some(ref home_path) = file.paths.home {
        resolve_path(config_dir, home_path)
    } else {
        default_home
    };

    let workflows_dir = file
        .paths
        .workflows_dir
        .as_deref()
        .map(|p| resolve_path(base_dir, p))
        .unwrap_or_else(|| home.join("workflows"));

    let analysts_file = file
        .paths
        .analysts_file
        .as_deref()
        .map(|p| resolve_path(base_dir, p))
        .unwrap_or_else(|| home.join("analysts.yaml"));

    let reference_data = file
        .paths
        .reference_data
        .as_deref()
        .map(|p| resolve_path(base_dir, p));
    let history = file.paths.history.as_deref().map(|p| resolve_path(base_dir, p));

    let anthropic = AnthropicConfig::default();
    let reasoning = ReasoningSettings {
        model: env
            .model
            .or(file.reasoning.model)
            .unwrap_or(anthropic.model),
        base_url: env
            .base_url
            .or(file.reasoning.base_url)
            .unwrap_or(anthropic.base_url),
        max_tokens: file.reasoning.max_tokens.unwrap_or(anthropic.max_tokens),
        request_timeout_secs: file
            .reasoning
            .request_timeout_secs
            .unwrap_or(anthropic.request_timeout.as_secs()),
        api_key: env.api_key,
    };

    let defaults = PipelineSettings::default();
    let pipeline = PipelineSettings {
        synthesis_timeout_ms: file
            .pipeline
            .synthesis_timeout_ms
            .unwrap_or(defaults.synthesis_timeout_ms),
        stream_synthesis: file
            .pipeline
            .stream_synthesis
            .unwrap_or(defaults.stream_synthesis),
    };

    Ok(ResolvedConfig {
        home,
        workflows_dir,
        analysts_file,
        reference_data,
        history,
        reasoning,
        pipeline,
        pricing: file.pricing.unwrap_or_default(),
        config_file: config_path,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    resolve(find_config_file(), EnvOverrides::from_env(), default_home)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}
