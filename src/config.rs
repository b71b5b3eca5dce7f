//! Configuration for neuromap.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (NEUROMAP_HOME, NEUROMAP_DB, FFMPEG_PATH,
//!    WHISPER_PATH and the API key variable, OPENAI_API_KEY by default)
//! 2. Config file (.neuromap/config.yaml)
//! 3. Defaults (~/.neuromap)
//!
//! Config file discovery:
//! - Searches current directory and parents for .neuromap/config.yaml
//! - Paths in the config file are relative to the .neuromap/ directory

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::{FfmpegTranscoder, OpenAiClient, OpenAiConfig, Transcriber, WhisperCli};
use crate::core::{Orchestrator, PipelineSettings, ProviderSet, RetryPolicy};
use crate::graph::LayoutConfig;
use crate::index::DEFAULT_CONTEXT_K;
use crate::ingest::normalizer::DEFAULT_MAX_CAPTURE_BYTES;
use crate::ingest::InboxConfig;
use crate::store::Database;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    #[serde(default)]
    pub layout: Option<LayoutConfig>,
    #[serde(default)]
    pub inbox: InboxSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .neuromap/)
    pub home: Option<String>,
    /// SQLite database file (relative to .neuromap/)
    pub database: Option<String>,
}

/// Which service turns captures into text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionBackend {
    #[default]
    Openai,
    WhisperCli,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    pub base_url: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
    pub transcription: Option<TranscriptionBackend>,
    pub transcription_model: Option<String>,
    pub vision_model: Option<String>,
    pub chat_model: Option<String>,
    pub embedding_model: Option<String>,
    pub whisper_path: Option<String>,
    pub whisper_model: Option<String>,
    pub whisper_language: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    pub required_retry: Option<RetryPolicy>,
    pub best_effort_retry: Option<RetryPolicy>,
    pub call_timeout_secs: Option<u64>,
    pub context_k: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NormalizerConfig {
    pub ffmpeg_path: Option<String>,
    pub max_capture_bytes: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboxSection {
    pub watch_path: Option<String>,
    pub owner_id: Option<String>,
    pub stability_delay_secs: Option<u64>,
    pub extensions: Option<Vec<String>>,
}

/// Provider settings after env overrides
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub openai: OpenAiConfig,
    /// Variable the API key was read from
    pub api_key_env: String,
    pub transcription: TranscriptionBackend,
    pub whisper_path: String,
    pub whisper_model: String,
    pub whisper_language: Option<String>,
    pub ffmpeg_path: String,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to neuromap home (engine state)
    pub home: PathBuf,
    /// SQLite database path
    pub database: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub providers: ProviderSettings,
    pub pipeline: PipelineSettings,
    pub layout: LayoutConfig,
    pub inbox: InboxConfig,
}

impl ResolvedConfig {
    /// Per-session event logs and blobs
    pub fn sessions_dir(&self) -> PathBuf {
        self.home.join("sessions")
    }

    /// Build the provider set the config selects
    pub fn build_providers(&self) -> ProviderSet {
        let settings = &self.providers;
        let openai = Arc::new(OpenAiClient::new(settings.openai.clone()));

        let transcriber: Arc<dyn Transcriber> = match settings.transcription {
            TranscriptionBackend::Openai => openai.clone(),
            TranscriptionBackend::WhisperCli => {
                let mut whisper = WhisperCli::new(&settings.whisper_path, &settings.whisper_model);
                if let Some(language) = &settings.whisper_language {
                    whisper = whisper.with_language(language);
                }
                Arc::new(whisper)
            }
        };

        ProviderSet {
            transcriber,
            language_model: openai.clone(),
            embedder: openai,
            transcoder: Arc::new(FfmpegTranscoder::new(&settings.ffmpeg_path)),
        }
    }

    /// Open the database and wire an orchestrator with the configured providers
    pub fn build_orchestrator(&self) -> Result<Orchestrator> {
        self.build_orchestrator_with(self.build_providers())
    }

    pub fn build_orchestrator_with(&self, providers: ProviderSet) -> Result<Orchestrator> {
        let sessions_dir = self.sessions_dir();
        std::fs::create_dir_all(&sessions_dir)
            .with_context(|| format!("Failed to create {}", sessions_dir.display()))?;
        if let Some(parent) = self.database.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let db = Database::open(&self.database)
            .with_context(|| format!("Failed to open database {}", self.database.display()))?;
        Ok(Orchestrator::new(db, sessions_dir, providers, self.pipeline.clone()))
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".neuromap").join("config.yaml");
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

/// Resolve a path that may be relative to the config file's directory
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

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".neuromap");

    let config_path = find_config_file();
    let file = match &config_path {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    Ok(resolve_config(
        file,
        config_path,
        default_home,
        |name| std::env::var(name).ok(),
    ))
}

/// Merge the file, environment and defaults. `env` looks up a variable.
fn resolve_config(
    file: ConfigFile,
    config_path: Option<PathBuf>,
    default_home: PathBuf,
    env: impl Fn(&str) -> Option<String>,
) -> ResolvedConfig {
    // relative paths in the file resolve against .neuromap/
    let base_dir = config_path
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf);
    let from_file = |value: &Option<String>| -> Option<PathBuf> {
        let value = value.as_deref()?;
        Some(match &base_dir {
            Some(base) => resolve_path(base, value),
            None => PathBuf::from(value),
        })
    };

    let home = env("NEUROMAP_HOME")
        .map(PathBuf::from)
        .or_else(|| from_file(&file.paths.home))
        .unwrap_or(default_home);

    let database = env("NEUROMAP_DB")
        .map(PathBuf::from)
        .or_else(|| from_file(&file.paths.database))
        .unwrap_or_else(|| home.join("neuromap.db"));

    let p = file.providers;
    let api_key_env = p.api_key_env.unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string());
    let defaults = OpenAiConfig::default();
    let openai = OpenAiConfig {
        base_url: p.base_url.unwrap_or(defaults.base_url),
        api_key: env(&api_key_env).filter(|k| !k.trim().is_empty()),
        transcription_model: p.transcription_model.unwrap_or(defaults.transcription_model),
        vision_model: p.vision_model.unwrap_or(defaults.vision_model),
        chat_model: p.chat_model.unwrap_or(defaults.chat_model),
        embedding_model: p.embedding_model.unwrap_or(defaults.embedding_model),
    };

    let providers = ProviderSettings {
        openai,
        api_key_env,
        transcription: p.transcription.unwrap_or_default(),
        whisper_path: env("WHISPER_PATH")
            .or(p.whisper_path)
            .unwrap_or_else(|| "whisper".to_string()),
        whisper_model: p.whisper_model.unwrap_or_else(|| "base".to_string()),
        whisper_language: p.whisper_language,
        ffmpeg_path: env("FFMPEG_PATH")
            .or(file.normalizer.ffmpeg_path)
            .unwrap_or_else(|| "ffmpeg".to_string()),
    };

    let pipeline = PipelineSettings {
        required_retry: file.pipeline.required_retry.unwrap_or_else(RetryPolicy::required),
        best_effort_retry: file
            .pipeline
            .best_effort_retry
            .unwrap_or_else(RetryPolicy::best_effort),
        call_timeout: Duration::from_secs(file.pipeline.call_timeout_secs.unwrap_or(60)),
        context_k: file.pipeline.context_k.unwrap_or(DEFAULT_CONTEXT_K),
        max_capture_bytes: file
            .normalizer
            .max_capture_bytes
            .unwrap_or(DEFAULT_MAX_CAPTURE_BYTES),
    };

    let mut inbox = InboxConfig::default();
    if let Some(path) = from_file(&file.inbox.watch_path) {
        inbox.watch_path = path;
    }
    if let Some(owner) = file.inbox.owner_id {
        inbox.owner_id = owner;
    }
    if let Some(delay) = file.inbox.stability_delay_secs {
        inbox.stability_delay_secs = delay;
    }
    if let Some(extensions) = file.inbox.extensions {
        inbox.extensions = extensions;
    }

    ResolvedConfig {
        home,
        database,
        config_file: config_path,
        providers,
        pipeline,
        layout: file.layout.unwrap_or_default(),
        inbox,
    }
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{e:#}")));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the neuromap home directory (engine state).
pub fn neuromap_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}
