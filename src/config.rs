//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory
//! (or an explicit path), then applies `BUDDI_WORK_DIR`, `BUDDI_LOG_LEVEL`,
//! `BUDDI_BIND` and `OLLAMA_API_URL` env overrides.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;
use crate::logger;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address the HTTP server binds to.
    pub bind: String,
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// SQLite database file (already resolved against `work_dir`).
    pub db_path: PathBuf,
}

/// Ollama provider configuration, from `[llm.ollama]`.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Base URL of the Ollama server; `/api/generate` is appended per request.
    pub api_base_url: String,
    pub temperature: f32,
    pub top_p: f32,
}

/// Dummy provider configuration, from `[llm.dummy]`.
#[derive(Debug, Clone, Default)]
pub struct DummyConfig {
    /// Fixed reply. `None` echoes the prompt back.
    pub reply: Option<String>,
}

/// Model client configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Active provider (`"ollama"` or `"dummy"`). Maps to `default` in `[llm]`.
    pub provider: String,
    /// Overrides the built-in system prompt when set.
    pub system_prompt: Option<String>,
    pub ollama: OllamaConfig,
    pub dummy: DummyConfig,
}

/// Fully-resolved application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Working directory for persistent data (already expanded, no `~`).
    pub work_dir: PathBuf,
    pub log_level: String,
    /// Optional log file (resolved against `work_dir`); stderr when `None`.
    pub log_file: Option<PathBuf>,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub llm: LlmConfig,
}

/// Values that take precedence over the TOML file.
///
/// [`load`] fills these from the environment; tests construct them directly
/// instead of mutating env vars.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub work_dir: Option<String>,
    pub log_level: Option<String>,
    pub bind: Option<String>,
    pub ollama_url: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        Self {
            work_dir: env::var("BUDDI_WORK_DIR").ok(),
            log_level: env::var("BUDDI_LOG_LEVEL").ok(),
            bind: env::var("BUDDI_BIND").ok(),
            ollama_url: env::var("OLLAMA_API_URL").ok().filter(|s| !s.is_empty()),
        }
    }
}

// ── Raw TOML shape ────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    app: RawApp,
    #[serde(default)]
    server: RawServer,
    #[serde(default)]
    storage: RawStorage,
    #[serde(default)]
    llm: RawLlm,
}

#[derive(Deserialize)]
struct RawApp {
    #[serde(default = "default_work_dir")]
    work_dir: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    log_file: Option<String>,
}

impl Default for RawApp {
    fn default() -> Self {
        Self { work_dir: default_work_dir(), log_level: default_log_level(), log_file: None }
    }
}

#[derive(Deserialize)]
struct RawServer {
    #[serde(default = "default_bind")]
    bind: String,
}

impl Default for RawServer {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

#[derive(Deserialize)]
struct RawStorage {
    #[serde(default = "default_db_file")]
    db_file: String,
}

impl Default for RawStorage {
    fn default() -> Self {
        Self { db_file: default_db_file() }
    }
}

#[derive(Deserialize)]
struct RawLlm {
    #[serde(rename = "default", default = "default_llm_provider")]
    provider: String,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    ollama: RawOllama,
    #[serde(default)]
    dummy: RawDummy,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            system_prompt: None,
            ollama: RawOllama::default(),
            dummy: RawDummy::default(),
        }
    }
}

#[derive(Deserialize)]
struct RawOllama {
    #[serde(default = "default_ollama_url")]
    api_base_url: String,
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(default = "default_top_p")]
    top_p: f32,
}

impl Default for RawOllama {
    fn default() -> Self {
        Self {
            api_base_url: default_ollama_url(),
            temperature: default_temperature(),
            top_p: default_top_p(),
        }
    }
}

#[derive(Deserialize, Default)]
struct RawDummy {
    #[serde(default)]
    reply: Option<String>,
}

fn default_work_dir() -> String { ".".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_bind() -> String { "127.0.0.1:3000".to_string() }
fn default_db_file() -> String { "workout-buddi.db".to_string() }
fn default_llm_provider() -> String { "ollama".to_string() }
fn default_ollama_url() -> String { "http://localhost:11434".to_string() }
fn default_temperature() -> f32 { 0.7 }
fn default_top_p() -> f32 { 0.9 }

/// Load config from `path` (or `config/default.toml`), then apply env-var overrides.
pub fn load(path: Option<&Path>) -> Result<Config, AppError> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
    load_from(path, &Overrides::from_env())
}

/// Testable loader; accepts an explicit path and overrides.
pub fn load_from(path: &Path, overrides: &Overrides) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    resolve(parsed, overrides)
}

fn resolve(parsed: RawConfig, overrides: &Overrides) -> Result<Config, AppError> {
    let work_dir = expand_home(overrides.work_dir.as_deref().unwrap_or(&parsed.app.work_dir));
    let log_level = overrides
        .log_level
        .clone()
        .unwrap_or(parsed.app.log_level);
    logger::parse_level(&log_level)?;

    let api_base_url = overrides
        .ollama_url
        .clone()
        .unwrap_or(parsed.llm.ollama.api_base_url)
        .trim_end_matches('/')
        .to_string();
    if api_base_url.is_empty() {
        return Err(AppError::Config("llm.ollama.api_base_url must not be empty".into()));
    }

    let system_prompt = parsed
        .llm
        .system_prompt
        .filter(|s| !s.trim().is_empty());

    Ok(Config {
        log_file: parsed.app.log_file.map(|f| resolve_in(&work_dir, &f)),
        storage: StorageConfig { db_path: resolve_in(&work_dir, &parsed.storage.db_file) },
        work_dir,
        log_level,
        server: ServerConfig {
            bind: overrides.bind.clone().unwrap_or(parsed.server.bind),
        },
        llm: LlmConfig {
            provider: parsed.llm.provider,
            system_prompt,
            ollama: OllamaConfig {
                api_base_url,
                temperature: parsed.llm.ollama.temperature,
                top_p: parsed.llm.ollama.top_p,
            },
            dummy: DummyConfig { reply: parsed.llm.dummy.reply },
        },
    })
}

/// Absolute paths are kept; relative ones are joined onto `work_dir`.
fn resolve_in(work_dir: &Path, file: &str) -> PathBuf {
    let p = expand_home(file);
    if p.is_absolute() { p } else { work_dir.join(p) }
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

impl Config {
    /// Config for tests: dummy provider with a fixed reply, no external calls.
    pub fn test_default(work_dir: &Path, reply: Option<&str>) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            log_level: "info".into(),
            log_file: None,
            server: ServerConfig { bind: "127.0.0.1:0".into() },
            storage: StorageConfig { db_path: work_dir.join("test.db") },
            llm: LlmConfig {
                provider: "dummy".into(),
                system_prompt: None,
                ollama: OllamaConfig {
                    api_base_url: "http://localhost:0".into(),
                    temperature: 0.0,
                    top_p: 1.0,
                },
                dummy: DummyConfig { reply: reply.map(str::to_string) },
            },
        }
    }
}
