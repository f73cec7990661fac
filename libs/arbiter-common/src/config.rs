// Service configuration, read once at startup and passed down explicitly

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_BASE_PATH: &str = "/api";
pub const DEFAULT_LANGUAGES_PATH: &str = "config/languages.json";
pub const DEFAULT_CHALLENGE_STORE: &str = "file:config/challenges";

/// Which execution layer isolates submissions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxBackend {
    /// One hardened container per run (production)
    Docker,
    /// Local child process under rlimits; no network or filesystem isolation
    Process,
}

impl FromStr for SandboxBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "docker" => Ok(SandboxBackend::Docker),
            "process" | "local" => Ok(SandboxBackend::Process),
            other => bail!("Unknown sandbox backend '{}' (expected docker or process)", other),
        }
    }
}

/// Where challenges are read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// JSON file or directory of JSON files
    File(PathBuf),
    /// Redis URL; challenges live under `arbiter:challenge:{id}`
    Redis(String),
}

impl FromStr for StoreLocation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.starts_with("redis://") || s.starts_with("rediss://") {
            return Ok(StoreLocation::Redis(s.to_string()));
        }
        let path = s.strip_prefix("file:").unwrap_or(s);
        if path.is_empty() {
            bail!("Challenge store path is empty");
        }
        Ok(StoreLocation::File(PathBuf::from(path)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Engine-level knobs shared by the API and the CLI
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub backend: SandboxBackend,
    /// Parent directory for per-invocation workspaces
    pub workspace_root: PathBuf,
    /// Process-wide cap on sandbox runs in flight
    pub max_concurrent_sandboxes: usize,
    /// Test cases of one request executed concurrently
    pub max_parallel_tests: usize,
    pub request_deadline_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: SandboxBackend::Docker,
            workspace_root: std::env::temp_dir(),
            max_concurrent_sandboxes: 8,
            max_parallel_tests: 4,
            request_deadline_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: String,
    pub base_path: String,
    pub languages_path: PathBuf,
    pub challenge_store: StoreLocation,
    pub log_format: LogFormat,
    /// Allowed browser origins; `None` allows any
    pub cors_origins: Option<Vec<String>>,
    pub engine: EngineConfig,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = EngineConfig::default();

        let engine = EngineConfig {
            backend: match lookup("SANDBOX_BACKEND") {
                Some(v) => v.parse()?,
                None => defaults.backend,
            },
            workspace_root: lookup("WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            max_concurrent_sandboxes: parse_positive(
                &lookup,
                "MAX_CONCURRENT_SANDBOXES",
                defaults.max_concurrent_sandboxes,
            )?,
            max_parallel_tests: parse_positive(
                &lookup,
                "MAX_PARALLEL_TESTS",
                defaults.max_parallel_tests,
            )?,
            request_deadline_ms: parse_positive(
                &lookup,
                "REQUEST_DEADLINE_MS",
                defaults.request_deadline_ms,
            )?,
        };

        let base_path = normalize_base_path(
            &lookup("ARBITER_BASE_PATH").unwrap_or_else(|| DEFAULT_BASE_PATH.to_string()),
        );

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            bind_addr: lookup("ARBITER_BIND").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            base_path,
            languages_path: lookup("LANGUAGES_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LANGUAGES_PATH)),
            challenge_store: lookup("CHALLENGE_STORE")
                .unwrap_or_else(|| DEFAULT_CHALLENGE_STORE.to_string())
                .parse()
                .context("Invalid CHALLENGE_STORE")?,
            log_format,
            cors_origins: lookup("ARBITER_CORS_ORIGINS").and_then(|raw| parse_origins(&raw)),
            engine,
        })
    }
}

fn parse_positive<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + Default,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => {
            let value: T = raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid value for {}: {}", key, raw))?;
            if value <= T::default() {
                bail!("{} must be greater than zero", key);
            }
            Ok(value)
        }
    }
}

/// Comma separated origins; empty or `*` means any origin
fn parse_origins(raw: &str) -> Option<Vec<String>> {
    let origins: Vec<String> = raw
        .split(',')
        .map(|o| o.trim().trim_end_matches('/'))
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect();
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        None
    } else {
        Some(origins)
    }
}

/// "/api/" -> "/api", "api" -> "/api", "/" -> ""
fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}
