// Language Runner Registry
// Maps language identifiers to execution strategies loaded from languages.json

use crate::sandbox::Limits;
use anyhow::{bail, Context, Result};
use arbiter_common::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A command with `{source}`, `{entry}` and `{memory_mb}` placeholders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn new(command: impl Into<String>, args: &[&str]) -> Self {
        Self {
            command: command.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Parse a whitespace separated command line ("g++ -O2 -o {entry} {source}")
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(|s| s.to_string());
        let command = parts.next()?;
        Some(Self {
            command,
            args: parts.collect(),
        })
    }

    pub fn render(&self, spec: &RunnerSpec) -> Vec<String> {
        let substitute = |s: &str| {
            s.replace("{source}", &spec.source_file())
                .replace("{entry}", &spec.entry)
                .replace("{memory_mb}", &spec.memory_limit_mb.to_string())
        };

        std::iter::once(&self.command)
            .chain(self.args.iter())
            .map(|part| substitute(part))
            .collect()
    }
}

/// Everything the pipeline needs to know to build and run one language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerSpec {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default = "default_version")]
    pub version: String,
    /// Container image used by the Docker sandbox
    pub image: String,
    pub file_extension: String,
    /// Source file stem; Java needs `Main`
    #[serde(default = "default_entry")]
    pub entry: String,
    #[serde(default)]
    pub compile: Option<CommandTemplate>,
    pub run: CommandTemplate,
    #[serde(default = "default_time_limit_ms")]
    pub time_limit_ms: u64,
    #[serde(default = "default_compile_timeout_ms")]
    pub compile_timeout_ms: u64,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,
    #[serde(default = "default_compile_memory_limit_mb")]
    pub compile_memory_limit_mb: u64,
    #[serde(default = "default_output_limit_bytes")]
    pub output_limit_bytes: usize,
    #[serde(default = "default_max_processes")]
    pub max_processes: u32,
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: f64,
}

fn default_version() -> String {
    "latest".to_string()
}

fn default_entry() -> String {
    "main".to_string()
}

fn default_time_limit_ms() -> u64 {
    2_000
}

fn default_compile_timeout_ms() -> u64 {
    15_000
}

fn default_memory_limit_mb() -> u64 {
    256
}

fn default_compile_memory_limit_mb() -> u64 {
    1024
}

fn default_output_limit_bytes() -> usize {
    64 * 1024
}

fn default_max_processes() -> u32 {
    64
}

fn default_cpu_limit() -> f64 {
    1.0
}

impl RunnerSpec {
    /// Minimal spec with default limits; used by `add-lang` and tests
    pub fn new(
        name: &str,
        image: &str,
        file_extension: &str,
        compile: Option<CommandTemplate>,
        run: CommandTemplate,
    ) -> Self {
        Self {
            name: name.to_string(),
            aliases: Vec::new(),
            version: default_version(),
            image: image.to_string(),
            file_extension: file_extension.to_string(),
            entry: default_entry(),
            compile,
            run,
            time_limit_ms: default_time_limit_ms(),
            compile_timeout_ms: default_compile_timeout_ms(),
            memory_limit_mb: default_memory_limit_mb(),
            compile_memory_limit_mb: default_compile_memory_limit_mb(),
            output_limit_bytes: default_output_limit_bytes(),
            max_processes: default_max_processes(),
            cpu_limit: default_cpu_limit(),
        }
    }

    pub fn source_file(&self) -> String {
        format!("{}{}", self.entry, self.file_extension)
    }

    pub fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }

    pub fn compile_command(&self) -> Option<Vec<String>> {
        self.compile.as_ref().map(|c| c.render(self))
    }

    pub fn run_command(&self) -> Vec<String> {
        self.run.render(self)
    }

    pub fn compile_limits(&self) -> Limits {
        Limits {
            time_limit: Duration::from_millis(self.compile_timeout_ms),
            memory_limit_mb: self.compile_memory_limit_mb,
            output_limit_bytes: self.output_limit_bytes,
            // compilers fork helpers (cc1, as, ld) and javac is heavily threaded
            max_processes: self.max_processes.max(128),
            cpu_limit: self.cpu_limit,
        }
    }

    /// Run limits, optionally overriding the language's default time limit
    pub fn run_limits(&self, time_limit: Option<Duration>) -> Limits {
        Limits {
            time_limit: time_limit.unwrap_or(Duration::from_millis(self.time_limit_ms)),
            memory_limit_mb: self.memory_limit_mb,
            output_limit_bytes: self.output_limit_bytes,
            max_processes: self.max_processes,
            cpu_limit: self.cpu_limit,
        }
    }

    fn validate(&self) -> EngineResult<()> {
        let fail = |msg: String| Err(EngineError::Config(format!("language '{}': {}", self.name, msg)));

        if self.name.trim().is_empty() {
            return Err(EngineError::Config("language name cannot be empty".to_string()));
        }
        if !self.file_extension.starts_with('.') || self.file_extension.len() < 2 {
            return fail(format!("invalid file extension '{}'", self.file_extension));
        }
        if self.entry.is_empty() || self.entry.contains('/') {
            return fail(format!("invalid entry name '{}'", self.entry));
        }
        if self.run.command.is_empty() {
            return fail("run command cannot be empty".to_string());
        }
        if matches!(&self.compile, Some(c) if c.command.is_empty()) {
            return fail("compile command cannot be empty".to_string());
        }
        if self.time_limit_ms == 0 || self.compile_timeout_ms == 0 {
            return fail("time limits must be greater than zero".to_string());
        }
        if self.memory_limit_mb == 0 || self.output_limit_bytes == 0 || self.max_processes == 0 {
            return fail("resource limits must be greater than zero".to_string());
        }
        if self.cpu_limit <= 0.0 {
            return fail("cpu limit must be greater than zero".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LanguagesFile {
    pub languages: Vec<RunnerSpec>,
}

/// Registry of configured languages.
/// This is the authoritative source for which languages can be evaluated.
#[derive(Debug, Clone, Default)]
pub struct LanguageRegistry {
    specs: BTreeMap<String, Arc<RunnerSpec>>,
    aliases: HashMap<String, String>,
}

impl LanguageRegistry {
    pub fn from_specs(specs: impl IntoIterator<Item = RunnerSpec>) -> EngineResult<Self> {
        let mut registry = Self::default();
        for spec in specs {
            registry.register(spec)?;
        }
        Ok(registry)
    }

    /// python, c, cpp and java with the official toolchain images
    pub fn builtin() -> Self {
        let mut python = RunnerSpec::new(
            "python",
            "python:3.12-slim",
            ".py",
            None,
            CommandTemplate::new("python3", &["-B", "{source}"]),
        );
        python.version = "3.12".to_string();
        python.aliases = vec!["py".to_string(), "python3".to_string()];
        python.time_limit_ms = 5_000;

        let mut c = RunnerSpec::new(
            "c",
            "gcc:13",
            ".c",
            Some(CommandTemplate::new(
                "gcc",
                &["-O2", "-std=c17", "-o", "{entry}", "{source}", "-lm"],
            )),
            CommandTemplate::new("./{entry}", &[]),
        );
        c.version = "13".to_string();

        let mut cpp = RunnerSpec::new(
            "cpp",
            "gcc:13",
            ".cpp",
            Some(CommandTemplate::new(
                "g++",
                &["-O2", "-std=c++17", "-o", "{entry}", "{source}"],
            )),
            CommandTemplate::new("./{entry}", &[]),
        );
        cpp.version = "13".to_string();
        cpp.aliases = vec!["c++".to_string(), "cxx".to_string()];

        let mut java = RunnerSpec::new(
            "java",
            "eclipse-temurin:21-jdk",
            ".java",
            Some(CommandTemplate::new("javac", &["-encoding", "UTF-8", "{source}"])),
            CommandTemplate::new(
                "java",
                &["-XX:+UseSerialGC", "-XX:MaxRAMPercentage=75", "-Xss64m", "-cp", ".", "{entry}"],
            ),
        );
        java.version = "21".to_string();
        java.entry = "Main".to_string();
        java.time_limit_ms = 5_000;
        java.memory_limit_mb = 512;
        java.max_processes = 128;
        java.compile_timeout_ms = 30_000;

        let mut registry = Self::default();
        for spec in [python, c, cpp, java] {
            if let Err(e) = registry.register(spec) {
                warn!(error = %e, "Skipping invalid built-in language");
            }
        }
        registry
    }

    /// Load language configurations from a languages.json file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let file: LanguagesFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        if file.languages.is_empty() {
            bail!("No languages configured in {}", config_path.display());
        }

        let registry = Self::from_specs(file.languages)?;
        info!(path = %config_path.display(), languages = ?registry.names(), "Loaded language registry");
        Ok(registry)
    }

    /// Load from file when present, otherwise fall back to the built-in table
    pub fn load_or_builtin(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            Self::load(config_path)
        } else {
            warn!(
                path = %config_path.display(),
                "Language config not found, using built-in languages"
            );
            Ok(Self::builtin())
        }
    }

    /// Add a language; names and aliases must be unique
    pub fn register(&mut self, spec: RunnerSpec) -> EngineResult<()> {
        spec.validate()?;

        let name = spec.name.to_lowercase();
        let mut keys = vec![name.clone()];
        keys.extend(spec.aliases.iter().map(|a| a.to_lowercase()));

        for key in &keys {
            if self.specs.contains_key(key) || self.aliases.contains_key(key) {
                return Err(EngineError::Config(format!(
                    "language identifier '{}' is already registered",
                    key
                )));
            }
        }

        for alias in keys.iter().skip(1) {
            self.aliases.insert(alias.clone(), name.clone());
        }
        self.specs.insert(name, Arc::new(spec));
        Ok(())
    }

    /// Resolve a language identifier (case-insensitive, alias-aware)
    pub fn resolve(&self, language: &str) -> EngineResult<Arc<RunnerSpec>> {
        let key = language.trim().to_lowercase();
        let canonical = self.aliases.get(&key).unwrap_or(&key);
        self.specs
            .get(canonical)
            .cloned()
            .ok_or_else(|| EngineError::UnsupportedLanguage(language.to_string()))
    }

    pub fn is_supported(&self, language: &str) -> bool {
        self.resolve(language).is_ok()
    }

    /// All languages sorted by name
    pub fn languages(&self) -> Vec<Arc<RunnerSpec>> {
        self.specs.values().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.specs.keys().cloned().collect()
    }
}
