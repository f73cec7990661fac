// CLI commands for managing Arbiter
use anyhow::{anyhow, bail, Context, Result};
use arbiter_common::config::{EngineConfig, SandboxBackend};
use arbiter_common::store::{ChallengeStore, MemoryChallengeStore};
use arbiter_common::types::{Action, Submission};
use arbiter_engine::registry::LanguagesFile;
use arbiter_engine::{build_orchestrator, CommandTemplate, Evaluation, LanguageRegistry, RunnerSpec};
use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Load languages.json, starting from the built-in table when absent
fn load_languages_file(config_path: &Path) -> Result<LanguagesFile> {
    if !config_path.exists() {
        let languages = LanguageRegistry::builtin()
            .languages()
            .iter()
            .map(|spec| spec.as_ref().clone())
            .collect();
        return Ok(LanguagesFile { languages });
    }

    let content = fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", config_path.display()))
}

fn save_languages_file(config_path: &Path, file: &LanguagesFile) -> Result<()> {
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json_content =
        serde_json::to_string_pretty(file).context("Failed to serialize languages.json")?;
    fs::write(config_path, json_content)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    Ok(())
}

pub struct NewLanguage<'a> {
    pub name: &'a str,
    pub ext: &'a str,
    pub version: &'a str,
    pub image: &'a str,
    pub entry: &'a str,
    pub compile: Option<&'a str>,
    pub run: &'a str,
    pub aliases: Vec<String>,
    pub time_limit_ms: u64,
    pub memory_limit_mb: u64,
}

pub fn build_spec(lang: NewLanguage<'_>) -> Result<RunnerSpec> {
    if lang.name.is_empty() || lang.ext.is_empty() {
        bail!("Language name and extension cannot be empty");
    }

    let file_extension = if lang.ext.starts_with('.') {
        lang.ext.to_string()
    } else {
        format!(".{}", lang.ext)
    };

    let run = CommandTemplate::parse(lang.run).ok_or_else(|| anyhow!("Run command cannot be empty"))?;
    let compile = match lang.compile {
        Some(line) => {
            Some(CommandTemplate::parse(line).ok_or_else(|| anyhow!("Compile command cannot be empty"))?)
        }
        None => None,
    };

    let mut spec = RunnerSpec::new(lang.name, lang.image, &file_extension, compile, run);
    spec.name = lang.name.to_lowercase();
    spec.version = lang.version.to_string();
    spec.entry = lang.entry.to_string();
    spec.aliases = lang.aliases.into_iter().filter(|a| !a.is_empty()).collect();
    spec.time_limit_ms = lang.time_limit_ms;
    spec.memory_limit_mb = lang.memory_limit_mb;
    Ok(spec)
}

/// Add a new language to languages.json
pub fn add_language(config_path: &Path, spec: RunnerSpec) -> Result<()> {
    println!("🚀 Adding language: {}", spec.name);

    let mut file = load_languages_file(config_path)?;

    // Registering the whole set validates the entry and rejects duplicates
    let mut candidate = file.languages.clone();
    candidate.push(spec.clone());
    LanguageRegistry::from_specs(candidate)?;

    println!("📝 Updating {}...", config_path.display());
    file.languages.push(spec.clone());
    save_languages_file(config_path, &file)?;

    println!("✅ Language '{}' added successfully!", spec.name);
    println!("\n📋 Next steps:");
    println!("  1. Pull the image: docker pull {}", spec.image);
    println!("  2. Restart the API to pick up the new language");
    Ok(())
}

/// Remove a language from languages.json
pub fn remove_language(config_path: &Path, name: &str, yes: bool) -> Result<()> {
    println!("🗑️  Removing language: {}", name);

    let mut file = load_languages_file(config_path)?;
    let index = file
        .languages
        .iter()
        .position(|l| l.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| anyhow!("Language '{}' not found in {}", name, config_path.display()))?;

    if !yes {
        print!("⚠️  This will remove '{}' from {}\n", name, config_path.display());
        print!("\nContinue? (y/N): ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("❌ Aborted");
            return Ok(());
        }
    }

    file.languages.remove(index);
    if file.languages.is_empty() {
        bail!("Refusing to remove the last configured language");
    }
    save_languages_file(config_path, &file)?;

    println!("✅ Language '{}' removed successfully!", name);
    Ok(())
}

/// List all configured languages
pub fn list_languages(config_path: &Path) -> Result<()> {
    let registry = LanguageRegistry::load_or_builtin(config_path)?;

    println!("📋 Configured Languages:\n");
    println!(
        "{:<10} {:<10} {:<26} {:<9} {:<10} {:<10}",
        "Name", "Version", "Image", "Compiled", "Time", "Memory"
    );
    println!("{}", "─".repeat(80));

    for lang in registry.languages() {
        println!(
            "{:<10} {:<10} {:<26} {:<9} {:<10} {} MB",
            lang.name,
            lang.version,
            lang.image,
            if lang.is_compiled() { "yes" } else { "no" },
            format!("{}ms", lang.time_limit_ms),
            lang.memory_limit_mb
        );
    }

    println!("\n✅ Total: {} language(s)", registry.languages().len());
    Ok(())
}

pub struct EvalArgs<'a> {
    pub languages_path: &'a Path,
    pub store: &'a Path,
    pub challenge_id: &'a str,
    pub language: &'a str,
    pub source: &'a Path,
    pub action: Action,
    pub input: Option<String>,
    pub backend: SandboxBackend,
}

/// Evaluate a source file locally and print the result as JSON
pub async fn evaluate(args: EvalArgs<'_>) -> Result<()> {
    let registry = LanguageRegistry::load_or_builtin(args.languages_path)?;
    let store = MemoryChallengeStore::load(args.store)?;
    let challenge = store.get(args.challenge_id).await?;

    let source_code = fs::read_to_string(args.source)
        .with_context(|| format!("Failed to read {}", args.source.display()))?;

    let config = EngineConfig {
        backend: args.backend,
        ..EngineConfig::default()
    };
    let orchestrator = build_orchestrator(&config, registry)?;

    let mut submission = Submission::new(args.challenge_id, args.language, source_code);
    if let Some(input) = args.input {
        submission = submission.with_stdin(input);
    }

    let evaluation = orchestrator
        .evaluate(args.action, &submission, &challenge.test_cases)
        .await?;

    let json = match &evaluation {
        Evaluation::Compile(outcome) => serde_json::json!({ "result": outcome }),
        Evaluation::Visible(summary) | Evaluation::Hidden(summary) => serde_json::json!({
            "summary": summary.summary_line(),
            "totalCases": summary.total_cases(),
            "passedCases": summary.passed_cases(),
            "results": summary.results(),
        }),
    };
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

/// Store every challenge in a JSON file under `arbiter:challenge:{id}`
pub async fn seed_challenges(file: &Path, redis_url: &str) -> Result<()> {
    let store = MemoryChallengeStore::load(file)?;
    if store.is_empty() {
        bail!("No challenges found in {}", file.display());
    }

    let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
    let mut conn = redis::aio::ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;

    for challenge in store.challenges() {
        arbiter_common::redis::store_challenge(&mut conn, challenge)
            .await
            .with_context(|| format!("Failed to store challenge '{}'", challenge.id))?;
        println!("  ✅ {} ({} test cases)", challenge.id, challenge.test_cases.len());
    }

    println!("\n✅ Seeded {} challenge(s) into {}", store.len(), redis_url);
    Ok(())
}
