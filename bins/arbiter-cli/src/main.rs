mod commands;

use anyhow::Result;
use arbiter_common::config::{SandboxBackend, DEFAULT_LANGUAGES_PATH};
use arbiter_common::types::Action;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arbiter-cli")]
#[command(about = "Arbiter CLI - Manage languages, seed challenges and evaluate locally", long_about = None)]
struct Cli {
    /// Path to languages.json
    #[arg(long, global = true, default_value = DEFAULT_LANGUAGES_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a new programming language
    AddLang {
        /// Language name (e.g., ruby, go)
        #[arg(short, long)]
        name: String,

        /// File extension (e.g., rb, .go)
        #[arg(short, long)]
        ext: String,

        /// Language version (e.g., 3.3, 1.22)
        #[arg(short, long, default_value = "latest")]
        version: String,

        /// Docker image containing the toolchain
        #[arg(short, long)]
        image: String,

        /// Source file stem
        #[arg(long, default_value = "main")]
        entry: String,

        /// Compile command line, e.g. "go build -o {entry} {source}"
        #[arg(long)]
        compile: Option<String>,

        /// Run command line, e.g. "ruby {source}"
        #[arg(short, long)]
        run: String,

        /// Comma separated aliases
        #[arg(long, value_delimiter = ',')]
        aliases: Vec<String>,

        /// Time limit per run in milliseconds
        #[arg(long, default_value = "2000")]
        time_ms: u64,

        /// Memory limit in MB
        #[arg(short, long, default_value = "256")]
        memory: u64,
    },

    /// Remove a language
    RemoveLang {
        #[arg(short, long)]
        name: String,

        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// List configured languages
    ListLangs,

    /// Evaluate a source file against a challenge locally
    Eval {
        /// Challenge id
        #[arg(long)]
        challenge: String,

        /// Challenge JSON file or directory
        #[arg(long, default_value = "config/challenges")]
        store: PathBuf,

        #[arg(short, long)]
        language: String,

        /// Source file to evaluate
        #[arg(short, long)]
        source: PathBuf,

        #[arg(short, long, default_value = "visible")]
        action: Action,

        /// Custom stdin for the compile action
        #[arg(long)]
        input: Option<String>,

        #[arg(long, default_value = "docker")]
        backend: SandboxBackend,
    },

    /// Store challenges from a JSON file in Redis
    SeedChallenge {
        #[arg(short, long)]
        file: PathBuf,

        #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
        redis_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::AddLang {
            name,
            ext,
            version,
            image,
            entry,
            compile,
            run,
            aliases,
            time_ms,
            memory,
        } => {
            let spec = commands::build_spec(commands::NewLanguage {
                name: &name,
                ext: &ext,
                version: &version,
                image: &image,
                entry: &entry,
                compile: compile.as_deref(),
                run: &run,
                aliases,
                time_limit_ms: time_ms,
                memory_limit_mb: memory,
            })?;
            commands::add_language(&cli.config, spec)?;
        }
        Commands::RemoveLang { name, yes } => {
            commands::remove_language(&cli.config, &name, yes)?;
        }
        Commands::ListLangs => {
            commands::list_languages(&cli.config)?;
        }
        Commands::Eval {
            challenge,
            store,
            language,
            source,
            action,
            input,
            backend,
        } => {
            commands::evaluate(commands::EvalArgs {
                languages_path: &cli.config,
                store: &store,
                challenge_id: &challenge,
                language: &language,
                source: &source,
                action,
                input,
                backend,
            })
            .await?;
        }
        Commands::SeedChallenge { file, redis_url } => {
            commands::seed_challenges(&file, &redis_url).await?;
        }
    }

    Ok(())
}
