/// Compilation/Interpretation Pipeline
///
/// Unifies compiled and interpreted languages behind one contract:
/// `execute(source, language, stdin) -> ExecutionOutcome`.
///
/// Split into `prepare` (materialize + compile once) and
/// `PreparedProgram::run` (execute many times) so the orchestrator can
/// reuse one build across test cases.
use crate::registry::{LanguageRegistry, RunnerSpec};
use crate::sandbox::{Sandbox, SandboxOutput, SandboxRequest};
use crate::workspace::Workspace;
use arbiter_common::types::{ExecutionOutcome, ExitStatus, Verdict};
use arbiter_common::{EngineError, EngineResult};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// Safety limits to prevent pathological inputs from reaching a sandbox
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_STDIN_BYTES: usize = 10 * 1024 * 1024; // 10MB

/// Result of the build stage
pub enum Preparation {
    Ready(PreparedProgram),
    CompileFailed(ExecutionOutcome),
}

/// A materialized (and, if needed, compiled) submission ready to run.
/// Dropping it removes the workspace.
pub struct PreparedProgram {
    spec: Arc<RunnerSpec>,
    workspace: Workspace,
    sandbox: Arc<dyn Sandbox>,
    admission: Arc<Semaphore>,
    command: Vec<String>,
}

#[derive(Clone)]
pub struct Pipeline {
    registry: Arc<LanguageRegistry>,
    sandbox: Arc<dyn Sandbox>,
    workspace_root: PathBuf,
    admission: Arc<Semaphore>,
}

impl Pipeline {
    pub fn new(
        registry: Arc<LanguageRegistry>,
        sandbox: Arc<dyn Sandbox>,
        workspace_root: PathBuf,
        max_concurrent_sandboxes: usize,
    ) -> Self {
        Self {
            registry,
            sandbox,
            workspace_root,
            admission: Arc::new(Semaphore::new(max_concurrent_sandboxes.max(1))),
        }
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn sandbox_name(&self) -> &'static str {
        self.sandbox.name()
    }

    /// Sandbox slots currently free across all requests
    pub fn available_slots(&self) -> usize {
        self.admission.available_permits()
    }

    /// Materialize the source and build it when the language is compiled
    pub async fn prepare(&self, source_code: &str, language: &str) -> EngineResult<Preparation> {
        let spec = self.registry.resolve(language)?;
        if source_code.len() > MAX_SOURCE_CODE_BYTES {
            return Err(EngineError::SubmissionTooLarge {
                what: "source code",
                limit: MAX_SOURCE_CODE_BYTES,
            });
        }

        let workspace = Workspace::create(&self.workspace_root)?;
        workspace.write_file(&spec.source_file(), source_code).await?;

        if let Some(compile_command) = spec.compile_command() {
            let limits = spec.compile_limits();
            let output = run_admitted(
                &self.admission,
                self.sandbox.as_ref(),
                SandboxRequest {
                    command: &compile_command,
                    stdin: "",
                    workdir: workspace.path(),
                    image: &spec.image,
                    limits: &limits,
                    writable: true,
                },
            )
            .await?;

            let outcome = classify_compile(output, limits.time_limit);
            if !outcome.is_success() {
                info!(
                    language = %spec.name,
                    exit_status = %outcome.exit_status,
                    duration_ms = outcome.duration_ms,
                    "Compilation failed"
                );
                return Ok(Preparation::CompileFailed(outcome));
            }
            debug!(language = %spec.name, duration_ms = outcome.duration_ms, "Compiled");
        }

        Ok(Preparation::Ready(PreparedProgram {
            command: spec.run_command(),
            spec,
            workspace,
            sandbox: Arc::clone(&self.sandbox),
            admission: Arc::clone(&self.admission),
        }))
    }

    /// Prepare and run once; compile failures come back as an outcome
    pub async fn execute(
        &self,
        source_code: &str,
        language: &str,
        stdin: &str,
        time_limit: Option<Duration>,
    ) -> EngineResult<ExecutionOutcome> {
        check_stdin(stdin)?;
        match self.prepare(source_code, language).await? {
            Preparation::Ready(program) => program.run(stdin, time_limit).await,
            Preparation::CompileFailed(outcome) => Ok(outcome),
        }
    }
}

impl PreparedProgram {
    pub fn spec(&self) -> &RunnerSpec {
        &self.spec
    }

    /// Run the program once with the given stdin
    pub async fn run(&self, stdin: &str, time_limit: Option<Duration>) -> EngineResult<ExecutionOutcome> {
        check_stdin(stdin)?;
        let limits = self.spec.run_limits(time_limit);
        let output = run_admitted(
            &self.admission,
            self.sandbox.as_ref(),
            SandboxRequest {
                command: &self.command,
                stdin,
                workdir: self.workspace.path(),
                image: &self.spec.image,
                limits: &limits,
                writable: false,
            },
        )
        .await?;

        Ok(classify_run(output))
    }
}

fn check_stdin(stdin: &str) -> EngineResult<()> {
    if stdin.len() > MAX_STDIN_BYTES {
        return Err(EngineError::SubmissionTooLarge {
            what: "stdin",
            limit: MAX_STDIN_BYTES,
        });
    }
    Ok(())
}

async fn run_admitted(
    admission: &Semaphore,
    sandbox: &dyn Sandbox,
    request: SandboxRequest<'_>,
) -> EngineResult<SandboxOutput> {
    let _permit = admission
        .acquire()
        .await
        .map_err(|e| EngineError::SandboxFault(format!("Admission closed: {}", e)))?;
    sandbox.run(request).await
}

fn classify_compile(output: SandboxOutput, timeout: Duration) -> ExecutionOutcome {
    // javac and some toolchains report on stdout
    let mut diagnostics = if output.stderr.trim().is_empty() {
        output.stdout.clone()
    } else {
        output.stderr.clone()
    };

    let verdict = if output.timed_out {
        if !diagnostics.is_empty() && !diagnostics.ends_with('\n') {
            diagnostics.push('\n');
        }
        diagnostics.push_str(&format!("Compilation timed out after {}ms", timeout.as_millis()));
        Verdict::CompileError
    } else if output.exit_status.is_success() {
        Verdict::Ok
    } else {
        if diagnostics.trim().is_empty() {
            diagnostics = format!("Compilation failed ({})", output.exit_status);
        }
        Verdict::CompileError
    };

    let exit_status = match (verdict, output.exit_status) {
        (Verdict::Ok, status) => status,
        (_, ExitStatus::Exited { code }) => ExitStatus::CompileFailed { code },
        (_, _) => ExitStatus::CompileFailed { code: -1 },
    };

    ExecutionOutcome {
        stdout: String::new(),
        stderr: diagnostics,
        exit_status,
        timed_out: output.timed_out,
        duration_ms: output.duration_ms,
        verdict,
        output_truncated: output.output_truncated,
    }
}

fn classify_run(output: SandboxOutput) -> ExecutionOutcome {
    let verdict = if output.timed_out {
        Verdict::TimeLimitExceeded
    } else if output.memory_exceeded {
        Verdict::MemoryLimitExceeded
    } else if output.output_truncated {
        Verdict::OutputTooLarge
    } else if !output.exit_status.is_success() {
        Verdict::RuntimeError
    } else {
        Verdict::Ok
    };

    ExecutionOutcome {
        stdout: output.stdout,
        stderr: output.stderr,
        exit_status: output.exit_status,
        timed_out: output.timed_out,
        duration_ms: output.duration_ms,
        verdict,
        output_truncated: output.output_truncated,
    }
}
