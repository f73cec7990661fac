// Local process sandbox: the command runs as a child process in its own
// process group under rlimits. There is no filesystem or network isolation,
// so this backend is meant for development and tests only. Memory overruns
// surface as allocation failures (runtime errors), not as a distinct verdict.

use super::{CappedBuffer, Limits, Sandbox, SandboxOutput, SandboxRequest};
use arbiter_common::types::ExitStatus;
use arbiter_common::{EngineError, EngineResult};
use async_trait::async_trait;
use nix::libc;
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{setpgid, Pid};
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tracing::{debug, warn};

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
const MAX_FILE_SIZE_BYTES: u64 = 64 * 1024 * 1024;
const REAP_GRACE: Duration = Duration::from_secs(2);
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Default, Clone)]
pub struct ProcessSandbox;

impl ProcessSandbox {
    pub fn new() -> Self {
        Self
    }
}

/// Limits installed in the child between fork and exec
#[derive(Debug, Clone, Copy)]
struct RlimitPlan {
    address_space: u64,
    cpu_seconds: u64,
}

impl RlimitPlan {
    fn from_limits(limits: &Limits) -> Self {
        Self {
            address_space: limits.memory_limit_mb.saturating_mul(1024 * 1024),
            cpu_seconds: limits.time_limit.as_secs_f64().ceil().max(1.0) as u64,
        }
    }

    /// Runs in the forked child: only async-signal-safe calls allowed
    fn apply(&self) -> std::io::Result<()> {
        setpgid(Pid::from_raw(0), Pid::from_raw(0))?;
        setrlimit(
            Resource::RLIMIT_AS,
            self.address_space as libc::rlim_t,
            self.address_space as libc::rlim_t,
        )?;
        setrlimit(
            Resource::RLIMIT_CPU,
            self.cpu_seconds as libc::rlim_t,
            (self.cpu_seconds + 1) as libc::rlim_t,
        )?;
        setrlimit(
            Resource::RLIMIT_FSIZE,
            MAX_FILE_SIZE_BYTES as libc::rlim_t,
            MAX_FILE_SIZE_BYTES as libc::rlim_t,
        )?;
        setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
        Ok(())
    }
}

/// Kills the child's whole process group on drop
struct ProcessGroup {
    pgid: Option<Pid>,
}

impl ProcessGroup {
    fn kill(&self) {
        if let Some(pgid) = self.pgid {
            // ESRCH just means everything already exited
            let _ = killpg(pgid, Signal::SIGKILL);
        }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

async fn feed_stdin(stdin: Option<ChildStdin>, input: &[u8]) {
    if let Some(mut stdin) = stdin {
        // Broken pipe is expected when the program ignores its input
        let _ = stdin.write_all(input).await;
        let _ = stdin.shutdown().await;
    }
}

async fn drain<R: AsyncRead + Unpin>(
    reader: Option<R>,
    buffer: &mut CappedBuffer,
    group: &ProcessGroup,
) {
    let Some(mut reader) = reader else { return };
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if !buffer.push(&chunk[..n]) {
                    group.kill();
                    break;
                }
            }
        }
    }
}

/// Relative programs with a path component resolve against the workspace
fn resolve_program(program: &str, workdir: &Path) -> std::path::PathBuf {
    let path = Path::new(program);
    if path.is_relative() && program.contains('/') {
        workdir.join(path)
    } else {
        path.to_path_buf()
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn run(&self, request: SandboxRequest<'_>) -> EngineResult<SandboxOutput> {
        let (program, args) = request
            .command
            .split_first()
            .ok_or_else(|| EngineError::SandboxFault("empty command".to_string()))?;
        let limits = request.limits;
        let plan = RlimitPlan::from_limits(limits);

        let mut command = Command::new(resolve_program(program, request.workdir));
        command
            .args(args)
            .current_dir(request.workdir)
            .env_clear()
            .env("PATH", DEFAULT_PATH)
            .env("HOME", request.workdir)
            .env("LANG", "C.UTF-8")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // SAFETY: the closure only performs setpgid/setrlimit syscalls
        unsafe {
            command.pre_exec(move || plan.apply());
        }

        let start_time = Instant::now();
        let mut child = command.spawn().map_err(|e| {
            EngineError::SandboxFault(format!("Failed to spawn '{}': {}", program, e))
        })?;
        let mut group = ProcessGroup {
            pgid: child.id().map(|id| Pid::from_raw(id as i32)),
        };

        let stdin = child.stdin.take();
        let child_stdout = child.stdout.take();
        let child_stderr = child.stderr.take();

        let mut stdout = CappedBuffer::new(limits.output_limit_bytes);
        let mut stderr = CappedBuffer::new(limits.output_limit_bytes);

        let (status, mut timed_out, duration_ms) = {
            let pipes = async {
                tokio::join!(
                    feed_stdin(stdin, request.stdin.as_bytes()),
                    drain(child_stdout, &mut stdout, &group),
                    drain(child_stderr, &mut stderr, &group),
                );
            };
            tokio::pin!(pipes);
            let watchdog = tokio::time::sleep(limits.time_limit);
            tokio::pin!(watchdog);

            // The run ends when the main process exits, not when the pipes close
            let mut pipes_closed = false;
            let exited = loop {
                tokio::select! {
                    _ = &mut pipes, if !pipes_closed => pipes_closed = true,
                    status = child.wait() => break Some(status),
                    _ = &mut watchdog => break None,
                }
            };
            let duration_ms = start_time.elapsed().as_millis() as u64;

            // Background descendants may still hold the pipes open
            group.kill();

            let (status, timed_out) = match exited {
                Some(status) => (
                    Some(status.map_err(|e| {
                        EngineError::SandboxFault(format!("Failed to wait for child: {}", e))
                    })?),
                    false,
                ),
                None => {
                    let reaped = tokio::time::timeout(REAP_GRACE, child.wait()).await;
                    if reaped.is_err() {
                        warn!(program, "Child did not exit after SIGKILL");
                    }
                    (reaped.ok().and_then(|r| r.ok()), true)
                }
            };

            if !pipes_closed && tokio::time::timeout(DRAIN_GRACE, &mut pipes).await.is_err() {
                warn!(program, "Output pipes still open after killing the process group");
            }
            (status, timed_out, duration_ms)
        };

        group.disarm();

        let exit_status = match status {
            Some(status) => match (status.code(), status.signal()) {
                (Some(code), _) => ExitStatus::Exited { code },
                (None, Some(signal)) => ExitStatus::Signaled { signal },
                (None, None) => ExitStatus::Unknown,
            },
            None => ExitStatus::Unknown,
        };

        // RLIMIT_CPU delivers SIGXCPU at the soft limit
        if exit_status == (ExitStatus::Signaled { signal: Signal::SIGXCPU as i32 }) {
            timed_out = true;
        }

        let output_truncated = stdout.truncated() || stderr.truncated();
        debug!(program, %exit_status, duration_ms, timed_out, output_truncated, "Process finished");

        Ok(SandboxOutput {
            stdout: stdout.into_string(),
            stderr: stderr.into_string(),
            exit_status,
            duration_ms,
            timed_out,
            memory_exceeded: false,
            output_truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(time_limit_ms: u64) -> Limits {
        Limits {
            time_limit: Duration::from_millis(time_limit_ms),
            memory_limit_mb: 256,
            output_limit_bytes: 4096,
            max_processes: 32,
            cpu_limit: 1.0,
        }
    }

    async fn run_sh(script: &str, stdin: &str, limits: &Limits) -> SandboxOutput {
        let dir = tempfile::tempdir().unwrap();
        let command = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        ProcessSandbox::new()
            .run(SandboxRequest {
                command: &command,
                stdin,
                workdir: dir.path(),
                image: "",
                limits,
                writable: true,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_echoes_stdin() {
        let out = run_sh("cat", "hello\nworld\n", &limits(2000)).await;
        assert_eq!(out.stdout, "hello\nworld\n");
        assert_eq!(out.exit_status, ExitStatus::Exited { code: 0 });
        assert!(!out.timed_out);
    }

    #[tokio::test]
    async fn test_captures_stderr_and_exit_code() {
        let out = run_sh("echo oops >&2; exit 3", "", &limits(2000)).await;
        assert_eq!(out.stderr, "oops\n");
        assert_eq!(out.exit_status, ExitStatus::Exited { code: 3 });
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out() {
        let started = Instant::now();
        let out = run_sh("while :; do :; done", "", &limits(500)).await;
        assert!(out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_sleeping_child_is_killed() {
        let out = run_sh("sleep 30", "", &limits(300)).await;
        assert!(out.timed_out);
    }

    #[tokio::test]
    async fn test_background_child_does_not_hold_the_run() {
        let started = Instant::now();
        let out = run_sh("echo hi; sleep 5 & exit 0", "", &limits(1000)).await;
        assert_eq!(out.stdout, "hi\n");
        assert_eq!(out.exit_status, ExitStatus::Exited { code: 0 });
        assert!(!out.timed_out);
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[test]
    fn test_rlimit_plan_saturates() {
        let mut huge = limits(1000);
        huge.memory_limit_mb = u64::MAX / 2;
        let plan = RlimitPlan::from_limits(&huge);
        assert_eq!(plan.address_space, u64::MAX);
        assert_eq!(plan.cpu_seconds, 1);
    }

    #[tokio::test]
    async fn test_output_cap() {
        let out = run_sh("yes", "", &limits(5000)).await;
        assert!(out.output_truncated);
        assert!(!out.timed_out);
        assert_eq!(out.stdout.len(), 4096);
    }

    #[tokio::test]
    async fn test_environment_is_cleared() {
        std::env::set_var("ARBITER_SECRET_FOR_TEST", "leak");
        let out = run_sh("echo \"[$ARBITER_SECRET_FOR_TEST]\"", "", &limits(2000)).await;
        assert_eq!(out.stdout, "[]\n");
    }

    #[tokio::test]
    async fn test_empty_command_is_a_fault() {
        let dir = tempfile::tempdir().unwrap();
        let limits = limits(1000);
        let err = ProcessSandbox::new()
            .run(SandboxRequest {
                command: &[],
                stdin: "",
                workdir: dir.path(),
                image: "",
                limits: &limits,
                writable: false,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "sandbox_fault");
    }

    #[tokio::test]
    async fn test_missing_program_is_a_fault() {
        let dir = tempfile::tempdir().unwrap();
        let limits = limits(1000);
        let command = vec!["./does-not-exist".to_string()];
        let result = ProcessSandbox::new()
            .run(SandboxRequest {
                command: &command,
                stdin: "",
                workdir: dir.path(),
                image: "",
                limits: &limits,
                writable: false,
            })
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_program() {
        let dir = Path::new("/tmp/ws");
        assert_eq!(resolve_program("./main", dir), Path::new("/tmp/ws/./main"));
        assert_eq!(resolve_program("python3", dir), Path::new("python3"));
        assert_eq!(resolve_program("/bin/sh", dir), Path::new("/bin/sh"));
    }
}
