/// Sandbox Executor - isolated execution of one command
///
/// A sandbox runs a single command inside a prepared workspace directory
/// with CPU time, memory, process and output limits, feeds it stdin and
/// captures stdout/stderr. It knows nothing about languages, test cases
/// or scoring; the pipeline decides what to run and how to classify it.
///
/// Two backends exist:
/// - `DockerSandbox`: one hardened, network-less container per command
/// - `ProcessSandbox`: a local child process under rlimits (development
///   and tests; no filesystem or network isolation)
pub mod docker;
pub mod process;

pub use docker::DockerSandbox;
pub use process::ProcessSandbox;

use anyhow::Result;
use arbiter_common::config::{EngineConfig, SandboxBackend};
use arbiter_common::types::ExitStatus;
use arbiter_common::EngineResult;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Resource limits applied to one sandboxed command
#[derive(Debug, Clone, PartialEq)]
pub struct Limits {
    /// Wall-clock watchdog; the CPU limit is derived from it
    pub time_limit: Duration,
    pub memory_limit_mb: u64,
    /// Cap per captured stream
    pub output_limit_bytes: usize,
    pub max_processes: u32,
    /// Fraction of CPUs available (Docker only)
    pub cpu_limit: f64,
}

/// One command to execute
#[derive(Debug, Clone, Copy)]
pub struct SandboxRequest<'a> {
    /// Program followed by its arguments, relative to `workdir`
    pub command: &'a [String],
    pub stdin: &'a str,
    pub workdir: &'a Path,
    /// Container image (ignored by the process backend)
    pub image: &'a str,
    pub limits: &'a Limits,
    /// Whether the command may write into the workspace (compile stage)
    pub writable: bool,
}

/// Raw result of one sandboxed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: ExitStatus,
    pub duration_ms: u64,
    pub timed_out: bool,
    pub memory_exceeded: bool,
    pub output_truncated: bool,
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Backend name for logs and metrics
    fn name(&self) -> &'static str;

    /// Run one command. Errors mean the sandbox itself failed, never that
    /// the program misbehaved.
    async fn run(&self, request: SandboxRequest<'_>) -> EngineResult<SandboxOutput>;
}

/// Build the sandbox selected by the configuration
pub fn from_config(config: &EngineConfig) -> Result<Arc<dyn Sandbox>> {
    match config.backend {
        SandboxBackend::Docker => Ok(Arc::new(DockerSandbox::connect()?)),
        SandboxBackend::Process => Ok(Arc::new(ProcessSandbox::new())),
    }
}

/// Byte buffer that stops accepting data past its capacity
#[derive(Debug)]
pub(crate) struct CappedBuffer {
    bytes: Vec<u8>,
    cap: usize,
    truncated: bool,
}

impl CappedBuffer {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            bytes: Vec::new(),
            cap,
            truncated: false,
        }
    }

    /// Append a chunk; returns false once the cap has been exceeded
    pub(crate) fn push(&mut self, chunk: &[u8]) -> bool {
        let room = self.cap.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.bytes.extend_from_slice(&chunk[..room]);
            self.truncated = true;
            return false;
        }
        self.bytes.extend_from_slice(chunk);
        true
    }

    pub(crate) fn truncated(&self) -> bool {
        self.truncated
    }

    pub(crate) fn into_string(self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capped_buffer_within_limit() {
        let mut buf = CappedBuffer::new(8);
        assert!(buf.push(b"abc"));
        assert!(buf.push(b"defgh"));
        assert!(!buf.truncated());
        assert_eq!(buf.into_string(), "abcdefgh");
    }

    #[test]
    fn test_capped_buffer_overflow() {
        let mut buf = CappedBuffer::new(4);
        assert!(buf.push(b"ab"));
        assert!(!buf.push(b"cdef"));
        assert!(buf.truncated());
        assert!(!buf.push(b"g"));
        assert_eq!(buf.into_string(), "abcd");
    }

    #[test]
    fn test_capped_buffer_lossy_utf8() {
        let mut buf = CappedBuffer::new(16);
        buf.push(&[0x68, 0x69, 0xff]);
        assert_eq!(buf.into_string(), "hi\u{fffd}");
    }
}
