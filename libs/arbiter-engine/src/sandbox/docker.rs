/// Docker sandbox - one hardened container per command
///
/// **Container Rules:**
/// 1. Pulls the language image if not present
/// 2. Creates the container with security constraints:
///    - No network
///    - Memory (no swap), CPU and pids limits
///    - Read-only root filesystem, small tmpfs at /tmp
///    - All capabilities dropped, no-new-privileges, unprivileged user
/// 3. Bind-mounts the workspace at /workspace (read-only for runs)
/// 4. Feeds stdin from a file in the workspace
/// 5. Captures stdout/stderr up to the output cap
/// 6. Kills the container on timeout or output overflow
/// 7. Removes the container on every exit path
use super::{CappedBuffer, Limits, Sandbox, SandboxOutput, SandboxRequest};
use anyhow::{Context, Result};
use arbiter_common::types::ExitStatus;
use arbiter_common::{EngineError, EngineResult};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, ResourcesUlimits};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

const WORKSPACE_MOUNT: &str = "/workspace";
const SANDBOX_USER: &str = "65534:65534";
const TMPFS_OPTIONS: &str = "rw,nosuid,nodev,size=64m";
const MAX_FILE_SIZE_BYTES: i64 = 64 * 1024 * 1024;

/// Container cleanup guard - guarantees container removal on drop,
/// including when the evaluation future is cancelled
struct ContainerGuard<'a> {
    docker: &'a Docker,
    container_id: String,
}

impl<'a> ContainerGuard<'a> {
    fn new(docker: &'a Docker, container_id: String) -> Self {
        Self { docker, container_id }
    }
}

impl Drop for ContainerGuard<'_> {
    fn drop(&mut self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(container = %self.container_id, "No runtime available to remove container");
            return;
        };
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();

        handle.spawn(async move {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            if let Err(e) = docker.remove_container(&container_id, Some(options)).await {
                warn!(container = %container_id, error = %e, "Failed to remove container");
            }
        });
    }
}

/// Stdin payload written into the workspace for one run
struct StdinFile {
    path: PathBuf,
    name: String,
}

impl StdinFile {
    async fn write(workdir: &Path, contents: &str) -> EngineResult<Self> {
        let name = format!(".stdin-{}", uuid::Uuid::new_v4());
        let path = workdir.join(&name);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| EngineError::SandboxFault(format!("Failed to write stdin file: {}", e)))?;
        Ok(Self { path, name })
    }
}

impl Drop for StdinFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

pub struct DockerSandbox {
    docker: Docker,
}

impl DockerSandbox {
    pub fn connect() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;
        Ok(Self { docker })
    }

    /// Ensure the image is available, pulling it on a cache miss
    async fn ensure_image(&self, image: &str) -> EngineResult<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image, "Image cache hit");
            return Ok(());
        }

        warn!(image, "Image cache miss, pulling");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| {
                EngineError::SandboxFault(format!("Failed to pull image '{}': {}", image, e))
            })?;
        }

        info!(image, "Image pulled");
        Ok(())
    }

    async fn wait_exit_code(&self, container_id: &str) -> EngineResult<Option<i64>> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(container_id, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(Some(response.status_code)),
            // bollard reports non-zero exits as an error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(Some(code)),
            Some(Err(e)) => Err(EngineError::SandboxFault(format!(
                "Failed to wait for container: {}",
                e
            ))),
            None => Ok(None),
        }
    }

    async fn kill(&self, container_id: &str) {
        if let Err(e) = self
            .docker
            .kill_container(container_id, None::<KillContainerOptions<String>>)
            .await
        {
            debug!(container = %container_id, error = %e, "Kill failed (container may have exited)");
        }
    }

    async fn oom_killed(&self, container_id: &str) -> bool {
        match self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => info.state.and_then(|s| s.oom_killed).unwrap_or(false),
            Err(e) => {
                debug!(container = %container_id, error = %e, "Inspect failed");
                false
            }
        }
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn run(&self, request: SandboxRequest<'_>) -> EngineResult<SandboxOutput> {
        let limits = request.limits;
        self.ensure_image(request.image).await?;

        let stdin = StdinFile::write(request.workdir, request.stdin).await?;
        let script = format!(
            "exec {} < {}/{}",
            shell_join(request.command),
            WORKSPACE_MOUNT,
            stdin.name
        );
        let config = container_config(&request, script);

        let container_name = format!("arbiter-{}", uuid::Uuid::new_v4());
        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };
        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| EngineError::SandboxFault(format!("Failed to create container: {}", e)))?;

        let container_id = container.id;
        let _guard = ContainerGuard::new(&self.docker, container_id.clone());

        let start_time = Instant::now();
        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| EngineError::SandboxFault(format!("Failed to start container: {}", e)))?;

        let mut stdout = CappedBuffer::new(limits.output_limit_bytes);
        let mut stderr = CappedBuffer::new(limits.output_limit_bytes);

        let execution = async {
            let logs_options = Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: true,
                ..Default::default()
            });
            let mut logs = self.docker.logs(&container_id, logs_options);

            while let Some(item) = logs.next().await {
                let accepted = match item {
                    Ok(LogOutput::StdOut { message }) => stdout.push(&message),
                    Ok(LogOutput::StdErr { message }) => stderr.push(&message),
                    Ok(_) => true,
                    Err(e) => {
                        warn!(container = %container_id, error = %e, "Error reading container logs");
                        break;
                    }
                };
                if !accepted {
                    return Ok(None);
                }
            }

            self.wait_exit_code(&container_id).await
        };

        // Hard watchdog around the whole run
        let (exit_code, timed_out) =
            match tokio::time::timeout(limits.time_limit, execution).await {
                Ok(result) => (result?, false),
                Err(_) => (None, true),
            };
        let duration_ms = start_time.elapsed().as_millis() as u64;

        let output_truncated = stdout.truncated() || stderr.truncated();
        if timed_out || output_truncated {
            self.kill(&container_id).await;
        }

        let memory_exceeded = !timed_out
            && !output_truncated
            && (exit_code == Some(137) || self.oom_killed(&container_id).await);

        let exit_status = match exit_code {
            Some(code) => exit_status_from_code(code),
            None if timed_out || output_truncated => ExitStatus::Signaled { signal: 9 },
            None => ExitStatus::Unknown,
        };

        debug!(
            container = %container_id,
            %exit_status,
            duration_ms,
            timed_out,
            memory_exceeded,
            output_truncated,
            "Container finished"
        );

        Ok(SandboxOutput {
            stdout: stdout.into_string(),
            stderr: stderr.into_string(),
            exit_status,
            duration_ms,
            timed_out,
            memory_exceeded,
            output_truncated,
        })
    }
}

fn container_config(request: &SandboxRequest<'_>, script: String) -> Config<String> {
    let limits: &Limits = request.limits;
    let memory_bytes = (limits.memory_limit_mb as i64) * 1024 * 1024;
    let cpu_seconds = limits.time_limit.as_secs_f64().ceil() as i64;
    let mount_mode = if request.writable { "rw" } else { "ro" };

    let ulimit = |name: &str, soft: i64, hard: i64| ResourcesUlimits {
        name: Some(name.to_string()),
        soft: Some(soft),
        hard: Some(hard),
    };

    let host_config = HostConfig {
        memory: Some(memory_bytes),
        memory_swap: Some(memory_bytes),
        nano_cpus: Some((limits.cpu_limit * 1_000_000_000.0) as i64),
        pids_limit: Some(limits.max_processes as i64),
        readonly_rootfs: Some(true),
        network_mode: Some("none".to_string()),
        cap_drop: Some(vec!["ALL".to_string()]),
        security_opt: Some(vec!["no-new-privileges".to_string()]),
        binds: Some(vec![format!(
            "{}:{}:{}",
            request.workdir.display(),
            WORKSPACE_MOUNT,
            mount_mode
        )]),
        tmpfs: Some(HashMap::from([(
            "/tmp".to_string(),
            TMPFS_OPTIONS.to_string(),
        )])),
        ulimits: Some(vec![
            ulimit("cpu", cpu_seconds, cpu_seconds + 1),
            ulimit("fsize", MAX_FILE_SIZE_BYTES, MAX_FILE_SIZE_BYTES),
            ulimit("core", 0, 0),
        ]),
        ..Default::default()
    };

    Config {
        image: Some(request.image.to_string()),
        cmd: Some(vec!["/bin/sh".to_string(), "-c".to_string(), script]),
        env: Some(vec![
            "HOME=/tmp".to_string(),
            "LANG=C.UTF-8".to_string(),
        ]),
        working_dir: Some(WORKSPACE_MOUNT.to_string()),
        user: Some(SANDBOX_USER.to_string()),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        network_disabled: Some(true),
        host_config: Some(host_config),
        ..Default::default()
    }
}

/// Map a container exit code; 128+N means the process died from signal N
fn exit_status_from_code(code: i64) -> ExitStatus {
    match code {
        129..=159 => ExitStatus::Signaled {
            signal: (code - 128) as i32,
        },
        _ => ExitStatus::Exited { code: code as i32 },
    }
}

fn shell_quote(token: &str) -> String {
    if !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:+,@%".contains(c))
    {
        return token.to_string();
    }
    format!("'{}'", token.replace('\'', "'\\''"))
}

fn shell_join(command: &[String]) -> String {
    command
        .iter()
        .map(|t| shell_quote(t))
        .collect::<Vec<_>>()
        .join(" ")
}
