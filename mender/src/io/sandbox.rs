//! Isolated command execution for untrusted test suites.
//!
//! Two interchangeable executors sit behind the [`Sandbox`] trait: a Docker
//! container with hard resource caps, and a direct-process fallback for hosts
//! without a container daemon. Both honor the same timeout and truncation
//! contract, so the analyzer never needs to know which one it got.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::io::process::run_command_with_timeout;

/// Streams are bounded to the last 50,000 bytes.
pub const OUTPUT_LIMIT_BYTES: usize = 50_000;

/// Exit code reported when the command exceeds its wall-clock budget.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Fixed stderr marker for timed-out executions.
pub const TIMEOUT_MARKER: &str = "TIMEOUT";

/// Memory / swap / CPU caps applied to every container.
const MEMORY_LIMIT: &str = "512m";
const SWAP_LIMIT: &str = "1g";
const CPU_LIMIT: &str = "2";

/// One command execution request.
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    /// Container image to run under (ignored by the native executor).
    pub image: String,
    /// Host working tree, mounted read-write at `/workspace` in-container.
    pub workdir: PathBuf,
    /// Shell command line (`sh -c`).
    pub command: String,
    pub timeout: Duration,
}

/// Captured execution result. Infrastructure failures surface here as a
/// non-zero exit code with the failure text in stderr; they never error.
#[derive(Debug, Clone)]
pub struct SandboxResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl SandboxResult {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    /// Combined stdout+stderr, the error log consumed by the classifier.
    pub fn combined_log(&self) -> String {
        let mut log = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !log.is_empty() {
                log.push('\n');
            }
            log.push_str(&self.stderr);
        }
        log
    }

    fn infra_failure(message: impl Into<String>) -> Self {
        Self {
            exit_code: 125,
            stdout: String::new(),
            stderr: message.into(),
        }
    }

    fn timed_out() -> Self {
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            stdout: String::new(),
            stderr: TIMEOUT_MARKER.to_string(),
        }
    }
}

/// Abstraction over execution backends.
pub trait Sandbox: Send + Sync {
    fn execute(&self, request: &SandboxRequest) -> Result<SandboxResult>;
}

/// Executor that wraps each command in a `docker run`.
///
/// Containers are named `mender-{run_id}-{seq}` so anything the run leaves
/// behind can be force-removed, including after timeouts.
pub struct DockerSandbox {
    run_id: String,
    seq: AtomicU32,
}

impl DockerSandbox {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            seq: AtomicU32::new(0),
        }
    }

    fn next_container_name(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("mender-{}-{}", self.run_id, seq)
    }
}

impl Sandbox for DockerSandbox {
    #[instrument(skip_all, fields(image = %request.image))]
    fn execute(&self, request: &SandboxRequest) -> Result<SandboxResult> {
        let container = self.next_container_name();
        let workdir = absolute(&request.workdir);

        let mut cmd = Command::new("docker");
        cmd.args([
            "run",
            "--rm",
            "--name",
            &container,
            "--memory",
            MEMORY_LIMIT,
            "--memory-swap",
            SWAP_LIMIT,
            "--cpus",
            CPU_LIMIT,
            "-v",
            &format!("{}:/workspace", workdir.display()),
            "-w",
            "/workspace",
            &request.image,
            "sh",
            "-c",
            &request.command,
        ]);

        debug!(container = %container, "starting container");
        let output = match run_command_with_timeout(cmd, request.timeout, OUTPUT_LIMIT_BYTES) {
            Ok(output) => output,
            Err(err) => {
                remove_container(&container);
                warn!(error = %err, "container spawn failed");
                return Ok(SandboxResult::infra_failure(format!(
                    "container execution failed: {err:#}"
                )));
            }
        };

        // `--rm` cleans up on normal exit; after a timeout (or any abnormal
        // CLI death) the container may still be running.
        remove_container(&container);

        if output.timed_out {
            info!(container = %container, "execution timed out");
            return Ok(SandboxResult::timed_out());
        }

        Ok(SandboxResult {
            exit_code: output.exit_code(),
            stdout: output.stdout_lossy(),
            stderr: output.stderr_lossy(),
        })
    }
}

/// Direct-process fallback for hosts without a container daemon.
pub struct NativeSandbox;

impl Sandbox for NativeSandbox {
    #[instrument(skip_all)]
    fn execute(&self, request: &SandboxRequest) -> Result<SandboxResult> {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", &request.command])
            .current_dir(&request.workdir);

        let output = match run_command_with_timeout(cmd, request.timeout, OUTPUT_LIMIT_BYTES) {
            Ok(output) => output,
            Err(err) => {
                warn!(error = %err, "native execution failed");
                return Ok(SandboxResult::infra_failure(format!(
                    "native execution failed: {err:#}"
                )));
            }
        };

        if output.timed_out {
            info!("execution timed out");
            return Ok(SandboxResult::timed_out());
        }

        Ok(SandboxResult {
            exit_code: output.exit_code(),
            stdout: output.stdout_lossy(),
            stderr: output.stderr_lossy(),
        })
    }
}

/// Pick Docker when the daemon answers, otherwise the native fallback.
pub fn select_sandbox(run_id: &str) -> Box<dyn Sandbox> {
    let status = docker_status();
    if status.available {
        info!(version = ?status.version, "using docker sandbox");
        Box::new(DockerSandbox::new(run_id))
    } else {
        warn!(error = ?status.error, "docker unavailable, using native sandbox");
        Box::new(NativeSandbox)
    }
}

/// Daemon probe surfaced by the `/api/docker-status` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DockerStatus {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub containers: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn docker_status() -> DockerStatus {
    let version = Command::new("docker")
        .args(["version", "--format", "{{.Server.Version}}"])
        .output();
    match version {
        Ok(out) if out.status.success() => {
            let version = String::from_utf8_lossy(&out.stdout).trim().to_string();
            let containers = Command::new("docker")
                .args(["ps", "-q"])
                .output()
                .ok()
                .filter(|o| o.status.success())
                .map(|o| {
                    String::from_utf8_lossy(&o.stdout)
                        .lines()
                        .filter(|l| !l.trim().is_empty())
                        .count() as u32
                });
            DockerStatus {
                available: true,
                version: Some(version),
                containers,
                error: None,
            }
        }
        Ok(out) => DockerStatus {
            available: false,
            version: None,
            containers: None,
            error: Some(String::from_utf8_lossy(&out.stderr).trim().to_string()),
        },
        Err(err) => DockerStatus {
            available: false,
            version: None,
            containers: None,
            error: Some(err.to_string()),
        },
    }
}

fn remove_container(name: &str) {
    // Cleanup is best-effort; a missing container is the normal case.
    let _ = Command::new("docker").args(["rm", "-f", name]).output();
}

fn absolute(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
