//! Docker CLI engine.
//!
//! Shells out to the `docker` binary, one invocation per target, with the
//! target passed as `-H`. Both output streams are forwarded line by line
//! to the progress sink as raw bytes; the engine's output is not assumed
//! to be UTF-8.

use std::path::PathBuf;
use std::process::Stdio;

use dockwright_vcs::BoxFuture;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::ContainerEngine;
use crate::error::EngineError;
use crate::progress::Progress;
use crate::types::{BuildRequest, ContainerInfo, DeployTargetRequest, container_name};

/// Default engine binary, looked up on `PATH`.
pub const DEFAULT_DOCKER_BINARY: &str = "docker";

/// Lines of stderr kept for [`EngineError::Failed`].
const STDERR_TAIL: usize = 20;

/// `docker ps` row layout parsed by [`parse_ps`].
const PS_FORMAT: &str = "{{.ID}}\t{{.Image}}\t{{.Status}}\t{{.Names}}";

/// [`ContainerEngine`] backed by the Docker command line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: PathBuf,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new(DEFAULT_DOCKER_BINARY)
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// `docker -H <target> build -t <image> [--no-cache] -f <path> <url>#<commit>`
    pub fn build_args(request: &BuildRequest, target: &str) -> Vec<String> {
        let mut args = vec![
            "-H".to_string(),
            target.to_string(),
            "build".to_string(),
            "-t".to_string(),
            request.image.clone(),
        ];
        if request.no_cache {
            args.push("--no-cache".to_string());
        }
        args.push("-f".to_string());
        args.push(request.descriptor_path.clone());
        args.push(format!(
            "{}#{}",
            request.repository.transport_url(),
            request.commit
        ));
        args
    }

    /// `docker -H <target> rm -f <project>-<environment>`
    pub fn remove_args(request: &DeployTargetRequest) -> Vec<String> {
        vec![
            "-H".to_string(),
            request.target.clone(),
            "rm".to_string(),
            "-f".to_string(),
            container_name(&request.project, &request.environment),
        ]
    }

    /// `docker -H <target> run -d --name <project>-<environment> <image>`
    pub fn run_args(request: &DeployTargetRequest) -> Vec<String> {
        vec![
            "-H".to_string(),
            request.target.clone(),
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            container_name(&request.project, &request.environment),
            request.image.clone(),
        ]
    }

    /// `docker -H <target> ps --all --filter name=^<name>$ --format <row>`
    pub fn ps_args(target: &str, name: &str) -> Vec<String> {
        vec![
            "-H".to_string(),
            target.to_string(),
            "ps".to_string(),
            "--all".to_string(),
            "--filter".to_string(),
            format!("name=^{name}$"),
            "--format".to_string(),
            PS_FORMAT.to_string(),
        ]
    }

    async fn run(
        &self,
        args: Vec<String>,
        progress: &mut Progress<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let command = format!("{} {}", self.binary.display(), args.join(" "));
        debug!(%command, "running engine command");
        progress.line(&format!("$ {command}")).await;

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Other("stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Other("stderr not captured".into()))?;
        let mut stdout = BufReader::new(stdout);
        let mut stderr = BufReader::new(stderr);
        let mut out_line: Vec<u8> = Vec::new();
        let mut err_line: Vec<u8> = Vec::new();

        let mut tail: Vec<String> = Vec::new();
        let mut stdout_open = true;
        let mut stderr_open = true;

        // read_until keeps partial reads in the buffer, so the lines
        // survive the other branch winning the select.
        while stdout_open || stderr_open {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Err(EngineError::Cancelled);
                }
                read = stdout.read_until(b'\n', &mut out_line), if stdout_open => {
                    if read? == 0 {
                        stdout_open = false;
                    } else {
                        forward(progress, &out_line).await;
                        out_line.clear();
                    }
                }
                read = stderr.read_until(b'\n', &mut err_line), if stderr_open => {
                    if read? == 0 {
                        stderr_open = false;
                    } else {
                        forward(progress, &err_line).await;
                        if tail.len() == STDERR_TAIL {
                            tail.remove(0);
                        }
                        tail.push(String::from_utf8_lossy(&err_line).trim_end().to_string());
                        err_line.clear();
                    }
                }
            }
        }
        progress.flush().await;

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(EngineError::Cancelled);
            }
            status = child.wait() => status?,
        };

        if status.success() {
            Ok(())
        } else {
            Err(EngineError::Failed {
                command,
                status: status.to_string(),
                stderr: tail.join("\n"),
            })
        }
    }

    /// Runs a command to completion and returns its stdout.
    async fn capture(
        &self,
        args: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let command = format!("{} {}", self.binary.display(), args.join(" "));
        debug!(%command, "running engine command");

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args).stdin(Stdio::null()).kill_on_drop(true);

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            output = cmd.output() => output?,
        };

        if output.status.success() {
            Ok(output.stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let start = lines.len().saturating_sub(STDERR_TAIL);
            Err(EngineError::Failed {
                command,
                status: output.status.to_string(),
                stderr: lines[start..].join("\n"),
            })
        }
    }
}

/// Writes one output line, terminating it when the process did not.
async fn forward(progress: &mut Progress<'_>, line: &[u8]) {
    progress.write(line).await;
    if !line.ends_with(b"\n") {
        progress.write(b"\n").await;
    }
}

/// Parses `docker ps` rows laid out as [`PS_FORMAT`].
fn parse_ps(target: &str, output: &[u8]) -> Vec<ContainerInfo> {
    String::from_utf8_lossy(output)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut fields = line.splitn(4, '\t');
            let row = (fields.next(), fields.next(), fields.next(), fields.next());
            match row {
                (Some(id), Some(image), Some(status), Some(name)) => Some(ContainerInfo {
                    target: target.to_string(),
                    id: id.to_string(),
                    image: image.to_string(),
                    status: status.to_string(),
                    name: name.trim_end().to_string(),
                }),
                _ => {
                    debug!(%line, "skipping malformed ps row");
                    None
                }
            }
        })
        .collect()
}

impl ContainerEngine for DockerCli {
    fn name(&self) -> &str {
        "docker"
    }

    fn build<'a>(
        &'a self,
        request: &'a BuildRequest,
        progress: &'a mut Progress<'_>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        Box::pin(async move {
            if request.targets.is_empty() {
                return Err(EngineError::Other("no build targets".into()));
            }
            for target in &request.targets {
                self.run(Self::build_args(request, target), progress, cancel)
                    .await?;
            }
            Ok(())
        })
    }

    fn deploy<'a>(
        &'a self,
        request: &'a DeployTargetRequest,
        progress: &'a mut Progress<'_>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        Box::pin(async move {
            // The previous container may not exist; only cancellation stops us here.
            match self.run(Self::remove_args(request), progress, cancel).await {
                Ok(()) => {}
                Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                Err(e) => {
                    warn!(host = %request.target, error = %e, "removing previous container failed");
                }
            }
            self.run(Self::run_args(request), progress, cancel).await
        })
    }

    fn list<'a>(
        &'a self,
        target: &'a str,
        name: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Vec<ContainerInfo>, EngineError>> {
        Box::pin(async move {
            let output = self.capture(Self::ps_args(target, name), cancel).await?;
            Ok(parse_ps(target, &output))
        })
    }
}
