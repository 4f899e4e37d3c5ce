/*============================================================
  Synavera Project: Hytale-Updater
  Module: hytale_updater::process
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Run external tools (java, the downloader, systemctl,
    container engines, ufw) behind a single runner seam.

  Security / Safety Notes:
    Executes binaries with the invoking user's privileges; no
    shell interpolation is performed on arguments.

  Dependencies:
    tokio::process for async command execution and timeouts.

  Operational Scope:
    Every subprocess the updater spawns flows through
    `CommandRunner`, which tests replace with scripted fakes.

  Revision History:
    2026-10-19 COD  Generalised command helpers into a runner.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Deterministic command invocation with explicit checks
    - Bounded execution where tools may not exit on their own
    - Reusable helpers for external command diagnostics
============================================================*/

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::error::{Result, UpdaterError};

/// Grace period for draining pipes after a timed-out child is killed.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Description of a single external command invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Option<Duration>,
    /// Attach the child to the operator's terminal instead of capturing output.
    pub interactive: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout: None,
            interactive: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Kill the child if it is still running after `budget`.
    pub fn timeout(mut self, budget: Duration) -> Self {
        self.timeout = Some(budget);
        self
    }

    /// Let the tool talk to the operator directly (progress, sign-in prompts).
    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    /// Human-readable command line for diagnostics.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured result of a finished (or killed) command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit status; `None` when killed or terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// stdout followed by stderr; most tools split their report across both.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
            (false, true) => self.stdout.clone(),
            (true, _) => self.stderr.clone(),
        }
    }

    /// Build the error describing this output as a failure of `spec`.
    pub fn into_failure(self, spec: &CommandSpec) -> UpdaterError {
        UpdaterError::CommandFailure {
            command: spec.display(),
            status: self.status.unwrap_or(-1),
            stderr: self.stderr.trim().to_string(),
        }
    }
}

/// Seam over subprocess execution.
pub trait CommandRunner {
    /// Run the command to completion, or until its timeout elapses.
    ///
    /// Spawn failures with `NotFound` surface as `CommandMissing`; a
    /// non-zero exit is not an error at this layer.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runner backed by real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args).kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }

        if spec.interactive {
            let status = command
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()
                .await
                .map_err(|err| map_spawn_error(err, &spec.program))?;
            return Ok(CommandOutput {
                status: status.code(),
                ..CommandOutput::default()
            });
        }

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        match spec.timeout {
            None => {
                let output = command
                    .output()
                    .await
                    .map_err(|err| map_spawn_error(err, &spec.program))?;
                Ok(CommandOutput {
                    status: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    timed_out: false,
                })
            }
            Some(budget) => run_bounded(command, budget, &spec.program).await,
        }
    }
}

async fn run_bounded(mut command: Command, budget: Duration, program: &str) -> Result<CommandOutput> {
    let mut child = command
        .spawn()
        .map_err(|err| map_spawn_error(err, program))?;

    let stdout_buf = Arc::new(Mutex::new(Vec::new()));
    let stderr_buf = Arc::new(Mutex::new(Vec::new()));
    let stdout_task = spawn_drain(child.stdout.take(), stdout_buf.clone());
    let stderr_task = spawn_drain(child.stderr.take(), stderr_buf.clone());

    let (status, timed_out) = match tokio::time::timeout(budget, child.wait()).await {
        Ok(waited) => (waited?.code(), false),
        Err(_) => {
            // kill() also reaps the child.
            if let Err(err) = child.kill().await {
                return Err(UpdaterError::Runtime(format!(
                    "Failed to terminate {program} after {}s: {err}",
                    budget.as_secs()
                )));
            }
            (None, true)
        }
    };

    // Grandchildren may keep the pipes open; keep whatever arrived so far.
    for task in [stdout_task, stderr_task] {
        let _ = tokio::time::timeout(DRAIN_GRACE, task).await;
    }

    Ok(CommandOutput {
        status,
        stdout: take_lossy(&stdout_buf),
        stderr: take_lossy(&stderr_buf),
        timed_out,
    })
}

fn spawn_drain<R>(reader: Option<R>, sink: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut reader) = reader else {
            return;
        };
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(read) => {
                    if let Ok(mut guard) = sink.lock() {
                        guard.extend_from_slice(&chunk[..read]);
                    }
                }
            }
        }
    })
}

fn take_lossy(buffer: &Arc<Mutex<Vec<u8>>>) -> String {
    buffer
        .lock()
        .map(|guard| String::from_utf8_lossy(&guard).into_owned())
        .unwrap_or_default()
}

/// Translate a spawn failure into the updater taxonomy.
pub fn map_spawn_error(err: io::Error, command: &str) -> UpdaterError {
    if err.kind() == io::ErrorKind::NotFound {
        UpdaterError::CommandMissing {
            command: command.into(),
        }
    } else {
        UpdaterError::Runtime(format!("Failed to spawn {command}: {err}"))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_status() {
        let spec = CommandSpec::new("sh").args(["-c", "echo probe; echo warn >&2; exit 3"]);
        let output = SystemRunner.run(&spec).await.unwrap();
        assert_eq!(output.status, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "probe");
        assert_eq!(output.stderr.trim(), "warn");
        assert!(output.combined().contains("probe\n"));
    }

    #[tokio::test]
    async fn bounded_command_is_killed_but_keeps_output() {
        let spec = CommandSpec::new("sh")
            .args(["-c", "echo started; exec sleep 30"])
            .timeout(Duration::from_millis(500));
        let started = std::time::Instant::now();
        let output = SystemRunner.run(&spec).await.unwrap();
        assert!(output.timed_out);
        assert_eq!(output.status, None);
        assert_eq!(output.stdout.trim(), "started");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn bounded_command_that_finishes_reports_status() {
        let spec = CommandSpec::new("sh")
            .args(["-c", "echo done"])
            .timeout(Duration::from_secs(5));
        let output = SystemRunner.run(&spec).await.unwrap();
        assert!(!output.timed_out);
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "done");
    }

    #[tokio::test]
    async fn missing_binary_maps_to_command_missing() {
        let spec = CommandSpec::new("hytale-updater-definitely-missing-tool");
        let err = SystemRunner.run(&spec).await.unwrap_err();
        assert!(matches!(err, UpdaterError::CommandMissing { .. }));
    }

    #[test]
    fn display_joins_arguments() {
        let spec = CommandSpec::new("systemctl").args(["is-active", "hytale"]);
        assert_eq!(spec.display(), "systemctl is-active hytale");
    }
}
