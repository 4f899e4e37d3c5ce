/*============================================================
  Synavera Project: Hytale-Updater
  Module: hytale_updater::supervisor
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Detect whether the server is running under systemd, Docker
    or Podman, stop it through that backend, and tell the
    operator how to start it again.

  Security / Safety Notes:
    Issues `systemctl stop` / `<engine> stop` only after the
    operator consented; absent tools are skipped silently.

  Dependencies:
    process runner seam for systemctl, docker and podman.

  Operational Scope:
    Step six of the update flow and the closing report.

  Revision History:
    2026-10-19 COD  Implemented supervisor adapter.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Fixed, documented backend precedence
    - Conflicts are logged, never silently resolved
============================================================*/

use std::fmt;

use crate::error::{Result, UpdaterError};
use crate::layout::{InstallLayout, ASSETS_ARCHIVE, MAIN_ARTIFACT};
use crate::logger::Logger;
use crate::process::{CommandRunner, CommandSpec};

/// Container engines probed after systemd, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerEngine {
    Docker,
    Podman,
}

impl ContainerEngine {
    pub const PRECEDENCE: [ContainerEngine; 2] = [ContainerEngine::Docker, ContainerEngine::Podman];

    pub fn program(self) -> &'static str {
        match self {
            ContainerEngine::Docker => "docker",
            ContainerEngine::Podman => "podman",
        }
    }
}

/// Which backend, if any, currently runs the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorState {
    NoneRunning,
    Systemd { unit: String },
    Container { engine: ContainerEngine, name: String },
}

impl SupervisorState {
    pub fn is_running(&self) -> bool {
        !matches!(self, SupervisorState::NoneRunning)
    }

    /// Command the operator runs to start the server again.
    pub fn suggested_start_command(&self, layout: &InstallLayout, java_bin: &str) -> String {
        match self {
            SupervisorState::NoneRunning => manual_start_command(layout, java_bin),
            SupervisorState::Systemd { unit } => format!("sudo systemctl start {unit}"),
            SupervisorState::Container { engine, name } => {
                format!("{} start {name}", engine.program())
            }
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorState::NoneRunning => f.write_str("not running"),
            SupervisorState::Systemd { unit } => write!(f, "systemd unit `{unit}`"),
            SupervisorState::Container { engine, name } => {
                write!(f, "{} container `{name}`", engine.program())
            }
        }
    }
}

/// Foreground launch command for an unsupervised server.
pub fn manual_start_command(layout: &InstallLayout, java_bin: &str) -> String {
    format!(
        "cd {} && {java_bin} -jar {} --assets {}",
        layout.server_dir().display(),
        MAIN_ARTIFACT.name,
        ASSETS_ARCHIVE.name
    )
}

/// Queries and controls the supervisor backends.
pub struct SupervisorAdapter<'a, R> {
    runner: &'a R,
    logger: &'a Logger,
    container_prefix: String,
}

impl<'a, R: CommandRunner> SupervisorAdapter<'a, R> {
    pub fn new(runner: &'a R, logger: &'a Logger, container_prefix: &str) -> Self {
        Self {
            runner,
            logger,
            container_prefix: container_prefix.to_lowercase(),
        }
    }

    /// Detect the running server; systemd wins over Docker, Docker over Podman.
    pub async fn detect_running(&self, service_name_hint: &str) -> SupervisorState {
        let mut hits = Vec::new();

        if self.systemd_active(service_name_hint).await {
            hits.push(SupervisorState::Systemd {
                unit: service_name_hint.to_string(),
            });
        }
        for engine in ContainerEngine::PRECEDENCE {
            if let Some(name) = self.running_container(engine).await {
                hits.push(SupervisorState::Container { engine, name });
            }
        }

        if hits.len() > 1 {
            let found: Vec<String> = hits.iter().map(ToString::to_string).collect();
            self.logger.warn(
                "SUPERVISOR",
                format!(
                    "Server appears to run under several backends ({}); acting on {}",
                    found.join(", "),
                    hits[0]
                ),
            );
        }

        let state = hits.into_iter().next().unwrap_or(SupervisorState::NoneRunning);
        self.logger.info("SUPERVISOR", format!("Server state: {state}"));
        state
    }

    /// Stop the server through the backend that runs it.
    pub async fn stop(&self, state: &SupervisorState) -> Result<()> {
        let spec = match state {
            SupervisorState::NoneRunning => return Ok(()),
            SupervisorState::Systemd { unit } => {
                CommandSpec::new("systemctl").args(["stop", unit.as_str()])
            }
            SupervisorState::Container { engine, name } => {
                CommandSpec::new(engine.program()).args(["stop", name.as_str()])
            }
        };

        self.logger.info("SUPERVISOR", format!("Stopping {state}"));
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Err(output.into_failure(&spec));
        }
        Ok(())
    }

    async fn systemd_active(&self, unit: &str) -> bool {
        let spec = CommandSpec::new("systemctl").args(["is-active", unit]);
        match self.runner.run(&spec).await {
            Ok(output) => output.stdout.trim() == "active",
            Err(UpdaterError::CommandMissing { .. }) => false,
            Err(err) => {
                self.logger.warn("SUPERVISOR", format!("systemd query failed: {err}"));
                false
            }
        }
    }

    async fn running_container(&self, engine: ContainerEngine) -> Option<String> {
        let spec = CommandSpec::new(engine.program()).args(["ps", "--format", "{{.Names}}"]);
        let output = match self.runner.run(&spec).await {
            Ok(output) => output,
            Err(UpdaterError::CommandMissing { .. }) => return None,
            Err(err) => {
                self.logger
                    .warn("SUPERVISOR", format!("{} query failed: {err}", engine.program()));
                return None;
            }
        };
        if !output.success() {
            self.logger.debug(
                "SUPERVISOR",
                format!(
                    "{} ps unavailable: {}",
                    engine.program(),
                    output.stderr.trim()
                ),
            );
            return None;
        }

        output
            .stdout
            .lines()
            .map(str::trim)
            .find(|name| !name.is_empty() && name.to_lowercase().starts_with(&self.container_prefix))
            .map(str::to_string)
    }
}
