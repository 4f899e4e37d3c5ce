/*============================================================
  Synavera Project: Hytale-Updater
  Module: hytale_updater::install
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Perform the initial server installation: check Java, obtain
    the game archive, lay out `Server/`, register a systemd unit
    and open the firewall port.

  Security / Safety Notes:
    Writes the systemd unit and firewall rule only when running
    as root. A marker file tracks partial installs so failures
    roll back instead of leaving a half-installed tree.

  Dependencies:
    libc for the privilege check, walkdir for tree copies, and
    the fetch/probe/lock collaborators.

  Operational Scope:
    Default mode of `hytale-updater` (no `--update`).

  Revision History:
    2026-10-19 COD  Authored installer with marker rollback.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Prerequisites verified before anything is written
    - Rollback on failure, driven by a persisted marker
    - Optional host integration degrades to warnings
============================================================*/

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::UpdaterConfig;
use crate::error::{Result, UpdaterError};
use crate::fetch::{download_game_archive, ensure_downloader, extract_async, Fetcher};
use crate::layout::{InstallLayout, ASSETS_ARCHIVE, MAIN_ARTIFACT, NATIVE_IMAGE, SERVER_DIR};
use crate::lock::InstallLock;
use crate::logger::Logger;
use crate::probe::{probe_java_major, probe_latest_version};
use crate::process::{CommandRunner, CommandSpec};
use crate::prompt::Operator;
use crate::supervisor::manual_start_command;
use crate::update::replace_critical_files;
use crate::version::VersionIdentifier;

/// Result of an install run.
#[derive(Debug)]
pub enum InstallOutcome {
    Installed(InstallReport),
    AlreadyInstalled,
}

#[derive(Debug)]
pub struct InstallReport {
    pub root: PathBuf,
    pub version: Option<VersionIdentifier>,
    pub service_unit: Option<PathBuf>,
    pub firewall_opened: bool,
    pub start_command: String,
}

/// Whether the current process runs with root privileges.
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

pub struct Installer<'a, R, O> {
    config: &'a UpdaterConfig,
    runner: &'a R,
    operator: &'a O,
    fetcher: &'a Fetcher,
    logger: &'a Logger,
    privileged: bool,
}

impl<'a, R: CommandRunner, O: Operator> Installer<'a, R, O> {
    pub fn new(
        config: &'a UpdaterConfig,
        runner: &'a R,
        operator: &'a O,
        fetcher: &'a Fetcher,
        logger: &'a Logger,
    ) -> Self {
        Self {
            config,
            runner,
            operator,
            fetcher,
            logger,
            privileged: is_root(),
        }
    }

    /// Override the detected privilege level.
    pub fn with_privileges(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    pub async fn run_install(&self) -> Result<InstallOutcome> {
        let layout = self.config.layout();
        if layout.is_installed() && !layout.marker_path().exists() {
            self.logger.warn(
                "INSTALL",
                format!(
                    "Server already installed at {}; use --update to upgrade it",
                    layout.root().display()
                ),
            );
            return Ok(InstallOutcome::AlreadyInstalled);
        }

        self.check_java().await?;

        let question = format!(
            "Install the Hytale server ({} patchline) into {}?",
            self.config.patchline,
            layout.root().display()
        );
        if !self.operator.confirm(&question)? {
            return Err(UpdaterError::OperatorCancelled);
        }

        let created_root = !layout.root().exists();
        fs::create_dir_all(layout.root()).map_err(|err| {
            UpdaterError::Filesystem(format!("Failed to create {}: {err}", layout.root().display()))
        })?;
        let lock = InstallLock::acquire(&layout.lock_path())?;
        self.logger
            .debug("LOCK", format!("Holding {}", lock.path().display()));

        if layout.marker_path().exists() {
            self.logger
                .warn("INSTALL", "Previous install was interrupted; removing its leftovers");
            self.rollback(&layout, false);
        }
        fs::write(layout.marker_path(), b"").map_err(|err| {
            UpdaterError::Filesystem(format!(
                "Failed to write {}: {err}",
                layout.marker_path().display()
            ))
        })?;

        let outcome = match self.install_into(&layout).await {
            Ok(report) => {
                let _ = fs::remove_file(layout.marker_path());
                self.logger
                    .info("INSTALL", format!("Installed into {}", layout.root().display()));
                Ok(InstallOutcome::Installed(report))
            }
            Err(err) => {
                self.logger
                    .error("INSTALL", format!("Install failed ({err}); rolling back"));
                self.rollback(&layout, created_root);
                Err(err)
            }
        };
        drop(lock);
        outcome
    }

    async fn check_java(&self) -> Result<()> {
        let required = self.config.jdk_version;
        match probe_java_major(self.runner, &self.config.java_bin).await {
            Some(found) if found >= required => {
                self.logger.info("JAVA", format!("Java {found} detected"));
                Ok(())
            }
            Some(found) => Err(UpdaterError::PrerequisiteMissing(format!(
                "Java {required} or newer is required, found Java {found}"
            ))),
            None => Err(UpdaterError::PrerequisiteMissing(format!(
                "Java {required} or newer is required, but `{}` was not found",
                self.config.java_bin
            ))),
        }
    }

    async fn install_into(&self, layout: &InstallLayout) -> Result<InstallReport> {
        let staging = layout.staging_dir();
        let _ = fs::remove_dir_all(&staging);

        let staged = self.stage_server(layout, &staging).await;
        let _ = fs::remove_dir_all(&staging);
        let version = staged?;

        let service_unit = self.install_service_unit(layout).await?;
        let firewall_opened = self.open_firewall().await;

        let start_command = match &service_unit {
            Some(_) => format!("sudo systemctl start {}", self.config.service.name),
            None => manual_start_command(layout, &self.config.java_bin),
        };
        Ok(InstallReport {
            root: layout.root().to_path_buf(),
            version,
            service_unit,
            firewall_opened,
            start_command,
        })
    }

    async fn stage_server(
        &self,
        layout: &InstallLayout,
        staging: &Path,
    ) -> Result<Option<VersionIdentifier>> {
        let (archive, version) = match &self.config.local_archive {
            Some(local) => {
                if !local.is_file() {
                    return Err(UpdaterError::Config(format!(
                        "Local archive {} does not exist",
                        local.display()
                    )));
                }
                self.logger
                    .info("ARCHIVE", format!("Using local archive {}", local.display()));
                let version = local
                    .file_name()
                    .and_then(|name| VersionIdentifier::extract(&name.to_string_lossy()));
                (local.clone(), version)
            }
            None => {
                let downloader = ensure_downloader(
                    self.fetcher,
                    &self.config.downloader,
                    &layout.downloader_path(),
                    staging,
                    self.logger,
                )
                .await?;
                let latest = probe_latest_version(
                    self.runner,
                    &downloader,
                    &self.config.patchline,
                    self.config.downloader.probe_budget(),
                    &staging.join("probe"),
                    self.logger,
                )
                .await?;
                let archive = staging.join(format!("{latest}.zip"));
                download_game_archive(
                    self.runner,
                    &downloader,
                    &self.config.patchline,
                    &archive,
                    self.logger,
                )
                .await?;
                (archive, Some(latest))
            }
        };

        let extracted = staging.join("extracted");
        extract_async(&archive, &extracted).await?;
        copy_tree(&extracted.join(SERVER_DIR), &layout.server_dir())?;
        replace_critical_files(&extracted, layout, self.logger)?;

        if !layout.is_installed() {
            return Err(UpdaterError::ExtractFailed(format!(
                "Archive {} does not contain {}",
                archive.display(),
                MAIN_ARTIFACT.name
            )));
        }
        Ok(version)
    }

    async fn install_service_unit(&self, layout: &InstallLayout) -> Result<Option<PathBuf>> {
        if !self.privileged {
            self.logger.warn(
                "SERVICE",
                "Not running as root; skipping systemd unit creation",
            );
            return Ok(None);
        }
        match self.runner.run(&CommandSpec::new("systemctl").arg("--version")).await {
            Ok(_) => {}
            Err(UpdaterError::CommandMissing { .. }) => {
                self.logger
                    .warn("SERVICE", "systemctl not available; skipping systemd unit creation");
                return Ok(None);
            }
            Err(err) => return Err(err),
        }

        let unit_dir = &self.config.service.unit_dir;
        let unit_path = unit_dir.join(format!("{}.service", self.config.service.name));
        fs::create_dir_all(unit_dir)?;
        fs::write(&unit_path, render_unit(self.config, layout)).map_err(|err| {
            UpdaterError::Filesystem(format!("Failed to write {}: {err}", unit_path.display()))
        })?;
        self.logger
            .info("SERVICE", format!("Wrote {}", unit_path.display()));

        for args in [vec!["daemon-reload"], vec!["enable", self.config.service.name.as_str()]] {
            let spec = CommandSpec::new("systemctl").args(args);
            match self.runner.run(&spec).await {
                Ok(output) if output.success() => {}
                Ok(output) => self.logger.warn(
                    "SERVICE",
                    format!("`{}` failed: {}", spec.display(), output.stderr.trim()),
                ),
                Err(err) => self
                    .logger
                    .warn("SERVICE", format!("`{}` failed: {err}", spec.display())),
            }
        }
        Ok(Some(unit_path))
    }

    async fn open_firewall(&self) -> bool {
        let rule = format!("{}/udp", self.config.port);
        if !self.privileged {
            self.logger.warn(
                "FIREWALL",
                format!("Not running as root; open port {rule} manually if a firewall is active"),
            );
            return false;
        }
        let spec = CommandSpec::new("ufw").args(["allow", rule.as_str()]);
        match self.runner.run(&spec).await {
            Ok(output) if output.success() => {
                self.logger.info("FIREWALL", format!("Allowed {rule}"));
                true
            }
            Ok(output) => {
                self.logger.warn(
                    "FIREWALL",
                    format!("ufw refused {rule}: {}", output.stderr.trim()),
                );
                false
            }
            Err(UpdaterError::CommandMissing { .. }) => {
                self.logger.debug("FIREWALL", "ufw not installed; nothing to open");
                false
            }
            Err(err) => {
                self.logger.warn("FIREWALL", format!("ufw failed: {err}"));
                false
            }
        }
    }

    fn rollback(&self, layout: &InstallLayout, remove_root: bool) {
        let result = if remove_root {
            fs::remove_dir_all(layout.root())
        } else {
            let _ = fs::remove_dir_all(layout.staging_dir());
            match fs::remove_dir_all(layout.server_dir()) {
                Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err),
                _ => fs::remove_file(layout.marker_path()),
            }
        };
        if let Err(err) = result {
            self.logger.warn(
                "ROLLBACK",
                format!("Partial install at {} not fully removed: {err}", layout.root().display()),
            );
        }
    }
}

/// systemd unit running the server from `<root>/Server`.
pub fn render_unit(config: &UpdaterConfig, layout: &InstallLayout) -> String {
    let mut exec = config.java_bin.clone();
    if layout.critical_path(&NATIVE_IMAGE).is_file() {
        exec.push_str(&format!(" -XX:AOTCache={}", NATIVE_IMAGE.name));
    }
    exec.push_str(&format!(
        " -jar {} --assets {} --bind 0.0.0.0:{}",
        MAIN_ARTIFACT.name, ASSETS_ARCHIVE.name, config.port
    ));

    let user = config
        .service
        .user
        .as_deref()
        .map(|user| format!("User={user}\n"))
        .unwrap_or_default();

    format!(
        "[Unit]\n\
         Description=Hytale Dedicated Server\n\
         After=network-online.target\n\
         Wants=network-online.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         {user}\
         WorkingDirectory={}\n\
         ExecStart={exec}\n\
         Restart=on-failure\n\
         RestartSec=10\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        layout.server_dir().display()
    )
}

/// Recursively copy `source` into `dest`, overwriting files. A missing source is a no-op.
fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    if !source.is_dir() {
        return Ok(());
    }
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|err| {
            UpdaterError::Filesystem(format!("Failed to walk {}: {err}", source.display()))
        })?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|err| {
                UpdaterError::Filesystem(format!("Failed to copy to {}: {err}", target.display()))
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DownloaderConfig;
    use crate::fetch::testing::write_zip;
    use crate::process::testing::{missing, ok, ScriptedRunner};
    use crate::process::CommandOutput;
    use crate::prompt::testing::ScriptedOperator;

    fn java(banner: &'static str) -> impl Fn(&CommandSpec) -> Result<CommandOutput> {
        move |spec: &CommandSpec| match spec.program.as_str() {
            "java" => Ok(CommandOutput {
                status: Some(0),
                stderr: banner.into(),
                ..CommandOutput::default()
            }),
            "systemctl" | "ufw" => ok(""),
            _ => missing(spec),
        }
    }

    fn config_for(root: &Path, unit_dir: &Path, archive: Option<PathBuf>) -> UpdaterConfig {
        let mut config = UpdaterConfig {
            install_dir: root.to_path_buf(),
            local_archive: archive,
            downloader: DownloaderConfig {
                url: "http://127.0.0.1:9/never-fetched.zip".into(),
                ..DownloaderConfig::default()
            },
            ..UpdaterConfig::default()
        };
        config.service.unit_dir = unit_dir.to_path_buf();
        config
    }

    fn game_archive(path: &Path, with_jar: bool) {
        let mut entries: Vec<(&str, &[u8])> = vec![
            ("Server/HytaleServer.aot", b"aot"),
            ("Server/Licenses/NOTICE.txt", b"notice"),
            ("Assets.zip", b"assets"),
        ];
        if with_jar {
            entries.push(("Server/HytaleServer.jar", b"jar"));
        }
        write_zip(path, &entries);
    }

    async fn install(
        config: &UpdaterConfig,
        runner: &ScriptedRunner,
        operator: &ScriptedOperator,
        privileged: bool,
    ) -> Result<InstallOutcome> {
        let fetcher = Fetcher::new(&config.downloader).unwrap();
        let logger = Logger::stderr_only(false);
        Installer::new(config, runner, operator, &fetcher, &logger)
            .with_privileges(privileged)
            .run_install()
            .await
    }

    #[tokio::test]
    async fn installs_from_local_archive_with_service() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("2026.01.14-3e7a0ba6c.zip");
        game_archive(&archive, true);
        let root = dir.path().join("hytale");
        let config = config_for(&root, &dir.path().join("units"), Some(archive));
        let runner = ScriptedRunner::new(java("openjdk version \"25.0.1\" 2025-10-21"));
        let operator = ScriptedOperator::new(&[true]);

        let report = match install(&config, &runner, &operator, true).await.unwrap() {
            InstallOutcome::Installed(report) => report,
            other => panic!("unexpected outcome {other:?}"),
        };

        let layout = InstallLayout::new(&root);
        assert!(layout.is_installed());
        assert_eq!(fs::read(layout.critical_path(&ASSETS_ARCHIVE)).unwrap(), b"assets");
        assert!(layout.server_dir().join("Licenses/NOTICE.txt").is_file());
        assert!(!layout.marker_path().exists());
        assert!(!layout.staging_dir().exists());
        assert_eq!(report.version.unwrap().as_str(), "2026.01.14-3e7a0ba6c");
        assert_eq!(report.start_command, "sudo systemctl start hytale");
        assert!(report.firewall_opened);

        let unit = fs::read_to_string(report.service_unit.unwrap()).unwrap();
        assert!(unit.contains(&format!("WorkingDirectory={}", layout.server_dir().display())));
        assert!(unit.contains("-XX:AOTCache=HytaleServer.aot -jar HytaleServer.jar"));
        assert!(runner.called("systemctl enable hytale"));
        assert!(runner.called("ufw allow 5520/udp"));
    }

    #[tokio::test]
    async fn installs_through_downloader_without_privileges() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("hytale");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("hytale-downloader"), b"#!/bin/sh\n").unwrap();
        let config = config_for(&root, &dir.path().join("units"), None);
        let runner = ScriptedRunner::new(|spec: &CommandSpec| {
            if spec.program == "java" {
                return Ok(CommandOutput {
                    status: Some(0),
                    stderr: "openjdk version \"25\"".into(),
                    ..CommandOutput::default()
                });
            }
            if !spec.program.ends_with("hytale-downloader") {
                return missing(spec);
            }
            match spec.args.iter().position(|arg| arg == "-download-path") {
                Some(index) => {
                    game_archive(Path::new(&spec.args[index + 1]), true);
                    ok("")
                }
                None => ok("downloading latest (\"release\" patchline) to \"2026.01.14-3e7a0ba6c.zip\""),
            }
        });
        let operator = ScriptedOperator::new(&[true]);

        let report = match install(&config, &runner, &operator, false).await.unwrap() {
            InstallOutcome::Installed(report) => report,
            other => panic!("unexpected outcome {other:?}"),
        };
        assert!(InstallLayout::new(&root).is_installed());
        assert!(report.service_unit.is_none());
        assert!(!report.firewall_opened);
        assert!(report.start_command.starts_with("cd "));
        assert!(!dir.path().join("units").exists());
        assert!(!runner.called("ufw"));
    }

    #[tokio::test]
    async fn old_java_is_a_missing_prerequisite() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("hytale");
        let config = config_for(&root, dir.path(), None);
        let runner = ScriptedRunner::new(java("openjdk version \"21.0.2\""));
        let operator = ScriptedOperator::new(&[true]);

        let err = install(&config, &runner, &operator, true).await.unwrap_err();
        assert!(matches!(err, UpdaterError::PrerequisiteMissing(_)));
        assert!(!root.exists());
        assert!(operator.questions().is_empty());
    }

    #[tokio::test]
    async fn failed_install_removes_created_root() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        game_archive(&archive, false);
        let root = dir.path().join("hytale");
        let config = config_for(&root, &dir.path().join("units"), Some(archive));
        let runner = ScriptedRunner::new(java("openjdk version \"25\""));
        let operator = ScriptedOperator::new(&[true]);

        let err = install(&config, &runner, &operator, true).await.unwrap_err();
        assert!(matches!(err, UpdaterError::ExtractFailed(_)));
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn failed_install_keeps_preexisting_root_contents() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        game_archive(&archive, false);
        let root = dir.path().join("hytale");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("notes.txt"), b"keep me").unwrap();
        let config = config_for(&root, &dir.path().join("units"), Some(archive));
        let runner = ScriptedRunner::new(java("openjdk version \"25\""));
        let operator = ScriptedOperator::new(&[true]);

        install(&config, &runner, &operator, true).await.unwrap_err();
        let layout = InstallLayout::new(&root);
        assert!(root.join("notes.txt").is_file());
        assert!(!layout.server_dir().exists());
        assert!(!layout.marker_path().exists());
    }

    #[tokio::test]
    async fn install_in_progress_elsewhere_is_locked_out() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("2026.01.14-3e7a0ba6c.zip");
        game_archive(&archive, true);
        let root = dir.path().join("hytale");
        let layout = InstallLayout::new(&root);
        fs::create_dir_all(layout.server_dir()).unwrap();
        fs::write(layout.main_artifact(), b"jar-in-flight").unwrap();
        fs::write(layout.marker_path(), b"").unwrap();
        let _held = InstallLock::acquire(&layout.lock_path()).unwrap();

        let config = config_for(&root, &dir.path().join("units"), Some(archive));
        let runner = ScriptedRunner::new(java("openjdk version \"25\""));
        let operator = ScriptedOperator::new(&[true]);

        let err = install(&config, &runner, &operator, true).await.unwrap_err();
        assert!(matches!(err, UpdaterError::Locked { .. }));
        assert_eq!(fs::read(layout.main_artifact()).unwrap(), b"jar-in-flight");
        assert!(layout.marker_path().exists());
    }

    #[tokio::test]
    async fn interrupted_install_is_cleared_and_redone() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("2026.01.14-3e7a0ba6c.zip");
        game_archive(&archive, true);
        let root = dir.path().join("hytale");
        let layout = InstallLayout::new(&root);
        fs::create_dir_all(layout.server_dir()).unwrap();
        fs::write(layout.server_dir().join("stale.tmp"), b"half").unwrap();
        fs::write(layout.marker_path(), b"").unwrap();

        let config = config_for(&root, &dir.path().join("units"), Some(archive));
        let runner = ScriptedRunner::new(java("openjdk version \"25\""));
        let operator = ScriptedOperator::new(&[true]);

        let outcome = install(&config, &runner, &operator, false).await.unwrap();
        assert!(matches!(outcome, InstallOutcome::Installed(_)));
        assert!(layout.is_installed());
        assert!(!layout.server_dir().join("stale.tmp").exists());
        assert!(!layout.marker_path().exists());
    }

    #[tokio::test]
    async fn existing_install_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let layout = InstallLayout::new(dir.path());
        fs::create_dir_all(layout.server_dir()).unwrap();
        fs::write(layout.main_artifact(), b"jar").unwrap();
        let config = config_for(dir.path(), dir.path(), None);
        let runner = ScriptedRunner::new(missing);
        let operator = ScriptedOperator::new(&[]);

        let outcome = install(&config, &runner, &operator, true).await.unwrap();
        assert!(matches!(outcome, InstallOutcome::AlreadyInstalled));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn declined_install_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("hytale");
        let config = config_for(&root, dir.path(), None);
        let runner = ScriptedRunner::new(java("openjdk version \"25\""));
        let operator = ScriptedOperator::new(&[false]);

        let err = install(&config, &runner, &operator, true).await.unwrap_err();
        assert!(err.is_benign());
        assert!(!root.exists());
    }

    #[test]
    fn unit_omits_aot_cache_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = InstallLayout::new(dir.path());
        let mut config = UpdaterConfig::default();
        config.service.user = Some("hytale".into());
        let unit = render_unit(&config, &layout);
        assert!(unit.contains("User=hytale\n"));
        assert!(unit.contains("ExecStart=java -jar HytaleServer.jar --assets Assets.zip --bind 0.0.0.0:5520"));
        assert!(!unit.contains("AOTCache"));
    }
}
