/*============================================================
  Synavera Project: Hytale-Updater
  Module: hytale_updater::update
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Orchestrate a server update: probe versions, decide, stop
    the running server, fetch the new build, back up the
    critical files, swap them in and report how to restart.

  Security / Safety Notes:
    Nothing is mutated before operator consent. A backup is
    always completed before the first file is replaced; user
    configuration and world data are never touched.

  Dependencies:
    probe, supervisor, fetch, backup and lock collaborators.

  Operational Scope:
    Invoked by `hytale-updater --update`.

  Revision History:
    2026-10-19 COD  Authored update orchestrator.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Fatal failures abort immediately, nothing is retried
    - Exclusive installation lock around mutating steps
    - Scratch space cleaned regardless of outcome
============================================================*/

use std::fs;
use std::path::{Path, PathBuf};

use crate::backup::{create_backup, list_backups, prune_backups, restore_backup, BackupRecord};
use crate::config::UpdaterConfig;
use crate::error::{Result, UpdaterError};
use crate::fetch::{download_game_archive, ensure_downloader, extract_async, Fetcher};
use crate::layout::{InstallLayout, CRITICAL_FILES};
use crate::lock::InstallLock;
use crate::logger::Logger;
use crate::probe::{probe_current_version, probe_latest_version};
use crate::process::CommandRunner;
use crate::prompt::Operator;
use crate::supervisor::{SupervisorAdapter, SupervisorState};
use crate::version::{CurrentVersion, UpdateDecision, VersionIdentifier};

/// Result of a completed update run.
#[derive(Debug)]
pub enum UpdateOutcome {
    UpToDate(VersionIdentifier),
    Cancelled,
    Updated(UpdateReport),
}

/// What an applied update changed.
#[derive(Debug)]
pub struct UpdateReport {
    pub from: CurrentVersion,
    pub to: VersionIdentifier,
    pub backup: BackupRecord,
    pub stopped: SupervisorState,
    pub restart_command: String,
    pub replaced: Vec<PathBuf>,
    /// Critical files the fetched archive did not contain.
    pub skipped: Vec<&'static str>,
    pub pruned: Vec<PathBuf>,
}

/// Result of a restore from backup.
#[derive(Debug)]
pub struct RollbackReport {
    pub restored: BackupRecord,
    pub stopped: SupervisorState,
    pub restart_command: String,
}

/// Drives the update lifecycle against one installation root.
pub struct Updater<'a, R, O> {
    config: &'a UpdaterConfig,
    runner: &'a R,
    operator: &'a O,
    fetcher: &'a Fetcher,
    logger: &'a Logger,
}

impl<'a, R: CommandRunner, O: Operator> Updater<'a, R, O> {
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
        }
    }

    pub async fn run_update(&self, install_root: &Path, patchline: &str) -> Result<UpdateOutcome> {
        let layout = InstallLayout::new(install_root);
        if !layout.is_installed() {
            return Err(UpdaterError::NotInstalled {
                root: install_root.to_path_buf(),
            });
        }

        let current =
            probe_current_version(self.runner, &self.config.java_bin, &layout, self.logger).await;
        self.logger.info("PROBE", format!("Installed version: {current}"));

        let scratch = install_root.join(format!(".probe-{}", std::process::id()));
        let probed = self.probe_latest(&layout, patchline, &scratch).await;
        let _ = fs::remove_dir_all(&scratch);
        let (downloader, latest) = probed?;

        let question = match UpdateDecision::decide(&current, &latest) {
            UpdateDecision::UpToDate => {
                self.logger.info("DECIDE", format!("Already up to date ({latest})"));
                return Ok(UpdateOutcome::UpToDate(latest));
            }
            UpdateDecision::UpdateAvailable => {
                format!("Update server from {current} to {latest}?")
            }
            UpdateDecision::VersionUnknown => {
                format!("Installed version is unknown. Install {latest} anyway?")
            }
        };
        if !self.operator.confirm(&question)? {
            self.logger.info("DECIDE", "Update declined by operator");
            return Ok(UpdateOutcome::Cancelled);
        }

        let lock = InstallLock::acquire(&layout.lock_path())?;
        self.logger
            .debug("LOCK", format!("Holding {}", lock.path().display()));

        let (stopped, restart_command) = self.stop_server(&layout).await?;

        let staging = layout.staging_dir();
        let _ = fs::remove_dir_all(&staging);
        let applied = self
            .apply(&layout, &downloader, patchline, &current, &latest, &staging)
            .await;
        if let Err(err) = fs::remove_dir_all(&staging) {
            self.logger
                .debug("CLEANUP", format!("{} not removed: {err}", staging.display()));
        }
        let (backup, replaced, skipped) = match applied {
            Ok(applied) => applied,
            Err(err) => {
                if stopped.is_running() {
                    self.logger
                        .warn("UPDATE", format!("Server left stopped; start it with: {restart_command}"));
                }
                return Err(err);
            }
        };

        let pruned = self.prune(&layout);
        drop(lock);

        self.logger
            .info("UPDATE", format!("Updated {current} → {latest}; backup {}", backup.path.display()));
        Ok(UpdateOutcome::Updated(UpdateReport {
            from: current,
            to: latest,
            backup,
            stopped,
            restart_command,
            replaced,
            skipped,
            pruned,
        }))
    }

    /// Restore the critical files from a backup (`None` selects the newest).
    ///
    /// Returns `None` when the operator declined.
    pub async fn run_rollback(
        &self,
        install_root: &Path,
        stamp: Option<&str>,
    ) -> Result<Option<RollbackReport>> {
        let layout = InstallLayout::new(install_root);
        let records = list_backups(&layout)?;
        let target = match stamp {
            Some(stamp) => records.iter().find(|record| record.stamp == stamp),
            None => records.last(),
        };
        let Some(target) = target else {
            return Err(UpdaterError::BackupFailed(match stamp {
                Some(stamp) => format!("No backup named `{stamp}` in {}", layout.backups_dir().display()),
                None => format!("No backups found in {}", layout.backups_dir().display()),
            }));
        };

        let question = format!(
            "Restore backup {} (version {}) over {}?",
            target.stamp,
            target.replaced_version,
            layout.server_dir().display()
        );
        if !self.operator.confirm(&question)? {
            self.logger.info("ROLLBACK", "Rollback declined by operator");
            return Ok(None);
        }

        let _lock = InstallLock::acquire(&layout.lock_path())?;
        let (stopped, restart_command) = self.stop_server(&layout).await?;
        let restored = restore_backup(&layout, Some(&target.stamp))?;
        self.logger.info(
            "ROLLBACK",
            format!("Restored {} file(s) from {}", restored.files.len(), restored.path.display()),
        );
        Ok(Some(RollbackReport {
            restored,
            stopped,
            restart_command,
        }))
    }

    /// Stop a running server with operator consent; refusal is `ServerBusy`.
    async fn stop_server(&self, layout: &InstallLayout) -> Result<(SupervisorState, String)> {
        let adapter =
            SupervisorAdapter::new(self.runner, self.logger, &self.config.service.container_prefix);
        let stopped = adapter.detect_running(&self.config.service.name).await;
        if stopped.is_running() {
            let question = format!("The server is running ({stopped}). Stop it to continue?");
            if !self.operator.confirm(&question)? {
                return Err(UpdaterError::ServerBusy);
            }
            adapter.stop(&stopped).await?;
        }
        let restart_command = stopped.suggested_start_command(layout, &self.config.java_bin);
        Ok((stopped, restart_command))
    }

    async fn probe_latest(
        &self,
        layout: &InstallLayout,
        patchline: &str,
        scratch: &Path,
    ) -> Result<(PathBuf, VersionIdentifier)> {
        let downloader = ensure_downloader(
            self.fetcher,
            &self.config.downloader,
            &layout.downloader_path(),
            scratch,
            self.logger,
        )
        .await?;
        let latest = probe_latest_version(
            self.runner,
            &downloader,
            patchline,
            self.config.downloader.probe_budget(),
            scratch,
            self.logger,
        )
        .await?;
        Ok((downloader, latest))
    }

    async fn apply(
        &self,
        layout: &InstallLayout,
        downloader: &Path,
        patchline: &str,
        current: &CurrentVersion,
        latest: &VersionIdentifier,
        staging: &Path,
    ) -> Result<(BackupRecord, Vec<PathBuf>, Vec<&'static str>)> {
        let archive = staging.join(format!("{latest}.zip"));
        download_game_archive(self.runner, downloader, patchline, &archive, self.logger).await?;

        let backup = create_backup(layout, current.normalized())?;
        self.logger.info(
            "BACKUP",
            format!("Saved {} file(s) to {}", backup.files.len(), backup.path.display()),
        );

        let swapped = async {
            let extracted = staging.join("extracted");
            extract_async(&archive, &extracted).await?;
            replace_critical_files(&extracted, layout, self.logger)
        }
        .await;

        match swapped {
            Ok((replaced, skipped)) => Ok((backup, replaced, skipped)),
            Err(err) => {
                let hint = format!(
                    "restore with `--rollback {}` ({})",
                    backup.stamp,
                    backup.path.display()
                );
                self.logger
                    .error("REPLACE", format!("Update aborted after backup; {hint}"));
                Err(match err {
                    UpdaterError::ExtractFailed(message) => {
                        UpdaterError::ExtractFailed(format!("{message}; {hint}"))
                    }
                    UpdaterError::Filesystem(message) => {
                        UpdaterError::Filesystem(format!("{message}; {hint}"))
                    }
                    other => other,
                })
            }
        }
    }

    fn prune(&self, layout: &InstallLayout) -> Vec<PathBuf> {
        if self.config.backup_keep == 0 {
            return Vec::new();
        }
        match prune_backups(layout, self.config.backup_keep) {
            Ok(removed) => {
                for path in &removed {
                    self.logger.info("PRUNE", format!("Removed old backup {}", path.display()));
                }
                removed
            }
            Err(err) => {
                self.logger.warn("PRUNE", format!("Backup pruning skipped: {err}"));
                Vec::new()
            }
        }
    }
}

/// Copy the critical files found in `extracted` over the installation.
///
/// Each file is staged next to its target and renamed into place. Files the
/// archive lacks are reported as skipped.
pub(crate) fn replace_critical_files(
    extracted: &Path,
    layout: &InstallLayout,
    logger: &Logger,
) -> Result<(Vec<PathBuf>, Vec<&'static str>)> {
    let mut replaced = Vec::new();
    let mut skipped = Vec::new();

    for critical in CRITICAL_FILES {
        let Some(source) = critical
            .archive_candidates()
            .into_iter()
            .map(|candidate| extracted.join(candidate))
            .find(|candidate| candidate.is_file())
        else {
            logger.debug("REPLACE", format!("{} not in archive; keeping current", critical.name));
            skipped.push(critical.name);
            continue;
        };

        let target = layout.critical_path(&critical);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let partial = target.with_file_name(format!("{}.partial", critical.name));
        fs::copy(&source, &partial)
            .and_then(|_| fs::rename(&partial, &target))
            .map_err(|err| {
                let _ = fs::remove_file(&partial);
                UpdaterError::Filesystem(format!("Failed to replace {}: {err}", target.display()))
            })?;
        logger.info("REPLACE", format!("Replaced {}", target.display()));
        replaced.push(target);
    }

    Ok((replaced, skipped))
}
