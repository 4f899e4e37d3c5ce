/*============================================================
  Synavera Project: Hytale-Updater
  Module: hytale_updater::backup
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Snapshot the critical server files into timestamped backup
    directories, and list, restore or prune those snapshots.

  Security / Safety Notes:
    Backups live inside the installation root and inherit its
    permissions. Digests guard restores against corrupted copies.

  Dependencies:
    chrono for stamps, sha2 for digests, serde_json for the
    per-backup manifest.

  Operational Scope:
    Created by every update before files are replaced; restored
    through `--rollback`.

  Revision History:
    2026-10-19 COD  Implemented backup store.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Backup completes before any destructive step
    - Manifest written atomically (temp file + rename)
    - Missing optional artifacts are skipped, not fatal
============================================================*/

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use chrono::{Local, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, UpdaterError};
use crate::layout::{InstallLayout, CRITICAL_FILES};

pub const MANIFEST_FILE: &str = "manifest.json";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// A completed backup directory and what it holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub stamp: String,
    pub created_at: String,
    /// Version that was installed when the backup was taken.
    pub replaced_version: String,
    pub files: Vec<BackedUpFile>,
    #[serde(skip)]
    pub path: PathBuf,
}

/// One file copied into a backup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackedUpFile {
    /// File name inside the backup directory.
    pub name: String,
    /// Original location relative to the installation root.
    pub relative: PathBuf,
    pub size: u64,
    pub sha256: String,
}

/// Copy the critical files into `backups/<YYYYMMDD_HHMMSS>`.
pub fn create_backup(layout: &InstallLayout, replaced_version: &str) -> Result<BackupRecord> {
    let backups_dir = layout.backups_dir();
    fs::create_dir_all(&backups_dir).map_err(|err| {
        UpdaterError::BackupFailed(format!("Cannot create {}: {err}", backups_dir.display()))
    })?;

    let base_stamp = Local::now().format(STAMP_FORMAT).to_string();
    let (stamp, dir) = claim_directory(&backups_dir, &base_stamp)?;

    match populate(layout, &dir, &stamp, replaced_version) {
        Ok(record) => Ok(record),
        Err(err) => {
            let _ = fs::remove_dir_all(&dir);
            Err(UpdaterError::BackupFailed(format!(
                "Snapshot {} abandoned: {err}",
                dir.display()
            )))
        }
    }
}

fn claim_directory(backups_dir: &Path, base_stamp: &str) -> Result<(String, PathBuf)> {
    for attempt in 0..100u32 {
        let stamp = if attempt == 0 {
            base_stamp.to_string()
        } else {
            format!("{base_stamp}_{attempt}")
        };
        let dir = backups_dir.join(&stamp);
        match fs::create_dir(&dir) {
            Ok(()) => return Ok((stamp, dir)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(UpdaterError::BackupFailed(format!(
                    "Cannot create {}: {err}",
                    dir.display()
                )))
            }
        }
    }
    Err(UpdaterError::BackupFailed(format!(
        "Too many backups stamped {base_stamp}"
    )))
}

fn populate(
    layout: &InstallLayout,
    dir: &Path,
    stamp: &str,
    replaced_version: &str,
) -> Result<BackupRecord> {
    let mut files = Vec::new();
    for critical in CRITICAL_FILES {
        let source = layout.critical_path(&critical);
        if !source.is_file() {
            continue;
        }
        let target = dir.join(critical.name);
        let size = fs::copy(&source, &target).map_err(|err| {
            UpdaterError::Filesystem(format!("Failed to copy {}: {err}", source.display()))
        })?;
        files.push(BackedUpFile {
            name: critical.name.to_string(),
            relative: critical.relative_path(),
            size,
            sha256: digest_file(&target)?,
        });
    }

    let record = BackupRecord {
        stamp: stamp.to_string(),
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        replaced_version: replaced_version.to_string(),
        files,
        path: dir.to_path_buf(),
    };
    write_manifest(&record, dir)?;
    Ok(record)
}

fn write_manifest(record: &BackupRecord, dir: &Path) -> Result<()> {
    let staged = dir.join(format!("{MANIFEST_FILE}.tmp"));
    let file = File::create(&staged).map_err(|err| {
        UpdaterError::Filesystem(format!("Failed to create {}: {err}", staged.display()))
    })?;
    serde_json::to_writer_pretty(file, record)
        .map_err(|err| UpdaterError::Serialization(format!("Failed to write backup manifest: {err}")))?;
    fs::rename(&staged, dir.join(MANIFEST_FILE))?;
    Ok(())
}

fn read_manifest(dir: &Path) -> Result<BackupRecord> {
    let path = dir.join(MANIFEST_FILE);
    let file = File::open(&path).map_err(|err| {
        UpdaterError::Filesystem(format!("Failed to open {}: {err}", path.display()))
    })?;
    let mut record: BackupRecord = serde_json::from_reader(BufReader::new(file))
        .map_err(|err| UpdaterError::Serialization(format!("{}: {err}", path.display())))?;
    record.path = dir.to_path_buf();
    Ok(record)
}

fn digest_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// All readable backups, oldest first.
pub fn list_backups(layout: &InstallLayout) -> Result<Vec<BackupRecord>> {
    let backups_dir = layout.backups_dir();
    if !backups_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut records: Vec<BackupRecord> = fs::read_dir(&backups_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| read_manifest(&entry.path()).ok())
        .collect();
    records.sort_by(|a, b| a.stamp.cmp(&b.stamp));
    Ok(records)
}

/// Copy a backup's files back over the installation.
///
/// `stamp = None` selects the newest backup. Every digest is verified before
/// the first file is written.
pub fn restore_backup(layout: &InstallLayout, stamp: Option<&str>) -> Result<BackupRecord> {
    let record = match stamp {
        Some(stamp) => {
            let dir = layout.backups_dir().join(stamp);
            if !dir.is_dir() {
                return Err(UpdaterError::BackupFailed(format!("No backup named {stamp}")));
            }
            read_manifest(&dir)?
        }
        None => list_backups(layout)?
            .pop()
            .ok_or_else(|| UpdaterError::BackupFailed("No backups available".into()))?,
    };

    for file in &record.files {
        let stored = record.path.join(&file.name);
        let actual = digest_file(&stored).map_err(|err| {
            UpdaterError::BackupFailed(format!("Cannot read {}: {err}", stored.display()))
        })?;
        if actual != file.sha256 {
            return Err(UpdaterError::BackupFailed(format!(
                "{} does not match its recorded digest",
                stored.display()
            )));
        }
    }

    for file in &record.files {
        let target = layout.root().join(&file.relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(record.path.join(&file.name), &target).map_err(|err| {
            UpdaterError::Filesystem(format!("Failed to restore {}: {err}", target.display()))
        })?;
    }

    Ok(record)
}

/// Delete the oldest backups so that at most `keep` remain.
pub fn prune_backups(layout: &InstallLayout, keep: usize) -> Result<Vec<PathBuf>> {
    let records = list_backups(layout)?;
    if records.len() <= keep {
        return Ok(Vec::new());
    }

    let remove_count = records.len() - keep;
    let mut removed = Vec::new();
    for record in records.into_iter().take(remove_count) {
        fs::remove_dir_all(&record.path).map_err(|err| {
            UpdaterError::Filesystem(format!("Failed to prune {}: {err}", record.path.display()))
        })?;
        removed.push(record.path);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{ASSETS_ARCHIVE, MAIN_ARTIFACT, NATIVE_IMAGE};

    fn seeded_install() -> (tempfile::TempDir, InstallLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = InstallLayout::new(dir.path());
        fs::create_dir_all(layout.server_dir()).unwrap();
        fs::write(layout.critical_path(&MAIN_ARTIFACT), b"jar-v1").unwrap();
        fs::write(layout.critical_path(&NATIVE_IMAGE), b"aot-v1").unwrap();
        fs::write(layout.critical_path(&ASSETS_ARCHIVE), b"assets-v1").unwrap();
        (dir, layout)
    }

    #[test]
    fn backup_then_restore_round_trips() {
        let (_dir, layout) = seeded_install();
        let record = create_backup(&layout, "2026.01.13-50e69c385").unwrap();
        assert_eq!(record.files.len(), 3);
        assert!(record.path.starts_with(layout.backups_dir()));
        assert!(record.path.join(MANIFEST_FILE).is_file());

        for critical in CRITICAL_FILES {
            fs::write(layout.critical_path(&critical), b"post-update").unwrap();
        }

        restore_backup(&layout, Some(&record.stamp)).unwrap();
        assert_eq!(fs::read(layout.critical_path(&MAIN_ARTIFACT)).unwrap(), b"jar-v1");
        assert_eq!(fs::read(layout.critical_path(&NATIVE_IMAGE)).unwrap(), b"aot-v1");
        assert_eq!(fs::read(layout.critical_path(&ASSETS_ARCHIVE)).unwrap(), b"assets-v1");
    }

    #[test]
    fn stamp_has_second_resolution() {
        let (_dir, layout) = seeded_install();
        let record = create_backup(&layout, "unknown").unwrap();
        let (date, time) = record.stamp.split_once('_').unwrap();
        assert_eq!(date.len(), 8);
        assert_eq!(time.len(), 6);
        assert!(date.chars().chain(time.chars()).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn missing_optional_files_are_skipped() {
        let (_dir, layout) = seeded_install();
        fs::remove_file(layout.critical_path(&NATIVE_IMAGE)).unwrap();
        let record = create_backup(&layout, "unknown").unwrap();
        let names: Vec<&str> = record.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["HytaleServer.jar", "Assets.zip"]);
    }

    #[test]
    fn same_second_backups_get_distinct_directories() {
        let (_dir, layout) = seeded_install();
        let first = create_backup(&layout, "a").unwrap();
        let second = create_backup(&layout, "b").unwrap();
        assert_ne!(first.path, second.path);
        assert_eq!(list_backups(&layout).unwrap().len(), 2);
    }

    #[test]
    fn tampered_backup_is_refused() {
        let (_dir, layout) = seeded_install();
        let record = create_backup(&layout, "a").unwrap();
        fs::write(record.path.join(MAIN_ARTIFACT.name), b"corrupted").unwrap();
        fs::write(layout.critical_path(&MAIN_ARTIFACT), b"current").unwrap();

        let err = restore_backup(&layout, None).unwrap_err();
        assert!(matches!(err, UpdaterError::BackupFailed(_)));
        assert_eq!(fs::read(layout.critical_path(&MAIN_ARTIFACT)).unwrap(), b"current");
    }

    #[test]
    fn prune_keeps_newest() {
        let (_dir, layout) = seeded_install();
        for stamp in ["20260101_000000", "20260102_000000", "20260103_000000"] {
            let dir = layout.backups_dir().join(stamp);
            fs::create_dir_all(&dir).unwrap();
            let record = BackupRecord {
                stamp: stamp.to_string(),
                created_at: String::new(),
                replaced_version: "x".into(),
                files: Vec::new(),
                path: dir.clone(),
            };
            write_manifest(&record, &dir).unwrap();
        }

        let removed = prune_backups(&layout, 2).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(removed[0].ends_with("20260101_000000"));
        let remaining: Vec<String> = list_backups(&layout).unwrap().into_iter().map(|r| r.stamp).collect();
        assert_eq!(remaining, vec!["20260102_000000", "20260103_000000"]);
        assert!(prune_backups(&layout, 5).unwrap().is_empty());
    }

    #[test]
    fn restore_without_backups_fails() {
        let (_dir, layout) = seeded_install();
        assert!(matches!(
            restore_backup(&layout, None).unwrap_err(),
            UpdaterError::BackupFailed(_)
        ));
    }
}
