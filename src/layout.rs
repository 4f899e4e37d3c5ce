/*============================================================
  Synavera Project: Hytale-Updater
  Module: hytale_updater::layout
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Describe the persisted on-disk layout of a server
    installation and the critical file set swapped on update.

  Security / Safety Notes:
    Pure path arithmetic; no I/O beyond existence checks.

  Dependencies:
    None beyond std.

  Operational Scope:
    Shared by the installer, updater and backup store so every
    component agrees on where artifacts live.

  Revision History:
    2026-10-19 COD  Introduced installation layout contract.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Single source of truth for filesystem contracts
    - Clear data contracts between modules
============================================================*/

use std::path::{Path, PathBuf};

pub const SERVER_DIR: &str = "Server";
pub const BACKUPS_DIR: &str = "backups";
pub const STAGING_DIR: &str = ".staging";
pub const LOCK_FILE: &str = ".update.lock";
pub const INSTALL_MARKER: &str = ".install-in-progress";
pub const DOWNLOADER_BIN: &str = "hytale-downloader";

/// A file that must be swapped to apply a server update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CriticalFile {
    /// File name inside `Server/`.
    pub name: &'static str,
    /// Whether an installation must contain this file.
    pub required: bool,
}

impl CriticalFile {
    /// Path relative to the installation root.
    pub fn relative_path(&self) -> PathBuf {
        Path::new(SERVER_DIR).join(self.name)
    }

    /// Locations inside an extracted game archive, in lookup order.
    pub fn archive_candidates(&self) -> [PathBuf; 2] {
        [Path::new(SERVER_DIR).join(self.name), PathBuf::from(self.name)]
    }
}

pub const MAIN_ARTIFACT: CriticalFile = CriticalFile {
    name: "HytaleServer.jar",
    required: true,
};

pub const NATIVE_IMAGE: CriticalFile = CriticalFile {
    name: "HytaleServer.aot",
    required: false,
};

pub const ASSETS_ARCHIVE: CriticalFile = CriticalFile {
    name: "Assets.zip",
    required: false,
};

pub const CRITICAL_FILES: [CriticalFile; 3] = [MAIN_ARTIFACT, NATIVE_IMAGE, ASSETS_ARCHIVE];

/// Paths derived from an installation root.
#[derive(Debug, Clone)]
pub struct InstallLayout {
    root: PathBuf,
}

impl InstallLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn server_dir(&self) -> PathBuf {
        self.root.join(SERVER_DIR)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join(BACKUPS_DIR)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    pub fn marker_path(&self) -> PathBuf {
        self.root.join(INSTALL_MARKER)
    }

    pub fn downloader_path(&self) -> PathBuf {
        self.root.join(DOWNLOADER_BIN)
    }

    pub fn main_artifact(&self) -> PathBuf {
        self.root.join(MAIN_ARTIFACT.relative_path())
    }

    pub fn critical_path(&self, file: &CriticalFile) -> PathBuf {
        self.root.join(file.relative_path())
    }

    /// An installation exists once the main artifact is in place.
    pub fn is_installed(&self) -> bool {
        self.main_artifact().is_file()
    }
}
