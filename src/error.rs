/*============================================================
  Synavera Project: Hytale-Updater
  Module: hytale_updater::error
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Centralise Hytale-Updater error types to provide consistent
    diagnostics and exit semantics across install and update.

  Security / Safety Notes:
    Error contexts expose installation paths and tool output
    only; no credentials are ever captured.

  Dependencies:
    thiserror for ergonomic error definitions.

  Operational Scope:
    Used across modules to propagate failures and consolidate
    exit codes for the binary entry point.

  Revision History:
    2026-10-19 COD  Established updater error taxonomy.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Explicit error taxonomy with actionable context
    - No silent failure paths
    - Stable exit codes for operational tooling
============================================================*/

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use thiserror::Error;

/// Result alias for Hytale-Updater operations.
pub type Result<T> = std::result::Result<T, UpdaterError>;

/// Enumerates high-level error domains surfaced by Hytale-Updater.
#[derive(Debug, Error)]
pub enum UpdaterError {
    #[error("No server installation found at {}; run the installer first (without --update)", root.display())]
    NotInstalled { root: PathBuf },
    #[error("Fetch failed: {0}")]
    FetchFailed(String),
    #[error("Extraction failed: {0}")]
    ExtractFailed(String),
    #[error("Could not determine the latest server version. Downloader output:\n{output}")]
    VersionProbeFailed { output: String },
    #[error("Backup failed: {0}")]
    BackupFailed(String),
    #[error("Server is running and was not stopped; refusing to replace files in use")]
    ServerBusy,
    #[error("Cancelled by operator")]
    OperatorCancelled,
    #[error("Installation at {} is locked by another updater run", path.display())]
    Locked { path: PathBuf },
    #[error("Prerequisite missing: {0}")]
    PrerequisiteMissing(String),
    #[error("Required command `{command}` not found in PATH")]
    CommandMissing { command: String },
    #[error("Command `{command}` failed with status {status}: {stderr}")]
    CommandFailure {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("Configuration: {0}")]
    Config(String),
    #[error("Serialization: {0}")]
    Serialization(String),
    #[error("Filesystem: {0}")]
    Filesystem(String),
    #[error("Runtime: {0}")]
    Runtime(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl UpdaterError {
    /// Numeric exit status for this error category.
    pub fn code(&self) -> u8 {
        match self {
            UpdaterError::OperatorCancelled => 0,
            UpdaterError::NotInstalled { .. } => 2,
            UpdaterError::ServerBusy => 3,
            UpdaterError::Locked { .. } => 4,
            UpdaterError::PrerequisiteMissing(_) => 5,
            UpdaterError::CommandMissing { .. } => 10,
            UpdaterError::CommandFailure { .. } => 11,
            UpdaterError::VersionProbeFailed { .. } => 12,
            UpdaterError::Config(_) => 20,
            UpdaterError::FetchFailed(_) => 30,
            UpdaterError::Serialization(_) => 31,
            UpdaterError::ExtractFailed(_) => 32,
            UpdaterError::Filesystem(_) => 40,
            UpdaterError::Io(_) => 41,
            UpdaterError::BackupFailed(_) => 42,
            UpdaterError::Runtime(_) => 50,
        }
    }

    /// Map error category to a deterministic exit code.
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Whether the error represents a benign, operator-initiated stop.
    pub fn is_benign(&self) -> bool {
        matches!(self, UpdaterError::OperatorCancelled)
    }
}
