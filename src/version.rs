/*============================================================
  Synavera Project: Hytale-Updater
  Module: hytale_updater::version
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Parse `YYYY.MM.DD-<hash>` server build identifiers out of
    free-form tool output and decide whether an update applies.

  Security / Safety Notes:
    Pure string handling; no I/O performed in this module.

  Dependencies:
    regex for identifier extraction.

  Operational Scope:
    Used by the version prober and the update orchestrator.

  Revision History:
    2026-10-19 COD  Introduced build identifier parsing.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Equality-only comparison; builds carry no ordering
    - Explicit fallbacks for unparseable output
============================================================*/

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

pub const UNKNOWN_VERSION: &str = "unknown";

static BUILD_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}\.\d{2}\.\d{2}-[0-9a-f]+").expect("valid build pattern"));

static DOWNLOAD_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"to "(\d{4}\.\d{2}\.\d{2}-[0-9a-f]+)\.zip""#).expect("valid target pattern")
});

/// A server build identifier such as `2026.01.14-3e7a0ba6c`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionIdentifier(String);

impl VersionIdentifier {
    /// Extract the first build token embedded in `text`.
    pub fn extract(text: &str) -> Option<Self> {
        BUILD_TOKEN
            .find(text)
            .map(|found| Self(found.as_str().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse the latest build from a downloader report.
///
/// Prefers the `to "<build>.zip"` download target and falls back to any
/// bare build token.
pub fn parse_downloader_report(report: &str) -> Option<VersionIdentifier> {
    DOWNLOAD_TARGET
        .captures(report)
        .and_then(|caps| caps.get(1))
        .map(|found| VersionIdentifier(found.as_str().to_string()))
        .or_else(|| VersionIdentifier::extract(report))
}

/// The installed server's version as far as it could be probed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurrentVersion {
    Known { raw: String, normalized: String },
    Unknown,
}

impl CurrentVersion {
    /// Build from raw probe output; blank output means unknown.
    pub fn from_probe(raw: Option<&str>) -> Self {
        let raw = raw.map(|text| text.replace(['\r', '\n'], " ").trim().to_string());
        match raw {
            Some(raw) if !raw.is_empty() && raw != UNKNOWN_VERSION => {
                let normalized = VersionIdentifier::extract(&raw)
                    .map(|id| id.0)
                    .unwrap_or_else(|| raw.clone());
                CurrentVersion::Known { raw, normalized }
            }
            _ => CurrentVersion::Unknown,
        }
    }

    /// Canonical form used for comparison and reporting.
    pub fn normalized(&self) -> &str {
        match self {
            CurrentVersion::Known { normalized, .. } => normalized,
            CurrentVersion::Unknown => UNKNOWN_VERSION,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, CurrentVersion::Known { .. })
    }
}

impl fmt::Display for CurrentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.normalized())
    }
}

/// Outcome of comparing the installed build against the latest one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateDecision {
    UpToDate,
    UpdateAvailable,
    VersionUnknown,
}

impl UpdateDecision {
    pub fn decide(current: &CurrentVersion, latest: &VersionIdentifier) -> Self {
        if !current.is_known() {
            UpdateDecision::VersionUnknown
        } else if current.normalized() == latest.as_str() {
            UpdateDecision::UpToDate
        } else {
            UpdateDecision::UpdateAvailable
        }
    }
}
