/*============================================================
  Synavera Project: Hytale-Updater
  Module: hytale_updater::config
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Build the single configuration object for a run from
    defaults, an optional TOML file and environment overrides.

  Security / Safety Notes:
    Environment variables are read exactly once in `main` and
    passed in explicitly; core logic never reads ambient state.

  Dependencies:
    serde + toml for file parsing, dirs for default locations.

  Operational Scope:
    Constructed at startup and borrowed by the installer,
    updater and all collaborators.

  Revision History:
    2026-10-19 COD  Authored layered updater configuration.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Explicit configuration over ambient globals
    - Deterministic precedence: defaults < file < env < CLI
    - Validation with actionable error messages
============================================================*/

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, UpdaterError};
use crate::layout::InstallLayout;

pub const ENV_INSTALL_DIR: &str = "HYTALE_INSTALL_DIR";
pub const ENV_PATCHLINE: &str = "HYTALE_PATCHLINE";
pub const ENV_DOWNLOADER_URL: &str = "HYTALE_DOWNLOADER_URL";
pub const ENV_JDK_VERSION: &str = "HYTALE_JDK_VERSION";
pub const ENV_PORT: &str = "HYTALE_PORT";
pub const ENV_LOCAL_ARCHIVE: &str = "HYTALE_LOCAL_ARCHIVE";

const DEFAULT_INSTALL_DIR: &str = "/opt/hytale";
const DEFAULT_PATCHLINE: &str = "release";
const DEFAULT_DOWNLOADER_URL: &str = "https://downloader.hytale.com/hytale-downloader.zip";
const DEFAULT_DOWNLOADER_ENTRY: &str = "hytale-downloader-linux-amd64";
const DEFAULT_JDK_VERSION: u32 = 25;
const DEFAULT_PORT: u16 = 5520;

/// Top-level configuration for a Hytale-Updater run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    pub install_dir: PathBuf,
    pub patchline: String,
    pub java_bin: String,
    /// Minimum JDK major version; install mode only.
    pub jdk_version: u32,
    /// Server UDP port opened in the firewall; install mode only.
    pub port: u16,
    /// Pre-downloaded game archive; install mode only.
    pub local_archive: Option<PathBuf>,
    /// Number of backups retained after an update; 0 keeps everything.
    pub backup_keep: usize,
    pub log_dir: Option<PathBuf>,
    pub downloader: DownloaderConfig,
    pub service: ServiceConfig,
}

/// Settings for fetching and driving the standalone downloader.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    pub url: String,
    /// Name of the Linux binary inside the downloader zip.
    pub binary_entry: String,
    /// HTTP timeout in seconds.
    pub timeout: u64,
    /// Budget for the latest-version probe in seconds.
    pub probe_timeout: u64,
}

/// Settings for the supervisor backends.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// systemd unit name, without the `.service` suffix.
    pub name: String,
    /// Container names starting with this prefix are treated as the server.
    pub container_prefix: String,
    pub unit_dir: PathBuf,
    /// Account the systemd unit runs as; root when unset.
    pub user: Option<String>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            install_dir: PathBuf::from(DEFAULT_INSTALL_DIR),
            patchline: DEFAULT_PATCHLINE.to_string(),
            java_bin: "java".to_string(),
            jdk_version: DEFAULT_JDK_VERSION,
            port: DEFAULT_PORT,
            local_archive: None,
            backup_keep: 0,
            log_dir: None,
            downloader: DownloaderConfig::default(),
            service: ServiceConfig::default(),
        }
    }
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DOWNLOADER_URL.to_string(),
            binary_entry: DEFAULT_DOWNLOADER_ENTRY.to_string(),
            timeout: 300,
            probe_timeout: 10,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "hytale".to_string(),
            container_prefix: "hytale".to_string(),
            unit_dir: PathBuf::from("/etc/systemd/system"),
            user: None,
        }
    }
}

impl DownloaderConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1))
    }

    pub fn probe_budget(&self) -> Duration {
        Duration::from_secs(self.probe_timeout.max(1))
    }
}

impl UpdaterConfig {
    /// Load configuration from an explicit path, or the default location when present.
    pub fn load_from_optional_path(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(explicit) => Self::load_from_path(explicit),
            None => match default_config_path() {
                Some(candidate) if candidate.is_file() => Self::load_from_path(&candidate),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Parse a TOML configuration file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            UpdaterError::Config(format!("Failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
            .map_err(|err| UpdaterError::Config(format!("{}: {err}", path.display())))
    }

    pub fn from_toml_str(raw: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Apply recognised environment overrides from the given variable set.
    pub fn apply_env<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in vars {
            let value: String = value.into();
            if value.trim().is_empty() {
                continue;
            }
            match key.as_ref() {
                ENV_INSTALL_DIR => self.install_dir = PathBuf::from(value),
                ENV_PATCHLINE => self.patchline = value,
                ENV_DOWNLOADER_URL => self.downloader.url = value,
                ENV_JDK_VERSION => {
                    self.jdk_version = value.trim().parse().map_err(|err| {
                        UpdaterError::Config(format!("{ENV_JDK_VERSION}=`{value}`: {err}"))
                    })?;
                }
                ENV_PORT => {
                    self.port = value.trim().parse().map_err(|err| {
                        UpdaterError::Config(format!("{ENV_PORT}=`{value}`: {err}"))
                    })?;
                }
                ENV_LOCAL_ARCHIVE => self.local_archive = Some(PathBuf::from(value)),
                _ => {}
            }
        }
        Ok(())
    }

    /// Reject combinations that cannot produce a working run.
    pub fn validate(&self) -> Result<()> {
        if self.patchline.trim().is_empty() {
            return Err(UpdaterError::Config("patchline must not be empty".into()));
        }
        if self.install_dir.as_os_str().is_empty() {
            return Err(UpdaterError::Config("install_dir must not be empty".into()));
        }
        if self.port == 0 {
            return Err(UpdaterError::Config("port must be non-zero".into()));
        }
        if self.service.name.trim().is_empty() || self.service.container_prefix.trim().is_empty()
        {
            return Err(UpdaterError::Config(
                "service name and container prefix must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn layout(&self) -> InstallLayout {
        InstallLayout::new(self.install_dir.clone())
    }

    /// Directory receiving session logs.
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| {
            dirs::state_dir()
                .or_else(dirs::data_local_dir)
                .unwrap_or_else(std::env::temp_dir)
                .join("hytale-updater")
                .join("logs")
        })
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("hytale-updater").join("config.toml"))
}
