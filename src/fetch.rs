/*============================================================
  Synavera Project: Hytale-Updater
  Module: hytale_updater::fetch
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Download zip artifacts over HTTPS, extract them, keep the
    standalone downloader in place and drive it to fetch game
    archives for a patchline.

  Security / Safety Notes:
    Performs plain HTTPS GET requests; archives are not
    signature-checked. Zip entries escaping the destination
    directory are rejected.

  Dependencies:
    reqwest for HTTP, zip for extraction, walkdir for locating
    the downloader binary inside its archive.

  Operational Scope:
    Used by both install and update flows. No retries: a failed
    fetch is reported and the operator re-runs the command.

  Revision History:
    2026-10-19 COD  Implemented artifact fetcher and extractor.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Structured response handling with explicit error paths
    - Idempotent extraction (existing files are overwritten)
    - Configurable timeouts
============================================================*/

use std::fs::File;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use zip::ZipArchive;

use crate::config::DownloaderConfig;
use crate::error::{Result, UpdaterError};
use crate::logger::Logger;
use crate::process::{CommandRunner, CommandSpec};

/// HTTP client for downloader bootstrap archives.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    /// Construct a new fetcher from configuration.
    pub fn new(config: &DownloaderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .user_agent(concat!("Hytale-Updater/", env!("CARGO_PKG_VERSION"), " (linux)"))
            .build()
            .map_err(|err| UpdaterError::FetchFailed(format!("Failed to build HTTP client: {err}")))?;
        Ok(Self { client })
    }

    /// Download `url` to `dest`, replacing any existing file.
    pub async fn fetch(&self, url: &str, dest: &Path) -> Result<PathBuf> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| UpdaterError::FetchFailed(format!("Request to {url} failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdaterError::FetchFailed(format!(
                "{url} responded with status {status}"
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| UpdaterError::FetchFailed(format!("Reading body of {url} failed: {err}")))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|err| {
                UpdaterError::Filesystem(format!("Failed to create {}: {err}", parent.display()))
            })?;
        }
        tokio::fs::write(dest, &body).await.map_err(|err| {
            UpdaterError::Filesystem(format!("Failed to write {}: {err}", dest.display()))
        })?;
        Ok(dest.to_path_buf())
    }
}

/// Extract every file in `archive` under `dest`, overwriting existing files.
///
/// Returns the extracted file paths.
pub fn extract(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(archive).map_err(|err| {
        UpdaterError::ExtractFailed(format!("Failed to open {}: {err}", archive.display()))
    })?;
    let mut zip = ZipArchive::new(file).map_err(|err| {
        UpdaterError::ExtractFailed(format!("{} is not a readable zip: {err}", archive.display()))
    })?;

    std::fs::create_dir_all(dest).map_err(|err| {
        UpdaterError::Filesystem(format!("Failed to create {}: {err}", dest.display()))
    })?;

    let mut written = Vec::new();
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(|err| {
            UpdaterError::ExtractFailed(format!("Corrupt entry #{index} in {}: {err}", archive.display()))
        })?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(UpdaterError::ExtractFailed(format!(
                "Entry `{}` in {} escapes the extraction directory",
                entry.name(),
                archive.display()
            )));
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path).map_err(|err| {
            UpdaterError::Filesystem(format!("Failed to write {}: {err}", out_path.display()))
        })?;
        std::io::copy(&mut entry, &mut out).map_err(|err| {
            UpdaterError::ExtractFailed(format!("Failed to extract `{}`: {err}", entry.name()))
        })?;
        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode & 0o7777))?;
        }
        written.push(out_path);
    }

    Ok(written)
}

/// Async wrapper running [`extract`] on the blocking pool.
pub async fn extract_async(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || extract(&archive, &dest))
        .await
        .map_err(|err| UpdaterError::Runtime(format!("Extraction task failed: {err}")))?
}

/// Make sure the standalone downloader exists at `target`, fetching it if absent.
pub async fn ensure_downloader(
    fetcher: &Fetcher,
    config: &DownloaderConfig,
    target: &Path,
    scratch: &Path,
    logger: &Logger,
) -> Result<PathBuf> {
    if target.is_file() {
        logger.debug("DOWNLOADER", format!("Using {}", target.display()));
        return Ok(target.to_path_buf());
    }

    logger.info("DOWNLOADER", format!("Fetching downloader from {}", config.url));
    let archive = scratch.join("hytale-downloader.zip");
    let unpack_dir = scratch.join("hytale-downloader");
    let installed = async {
        fetcher.fetch(&config.url, &archive).await?;
        extract_async(&archive, &unpack_dir).await?;
        let binary = locate_binary(&unpack_dir, &config.binary_entry).ok_or_else(|| {
            UpdaterError::ExtractFailed(format!(
                "Downloader archive from {} does not contain `{}`",
                config.url, config.binary_entry
            ))
        })?;
        install_executable(&binary, target)
    }
    .await;

    let _ = std::fs::remove_file(&archive);
    let _ = std::fs::remove_dir_all(&unpack_dir);
    installed?;

    logger.info("DOWNLOADER", format!("Installed downloader at {}", target.display()));
    Ok(target.to_path_buf())
}

/// Find the downloader binary, preferring an exact name match.
fn locate_binary(dir: &Path, preferred: &str) -> Option<PathBuf> {
    let files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();

    let name_of = |path: &PathBuf| {
        path.file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    };

    files
        .iter()
        .find(|path| name_of(path) == preferred)
        .or_else(|| {
            files.iter().find(|path| {
                let name = name_of(path);
                name.starts_with("hytale-downloader") && name.contains("linux") && !name.ends_with(".exe")
            })
        })
        .cloned()
}

fn install_executable(source: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(source, target).map_err(|err| {
        UpdaterError::Filesystem(format!("Failed to install {}: {err}", target.display()))
    })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(target, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

/// Run the downloader to fetch the game archive for `patchline` into `dest`.
pub async fn download_game_archive<R: CommandRunner>(
    runner: &R,
    downloader: &Path,
    patchline: &str,
    dest: &Path,
    logger: &Logger,
) -> Result<PathBuf> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let spec = CommandSpec::new(downloader.to_string_lossy())
        .args(["-patchline", patchline, "-download-path"])
        .arg(dest.to_string_lossy())
        .current_dir(dest.parent().unwrap_or(Path::new(".")))
        .interactive();

    logger.info("FETCH", format!("Downloading {patchline} build via {}", spec.display()));
    let output = runner.run(&spec).await.map_err(|err| match err {
        UpdaterError::CommandMissing { command } => {
            UpdaterError::FetchFailed(format!("Downloader `{command}` is not executable"))
        }
        other => other,
    })?;

    if !output.success() {
        return Err(UpdaterError::FetchFailed(format!(
            "Downloader exited with status {} for patchline `{patchline}`",
            output.status.map(|code| code.to_string()).unwrap_or_else(|| "signal".into())
        )));
    }
    if !dest.is_file() {
        return Err(UpdaterError::FetchFailed(format!(
            "Downloader finished but {} was not created",
            dest.display()
        )));
    }
    Ok(dest.to_path_buf())
}


#[cfg(test)]
mod tests {
    use super::testing::write_zip;
    use super::*;
    use crate::process::testing::{failed, ok, ScriptedRunner};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(response: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/hytale-downloader.zip")
    }

    #[test]
    fn extract_overwrites_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("game.zip");
        write_zip(
            &archive,
            &[("Server/HytaleServer.jar", b"new-jar"), ("Assets.zip", b"assets")],
        );
        let dest = dir.path().join("out");
        std::fs::create_dir_all(dest.join("Server")).unwrap();
        std::fs::write(dest.join("Server/HytaleServer.jar"), b"old-jar").unwrap();

        let written = extract(&archive, &dest).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(std::fs::read(dest.join("Server/HytaleServer.jar")).unwrap(), b"new-jar");

        extract(&archive, &dest).unwrap();
        assert_eq!(std::fs::read(dest.join("Assets.zip")).unwrap(), b"assets");
    }

    #[test]
    fn corrupt_archive_is_an_extract_failure() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        std::fs::write(&archive, b"definitely not a zip").unwrap();
        let err = extract(&archive, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, UpdaterError::ExtractFailed(_)));
    }

    #[test]
    fn escaping_entries_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        write_zip(&archive, &[("../outside.txt", b"nope")]);
        let err = extract(&archive, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, UpdaterError::ExtractFailed(_)));
        assert!(!dir.path().join("outside.txt").exists());
    }

    #[test]
    fn locate_prefers_configured_binary_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hytale-downloader-windows-amd64.exe"), b"win").unwrap();
        std::fs::write(dir.path().join("hytale-downloader-linux-amd64"), b"elf").unwrap();
        std::fs::write(dir.path().join("QUICKSTART.md"), b"docs").unwrap();

        let found = locate_binary(dir.path(), "hytale-downloader-linux-amd64").unwrap();
        assert!(found.ends_with("hytale-downloader-linux-amd64"));
        let fallback = locate_binary(dir.path(), "renamed-binary").unwrap();
        assert!(fallback.ends_with("hytale-downloader-linux-amd64"));
    }

    #[tokio::test]
    async fn non_success_status_is_fetch_failure() {
        let url = serve_once(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
        let fetcher = Fetcher::new(&DownloaderConfig::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let err = fetcher.fetch(&url, &dir.path().join("d.zip")).await.unwrap_err();
        assert!(matches!(err, UpdaterError::FetchFailed(_)));
        assert!(!dir.path().join("d.zip").exists());
    }

    #[tokio::test]
    async fn successful_fetch_writes_body() {
        let url = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello").await;
        let fetcher = Fetcher::new(&DownloaderConfig::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = fetcher.fetch(&url, &dir.path().join("nested/d.zip")).await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn present_downloader_is_not_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("hytale-downloader");
        std::fs::write(&target, b"#!/bin/sh\n").unwrap();
        let config = DownloaderConfig {
            url: "http://127.0.0.1:9/unreachable.zip".into(),
            ..DownloaderConfig::default()
        };
        let fetcher = Fetcher::new(&config).unwrap();
        let logger = Logger::stderr_only(false);
        let path = ensure_downloader(&fetcher, &config, &target, &dir.path().join(".staging"), &logger)
            .await
            .unwrap();
        assert_eq!(path, target);
    }

    #[tokio::test]
    async fn downloader_failure_is_fetch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(|_| failed(1, "auth required"));
        let logger = Logger::stderr_only(false);
        let err = download_game_archive(
            &runner,
            Path::new("/opt/hytale/hytale-downloader"),
            "release",
            &dir.path().join("game.zip"),
            &logger,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, UpdaterError::FetchFailed(_)));
    }

    #[tokio::test]
    async fn downloader_success_without_file_is_fetch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(|_| ok(""));
        let logger = Logger::stderr_only(false);
        let err = download_game_archive(
            &runner,
            Path::new("/opt/hytale/hytale-downloader"),
            "release",
            &dir.path().join("game.zip"),
            &logger,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, UpdaterError::FetchFailed(_)));
        assert!(runner.called("/opt/hytale/hytale-downloader -patchline release -download-path"));
    }
}
