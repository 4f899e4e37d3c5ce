/*============================================================
  Synavera Project: Hytale-Updater
  Module: hytale_updater::probe
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Ask the installed server, the standalone downloader and the
    Java runtime which versions they carry.

  Security / Safety Notes:
    Runs the installed server jar with `--version` only; the
    downloader probe is killed once its time budget elapses.

  Dependencies:
    regex for Java banner parsing; process runner seam.

  Operational Scope:
    Step one and three of the update flow, and the JDK check
    of the installer.

  Revision History:
    2026-10-19 COD  Implemented version probes.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Best-effort probing where degradation is acceptable
    - Raw output surfaced when parsing fails
============================================================*/

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::error::{Result, UpdaterError};
use crate::layout::{InstallLayout, MAIN_ARTIFACT};
use crate::logger::Logger;
use crate::process::{CommandRunner, CommandSpec};
use crate::version::{parse_downloader_report, CurrentVersion, VersionIdentifier};

static JAVA_BANNER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"version "(\d+)(?:\.(\d+))?"#).expect("valid java banner pattern")
});

/// Query the installed server for its version; never fails.
pub async fn probe_current_version<R: CommandRunner>(
    runner: &R,
    java_bin: &str,
    layout: &InstallLayout,
    logger: &Logger,
) -> CurrentVersion {
    let spec = CommandSpec::new(java_bin)
        .args(["-jar", MAIN_ARTIFACT.name, "--version"])
        .current_dir(layout.server_dir());

    match runner.run(&spec).await {
        Ok(output) if output.success() => {
            let current = CurrentVersion::from_probe(Some(&output.stdout));
            logger.debug("PROBE", format!("Installed version reported as `{}`", output.stdout.trim()));
            current
        }
        Ok(output) => {
            logger.warn(
                "PROBE",
                format!(
                    "`{}` exited with {:?}; treating installed version as unknown",
                    spec.display(),
                    output.status
                ),
            );
            CurrentVersion::Unknown
        }
        Err(err) => {
            logger.warn("PROBE", format!("Version query failed ({err}); treating as unknown"));
            CurrentVersion::Unknown
        }
    }
}

/// Ask the downloader which build `patchline` currently resolves to.
///
/// The downloader is started in `scratch` and killed after `budget`; any
/// partial download it leaves there belongs to the caller to clean up.
pub async fn probe_latest_version<R: CommandRunner>(
    runner: &R,
    downloader: &Path,
    patchline: &str,
    budget: Duration,
    scratch: &Path,
    logger: &Logger,
) -> Result<VersionIdentifier> {
    tokio::fs::create_dir_all(scratch).await.map_err(|err| {
        UpdaterError::Filesystem(format!("Failed to create {}: {err}", scratch.display()))
    })?;

    let spec = CommandSpec::new(downloader.to_string_lossy())
        .args(["-patchline", patchline])
        .current_dir(scratch)
        .timeout(budget);

    let output = runner.run(&spec).await.map_err(|err| match err {
        UpdaterError::CommandMissing { command } => {
            UpdaterError::FetchFailed(format!("Downloader `{command}` is not executable"))
        }
        other => other,
    })?;
    if output.timed_out {
        logger.debug(
            "PROBE",
            format!("Downloader terminated after {}s budget", budget.as_secs()),
        );
    }

    let report = output.combined();
    match parse_downloader_report(&report) {
        Some(latest) => {
            logger.info("PROBE", format!("Latest {patchline} build: {latest}"));
            Ok(latest)
        }
        None => Err(UpdaterError::VersionProbeFailed {
            output: report.trim().to_string(),
        }),
    }
}

/// Major version of the Java runtime, if one is installed.
pub async fn probe_java_major<R: CommandRunner>(runner: &R, java_bin: &str) -> Option<u32> {
    let spec = CommandSpec::new(java_bin).arg("-version");
    let output = runner.run(&spec).await.ok()?;
    parse_java_major(&output.combined())
}

/// Parse `openjdk version "25.0.1"` (or legacy `"1.8.0_392"`) into a major version.
pub fn parse_java_major(banner: &str) -> Option<u32> {
    let caps = JAVA_BANNER.captures(banner)?;
    let first: u32 = caps.get(1)?.as_str().parse().ok()?;
    if first == 1 {
        caps.get(2).and_then(|minor| minor.as_str().parse().ok())
    } else {
        Some(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::{failed, missing, ok, ScriptedRunner};
    use crate::process::CommandOutput;

    #[tokio::test]
    async fn current_version_is_read_from_server_jar() {
        let runner = ScriptedRunner::new(|spec| {
            assert!(spec.cwd.as_ref().unwrap().ends_with("Server"));
            ok("HytaleServer v2026.01.13-50e69c385 (release)\n")
        });
        let layout = InstallLayout::new("/opt/hytale");
        let current =
            probe_current_version(&runner, "java", &layout, &Logger::stderr_only(false)).await;
        assert_eq!(current.normalized(), "2026.01.13-50e69c385");
        assert_eq!(runner.calls(), vec!["java -jar HytaleServer.jar --version"]);
    }

    #[tokio::test]
    async fn failed_current_probe_degrades_to_unknown() {
        let layout = InstallLayout::new("/opt/hytale");
        let logger = Logger::stderr_only(false);

        let crashing = ScriptedRunner::new(|_| failed(1, "Error: Unable to access jarfile"));
        let current = probe_current_version(&crashing, "java", &layout, &logger).await;
        assert_eq!(current, CurrentVersion::Unknown);

        let no_java = ScriptedRunner::new(missing);
        let current = probe_current_version(&no_java, "java", &layout, &logger).await;
        assert_eq!(current, CurrentVersion::Unknown);
    }

    #[tokio::test]
    async fn latest_version_survives_downloader_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(|spec| {
            assert_eq!(spec.timeout, Some(Duration::from_secs(10)));
            Ok(CommandOutput {
                status: None,
                stdout: "downloading latest (\"release\" patchline) to \"2026.01.14-3e7a0ba6c.zip\"\n[====>   ] 12%".into(),
                stderr: String::new(),
                timed_out: true,
            })
        });
        let latest = probe_latest_version(
            &runner,
            Path::new("/opt/hytale/hytale-downloader"),
            "release",
            Duration::from_secs(10),
            &dir.path().join("probe"),
            &Logger::stderr_only(false),
        )
        .await
        .unwrap();
        assert_eq!(latest.as_str(), "2026.01.14-3e7a0ba6c");
        assert!(dir.path().join("probe").is_dir());
    }

    #[tokio::test]
    async fn unparseable_report_surfaces_raw_output() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(|_| failed(1, "please visit https://example.invalid/device to sign in"));
        let err = probe_latest_version(
            &runner,
            Path::new("hytale-downloader"),
            "release",
            Duration::from_secs(1),
            dir.path(),
            &Logger::stderr_only(false),
        )
        .await
        .unwrap_err();
        match err {
            UpdaterError::VersionProbeFailed { output } => assert!(output.contains("sign in")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn java_banners_parse_to_major_versions() {
        assert_eq!(parse_java_major("openjdk version \"25.0.1\" 2025-10-21"), Some(25));
        assert_eq!(parse_java_major("java version \"1.8.0_392\""), Some(8));
        assert_eq!(parse_java_major("openjdk version \"21\" 2023-09-19"), Some(21));
        assert_eq!(parse_java_major("bash: java: command not found"), None);
    }

    #[tokio::test]
    async fn java_major_reads_stderr_banner() {
        let runner = ScriptedRunner::new(|_| {
            Ok(CommandOutput {
                status: Some(0),
                stdout: String::new(),
                stderr: "openjdk version \"25.0.1\" 2025-10-21 LTS".into(),
                timed_out: false,
            })
        });
        assert_eq!(probe_java_major(&runner, "java").await, Some(25));
        assert_eq!(probe_java_major(&ScriptedRunner::new(missing), "java").await, None);
    }
}
