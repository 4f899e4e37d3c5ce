/*============================================================
  Synavera Project: Hytale-Updater
  Module: hytale_updater::main
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Entry point for the Hytale dedicated-server updater. Installs
    a fresh server, updates an existing one in place, or restores
    the critical files from a previous backup.

  Security / Safety Notes:
    Every mutating step is gated behind an operator prompt unless
    `--yes` is given. Runs with caller privileges; systemd and
    firewall integration only happen as root.

  Dependencies:
    clap for CLI parsing, chrono for session stamps, tokio.

  Operational Scope:
    Operated by hand or from cron on the machine hosting the
    server installation.

  Revision History:
    2026-10-19 COD  Authored updater entry point.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Result-first error handling with deterministic exits
    - Structured logging following Synavera cadence
    - Configurable execution via CLI, environment and file
============================================================*/

mod backup;
mod config;
mod error;
mod fetch;
mod install;
mod layout;
mod lock;
mod logger;
mod probe;
mod process;
mod prompt;
mod supervisor;
mod update;
mod version;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Local;
use clap::{ArgAction, Parser};

use backup::list_backups;
use config::UpdaterConfig;
use error::Result;
use fetch::Fetcher;
use install::{InstallOutcome, Installer};
use logger::Logger;
use process::SystemRunner;
use prompt::{AssumeYes, Operator, TerminalOperator};
use update::{UpdateOutcome, Updater};

/// Command-line arguments for the updater.
#[derive(Debug, Parser)]
#[command(
    name = "hytale-updater",
    version,
    author = "Synavera Systems",
    about = "Install and update a Hytale dedicated server"
)]
struct Cli {
    /// Update an existing installation instead of installing.
    #[arg(short = 'u', long, action = ArgAction::SetTrue)]
    update: bool,
    /// Restore critical files from a backup (newest when STAMP is omitted).
    #[arg(long, value_name = "STAMP", num_args = 0..=1, default_missing_value = "",
          conflicts_with_all = ["update", "list_backups"])]
    rollback: Option<String>,
    /// List backups of the installation and exit.
    #[arg(long, action = ArgAction::SetTrue, conflicts_with = "update")]
    list_backups: bool,
    /// Installation root.
    #[arg(long, value_name = "PATH")]
    dir: Option<PathBuf>,
    /// Release channel to install or update to.
    #[arg(long, value_name = "NAME")]
    patchline: Option<String>,
    /// Answer yes to every confirmation.
    #[arg(short = 'y', long, action = ArgAction::SetTrue)]
    yes: bool,
    /// Override configuration file path.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Explicit log file path.
    #[arg(long, value_name = "PATH")]
    log: Option<PathBuf>,
    /// Enable verbose logging to stderr.
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) if err.is_benign() => {
            println!("→ {err}");
            err.exit_code()
        }
        Err(err) => {
            eprintln!("[Hytale-Updater] {err}");
            err.exit_code()
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;

    if cli.list_backups {
        print_backups(&config)?;
        return Ok(ExitCode::SUCCESS);
    }

    let mode = if cli.rollback.is_some() {
        "rollback"
    } else if cli.update {
        "update"
    } else {
        "install"
    };
    let session_stamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let log_path = cli
        .log
        .clone()
        .unwrap_or_else(|| config.log_dir().join(format!("{mode}_{session_stamp}.log")));
    let logger = Logger::new(Some(log_path), cli.verbose)?;
    logger.info(
        "INIT",
        format!(
            "Hytale-Updater {} ({mode}) root={} patchline={}",
            env!("CARGO_PKG_VERSION"),
            config.install_dir.display(),
            config.patchline
        ),
    );

    let result = if cli.yes {
        dispatch(&cli, &config, &AssumeYes, &logger).await
    } else {
        dispatch(&cli, &config, &TerminalOperator, &logger).await
    };
    if let Err(err) = &result {
        if !err.is_benign() {
            logger.error("FAIL", err.to_string());
        }
    }
    logger.finalize()?;
    result
}

/// Defaults < config file < environment < CLI flags.
fn build_config(cli: &Cli) -> Result<UpdaterConfig> {
    let file = UpdaterConfig::load_from_optional_path(cli.config.as_deref())?;
    layer_config(cli, file, std::env::vars())
}

fn layer_config<I>(cli: &Cli, mut config: UpdaterConfig, env: I) -> Result<UpdaterConfig>
where
    I: IntoIterator<Item = (String, String)>,
{
    config.apply_env(env)?;
    if let Some(dir) = &cli.dir {
        config.install_dir = dir.clone();
    }
    if let Some(patchline) = &cli.patchline {
        config.patchline = patchline.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn dispatch<O: Operator>(
    cli: &Cli,
    config: &UpdaterConfig,
    operator: &O,
    logger: &Logger,
) -> Result<ExitCode> {
    let runner = SystemRunner;
    let fetcher = Fetcher::new(&config.downloader)?;

    if let Some(stamp) = &cli.rollback {
        let stamp = Some(stamp.as_str()).filter(|stamp| !stamp.is_empty());
        let updater = Updater::new(config, &runner, operator, &fetcher, logger);
        match updater.run_rollback(&config.install_dir, stamp).await? {
            Some(report) => {
                println!(
                    "→ Restored backup {} (version {}).",
                    report.restored.stamp, report.restored.replaced_version
                );
                if report.stopped.is_running() {
                    println!("→ Stopped {} for the restore.", report.stopped);
                }
                println!("→ Start the server with: {}", report.restart_command);
            }
            None => println!("→ Rollback cancelled; nothing changed."),
        }
        return Ok(ExitCode::SUCCESS);
    }

    if cli.update {
        let updater = Updater::new(config, &runner, operator, &fetcher, logger);
        let outcome = updater
            .run_update(&config.install_dir, &config.patchline)
            .await?;
        print_update(&outcome);
        logger.info("COMPLETE", "Update run finished.");
        return Ok(ExitCode::SUCCESS);
    }

    let installer = Installer::new(config, &runner, operator, &fetcher, logger);
    match installer.run_install().await? {
        InstallOutcome::AlreadyInstalled => {
            println!(
                "→ A server is already installed at {}. Run with --update to upgrade it.",
                config.install_dir.display()
            );
        }
        InstallOutcome::Installed(report) => {
            let version = report
                .version
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown version".into());
            println!("→ Installed {version} into {}.", report.root.display());
            if let Some(unit) = &report.service_unit {
                println!("→ systemd unit written to {}.", unit.display());
            }
            if !report.firewall_opened {
                println!("→ Make sure UDP port {} is reachable.", config.port);
            }
            println!("→ Start the server with: {}", report.start_command);
        }
    }
    logger.info("COMPLETE", "Install run finished.");
    Ok(ExitCode::SUCCESS)
}

fn print_update(outcome: &UpdateOutcome) {
    match outcome {
        UpdateOutcome::UpToDate(version) => {
            println!("→ Server is up to date ({version}).");
        }
        UpdateOutcome::Cancelled => println!("→ Update cancelled; nothing changed."),
        UpdateOutcome::Updated(report) => {
            println!("→ Updated {} → {}.", report.from, report.to);
            println!("→ Backup: {}", report.backup.path.display());
            for path in &report.replaced {
                println!("  replaced {}", path.display());
            }
            for name in &report.skipped {
                println!("  skipped {name} (not in archive)");
            }
            if !report.pruned.is_empty() {
                println!("→ Pruned {} old backup(s).", report.pruned.len());
            }
            if report.stopped.is_running() {
                println!("→ Stopped {} for the update.", report.stopped);
            }
            println!("→ Start the server with: {}", report.restart_command);
        }
    }
}

fn print_backups(config: &UpdaterConfig) -> Result<()> {
    let layout = config.layout();
    let records = list_backups(&layout)?;
    if records.is_empty() {
        println!("→ No backups in {}.", layout.backups_dir().display());
        return Ok(());
    }
    for record in &records {
        println!(
            "{}  version={}  files={}  created={}",
            record.stamp,
            record.replaced_version,
            record.files.len(),
            record.created_at
        );
    }
    Ok(())
}
