/*============================================================
  Synavera Project: Hytale-Updater
  Module: hytale_updater::prompt
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Ask the operator for explicit consent before mutating an
    installation or stopping a running server.

  Security / Safety Notes:
    Reads from the controlling terminal only; `--yes` replaces
    prompting with blanket consent for unattended runs.

  Dependencies:
    dialoguer for terminal confirmation prompts.

  Operational Scope:
    Borrowed by the installer and update orchestrator at each
    operator-gated step.

  Revision History:
    2026-10-19 COD  Added operator confirmation seam.
  ------------------------------------------------------------
  SSE Principles Observed:
    - No destructive action without consent
    - Deterministic behaviour for unattended execution
============================================================*/

use dialoguer::Confirm;

use crate::error::{Result, UpdaterError};

/// Source of yes/no answers for operator-gated steps.
pub trait Operator {
    fn confirm(&self, question: &str) -> Result<bool>;
}

/// Prompts on the terminal; answers default to "no".
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalOperator;

impl Operator for TerminalOperator {
    fn confirm(&self, question: &str) -> Result<bool> {
        Confirm::new()
            .with_prompt(question)
            .default(false)
            .interact()
            .map_err(|err| {
                UpdaterError::Runtime(format!(
                    "Cannot prompt for confirmation ({err}); re-run with --yes for unattended use"
                ))
            })
    }
}

/// Consents to everything; selected by `--yes`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeYes;

impl Operator for AssumeYes {
    fn confirm(&self, _question: &str) -> Result<bool> {
        Ok(true)
    }
}
