//! Helpers for invoking external command-line tools.
//!
//! Every external process the pipeline runs (`pdftotext`, `pdftocairo`,
//! `tesseract`) goes through [`run_with_timeout`], so no invocation can hang a
//! request forever. Callers that care about suspicious-but-zero-exit output
//! also pass their stderr through [`check_for_command_failure`].

use std::{process::Output, time::Duration};

use regex::Regex;
use tokio::process::Command;

use crate::prelude::*;

/// Run a command, capturing its output, with a bounded execution time.
///
/// On timeout the child is killed (via `kill_on_drop`) and the request fails
/// with [`PipelineError::StageTimeout`].
pub async fn run_with_timeout(
    stage: &'static str,
    mut cmd: Command,
    limit: Duration,
) -> Result<Output> {
    debug!(stage = stage, command = ?cmd.as_std(), "running external command");
    cmd.kill_on_drop(true);
    match tokio::time::timeout(limit, cmd.output()).await {
        Ok(output) => output
            .map_err(PipelineError::Io)
            .with_context(|| format!("failed to run {stage}")),
        Err(_) => Err(PipelineError::StageTimeout {
            stage,
            limit_secs: limit.as_secs(),
        }
        .into()),
    }
}

/// Report any command failure, including the captured error output.
///
/// Some tools (notably poppler's) exit zero while printing errors, so callers
/// may supply a regex that classifies stderr lines as fatal.
pub fn check_for_command_failure(
    command_name: &str,
    output: &Output,
    is_error_line: Option<&dyn Fn(&str) -> bool>,
) -> Result<()> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stdout.trim().is_empty() {
        debug!(command_name, output = %stdout, "standard output from command");
    }
    if !stderr.trim().is_empty() {
        warn!(command_name, output = %stderr, "standard error from command");
    }

    if output.status.success() {
        if let Some(is_error_line) = is_error_line
            && stderr.lines().any(|line| is_error_line(line))
        {
            return Err(anyhow::anyhow!(
                "{} printed error output:\n{}",
                command_name,
                stderr,
            ));
        }
        Ok(())
    } else if let Some(exit_code) = output.status.code() {
        Err(anyhow::anyhow!(
            "{} failed with exit code {} and error output:\n{}",
            command_name,
            exit_code,
            stderr,
        ))
    } else {
        Err(anyhow::anyhow!(
            "{} failed with error output:\n{}",
            command_name,
            stderr,
        ))
    }
}

/// Build an error-line classifier from a fatal regex and a downgrade regex.
///
/// Lines matching `downgrade` are treated as warnings even if they also match
/// `fatal`.
pub fn error_line_classifier<'a>(
    fatal: &'a Regex,
    downgrade: &'a Regex,
) -> impl Fn(&str) -> bool + 'a {
    move |line: &str| fatal.is_match(line) && !downgrade.is_match(line)
}
