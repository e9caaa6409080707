//! Deciding whether a PDF already carries a usable digital text layer.

use tokio::process::Command;

use crate::{
    exec::{check_for_command_failure, run_with_timeout},
    pipeline::PipelineOptions,
    prelude::*,
    staging::RequestWorkspace,
};

/// Minimum trimmed length of embedded text before we trust the fast path.
///
/// Scanned documents often carry a handful of stray embedded characters (form
/// labels, watermark text), which must not be mistaken for real content. The
/// threshold is a policy constant; text of exactly this length still goes to
/// OCR.
pub const MIN_DIGITAL_TEXT_CHARS: usize = 20;

/// Is this extracted text substantial enough to skip OCR?
pub fn has_sufficient_text(text: &str) -> bool {
    text.trim().chars().count() > MIN_DIGITAL_TEXT_CHARS
}

/// Extract the embedded text layer from a PDF, if it has a usable one.
///
/// Runs `pdftotext` from poppler-utils and returns `Some(text)` only when the
/// result passes [`has_sufficient_text`]. A `pdftotext` failure is treated as
/// "no embedded text" rather than aborting the request, so corrupt documents
/// fall through to rasterization and get the more specific error from there.
#[instrument(level = "debug", skip_all, fields(request_id = %workspace.id()))]
pub async fn detect_digital_text(
    options: &PipelineOptions,
    workspace: &mut RequestWorkspace,
    pdf_path: &Path,
) -> Result<Option<String>> {
    let text_path = workspace.dir().join("digital.txt");
    workspace.track(text_path.clone());

    let mut cmd = Command::new("pdftotext");
    cmd.arg("-layout").arg(pdf_path).arg(&text_path);
    let output = run_with_timeout("pdftotext", cmd, options.stage_timeout()).await?;

    if let Err(err) = check_for_command_failure("pdftotext", &output, None) {
        warn!(
            request_id = %workspace.id(),
            "embedded text extraction failed, assuming scanned document: {:#}",
            err
        );
        return Ok(None);
    }

    let text = tokio::fs::read_to_string(&text_path)
        .await
        .context("cannot read pdftotext output file")?;
    if has_sufficient_text(&text) {
        debug!(
            request_id = %workspace.id(),
            chars = text.trim().chars().count(),
            "document has a digital text layer"
        );
        Ok(Some(text))
    } else {
        debug!(request_id = %workspace.id(), "no usable digital text layer");
        Ok(None)
    }
}
