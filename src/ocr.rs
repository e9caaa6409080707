//! Optical character recognition with the `tesseract` CLI.

use tokio::process::Command;

use crate::{
    cpu_limit::with_cpu_semaphore,
    exec::run_with_timeout,
    pipeline::PipelineOptions,
    prelude::*,
    rasterize::PageImage,
    staging::RequestWorkspace,
};

/// OCR engine mode 3: default, based on what is available.
const OEM: &str = "3";

/// Page segmentation mode 6: assume a single uniform block of text.
///
/// Multi-column and variable layouts are out of scope, and PSM 6 is the most
/// reliable mode for plain scanned documents.
const PSM: &str = "6";

/// Recognize text across the full ordered set of enhanced page images.
///
/// `tesseract` is invoked once for the whole document, fed an explicit list
/// file so the input order is exactly our numeric page order (a shell glob
/// would reintroduce lexical ordering). Fails with
/// [`PipelineError::OcrEngine`] carrying the engine's diagnostics when the
/// process exits nonzero or produces no output file.
#[instrument(level = "debug", skip_all, fields(request_id = %workspace.id(), page_count = pages.len()))]
pub async fn recognize(
    options: &PipelineOptions,
    workspace: &mut RequestWorkspace,
    pages: &[PageImage],
) -> Result<String> {
    let list_path = workspace.dir().join("pages.txt");
    workspace.track(list_path.clone());
    let mut list = String::new();
    for page in pages {
        list.push_str(&page.path.to_string_lossy());
        list.push('\n');
    }
    tokio::fs::write(&list_path, list)
        .await
        .context("cannot write tesseract page list")?;

    // tesseract appends `.txt` to the output base itself.
    let out_base = workspace.dir().join("result");
    let text_path = out_base.with_extension("txt");
    workspace.track(text_path.clone());

    let mut cmd = Command::new("tesseract");
    cmd.arg(&list_path)
        .arg(&out_base)
        .arg("-l")
        .arg(&options.ocr_languages)
        .arg("--oem")
        .arg(OEM)
        .arg("--psm")
        .arg(PSM);
    let output = with_cpu_semaphore(|| {
        run_with_timeout("tesseract", cmd, options.stage_timeout())
    })
    .await?;

    if !output.status.success() {
        return Err(PipelineError::OcrEngine {
            details: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
        .into());
    }

    match tokio::fs::read_to_string(&text_path).await {
        Ok(text) => Ok(text),
        Err(err) => Err(PipelineError::OcrEngine {
            details: format!(
                "engine produced no output file ({err}); stderr:\n{}",
                String::from_utf8_lossy(&output.stderr)
            ),
        }
        .into()),
    }
}
