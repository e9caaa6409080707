//! Rasterizing PDF pages to PNG images with poppler's `pdftocairo`.

use std::sync::LazyLock;

use regex::Regex;
use tokio::process::Command;

use crate::{
    cpu_limit::with_cpu_semaphore,
    exec::{check_for_command_failure, error_line_classifier, run_with_timeout},
    pipeline::PipelineOptions,
    prelude::*,
    staging::RequestWorkspace,
};

/// Filename prefix for raw page images inside a workspace.
const PAGE_PREFIX: &str = "page";

/// Matches a raw page image filename and captures its page number.
static PAGE_FILE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^page-0*(\d+)\.png$").expect("failed to compile regex")
});

/// Poppler tools sometimes print errors while still exiting zero.
static FATAL_OUTPUT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

/// Known-noisy poppler message that does not indicate a failed conversion.
static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// One rasterized page of a request's document.
#[derive(Clone, Debug)]
pub struct PageImage {
    /// 1-based physical page number, parsed from the rasterizer's suffix.
    pub number: u32,
    /// Path of the PNG file inside the request workspace.
    pub path: PathBuf,
}

/// Rasterize every page of a PDF into ordered PNG images.
///
/// Fails with [`PipelineError::NoPagesProduced`] when the rasterizer emits no
/// files at all (empty or corrupt document). That error is surfaced
/// immediately and never retried.
#[instrument(level = "debug", skip_all, fields(request_id = %workspace.id(), dpi = options.dpi))]
pub async fn rasterize(
    options: &PipelineOptions,
    workspace: &mut RequestWorkspace,
    pdf_path: &Path,
) -> Result<Vec<PageImage>> {
    // pdftocairo appends `-N.png` to this prefix, one file per page.
    let out_prefix = workspace.dir().join(PAGE_PREFIX);
    let mut cmd = Command::new("pdftocairo");
    cmd.arg("-png")
        .arg("-r")
        .arg(options.dpi.to_string())
        .arg(pdf_path)
        .arg(&out_prefix);

    // `pdftocairo` wants a full core to itself, so take a CPU permit before
    // forking it.
    let output = with_cpu_semaphore(|| {
        run_with_timeout("pdftocairo", cmd, options.stage_timeout())
    })
    .await?;
    let classify =
        error_line_classifier(&FATAL_OUTPUT_REGEX, &DOWNGRADE_TO_WARNING_REGEX);
    let run_result = check_for_command_failure("pdftocairo", &output, Some(&classify));

    let pages = collect_page_images(workspace.dir())?;
    if pages.is_empty() {
        // A corrupt or empty document and a clean zero-page run end the same
        // way for the caller.
        return match run_result {
            Ok(()) => Err(PipelineError::NoPagesProduced.into()),
            Err(err) => Err(anyhow::Error::from(PipelineError::NoPagesProduced)
                .context(format!("pdftocairo reported: {err:#}"))),
        };
    }
    run_result?;
    for page in &pages {
        workspace.track(page.path.clone());
    }
    debug!(
        request_id = %workspace.id(),
        page_count = pages.len(),
        "rasterized document"
    );
    Ok(pages)
}

/// Collect the rasterizer's output files in physical page order.
///
/// Ordering is by the numeric page suffix, never by filename: a lexical sort
/// would place page 10 between pages 1 and 2 once a document reaches double
/// digits.
fn collect_page_images(dir: &Path) -> Result<Vec<PageImage>> {
    let mut pages = vec![];
    let entries = dir
        .read_dir()
        .with_context(|| format!("failed to read workspace {:?}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| {
            format!("failed to read entry in workspace {:?}", dir.display())
        })?;
        let name = entry.file_name();
        let name_lossy = name.to_string_lossy();
        let Some(captures) = PAGE_FILE_REGEX.captures(&name_lossy) else {
            continue;
        };
        let number = captures[1]
            .parse::<u32>()
            .with_context(|| format!("invalid page number in {:?}", name))?;
        pages.push(PageImage {
            number,
            path: entry.path(),
        });
    }
    pages.sort_by_key(|page| page.number);
    Ok(pages)
}
