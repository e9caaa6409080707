//! The conversion pipeline orchestrator.
//!
//! One call to [`process`] handles one uploaded document end to end: decide
//! between the digital-text fast path and the rasterize → enhance → recognize
//! slow path, package the result as DOCX, register it for download, and clean
//! up the request's staging workspace no matter how things ended.

use std::time::Duration;

use clap::Args;
use serde::Serialize;

use crate::{
    artifacts::{Artifact, ArtifactStore},
    assemble, detect, enhance, ocr,
    prelude::*,
    rasterize,
    staging::RequestWorkspace,
};

/// Pipeline configuration, shared by every request.
#[derive(Args, Clone, Debug)]
pub struct PipelineOptions {
    /// Directory holding per-request staging workspaces.
    #[clap(long, default_value = "/tmp/textpress/staging")]
    pub staging_dir: PathBuf,

    /// Resolution, in DPI, used when rasterizing pages for OCR.
    #[clap(long, default_value = "300")]
    pub dpi: u32,

    /// Language set passed to the recognition engine.
    #[clap(long, default_value = "tur+eng")]
    pub ocr_languages: String,

    /// Upper bound, in seconds, on any single external process invocation.
    #[clap(long, default_value = "120")]
    pub stage_timeout_secs: u64,
}

impl PipelineOptions {
    /// The execution bound for external processes.
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

/// Which extraction strategy produced the text.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextSource {
    /// The document's embedded text layer was reused.
    Digital,
    /// The document was rasterized and recognized.
    Ocr,
}

/// The result of one successful conversion.
#[derive(Debug)]
pub struct PipelineOutput {
    pub source: TextSource,
    pub text: String,
    pub artifact: Artifact,
    /// Page count of the slow path; the fast path never counts pages.
    pub page_count: Option<usize>,
}

/// Convert one uploaded document.
///
/// The workspace is cleaned before returning, on success and on every
/// failure path; only the registered output artifact survives the request.
#[instrument(level = "info", skip_all, fields(request_id, bytes = document.len()))]
pub async fn process(
    options: &PipelineOptions,
    store: &ArtifactStore,
    document: Vec<u8>,
) -> Result<PipelineOutput> {
    if document.is_empty() {
        return Err(PipelineError::MissingInput.into());
    }
    match infer::get(&document) {
        Some(kind) if kind.mime_type() == "application/pdf" => {}
        Some(kind) => {
            return Err(PipelineError::UnsupportedInput(kind.mime_type().to_owned()).into());
        }
        None => {
            return Err(PipelineError::UnsupportedInput("unknown type".to_owned()).into());
        }
    }

    let mut workspace = RequestWorkspace::create(&options.staging_dir)?;
    tracing::Span::current().record("request_id", workspace.id());

    let result = run_stages(options, store, &mut workspace, document).await;
    workspace.cleanup();
    match &result {
        Ok(output) => info!(
            source = ?output.source,
            pages = output.page_count,
            artifact = %output.artifact.filename,
            "conversion finished"
        ),
        Err(err) => warn!("conversion failed: {:#}", err),
    }
    result
}

/// The stage sequence proper, separated from [`process`] so that workspace
/// cleanup wraps every exit path exactly once.
async fn run_stages(
    options: &PipelineOptions,
    store: &ArtifactStore,
    workspace: &mut RequestWorkspace,
    document: Vec<u8>,
) -> Result<PipelineOutput> {
    let pdf_path = workspace.dir().join("input.pdf");
    workspace.track(pdf_path.clone());
    tokio::fs::write(&pdf_path, &document)
        .await
        .context("failed to write uploaded document")?;

    // Fast path: reuse the embedded text layer when there is enough of it.
    if let Some(text) = detect::detect_digital_text(options, workspace, &pdf_path).await? {
        let artifact = store.register(&assemble::assemble_docx(&text)?).await?;
        return Ok(PipelineOutput {
            source: TextSource::Digital,
            text,
            artifact,
            page_count: None,
        });
    }

    // Slow path: rasterize, enhance, recognize, in strict sequence. Each
    // stage consumes the previous stage's files by path, so nothing here may
    // be reordered or overlapped.
    let pages = rasterize::rasterize(options, workspace, &pdf_path).await?;
    let page_count = pages.len();
    let enhanced = enhance::enhance_pages(pages).await?;
    for page in &enhanced {
        workspace.track(page.path.clone());
    }
    let text = ocr::recognize(options, workspace, &enhanced).await?;

    let artifact = store.register(&assemble::assemble_docx(&text)?).await?;
    Ok(PipelineOutput {
        source: TextSource::Ocr,
        text,
        artifact,
        page_count: Some(page_count),
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::artifacts::ArtifactOptions;

    use super::*;

    fn test_options(staging_dir: &Path) -> PipelineOptions {
        PipelineOptions {
            staging_dir: staging_dir.to_owned(),
            dpi: 150,
            ocr_languages: "eng".to_owned(),
            stage_timeout_secs: 60,
        }
    }

    fn test_store(dir: &Path) -> Result<ArtifactStore> {
        ArtifactStore::new(&ArtifactOptions {
            artifact_dir: dir.to_owned(),
            artifact_ttl_secs: 90,
        })
    }

    /// Serialize numbered PDF objects with a valid xref table.
    ///
    /// Object offsets are computed while serializing, so poppler reads the
    /// file without repairs.
    fn build_pdf(objects: &[String]) -> Vec<u8> {
        let mut pdf = String::from("%PDF-1.4\n");
        let mut offsets = vec![];
        for (idx, object) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            pdf.push_str(&format!("{} 0 obj\n{object}\nendobj\n", idx + 1));
        }
        let xref_offset = pdf.len();
        pdf.push_str(&format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1));
        for offset in offsets {
            pdf.push_str(&format!("{offset:010} 00000 n \n"));
        }
        pdf.push_str(&format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
            objects.len() + 1
        ));
        pdf.into_bytes()
    }

    /// Build a minimal single-page PDF with an embedded text layer.
    fn minimal_text_pdf(text: &str) -> Vec<u8> {
        let content = format!("BT /F1 12 Tf 72 720 Td ({text}) Tj ET");
        build_pdf(&[
            "<< /Type /Catalog /Pages 2 0 R >>".to_owned(),
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_owned(),
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >>"
                .to_owned(),
            format!(
                "<< /Length {} >>\nstream\n{content}\nendstream",
                content.len()
            ),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_owned(),
        ])
    }

    /// Build a multi-page PDF that renders one large word per page.
    ///
    /// The embedded text stays below [`detect::MIN_DIGITAL_TEXT_CHARS`], so
    /// these documents always take the rasterize/enhance/recognize path, and
    /// the rendered words are big enough for the recognition engine to read
    /// back reliably.
    fn multi_page_scanned_pdf(words: &[&str]) -> Vec<u8> {
        let page_count = words.len();
        let font_obj = 3 + 2 * page_count;
        let kids = (0..page_count)
            .map(|idx| format!("{} 0 R", 3 + idx))
            .collect::<Vec<_>>()
            .join(" ");
        let mut objects = vec![
            "<< /Type /Catalog /Pages 2 0 R >>".to_owned(),
            format!("<< /Type /Pages /Kids [{kids}] /Count {page_count} >>"),
        ];
        for idx in 0..page_count {
            objects.push(format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
                 /Contents {} 0 R /Resources << /Font << /F1 {font_obj} 0 R >> >> >>",
                3 + page_count + idx
            ));
        }
        for word in words {
            let content = format!("BT /F1 72 Tf 120 396 Td ({word}) Tj ET");
            objects.push(format!(
                "<< /Length {} >>\nstream\n{content}\nendstream",
                content.len()
            ));
        }
        objects.push("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_owned());
        build_pdf(&objects)
    }

    #[tokio::test]
    async fn empty_upload_is_rejected() -> Result<()> {
        let staging = tempfile::tempdir()?;
        let artifacts = tempfile::tempdir()?;
        let err = process(
            &test_options(staging.path()),
            &test_store(artifacts.path())?,
            vec![],
        )
        .await
        .expect_err("empty upload should fail");
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingInput)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn non_pdf_upload_is_rejected_before_staging() -> Result<()> {
        let staging = tempfile::tempdir()?;
        let artifacts = tempfile::tempdir()?;
        let err = process(
            &test_options(staging.path()),
            &test_store(artifacts.path())?,
            b"\x89PNG\r\n\x1a\nnot a pdf".to_vec(),
        )
        .await
        .expect_err("non-PDF upload should fail");
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::UnsupportedInput(_))
        ));
        // Rejected before a workspace was ever created.
        assert_eq!(fs::read_dir(staging.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    #[ignore = "Requires poppler-utils to be installed"]
    async fn digital_documents_take_the_fast_path() -> Result<()> {
        let staging = tempfile::tempdir()?;
        let artifacts = tempfile::tempdir()?;
        let store = test_store(artifacts.path())?;
        let pdf = minimal_text_pdf("This document carries an embedded text layer.");

        let output = process(&test_options(staging.path()), &store, pdf).await?;
        assert_eq!(output.source, TextSource::Digital);
        assert!(output.text.contains("embedded text layer"));
        assert_eq!(output.page_count, None);

        // The workspace is gone; only the artifact survives.
        assert_eq!(fs::read_dir(staging.path())?.count(), 0);
        let bytes = store.serve_and_expire(&output.artifact.filename).await?;
        assert_eq!(&bytes[..4], b"PK\x03\x04");
        Ok(())
    }

    #[tokio::test]
    #[ignore = "Requires poppler-utils to be installed"]
    async fn corrupt_documents_fail_with_no_pages_and_no_leaks() -> Result<()> {
        let staging = tempfile::tempdir()?;
        let artifacts = tempfile::tempdir()?;
        let err = process(
            &test_options(staging.path()),
            &test_store(artifacts.path())?,
            b"%PDF-1.4\nthis is not a real document\n".to_vec(),
        )
        .await
        .expect_err("corrupt document should fail");
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::NoPagesProduced)
        ));
        assert_eq!(fs::read_dir(staging.path())?.count(), 0);
        assert_eq!(fs::read_dir(artifacts.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    #[ignore = "Requires poppler-utils and tesseract to be installed"]
    async fn concurrent_slow_path_requests_do_not_interleave() -> Result<()> {
        let staging = tempfile::tempdir()?;
        let artifacts = tempfile::tempdir()?;
        let options = test_options(staging.path());
        let store = test_store(artifacts.path())?;

        // Both documents are multi-page and below the digital-text threshold,
        // so both requests rasterize, enhance and recognize their own page
        // image sets side by side. Any cross-request file bleed would put one
        // document's words into the other's recognized text.
        let first = multi_page_scanned_pdf(&["APPLE", "RIVER"]);
        let second = multi_page_scanned_pdf(&["STONE", "CLOUD"]);
        let (a, b) = tokio::join!(
            process(&options, &store, first),
            process(&options, &store, second),
        );
        let (a, b) = (a?, b?);

        assert_eq!(a.source, TextSource::Ocr);
        assert_eq!(b.source, TextSource::Ocr);
        assert_eq!(a.page_count, Some(2));
        assert_eq!(b.page_count, Some(2));
        assert!(a.text.contains("APPLE") && a.text.contains("RIVER"));
        assert!(!a.text.contains("STONE") && !a.text.contains("CLOUD"));
        assert!(b.text.contains("STONE") && b.text.contains("CLOUD"));
        assert!(!b.text.contains("APPLE") && !b.text.contains("RIVER"));
        assert_ne!(a.artifact.filename, b.artifact.filename);
        assert_eq!(fs::read_dir(staging.path())?.count(), 0);
        Ok(())
    }
}
