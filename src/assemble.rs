//! Packaging extracted text into a DOCX document.

use std::io::Cursor;

use docx_rs::{Docx, Paragraph, Run, RunFonts};

use crate::prelude::*;

/// Default body font of the packaged document.
const DEFAULT_FONT: &str = "Calibri";

/// Default body size in half-points (12pt).
const DEFAULT_SIZE: usize = 24;

/// Serialize extracted text into DOCX bytes.
///
/// One trimmed paragraph per input line; empty lines become empty paragraphs
/// so the document keeps its vertical structure. Deterministic for identical
/// input text.
#[instrument(level = "debug", skip_all, fields(chars = text.len()))]
pub fn assemble_docx(text: &str) -> Result<Vec<u8>> {
    let mut docx = Docx::new()
        .default_fonts(RunFonts::new().ascii(DEFAULT_FONT))
        .default_size(DEFAULT_SIZE);
    for line in text.lines() {
        docx = docx
            .add_paragraph(Paragraph::new().add_run(Run::new().add_text(line.trim())));
    }
    let mut cursor = Cursor::new(Vec::new());
    docx.build()
        .pack(&mut cursor)
        .map_err(|err| PipelineError::Assembly(err.to_string()))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_is_a_zip_package() -> Result<()> {
        let bytes = assemble_docx("Hello world\nSecond paragraph")?;
        // DOCX is a ZIP container; check the magic bytes.
        assert_eq!(&bytes[..4], b"PK\x03\x04");
        Ok(())
    }

    #[test]
    fn identical_text_yields_identical_bytes() -> Result<()> {
        let text = "Line one\n  padded line  \n\nLine after blank";
        assert_eq!(assemble_docx(text)?, assemble_docx(text)?);
        Ok(())
    }

    #[test]
    fn paragraph_text_is_trimmed() -> Result<()> {
        let bytes = assemble_docx("  padded  ")?;
        // The document XML is deflated inside the package, so compare against
        // an assembly of the already-trimmed text instead of inspecting XML.
        assert_eq!(bytes, assemble_docx("padded")?);
        Ok(())
    }

    #[test]
    fn empty_text_still_packages() -> Result<()> {
        let bytes = assemble_docx("")?;
        assert_eq!(&bytes[..4], b"PK\x03\x04");
        Ok(())
    }
}
