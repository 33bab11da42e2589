//! PDF to Markdown converters
//!
//! The layout-aware engine is tried first; when it fails, the conversion
//! worker cascades to the plain-text extractor, and finally to OCR when the
//! combined output stays under the configured text floor.

use crate::error::{Error, Result};

/// Trait for turning PDF bytes into Markdown text.
///
/// Conversion is CPU-bound and synchronous; the worker wraps calls in
/// `spawn_blocking`.
pub trait PdfToMarkdown: Send + Sync {
    fn convert(&self, pdf_bytes: &[u8]) -> Result<String>;

    /// Connectivity check for the diagnostics endpoint. The in-process
    /// engines have nothing to reach, so the default is healthy.
    fn probe(&self) -> Result<()> {
        Ok(())
    }

    /// Engine name for logging and diagnostics
    fn name(&self) -> &str;
}

/// Layout-aware extraction: full text reconstruction with glyph cleanup.
pub struct LayoutPdf;

impl PdfToMarkdown for LayoutPdf {
    fn convert(&self, pdf_bytes: &[u8]) -> Result<String> {
        let text = pdf_extract::extract_text_from_mem(pdf_bytes)
            .map_err(|e| Error::conversion(format!("layout extraction failed: {e}")))?;

        let cleaned = cleanup_extracted_text(&text);
        Ok(cleaned)
    }

    fn name(&self) -> &str {
        "layout"
    }
}

/// Plain-text fallback: walks page content streams directly.
pub struct PlainTextPdf;

impl PdfToMarkdown for PlainTextPdf {
    fn convert(&self, pdf_bytes: &[u8]) -> Result<String> {
        let doc = lopdf::Document::load_mem(pdf_bytes)
            .map_err(|e| Error::conversion(format!("cannot load PDF: {e}")))?;

        let mut out = String::new();
        for (page_number, page_id) in doc.get_pages() {
            match doc.get_page_content(page_id) {
                Ok(content) => {
                    let text = extract_text_operators(&content);
                    if !text.trim().is_empty() {
                        out.push_str(&format!("## Page {page_number}\n\n"));
                        out.push_str(text.trim());
                        out.push_str("\n\n");
                    }
                }
                Err(e) => {
                    tracing::debug!(page = page_number, "no content stream: {e}");
                }
            }
        }
        Ok(out.trim_end().to_string())
    }

    fn name(&self) -> &str {
        "plain-text"
    }
}

/// Replace problematic glyph sequences and strip control characters.
fn cleanup_extracted_text(text: &str) -> String {
    let replaced = text
        .replace('\u{2018}', "'")
        .replace('\u{2019}', "'")
        .replace('\u{201C}', "\"")
        .replace('\u{201D}', "\"")
        .replace('\u{2022}', "* ")
        .replace('\u{00A0}', " ")
        .replace('\u{FB01}', "fi")
        .replace('\u{FB02}', "fl")
        .replace('\u{FB00}', "ff")
        .replace('\0', "");

    replaced
        .lines()
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Pull text out of `Tj`/`TJ` show operators between BT/ET blocks.
fn extract_text_operators(content: &[u8]) -> String {
    let content_str = String::from_utf8_lossy(content);
    let mut text = String::new();
    let mut in_text_block = false;

    for line in content_str.lines() {
        let line = line.trim();
        match line {
            "BT" => in_text_block = true,
            "ET" => {
                in_text_block = false;
                if !text.ends_with(' ') && !text.is_empty() {
                    text.push(' ');
                }
            }
            _ if in_text_block && (line.ends_with("Tj") || line.ends_with("TJ")) => {
                if let (Some(start), Some(end)) = (line.find('('), line.rfind(')')) {
                    if start < end {
                        let raw = &line[start + 1..end];
                        let decoded = raw
                            .replace("\\n", "\n")
                            .replace("\\r", "\r")
                            .replace("\\t", "\t")
                            .replace("\\(", "(")
                            .replace("\\)", ")")
                            .replace("\\\\", "\\");
                        text.push_str(&decoded);
                    }
                }
            }
            _ => {}
        }
    }

    text
}
