//! Upload-to-Markdown conversion
//!
//! Text-like and tabular formats convert synchronously in-process; PDF goes
//! through the provider ladder (layout engine, plain-text extractor, then OCR
//! when the result stays under the text floor). Tabular formats render as
//! Markdown tables with `<br/>`-escaped cell newlines; JSON is pretty-printed
//! inside a fenced code block.

use calamine::Reader;

use crate::error::{Error, Result};
use crate::providers::ProviderRegistry;
use crate::types::document::FileKind;

/// Convert an upload to Markdown.
///
/// PDF conversion is CPU-bound and runs on the blocking pool; OCR is an
/// async provider call.
pub async fn to_markdown(
    kind: FileKind,
    bytes: &[u8],
    providers: &ProviderRegistry,
) -> Result<String> {
    match kind {
        FileKind::Markdown => Ok(decode_text(bytes)),
        FileKind::Text => Ok(decode_text(bytes)),
        FileKind::Json => json_to_markdown(bytes),
        FileKind::Csv => csv_to_markdown(bytes),
        FileKind::Xlsx => xlsx_to_markdown(bytes),
        FileKind::Docx => docx_to_markdown(bytes),
        FileKind::Pdf => pdf_to_markdown(bytes, providers).await,
    }
}

/// Best-effort UTF-8 decoding; invalid sequences are replaced.
fn decode_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).replace('\0', "")
}

/// JSON renders pretty-printed inside a fenced code block labeled `json`.
/// Invalid JSON falls back to the raw text in the same fence.
fn json_to_markdown(bytes: &[u8]) -> Result<String> {
    let text = decode_text(bytes);
    let body = match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(value) => serde_json::to_string_pretty(&value)
            .map_err(|e| Error::conversion(format!("cannot render JSON: {e}")))?,
        Err(_) => text.trim().to_string(),
    };
    Ok(format!("```json\n{body}\n```\n"))
}

/// Escape one Markdown table cell: pipes are escaped, newlines become <br/>.
fn escape_cell(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('|', "\\|")
        .replace("\r\n", "<br/>")
        .replace('\n', "<br/>")
        .replace('\r', "<br/>")
}

/// Render rows as one Markdown table; the first row is the header.
fn rows_to_table(rows: &[Vec<String>]) -> String {
    let Some((header, body)) = rows.split_first() else {
        return String::new();
    };
    let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    if width == 0 {
        return String::new();
    }

    let render_row = |row: &[String]| {
        let mut cells: Vec<String> = row.iter().map(|c| escape_cell(c)).collect();
        cells.resize(width, String::new());
        format!("| {} |", cells.join(" | "))
    };

    let mut out = String::new();
    out.push_str(&render_row(header));
    out.push('\n');
    out.push_str(&format!("|{}\n", "---|".repeat(width)));
    for row in body {
        out.push_str(&render_row(row));
        out.push('\n');
    }
    out
}

/// CSV renders as a single Markdown table.
fn csv_to_markdown(bytes: &[u8]) -> Result<String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| Error::conversion(format!("invalid CSV: {e}")))?;
        rows.push(record.iter().map(|c| c.to_string()).collect());
    }
    Ok(rows_to_table(&rows))
}

/// XLSX renders as one Markdown table per sheet, each under a sheet heading.
fn xlsx_to_markdown(bytes: &[u8]) -> Result<String> {
    let cursor = std::io::Cursor::new(bytes.to_vec());
    let mut workbook = calamine::open_workbook_auto_from_rs(cursor)
        .map_err(|e| Error::conversion(format!("cannot open spreadsheet: {e}")))?;

    let mut out = String::new();
    for sheet_name in workbook.sheet_names().to_vec() {
        let Ok(range) = workbook.worksheet_range(&sheet_name) else {
            continue;
        };
        let rows: Vec<Vec<String>> = range
            .rows()
            .map(|row| row.iter().map(cell_to_string).collect::<Vec<String>>())
            .filter(|row: &Vec<String>| row.iter().any(|c| !c.is_empty()))
            .collect();
        if rows.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("## {sheet_name}\n\n"));
        out.push_str(&rows_to_table(&rows));
    }
    Ok(out)
}

fn cell_to_string(cell: &calamine::Data) -> String {
    match cell {
        calamine::Data::Empty => String::new(),
        calamine::Data::String(s) => s.clone(),
        calamine::Data::Float(f) => f.to_string(),
        calamine::Data::Int(i) => i.to_string(),
        calamine::Data::Bool(b) => b.to_string(),
        calamine::Data::DateTime(dt) => dt.to_string(),
        _ => String::new(),
    }
}

/// DOCX paragraphs become Markdown paragraphs.
fn docx_to_markdown(bytes: &[u8]) -> Result<String> {
    let doc = docx_rs::read_docx(bytes)
        .map_err(|e| Error::conversion(format!("cannot read DOCX: {e}")))?;

    let mut paragraphs: Vec<String> = Vec::new();
    for child in doc.document.children {
        if let docx_rs::DocumentChild::Paragraph(p) = child {
            let mut text = String::new();
            for child in p.children {
                if let docx_rs::ParagraphChild::Run(run) = child {
                    for child in run.children {
                        if let docx_rs::RunChild::Text(t) = child {
                            text.push_str(&t.text);
                        }
                    }
                }
            }
            if !text.trim().is_empty() {
                paragraphs.push(text.trim().to_string());
            }
        }
    }
    Ok(paragraphs.join("\n\n"))
}

/// PDF ladder: layout engine, then plain-text extractor, then OCR when the
/// combined text is shorter than the configured floor.
async fn pdf_to_markdown(bytes: &[u8], providers: &ProviderRegistry) -> Result<String> {
    let layout = providers.pdf_layout().clone();
    let plain = providers.pdf_plain().clone();
    let owned = bytes.to_vec();

    let extracted = tokio::task::spawn_blocking(move || -> Result<String> {
        match layout.convert(&owned) {
            Ok(text) => Ok(text),
            Err(e) => {
                tracing::warn!("layout PDF engine failed, falling back: {e}");
                plain.convert(&owned)
            }
        }
    })
    .await
    .map_err(|e| Error::conversion(format!("PDF conversion task failed: {e}")))?;

    // The ladder may legitimately produce little or no text (image-only
    // scans); OCR is the last resort, and without OCR the empty result
    // stands.
    let text = match extracted {
        Ok(text) => text,
        Err(e) => match providers.ocr() {
            Some(_) => {
                tracing::warn!("PDF extraction failed entirely, deferring to OCR: {e}");
                String::new()
            }
            None => return Err(e),
        },
    };

    if text.chars().count() < providers.min_text_chars() {
        if let Some(ocr) = providers.ocr() {
            tracing::info!(
                extracted_chars = text.chars().count(),
                "PDF text below floor, invoking OCR"
            );
            return ocr.extract(bytes, providers.ocr_languages()).await;
        }
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn markdown_passes_through() {
        let registry = ProviderRegistry::with_embedder(std::sync::Arc::new(
            crate::providers::embedding::HashEmbedder::new(8),
        ));
        let md = b"# Hello\n\nWorld.";
        let out = to_markdown(FileKind::Markdown, md, &registry).await.unwrap();
        assert_eq!(out, "# Hello\n\nWorld.");
    }

    #[test]
    fn json_renders_fenced_pretty() {
        let out = json_to_markdown(br#"{"b":1,"a":[1,2]}"#).unwrap();
        assert!(out.starts_with("```json\n"));
        assert!(out.ends_with("```\n"));
        assert!(out.contains("\"a\": [\n"));
    }

    #[test]
    fn invalid_json_falls_back_to_raw() {
        let out = json_to_markdown(b"{not json").unwrap();
        assert_eq!(out, "```json\n{not json\n```\n");
    }

    #[test]
    fn csv_renders_markdown_table() {
        let csv = b"name,age\nalice,30\nbob,41\n";
        let out = csv_to_markdown(csv).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "| name | age |");
        assert_eq!(lines[1], "|---|---|");
        assert_eq!(lines[2], "| alice | 30 |");
        assert_eq!(lines[3], "| bob | 41 |");
    }

    #[test]
    fn csv_cell_newlines_become_br() {
        let csv = b"note\n\"line one\nline two\"\n";
        let out = csv_to_markdown(csv).unwrap();
        assert!(out.contains("line one<br/>line two"));
    }

    #[test]
    fn csv_pipes_are_escaped() {
        let csv = b"expr\na|b\n";
        let out = csv_to_markdown(csv).unwrap();
        assert!(out.contains("a\\|b"));
    }

    #[test]
    fn empty_csv_renders_empty() {
        assert_eq!(csv_to_markdown(b"").unwrap(), "");
    }

    #[test]
    fn ragged_rows_are_padded() {
        let csv = b"a,b,c\n1\n";
        let out = csv_to_markdown(csv).unwrap();
        assert!(out.contains("| 1 |  |  |"));
    }
}
