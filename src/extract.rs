//! Plain-text extraction for uploaded documents (PDF, DOCX, TXT).
//!
//! The file type comes from the extension when it is recognized; otherwise
//! [`detect_file_type_with_header`] sniffs magic bytes and falls back to a
//! printable-character ratio for plain text.
//! [`extract_text`] never fails: an extraction error yields an empty string,
//! which the ingestion pipeline reports as "no extractable text".

use std::io::Read;
use std::path::Path;

use thiserror::Error;
use tracing::warn;

use rag_harness_core::models::FileType;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

/// File type from the lowercased extension of `filename`.
pub fn detect_file_type(filename: &str) -> FileType {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("pdf") => FileType::Pdf,
        Some("docx") => FileType::Docx,
        Some("txt") => FileType::Txt,
        _ => FileType::Unknown,
    }
}

/// Bytes inspected by the printable-text heuristic.
const SNIFF_LEN: usize = 512;

/// Share of printable bytes above which unknown content is treated as text.
const PRINTABLE_RATIO: f64 = 0.95;

/// File type from the extension, then magic bytes, then a printable-byte
/// heuristic over the first bytes of the content.
pub fn detect_file_type_with_header(filename: &str, header: &[u8]) -> FileType {
    match detect_file_type(filename) {
        FileType::Unknown => sniff(header),
        known => known,
    }
}

fn sniff(header: &[u8]) -> FileType {
    if header.starts_with(b"%PDF") {
        return FileType::Pdf;
    }
    if header.starts_with(b"PK\x03\x04") {
        return FileType::Docx;
    }
    let sample = &header[..header.len().min(SNIFF_LEN)];
    if sample.is_empty() {
        return FileType::Unknown;
    }
    let printable = sample
        .iter()
        .filter(|b| b.is_ascii_graphic() || b.is_ascii_whitespace())
        .count();
    if printable as f64 / sample.len() as f64 > PRINTABLE_RATIO {
        FileType::Txt
    } else {
        FileType::Unknown
    }
}

/// Lowercased extension with its leading dot, or `""`.
pub fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Extract text, mapping any failure to an empty string.
pub fn extract_text(bytes: &[u8], file_type: FileType) -> String {
    match try_extract_text(bytes, file_type) {
        Ok(text) => text,
        Err(e) => {
            warn!(file_type = %file_type, error = %e, "text extraction failed");
            String::new()
        }
    }
}

pub fn try_extract_text(bytes: &[u8], file_type: FileType) -> Result<String, ExtractError> {
    match file_type {
        FileType::Pdf => extract_pdf(bytes),
        FileType::Docx => extract_docx(bytes),
        FileType::Txt => Ok(String::from_utf8_lossy(bytes).into_owned()),
        FileType::Unknown => Err(ExtractError::Unsupported(file_type.to_string())),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract panics on some malformed inputs.
    std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
        .map_err(|_| ExtractError::Pdf("parser panicked".to_string()))?
        .map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    extract_paragraph_text(&doc_xml)
}

/// Concatenate `<w:t>` runs, one line per `<w:p>` paragraph.
fn extract_paragraph_text(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Docx(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" if !out.is_empty() && !out.ends_with('\n') => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}
