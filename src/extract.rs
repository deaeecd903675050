//! Plain-text extraction for uploaded documents.
//!
//! Extraction never fails from the caller's point of view: a document (or a
//! single page of one) that cannot be read contributes the empty string and
//! a warning is logged. Ingestion relies on this to keep concatenating the
//! remaining documents.
//!
//! | Extension | Strategy |
//! |-----------|----------|
//! | `pdf` | `pdf-extract` by page, falling back to `lopdf` page by page |
//! | `docx` | `<w:t>` runs of `word/document.xml` |
//! | `pptx` | `<a:t>` runs of `ppt/slides/slideN.xml`, in slide order |
//! | `txt`, `md` | lossy UTF-8 |

use std::io::Read;
use std::panic::{self, AssertUnwindSafe};

use quick_xml::events::Event;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::Document;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Converts a raw document into plain text.
///
/// Implementations must substitute empty text for unreadable units rather
/// than failing the whole document.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, document: &Document) -> String;
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported document type: {0}")]
    Unsupported(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
}

/// Extension-dispatching extractor used by the CLI and server.
#[derive(Debug, Default, Clone, Copy)]
pub struct FormatExtractor;

impl TextExtractor for FormatExtractor {
    fn extract(&self, document: &Document) -> String {
        match extract_text(document) {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!(document = %document.name, error = %e, "extraction failed; using empty text");
                String::new()
            }
        }
    }
}

/// Extracts text from a document, choosing the strategy by extension.
pub fn extract_text(document: &Document) -> Result<String, ExtractError> {
    let ext = document.extension().unwrap_or_default();
    match ext.as_str() {
        "pdf" => extract_pdf(&document.bytes),
        "docx" => extract_docx(&document.bytes),
        "pptx" => extract_pptx(&document.bytes),
        "txt" | "md" | "text" => Ok(String::from_utf8_lossy(&document.bytes).into_owned()),
        _ => Err(ExtractError::Unsupported(if ext.is_empty() {
            document.name.clone()
        } else {
            ext
        })),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract can panic on malformed content streams.
    let by_pages =
        panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem_by_pages(bytes)));
    match by_pages {
        Ok(Ok(pages)) => Ok(join_pages(pages)),
        Ok(Err(e)) => {
            debug!(error = %e, "pdf-extract failed; retrying page by page");
            extract_pdf_per_page(bytes)
        }
        Err(_) => {
            debug!("pdf-extract panicked; retrying page by page");
            extract_pdf_per_page(bytes)
        }
    }
}

fn extract_pdf_per_page(bytes: &[u8]) -> Result<String, ExtractError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let pages = doc
        .get_pages()
        .keys()
        .map(|&number| match doc.extract_text(&[number]) {
            Ok(text) => text,
            Err(e) => {
                warn!(page = number, error = %e, "unreadable PDF page");
                String::new()
            }
        })
        .collect();
    Ok(join_pages(pages))
}

fn join_pages(pages: Vec<String>) -> String {
    pages
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry_bounded(&mut archive, "word/document.xml")?;
    text_runs(&xml)
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|n| {
            let number = n
                .trim_start_matches("ppt/slides/slide")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .unwrap_or(u32::MAX);
            (number, n.to_string())
        })
        .collect();
    slides.sort();

    let mut texts = Vec::with_capacity(slides.len());
    for (_, name) in slides {
        // One bad slide should not lose the rest of the deck.
        match read_entry_bounded(&mut archive, &name).and_then(|xml| text_runs(&xml)) {
            Ok(text) if !text.is_empty() => texts.push(text),
            Ok(_) => {}
            Err(e) => warn!(slide = %name, error = %e, "unreadable slide"),
        }
    }
    Ok(texts.join("\n"))
}

/// Collects the contents of every `<*:t>` element, space-separated.
fn text_runs(xml: &[u8]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_text = false;
    let mut runs: Vec<String> = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"t" => in_text = false,
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().unwrap_or_default();
                if !text.is_empty() {
                    runs.push(text.into_owned());
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(runs.join(" "))
}
