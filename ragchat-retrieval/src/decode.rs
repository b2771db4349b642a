//! Turning uploaded bytes into a [`Document`].
//!
//! [`StandardDecoder`] recognises PDF payloads by their `%PDF-` header and
//! extracts one text entry per page. Anything else must be UTF-8 text, where
//! form-feed characters separate pages.

use async_trait::async_trait;
use tracing::debug;

use crate::document::Document;
use crate::error::{RagError, Result};

const PDF_MAGIC: &[u8] = b"%PDF-";
const PAGE_BREAK: char = '\x0c';
const UTF8_BOM: &str = "\u{feff}";

/// Converts an uploaded file into a [`Document`].
#[async_trait]
pub trait DocumentDecoder: Send + Sync {
    /// Decode `bytes` into a document called `name`.
    async fn decode(&self, name: &str, bytes: Vec<u8>) -> Result<Document>;
}

/// The default decoder: PDF text layer when the `pdf` feature is on, UTF-8
/// text otherwise.
///
/// Parsing runs on tokio's blocking pool so large PDFs do not stall the
/// runtime. A panic inside the PDF parser is reported as
/// [`RagError::DecodeError`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardDecoder;

impl StandardDecoder {
    /// Create a new decoder.
    pub fn new() -> Self {
        Self
    }

    /// Decode synchronously on the calling thread.
    pub fn decode_blocking(name: &str, bytes: &[u8]) -> Result<Document> {
        let pages = if bytes.starts_with(PDF_MAGIC) {
            pdf_pages(name, bytes)?
        } else {
            text_pages(name, bytes)?
        };
        debug!(document.name = %name, pages = pages.len(), "decoded document");
        Ok(Document::new(name, pages))
    }
}

#[async_trait]
impl DocumentDecoder for StandardDecoder {
    async fn decode(&self, name: &str, bytes: Vec<u8>) -> Result<Document> {
        let owned_name = name.to_string();
        tokio::task::spawn_blocking(move || Self::decode_blocking(&owned_name, &bytes))
            .await
            .map_err(|e| decode_error(name, format!("decoder task failed: {e}")))?
    }
}

fn decode_error(name: &str, message: impl Into<String>) -> RagError {
    RagError::DecodeError { name: name.to_string(), message: message.into() }
}

fn text_pages(name: &str, bytes: &[u8]) -> Result<Vec<String>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| decode_error(name, format!("not a PDF and not valid UTF-8 text: {e}")))?;
    let text = text.strip_prefix(UTF8_BOM).unwrap_or(text);

    let mut pages: Vec<String> = text.split(PAGE_BREAK).map(str::to_string).collect();
    // A trailing form feed terminates the last page rather than opening a new one.
    if pages.len() > 1 && pages.last().is_some_and(|p| p.is_empty()) {
        pages.pop();
    }
    Ok(pages)
}

#[cfg(feature = "pdf")]
fn pdf_pages(name: &str, bytes: &[u8]) -> Result<Vec<String>> {
    let extracted = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }))
    .map_err(|_| decode_error(name, "PDF parser panicked"))?;

    extracted.map_err(|e| decode_error(name, format!("PDF extraction error: {e}")))
}

#[cfg(not(feature = "pdf"))]
fn pdf_pages(name: &str, _bytes: &[u8]) -> Result<Vec<String>> {
    Err(decode_error(name, "PDF support is not enabled (build with the `pdf` feature)"))
}
