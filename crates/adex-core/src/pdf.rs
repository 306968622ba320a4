//! PDF text extraction using lopdf and pdf-extract.

use std::path::Path;

use lopdf::Document;
use tracing::debug;

use crate::error::PdfError;

type Result<T> = std::result::Result<T, PdfError>;

/// A parsed PDF ready for text extraction.
pub struct PdfDocument {
    document: Document,
    raw_data: Vec<u8>,
}

impl PdfDocument {
    /// Parse a PDF from memory.
    ///
    /// Files encrypted with an empty user password are decrypted transparently.
    pub fn load(data: &[u8]) -> Result<Self> {
        let mut document = Document::load_mem(data).map_err(|e| PdfError::Parse(e.to_string()))?;

        let raw_data = if document.is_encrypted() {
            if document.decrypt("").is_err() {
                return Err(PdfError::Encrypted);
            }
            debug!("Decrypted PDF with empty password");

            // pdf-extract reads bytes, so hand it the decrypted form
            let mut decrypted = Vec::new();
            document
                .save_to(&mut decrypted)
                .map_err(|e| PdfError::Parse(format!("failed to save decrypted PDF: {e}")))?;
            decrypted
        } else {
            data.to_vec()
        };

        let pages = document.get_pages().len();
        if pages == 0 {
            return Err(PdfError::NoPages);
        }

        debug!("Loaded PDF with {} pages", pages);
        Ok(Self { document, raw_data })
    }

    /// Parse a PDF and reject it when it has more than `max_pages` pages
    /// (0 disables the limit).
    pub fn load_with_limit(data: &[u8], max_pages: usize) -> Result<Self> {
        let pdf = Self::load(data)?;
        let pages = pdf.page_count();
        if max_pages > 0 && pages > max_pages {
            return Err(PdfError::TooManyPages {
                pages,
                limit: max_pages,
            });
        }
        Ok(pdf)
    }

    pub fn page_count(&self) -> usize {
        self.document.get_pages().len()
    }

    /// Text of the whole document in reading order.
    pub fn extract_text(&self) -> Result<String> {
        pdf_extract::extract_text_from_mem(&self.raw_data)
            .map_err(|e| PdfError::TextExtraction(e.to_string()))
    }
}

/// Read a PDF file and return its text.
pub fn read_text(path: impl AsRef<Path>, max_pages: usize) -> crate::Result<String> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    let pdf = PdfDocument::load_with_limit(&data, max_pages)?;
    let text = pdf.extract_text()?;
    debug!(path = %path.display(), chars = text.len(), "Extracted PDF text");
    Ok(text)
}
