//! Text extraction for uploaded files.
//!
//! The format is resolved once per upload from the filename extension
//! ([`DocumentFormat::from_filename`]); each format maps to a [`TextDecoder`]
//! strategy. Decoders return plain UTF-8 text wrapped in [`Document`]s tagged
//! with the originating filename, or a [`DecodeError`] that the ingestion
//! pipeline records without aborting the batch.
//!
//! PDFs decode to one [`Document`] per page, so no chunk spans a page break.

use tracing::debug;

use crate::error::DecodeError;
use crate::models::{Document, DocumentFormat, UploadedFile};

/// Decoding strategy shared by all supported formats.
pub trait TextDecoder: Send + Sync {
    fn decode(&self, file: &UploadedFile) -> Result<Vec<Document>, DecodeError>;
}

/// Extracts the text layer of a PDF.
pub struct PdfDecoder;

/// Strict UTF-8 for `.txt` and `.md`: invalid bytes fail the file.
pub struct PlainTextDecoder {
    format: DocumentFormat,
}

/// Best-effort UTF-8: undecodable bytes are dropped.
pub struct LossyTextDecoder;

impl DocumentFormat {
    /// Resolve the format from a filename's extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Self {
        let ext = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => DocumentFormat::Pdf,
            "txt" => DocumentFormat::Text,
            "md" => DocumentFormat::Markdown,
            _ => DocumentFormat::Other,
        }
    }

    /// Whether a declared MIME type is plausible for this format.
    ///
    /// Generic types (`application/octet-stream`) and the `Other` format
    /// accept anything.
    pub fn accepts_content_type(self, content_type: &str) -> bool {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if mime == "application/octet-stream" {
            return true;
        }
        match self {
            DocumentFormat::Pdf => mime == "application/pdf",
            DocumentFormat::Text | DocumentFormat::Markdown => mime.starts_with("text/"),
            DocumentFormat::Other => true,
        }
    }

    pub fn decoder(self) -> Box<dyn TextDecoder> {
        match self {
            DocumentFormat::Pdf => Box::new(PdfDecoder),
            DocumentFormat::Text | DocumentFormat::Markdown => {
                Box::new(PlainTextDecoder { format: self })
            }
            DocumentFormat::Other => Box::new(LossyTextDecoder),
        }
    }
}

/// Decode an upload with the strategy for its format.
///
/// The extension decides the decoder; a conflicting declared content type is
/// only logged. Documents with empty or whitespace-only text are dropped, and
/// a file left with none is rejected with [`DecodeError::Empty`].
pub fn decode_file(file: &UploadedFile) -> Result<Vec<Document>, DecodeError> {
    let format = DocumentFormat::from_filename(&file.filename);
    if let Some(declared) = file.content_type.as_deref() {
        if !format.accepts_content_type(declared) {
            debug!(file = %file.filename, declared, ?format, "content type disagrees with extension");
        }
    }
    let docs: Vec<Document> = format
        .decoder()
        .decode(file)?
        .into_iter()
        .filter(|d| !d.text.trim().is_empty())
        .collect();
    if docs.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(docs)
}

impl TextDecoder for PdfDecoder {
    fn decode(&self, file: &UploadedFile) -> Result<Vec<Document>, DecodeError> {
        let pages = pdf_extract::extract_text_from_mem_by_pages(&file.bytes)
            .map_err(|e| DecodeError::Pdf(e.to_string()))?;
        Ok(pages
            .into_iter()
            .map(|text| Document {
                source: file.filename.clone(),
                text,
                format: DocumentFormat::Pdf,
            })
            .collect())
    }
}

impl TextDecoder for PlainTextDecoder {
    fn decode(&self, file: &UploadedFile) -> Result<Vec<Document>, DecodeError> {
        let text = std::str::from_utf8(&file.bytes)?;
        Ok(vec![Document {
            source: file.filename.clone(),
            text: text.strip_prefix('\u{feff}').unwrap_or(text).to_string(),
            format: self.format,
        }])
    }
}

impl TextDecoder for LossyTextDecoder {
    fn decode(&self, file: &UploadedFile) -> Result<Vec<Document>, DecodeError> {
        Ok(vec![Document {
            source: file.filename.clone(),
            text: decode_utf8_dropping_invalid(&file.bytes),
            format: DocumentFormat::Other,
        }])
    }
}

/// UTF-8 decode that skips invalid sequences instead of replacing them.
pub fn decode_utf8_dropping_invalid(mut bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    loop {
        match std::str::from_utf8(bytes) {
            Ok(valid) => {
                out.push_str(valid);
                return out;
            }
            Err(e) => {
                let (valid, rest) = bytes.split_at(e.valid_up_to());
                out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                match e.error_len() {
                    Some(len) => bytes = &rest[len..],
                    // Truncated sequence at end of input.
                    None => return out,
                }
            }
        }
    }
}
