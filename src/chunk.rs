//! Overlapping, boundary-aware text chunker.
//!
//! Splits document text into [`Chunk`]s of at most `chunk_size` characters.
//! Consecutive chunks of one document share exactly `chunk_overlap`
//! characters so that context spanning a cut is visible in both.
//!
//! Each chunk receives a random UUID plus a SHA-256 hash of its text.
//!
//! # Algorithm
//!
//! 1. Work in Unicode scalar values, never bytes, so a cut can't land inside
//!    a multi-byte character.
//! 2. If the remainder fits in `chunk_size`, emit it and stop.
//! 3. Otherwise look for the last break inside the window, in order of
//!    preference: paragraph (`\n\n`), line (`\n`), sentence end (`. `, `! `,
//!    `? `), word (space). A break only counts if the chunk stays longer than
//!    the overlap, which guarantees forward progress.
//! 4. With no usable break, hard-cut at `chunk_size`.
//! 5. Start the next chunk `chunk_overlap` characters before the cut.
//!
//! Chunks are exact slices (nothing is trimmed), so chunk 0 followed by every
//! later chunk minus its first `chunk_overlap` characters reproduces the
//! document.
//!
//! # Example
//!
//! ```rust
//! use docchat::chunk::split_text;
//!
//! let chunks = split_text("notes.txt", "Paris is the capital of France.", 4000, 900).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].source, "notes.txt");
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::{Chunk, Document};

/// Separators tried from coarsest to finest. The break lands after the separator.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", " "];

/// Split every document, concatenating the chunks in input order.
pub fn split_documents(
    documents: &[Document],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<Chunk>, PipelineError> {
    let mut chunks = Vec::new();
    for doc in documents {
        chunks.extend(split_text(&doc.source, &doc.text, chunk_size, chunk_overlap)?);
    }
    Ok(chunks)
}

/// Split one document's text into overlapping chunks.
///
/// # Errors
///
/// - [`PipelineError::Ingestion`] if the text is empty or whitespace-only.
/// - [`PipelineError::InvalidInput`] if `chunk_size` is zero or
///   `chunk_overlap >= chunk_size`.
pub fn split_text(
    source: &str,
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<Chunk>, PipelineError> {
    if chunk_size == 0 || chunk_overlap >= chunk_size {
        return Err(PipelineError::InvalidInput(format!(
            "invalid chunking parameters: size {} overlap {}",
            chunk_size, chunk_overlap
        )));
    }
    if text.trim().is_empty() {
        return Err(PipelineError::Ingestion(format!(
            "{} yielded no text to index",
            source
        )));
    }

    let mut chunks = Vec::new();
    // Char offset and byte offset of the current chunk's first char.
    let mut start = 0usize;
    let mut start_byte = 0usize;
    // Byte offset of each char in the current window, plus the one after it.
    let mut bounds: Vec<usize> = Vec::new();
    loop {
        bounds.clear();
        bounds.extend(
            text[start_byte..]
                .char_indices()
                .take(chunk_size.saturating_add(1))
                .map(|(i, _)| start_byte + i),
        );
        if bounds.len() <= chunk_size {
            chunks.push(make_chunk(
                source,
                chunks.len() as i64,
                start,
                &text[start_byte..],
            ));
            break;
        }

        let end = find_break(text, &bounds, chunk_overlap + 1, chunk_size).unwrap_or(chunk_size);
        chunks.push(make_chunk(
            source,
            chunks.len() as i64,
            start,
            &text[start_byte..bounds[end]],
        ));
        start += end - chunk_overlap;
        start_byte = bounds[end - chunk_overlap];
    }

    Ok(chunks)
}

/// Last separator-terminated position in `[min_end, max_end]` of the window
/// described by `bounds`, or `None`.
fn find_break(text: &str, bounds: &[usize], min_end: usize, max_end: usize) -> Option<usize> {
    if min_end > max_end {
        return None;
    }
    // Separators are at most two chars, so starting two chars early catches
    // one that straddles `min_end`.
    let from = bounds[min_end.saturating_sub(2)];
    let window = &text[from..bounds[max_end]];
    for sep in SEPARATORS {
        if let Some(pos) = window.rfind(sep) {
            let cut = from + pos + sep.len();
            if cut >= bounds[min_end] {
                // Just past an ASCII separator, so always a char boundary.
                if let Ok(idx) = bounds.binary_search(&cut) {
                    return Some(idx);
                }
            }
        }
    }
    None
}

/// Create a single [`Chunk`] with a UUID and SHA-256 content hash.
fn make_chunk(source: &str, index: i64, offset: usize, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        source: source.to_string(),
        chunk_index: index,
        offset,
        text: text.to_string(),
        hash,
    }
}
