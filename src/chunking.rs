use crate::document::RawDocument;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Represents a text chunk with metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// The actual text content of this chunk
    pub content: String,
    /// Identifier of the document this chunk belongs to
    pub source: String,
    /// Position of this chunk within its document, starting at 0
    pub ordinal: usize,
}

fn check_window(chunk_size: usize, overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(Error::Configuration(
            "chunk_size must be greater than 0".to_string(),
        ));
    }
    if overlap >= chunk_size {
        return Err(Error::Configuration(format!(
            "chunk_overlap ({}) must be smaller than chunk_size ({})",
            overlap, chunk_size
        )));
    }
    Ok(())
}

/// Split every document independently into overlapping chunks.
///
/// Chunks of one document never depend on the others, so adding a document
/// leaves previously emitted chunks untouched.
pub fn split_documents(
    documents: &[RawDocument],
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>> {
    check_window(chunk_size, overlap)?;

    let mut chunks = Vec::new();
    for document in documents {
        chunks.extend(windows(&document.content, &document.source, chunk_size, overlap));
    }
    Ok(chunks)
}

/// Split a single text into chunks of at most `chunk_size` characters, where
/// consecutive chunks share exactly `overlap` characters.
pub fn split_text(text: &str, source: &str, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    check_window(chunk_size, overlap)?;
    Ok(windows(text, source, chunk_size, overlap))
}

fn windows(text: &str, source: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    // Byte offsets of every char boundary, including the end of the text
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total_chars = boundaries.len() - 1;
    let step = chunk_size - overlap;

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < total_chars {
        let end = (start + chunk_size).min(total_chars);
        chunks.push(Chunk {
            content: text[boundaries[start]..boundaries[end]].to_string(),
            source: source.to_string(),
            ordinal: chunks.len(),
        });
        if end == total_chars {
            break;
        }
        start += step;
    }
    chunks
}

/// Rebuild the original text from the chunks of one document, dropping the
/// leading `overlap` characters each chunk shares with its predecessor.
pub fn merge_chunks(chunks: &[Chunk], overlap: usize) -> String {
    let mut merged = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            merged.push_str(&chunk.content);
        } else {
            merged.extend(chunk.content.chars().skip(overlap));
        }
    }
    merged
}

/// Calculate approximate token count for a text
/// This is a very simple estimation - words plus punctuation
pub fn estimate_token_count(text: &str) -> usize {
    let words = text.split_whitespace().count();
    let punctuation = text.chars().filter(|c| c.is_ascii_punctuation()).count();
    words + punctuation
}
