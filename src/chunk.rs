//! Overlapping character-window chunker.
//!
//! Splits [`TextUnit`]s into [`Chunk`]s of at most `max_length` characters.
//! Consecutive chunks of the same unit share exactly `overlap` characters.
//! Within each window the split point prefers, in order: a paragraph break,
//! a line break, a sentence end, any whitespace. Only when none of these lie
//! beyond the overlap region is the window hard-cut at `max_length`.
//!
//! Lengths are measured in Unicode scalar values, never bytes, so a chunk
//! boundary cannot fall inside a multi-byte character.
//!
//! Chunk ids are derived from the document id and the chunk's position in
//! that document, so re-chunking an unchanged file yields the same ids and
//! an upsert replaces entries in place.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::models::{Chunk, TextUnit};

/// Split points in order of preference. Each separator stays at the end of
/// the chunk it terminates.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", " ", "\t"];

/// Split `units` into chunks. Chunk indices are contiguous per document,
/// starting at 0, in unit order.
pub fn chunk(units: &[TextUnit], max_length: usize, overlap: usize) -> Vec<Chunk> {
    let max_length = max_length.max(1);
    let overlap = overlap.min(max_length - 1);

    let mut next_index: HashMap<&str, usize> = HashMap::new();
    let mut chunks = Vec::new();

    for unit in units {
        if unit.text.trim().is_empty() {
            continue;
        }

        let counter = next_index
            .entry(unit.source.document_id.as_str())
            .or_insert(0);

        for piece in split_unit(&unit.text, max_length, overlap) {
            chunks.push(make_chunk(unit, *counter, piece));
            *counter += 1;
        }
    }

    chunks
}

fn split_unit(text: &str, max_length: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_length {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    loop {
        let limit = (start + max_length).min(chars.len());
        if limit == chars.len() {
            pieces.push(chars[start..].iter().collect());
            break;
        }

        // The next chunk starts at `end - overlap`, which must move forward.
        let min_end = start + overlap + 1;
        let end = split_point(&chars, min_end, limit).unwrap_or(limit);
        pieces.push(chars[start..end].iter().collect());
        start = end - overlap;
    }

    pieces
}

/// Find the best end (exclusive) in `min_end..=limit`, trying each separator
/// in preference order and taking its last occurrence.
fn split_point(chars: &[char], min_end: usize, limit: usize) -> Option<usize> {
    SEPARATORS.iter().find_map(|sep| {
        let sep: Vec<char> = sep.chars().collect();
        (min_end..=limit)
            .rev()
            .find(|&end| end >= sep.len() && chars[end - sep.len()..end] == sep[..])
    })
}

fn make_chunk(unit: &TextUnit, chunk_index: usize, text: String) -> Chunk {
    Chunk {
        id: chunk_id(&unit.source.document_id, chunk_index),
        text,
        chunk_index,
        source: unit.source.clone(),
    }
}

/// Deterministic entry id for the `chunk_index`-th chunk of a document.
pub fn chunk_id(document_id: &str, chunk_index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(b"#");
    hasher.update(chunk_index.to_string().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}
