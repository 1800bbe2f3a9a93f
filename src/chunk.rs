//! Overlapping-window text chunker.
//!
//! Splits UTF-8 text into windows of at most `max_chars` characters with
//! `overlap_chars` of trailing context carried into the next window.
//! Windows prefer to break on a newline, then on a space, and fall back to
//! a hard character split. Each chunk records the byte offset and length of
//! its (whitespace-trimmed) text within the original input, plus a SHA-256
//! content hash used for embedding dedup and cache keys.
//!
//! The chunker is deterministic: identical input yields identical
//! `(index, byte_offset, text, sha256)` tuples on every run.

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Split text into overlapping chunks. Empty or whitespace-only input
/// produces zero chunks.
pub fn chunk_text(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<Chunk> {
    debug_assert!(overlap_chars < max_chars);

    if text.trim().is_empty() {
        return Vec::new();
    }

    // Byte offset of every char, plus an end sentinel, so window math can
    // run in char space while offsets stay byte-accurate.
    let mut char_pos: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    char_pos.push(text.len());
    let total_chars = char_pos.len() - 1;

    let mut chunks = Vec::new();
    let mut index: i64 = 0;
    let mut start_char = 0usize;

    while start_char < total_chars {
        let end_char = (start_char + max_chars).min(total_chars);
        let start_byte = char_pos[start_char];
        let end_byte = char_pos[end_char];

        let break_char = if end_char < total_chars {
            find_break(text, &char_pos, start_char, start_byte, end_byte).unwrap_or(end_char)
        } else {
            end_char
        };
        let break_byte = char_pos[break_char];

        let piece = &text[start_byte..break_byte];
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            let leading = piece.len() - piece.trim_start().len();
            chunks.push(make_chunk(
                index,
                (start_byte + leading) as i64,
                trimmed,
            ));
            index += 1;
        }

        if break_char >= total_chars {
            break;
        }
        start_char = break_char
            .saturating_sub(overlap_chars)
            .max(start_char + 1);
    }

    chunks
}

/// Prefer the last newline in the window, then the last space. Returns the
/// char index just past the boundary, or `None` for a hard split.
fn find_break(
    text: &str,
    char_pos: &[usize],
    start_char: usize,
    start_byte: usize,
    end_byte: usize,
) -> Option<usize> {
    let window = &text[start_byte..end_byte];
    let boundary = window.rfind('\n').or_else(|| window.rfind(' '))?;
    let boundary_byte = start_byte + boundary + 1;
    let boundary_char = char_pos.partition_point(|&b| b < boundary_byte);
    if boundary_char > start_char {
        Some(boundary_char)
    } else {
        None
    }
}

fn make_chunk(index: i64, byte_offset: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let sha256 = format!("{:x}", hasher.finalize());

    Chunk {
        index,
        byte_offset,
        byte_len: text.len() as i64,
        text: text.to_string(),
        sha256,
    }
}
