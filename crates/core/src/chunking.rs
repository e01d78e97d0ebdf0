use crate::error::IngestError;
use crate::models::{DocumentChunk, PipelineOptions};
use tracing::warn;

const MAX_STUCK_ITERATIONS: u32 = 5;

/// Splits page text into overlapping chunks, cutting at sentence or word
/// boundaries where possible. Offsets are in Unicode scalar values, so a cut
/// never lands inside a code point.
#[derive(Debug, Clone, Copy)]
pub struct ChunkSegmenter {
    max_chunk_size: usize,
    overlap_size: usize,
}

impl ChunkSegmenter {
    pub fn new(options: &PipelineOptions) -> Result<Self, IngestError> {
        options.validate()?;
        Ok(Self {
            max_chunk_size: options.max_chunk_size,
            overlap_size: options.overlap_size,
        })
    }

    /// Returns the chunks carved out of `text` plus the carry-over tail: the
    /// trailing fragment that may still be extended by the next page before
    /// it is final. The caller decides whether the last chunk is provisional.
    pub fn segment(
        &self,
        text: &str,
        start_chunk: u64,
        page: u32,
    ) -> (Vec<DocumentChunk>, String) {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let mut chunks = Vec::new();

        if total <= self.max_chunk_size {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                chunks.push(DocumentChunk {
                    content: trimmed.to_string(),
                    page,
                    chunk: start_chunk,
                });
            }
            return (chunks, text.to_string());
        }

        let min_progress = (self.max_chunk_size / 10).max(1);
        let mut carry = String::new();
        let mut chunk_number = start_chunk;
        let mut current = 0usize;
        let mut stuck = 0u32;

        while current < total {
            let previous = current;
            let candidate_end = current + self.max_chunk_size;

            if candidate_end >= total {
                let tail = slice_trimmed(&chars, current, total);
                if !tail.is_empty() {
                    chunks.push(DocumentChunk {
                        content: tail.clone(),
                        page,
                        chunk: chunk_number,
                    });
                    carry = tail;
                }
                break;
            }

            let cut = sentence_boundary(&chars, current, candidate_end)
                .or_else(|| word_boundary(&chars, current, candidate_end))
                .unwrap_or_else(|| (current + self.max_chunk_size / 2).min(total));

            let piece = slice_trimmed(&chars, current, cut);
            if !piece.is_empty() {
                chunks.push(DocumentChunk {
                    content: piece,
                    page,
                    chunk: chunk_number,
                });
                chunk_number += 1;
            }

            current = cut.saturating_sub(self.overlap_size);

            if current <= previous || current - previous < min_progress {
                // Overlap ate the progress made by this cut. Force the window
                // forward; after too many consecutive forced steps, flush the
                // rest and bail out rather than risk spinning forever.
                current = previous + min_progress;
                stuck += 1;
                if stuck > MAX_STUCK_ITERATIONS {
                    warn!(
                        position = current,
                        page, "chunking stalled, flushing remaining text"
                    );
                    if current < total {
                        let rest = slice_trimmed(&chars, current, total);
                        if !rest.is_empty() {
                            chunks.push(DocumentChunk {
                                content: rest.clone(),
                                page,
                                chunk: chunk_number + 1,
                            });
                            carry = rest;
                        }
                    }
                    break;
                }
            } else {
                stuck = 0;
            }
        }

        (chunks, carry)
    }
}

fn sentence_boundary(chars: &[char], start: usize, end: usize) -> Option<usize> {
    for index in (start + 1..=end).rev() {
        if matches!(chars[index], '.' | '?' | '!') {
            return Some(index + 1);
        }
    }
    None
}

fn word_boundary(chars: &[char], start: usize, end: usize) -> Option<usize> {
    for index in (start + 1..=end).rev() {
        if chars[index] == ' ' {
            return Some(index);
        }
    }
    None
}

fn slice_trimmed(chars: &[char], start: usize, end: usize) -> String {
    chars[start..end].iter().collect::<String>().trim().to_string()
}
