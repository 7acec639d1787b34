//! Word-aligned sliding-window text chunker.
//!
//! Splits extracted per-page text into bounded, overlapping chunks that
//! prefer word boundaries on both edges. Chunks never span a page boundary,
//! and tiny fragments (page footers, artifacts) are filtered out by a
//! minimum-length threshold.
//!
//! The walk is a fixed-stride window over the page's characters. The right
//! edge shrinks back to the nearest space so no chunk ends mid-word; the
//! left edge advances past the previous space when the stride lands inside
//! a word. The walk position itself always advances by at least one stride
//! per window, so chunking terminates for any input, including
//! `chunk_overlap >= chunk_size`.

use crate::config::IngestionConfig;
use crate::models::{PageChunk, PageText};

/// True if the char is alphanumeric or hyphen/underscore (part of a word).
fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

/// Index of the last space in `chars[lo..hi]`, if any.
fn last_space_in(chars: &[char], lo: usize, hi: usize) -> Option<usize> {
    chars[lo..hi]
        .iter()
        .rposition(|&c| c == ' ')
        .map(|pos| lo + pos)
}

/// Split page texts into word-aligned chunks.
///
/// Pure function of its inputs and the `chunk_size`, `chunk_overlap`,
/// `min_chunk_chars`, and `max_chunks_per_document` settings. Output order
/// is pages in input order, then left-to-right within each page. The
/// concatenated sequence is truncated to `max_chunks_per_document`;
/// fragments dropped by the minimum-length filter never count against
/// the cap.
pub fn chunk_pages(pages: &[PageText], config: &IngestionConfig) -> Vec<PageChunk> {
    let chunk_size = config.chunk_size;
    let step = chunk_size.saturating_sub(config.chunk_overlap).max(1);

    let mut chunks = Vec::new();
    for page in pages {
        let chars: Vec<char> = page.text.trim().chars().collect();
        let len = chars.len();
        if len == 0 {
            continue;
        }

        let mut start = 0usize;
        while start < len {
            let entry = start;
            let mut end = (start + chunk_size).min(len);

            // Prefer a word boundary at the end: avoid cutting mid-word
            if end < len && is_word_char(chars[end]) {
                if let Some(space) = last_space_in(&chars, start, end) {
                    if space > start {
                        end = space + 1;
                    }
                }
            }

            // If the window starts mid-word, back up to include the whole
            // word. If that would collapse the window, skip ahead instead.
            if start > 0 && is_word_char(chars[start - 1]) {
                if let Some(space) = last_space_in(&chars, 0, start) {
                    start = space + 1;
                    if start >= end {
                        start = entry + step;
                        continue;
                    }
                }
            }

            let piece: String = chars[start..end].iter().collect();
            let piece = piece.trim();
            if !piece.is_empty() && piece.chars().count() >= config.min_chunk_chars {
                chunks.push(PageChunk {
                    page_number: page.page_number,
                    text: piece.to_string(),
                });
            }

            // This window already covers the rest of the page.
            if end == len {
                break;
            }

            // Advance from the (possibly realigned) start, but never stall:
            // a large left-edge pullback must not drag the walk backwards.
            start += step;
            if start <= entry {
                start = entry + step;
            }
        }
    }

    chunks.truncate(config.max_chunks_per_document);
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(size: usize, overlap: usize, min_chars: usize, max_chunks: usize) -> IngestionConfig {
        IngestionConfig {
            chunk_size: size,
            chunk_overlap: overlap,
            min_chunk_chars: min_chars,
            max_chunks_per_document: max_chunks,
            ..IngestionConfig::default()
        }
    }

    fn page(n: i64, text: &str) -> PageText {
        PageText {
            page_number: n,
            text: text.to_string(),
        }
    }

    /// Text of sequentially numbered tokens, so word alignment is checkable
    /// with a simple shape test on every chunk.
    fn numbered_words(count: usize) -> String {
        (0..count)
            .map(|i| format!("word{:03}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn is_whole_token(tok: &str) -> bool {
        tok.len() == 7 && tok.starts_with("word") && tok[4..].chars().all(|c| c.is_ascii_digit())
    }

    #[test]
    fn test_short_page_single_chunk() {
        let chunks = chunk_pages(&[page(1, "A short page of text.")], &cfg(100, 20, 1, 500));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page_number, 1);
        assert_eq!(chunks[0].text, "A short page of text.");
    }

    #[test]
    fn test_short_page_single_chunk_even_with_large_overlap() {
        // step = 10, page length 21: the first window already covers the
        // whole page, so no trailing sub-windows are emitted.
        let chunks = chunk_pages(&[page(1, "A short page of text.")], &cfg(100, 90, 1, 500));
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_empty_page_skipped() {
        let pages = [page(1, "   \n\t  "), page(2, "Real content here.")];
        let chunks = chunk_pages(&pages, &cfg(100, 20, 1, 500));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page_number, 2);
    }

    #[test]
    fn test_min_chunk_chars_filters_footers() {
        let chunks = chunk_pages(&[page(2, "Page 2 of 2")], &cfg(1000, 200, 20, 500));
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_word_aligned_edges() {
        let text = numbered_words(200);
        let chunks = chunk_pages(&[page(1, &text)], &cfg(47, 9, 1, 500));
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            for tok in chunk.text.split(' ') {
                assert!(
                    is_whole_token(tok),
                    "chunk edge cut a word: {:?} in {:?}",
                    tok,
                    chunk.text
                );
            }
        }
    }

    #[test]
    fn test_overlap_repeats_words_between_chunks() {
        let text = numbered_words(100);
        let chunks = chunk_pages(&[page(1, &text)], &cfg(80, 40, 1, 500));
        assert!(chunks.len() > 1);
        let first_tail = chunks[0].text.split(' ').last().unwrap();
        assert!(
            chunks[1].text.contains(first_tail),
            "expected overlap to carry {:?} into the next chunk",
            first_tail
        );
    }

    #[test]
    fn test_page_isolation() {
        let p1 = numbered_words(60);
        let p2 = "completely different second page content with more words than the minimum";
        let chunks = chunk_pages(&[page(1, &p1), page(2, p2)], &cfg(50, 10, 1, 500));
        for chunk in &chunks {
            let source = if chunk.page_number == 1 { &p1 } else { p2 };
            assert!(
                source.contains(&chunk.text),
                "chunk text crossed a page boundary: {:?}",
                chunk.text
            );
        }
        assert!(chunks.iter().any(|c| c.page_number == 1));
        assert!(chunks.iter().any(|c| c.page_number == 2));
        // Pages enumerate in input order
        let first_p2 = chunks.iter().position(|c| c.page_number == 2).unwrap();
        assert!(chunks[..first_p2].iter().all(|c| c.page_number == 1));
    }

    #[test]
    fn test_max_chunks_cap() {
        let pages: Vec<PageText> = (1..=10).map(|n| page(n, &numbered_words(100))).collect();
        let chunks = chunk_pages(&pages, &cfg(50, 10, 1, 7));
        assert_eq!(chunks.len(), 7);
        // Truncation preserves page order
        assert_eq!(chunks[0].page_number, 1);
    }

    #[test]
    fn test_deterministic() {
        let pages = [page(1, &numbered_words(150)), page(2, &numbered_words(80))];
        let a = chunk_pages(&pages, &cfg(64, 16, 5, 500));
        let b = chunk_pages(&pages, &cfg(64, 16, 5, 500));
        assert_eq!(a, b);
    }

    #[test]
    fn test_terminates_when_overlap_exceeds_size() {
        let text = numbered_words(50);
        let chunks = chunk_pages(&[page(1, &text)], &cfg(10, 50, 1, 10_000));
        assert!(!chunks.is_empty());
        assert!(chunks.len() <= 10_000);
    }

    #[test]
    fn test_terminates_on_long_token_with_heavy_overlap() {
        // A short word followed by one very long unbroken token: left-edge
        // realignment keeps pulling the emitted start back to the space,
        // which must not stall the walk.
        let text = format!("ab {}", "c".repeat(400));
        let chunks = chunk_pages(&[page(1, &text)], &cfg(10, 8, 1, 10_000));
        assert!(!chunks.is_empty());
    }

    #[test]
    fn test_long_unbroken_token_raw_cuts() {
        let text = "a".repeat(120);
        let chunks = chunk_pages(&[page(1, &text)], &cfg(50, 0, 1, 500));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text.len(), 50);
        assert_eq!(chunks[1].text.len(), 50);
        assert_eq!(chunks[2].text.len(), 20);
    }

    #[test]
    fn test_unicode_text_chunks_on_char_boundaries() {
        let text = "héllo wörld ".repeat(30);
        let chunks = chunk_pages(&[page(1, &text)], &cfg(40, 10, 1, 500));
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(text.contains(&chunk.text));
        }
    }
}
