//! Prose splitter: recursive separator splitting with character overlap.
//!
//! Text is first broken into pieces no longer than `size` characters,
//! preferring paragraph breaks, then line breaks, then sentence ends, then
//! spaces, and as a last resort a hard split on character boundaries. The
//! pieces are then merged greedily into chunks of at most `size` characters,
//! each chunk re-using trailing pieces of the previous one up to `overlap`
//! characters.
//!
//! Lengths are counted in `char`s, never bytes, so multi-byte text never
//! splits inside a code point.

use std::collections::VecDeque;

const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " "];

/// Split `text` into chunks of at most `size` characters with up to
/// `overlap` characters shared between consecutive chunks.
///
/// Whitespace-only input yields no chunks.
pub fn split_prose(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let size = size.max(1);
    let mut pieces = Vec::new();
    split_recursive(text, size, SEPARATORS, &mut pieces);
    merge_pieces(pieces, size, overlap.min(size.saturating_sub(1)))
}

pub(super) fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn split_recursive<'a>(text: &'a str, size: usize, separators: &[&str], out: &mut Vec<&'a str>) {
    if text.is_empty() {
        return;
    }
    if char_len(text) <= size {
        out.push(text);
        return;
    }

    match separators.split_first() {
        Some((sep, finer)) => {
            if !text.contains(sep) {
                split_recursive(text, size, finer, out);
                return;
            }
            for part in text.split_inclusive(sep) {
                split_recursive(part, size, finer, out);
            }
        }
        None => hard_split(text, size, out),
    }
}

pub(super) fn hard_split<'a>(text: &'a str, size: usize, out: &mut Vec<&'a str>) {
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in text.char_indices() {
        if count == size {
            out.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
}

fn merge_pieces(pieces: Vec<&str>, size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: VecDeque<(&str, usize)> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = char_len(piece);

        if total + len > size && !window.is_empty() {
            push_chunk(&window, &mut chunks);
            while total > 0 && (total > overlap || total + len > size) {
                if let Some((_, dropped)) = window.pop_front() {
                    total -= dropped;
                }
            }
        }

        window.push_back((piece, len));
        total += len;
    }

    if !window.is_empty() {
        push_chunk(&window, &mut chunks);
    }

    chunks
}

fn push_chunk(window: &VecDeque<(&str, usize)>, chunks: &mut Vec<String>) {
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = split_prose("Hello, world!", 100, 10);
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_empty_and_whitespace() {
        assert!(split_prose("", 100, 10).is_empty());
        assert!(split_prose("   \n\n  ", 100, 10).is_empty());
    }

    #[test]
    fn test_respects_size() {
        let text = (0..60)
            .map(|i| format!("Sentence number {i} talks about things."))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = split_prose(&text, 120, 20);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 120, "chunk too long: {}", chunk.len());
        }
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let text = "First paragraph here.\n\nSecond paragraph here.";
        let chunks = split_prose(text, 25, 0);
        assert_eq!(chunks, vec!["First paragraph here.", "Second paragraph here."]);
    }

    #[test]
    fn test_overlap_repeats_tail() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let chunks = split_prose(text, 20, 8);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let last_word = pair[0].split_whitespace().last().unwrap();
            assert!(
                pair[1].starts_with(last_word),
                "{:?} should start with {:?}",
                pair[1],
                last_word
            );
        }
    }

    #[test]
    fn test_hard_split_multibyte() {
        let text = "┌".repeat(25);
        let chunks = split_prose(&text, 10, 0);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 10);
        assert_eq!(chunks[2].chars().count(), 5);
    }
}
