//! Deterministic text segmentation
//!
//! The splitter is pure and synchronous: the same input and configuration
//! always produce the same chunks, emitted in reading order with dense
//! indices. Every strategy keeps chunks at or under 1.5x the target size
//! except possibly the last one.

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// Segmentation strategy, selected per tenant deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitStrategy {
    /// Whitespace-normalized fixed-size character windows with overlap
    FixedChar,
    /// Split on an ordered delimiter list, pack pieces up to the target size
    RecursiveSeparator,
    /// Word-count windows with overlap; `chunk_size` counts words
    TokenAware,
    /// Blank-line paragraphs merged greedily up to the target size
    SemanticParagraph,
}

impl Default for SplitStrategy {
    fn default() -> Self {
        Self::FixedChar
    }
}

/// Splitter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    pub strategy: SplitStrategy,
    /// Target size: characters, or words for the token-aware strategy
    pub chunk_size: usize,
    /// Overlap between consecutive chunks, percent of chunk_size, clamped to 0..=90
    pub overlap_percent: u8,
    /// Ordered separators for the recursive strategy, coarsest first
    pub delimiters: Vec<String>,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            strategy: SplitStrategy::FixedChar,
            chunk_size: 512,
            overlap_percent: 10,
            delimiters: vec![
                "\n\n".to_string(),
                "\n".to_string(),
                ". ".to_string(),
                " ".to_string(),
            ],
        }
    }
}

impl SplitConfig {
    fn overlap(&self) -> usize {
        let pct = self.overlap_percent.min(90) as usize;
        self.chunk_size * pct / 100
    }

    /// Chunks may exceed the target by at most this much (except the last).
    fn hard_limit(&self) -> usize {
        self.chunk_size + self.chunk_size / 2
    }
}

/// Split `text` into chunks according to `cfg`.
///
/// Empty or whitespace-only input yields no chunks.
pub fn split(text: &str, cfg: &SplitConfig) -> Vec<String> {
    if text.trim().is_empty() || cfg.chunk_size == 0 {
        return Vec::new();
    }
    match cfg.strategy {
        SplitStrategy::FixedChar => split_fixed_char(text, cfg),
        SplitStrategy::RecursiveSeparator => split_recursive(text, cfg),
        SplitStrategy::TokenAware => split_token_aware(text, cfg),
        SplitStrategy::SemanticParagraph => split_paragraphs(text, cfg),
    }
}

/// Fixed-size character windows over whitespace-normalized text.
fn split_fixed_char(text: &str, cfg: &SplitConfig) -> Vec<String> {
    let normalized: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let chars: Vec<char> = normalized.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let overlap = cfg.overlap().min(cfg.chunk_size.saturating_sub(1));
    let step = cfg.chunk_size - overlap;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let end = (start + cfg.chunk_size).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim().to_string();
        if !piece.is_empty() {
            chunks.push(piece);
        }
        if end >= chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Recursively break text by the delimiter list, then pack adjacent pieces.
fn split_recursive(text: &str, cfg: &SplitConfig) -> Vec<String> {
    let pieces = break_by_delimiters(text, &cfg.delimiters, cfg.chunk_size);
    pack_pieces(&pieces, " ", cfg.chunk_size)
}

/// Break text into pieces no longer than `limit` characters, preferring the
/// coarsest delimiter that works and falling back to character windows.
fn break_by_delimiters(text: &str, delimiters: &[String], limit: usize) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed.chars().count() <= limit {
        return vec![trimmed.to_string()];
    }

    if let Some((delim, rest)) = delimiters.split_first() {
        if delim.is_empty() || !trimmed.contains(delim.as_str()) {
            return break_by_delimiters(trimmed, rest, limit);
        }
        let mut out = Vec::new();
        for part in trimmed.split(delim.as_str()) {
            out.extend(break_by_delimiters(part, rest, limit));
        }
        return out;
    }

    // No delimiter left: hard character windows.
    let chars: Vec<char> = trimmed.chars().collect();
    chars
        .chunks(limit)
        .map(|w| w.iter().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Greedily pack pieces into chunks of at most `target` characters. A single
/// piece already at or under the pack input limit stands alone if adding it
/// would overflow.
fn pack_pieces(pieces: &[String], joiner: &str, target: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for piece in pieces {
        let piece_len = piece.chars().count();
        if piece_len == 0 {
            continue;
        }
        let joined_len = if current.is_empty() {
            piece_len
        } else {
            current_len + joiner.chars().count() + piece_len
        };
        if !current.is_empty() && joined_len > target {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push_str(joiner);
            current_len += joiner.chars().count();
        }
        current.push_str(piece);
        current_len += piece_len;
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Word windows with overlap; a "token" is a unicode word or a run of
/// punctuation, rejoined with single spaces.
fn split_token_aware(text: &str, cfg: &SplitConfig) -> Vec<String> {
    let words: Vec<&str> = text.split_word_bounds().filter(|w| !w.trim().is_empty()).collect();
    if words.is_empty() {
        return Vec::new();
    }

    let overlap = cfg.overlap().min(cfg.chunk_size.saturating_sub(1));
    let step = cfg.chunk_size - overlap;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < words.len() {
        let end = (start + cfg.chunk_size).min(words.len());
        let piece = words[start..end].join(" ");
        let piece = piece.trim().to_string();
        if !piece.is_empty() {
            chunks.push(piece);
        }
        if end >= words.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Blank-line paragraphs merged greedily; oversize paragraphs are broken by
/// the delimiter ladder first so no chunk exceeds the 1.5x bound.
fn split_paragraphs(text: &str, cfg: &SplitConfig) -> Vec<String> {
    let limit = cfg.hard_limit();
    let mut pieces = Vec::new();
    for para in text.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }
        if para.chars().count() <= limit {
            pieces.push(para.to_string());
        } else {
            pieces.extend(break_by_delimiters(para, &cfg.delimiters, cfg.chunk_size));
        }
    }
    pack_pieces(&pieces, "\n\n", cfg.chunk_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(strategy: SplitStrategy, chunk_size: usize, overlap_percent: u8) -> SplitConfig {
        SplitConfig {
            strategy,
            chunk_size,
            overlap_percent,
            ..SplitConfig::default()
        }
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        for strategy in [
            SplitStrategy::FixedChar,
            SplitStrategy::RecursiveSeparator,
            SplitStrategy::TokenAware,
            SplitStrategy::SemanticParagraph,
        ] {
            assert!(split("   \n\n ", &cfg(strategy, 100, 10)).is_empty());
        }
    }

    #[test]
    fn fixed_char_is_deterministic() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(50);
        let c = cfg(SplitStrategy::FixedChar, 100, 20);
        assert_eq!(split(&text, &c), split(&text, &c));
    }

    #[test]
    fn fixed_char_covers_input() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa".repeat(10);
        let c = cfg(SplitStrategy::FixedChar, 64, 0);
        let chunks = split(&text, &c);
        let rejoined: String = chunks.join("");
        let normalized: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
        // Zero overlap: concatenation reproduces the input up to whitespace
        // normalization (window edges trim spaces).
        assert_eq!(
            rejoined.replace(' ', ""),
            normalized.replace(' ', "")
        );
    }

    #[test]
    fn fixed_char_respects_size_bound() {
        let text = "x".repeat(10_000);
        let c = cfg(SplitStrategy::FixedChar, 100, 25);
        for chunk in split(&text, &c) {
            assert!(chunk.chars().count() <= 150);
        }
    }

    #[test]
    fn fixed_char_overlap_repeats_tail() {
        let text: String = ('a'..='z').cycle().take(200).collect();
        let c = cfg(SplitStrategy::FixedChar, 100, 50);
        let chunks = split(&text, &c);
        assert!(chunks.len() >= 3);
        let first: Vec<char> = chunks[0].chars().collect();
        let second: Vec<char> = chunks[1].chars().collect();
        // Second chunk starts where the first chunk's last 50 chars began.
        assert_eq!(&first[50..], &second[..50]);
    }

    #[test]
    fn recursive_prefers_paragraph_boundaries() {
        let text = format!("{}\n\n{}", "a".repeat(80), "b".repeat(80));
        let c = cfg(SplitStrategy::RecursiveSeparator, 100, 0);
        let chunks = split(&text, &c);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].chars().all(|ch| ch == 'a'));
        assert!(chunks[1].chars().all(|ch| ch == 'b'));
    }

    #[test]
    fn recursive_packs_small_pieces() {
        let text = "one two three four five six seven eight nine ten";
        let c = cfg(SplitStrategy::RecursiveSeparator, 1000, 0);
        let chunks = split(text, &c);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn recursive_respects_size_bound() {
        let text = "word ".repeat(1000);
        let c = cfg(SplitStrategy::RecursiveSeparator, 120, 0);
        for chunk in split(&text, &c) {
            assert!(chunk.chars().count() <= 180, "chunk too long: {}", chunk.len());
        }
    }

    #[test]
    fn token_aware_counts_words() {
        let text = (1..=100).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let c = cfg(SplitStrategy::TokenAware, 10, 0);
        let chunks = split(&text, &c);
        assert_eq!(chunks.len(), 10);
        assert!(chunks[0].starts_with("w1 "));
        assert!(chunks[9].ends_with("w100"));
    }

    #[test]
    fn paragraphs_merge_up_to_target() {
        let text = "short one\n\nshort two\n\nshort three";
        let c = cfg(SplitStrategy::SemanticParagraph, 200, 0);
        let chunks = split(text, &c);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("short one"));
        assert!(chunks[0].contains("short three"));
    }

    #[test]
    fn paragraphs_break_oversize_paragraph() {
        let text = "word ".repeat(400);
        let c = cfg(SplitStrategy::SemanticParagraph, 100, 0);
        let chunks = split(&text, &c);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 150);
        }
    }

    #[test]
    fn all_strategies_are_deterministic() {
        let text = "Mixed content. With sentences! And\n\nparagraphs.\nAnd lines. ".repeat(30);
        for strategy in [
            SplitStrategy::FixedChar,
            SplitStrategy::RecursiveSeparator,
            SplitStrategy::TokenAware,
            SplitStrategy::SemanticParagraph,
        ] {
            let c = cfg(strategy, 80, 10);
            assert_eq!(split(&text, &c), split(&text, &c), "{strategy:?}");
        }
    }
}
