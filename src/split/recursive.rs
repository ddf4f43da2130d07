//! Recursive boundary-aware splitting.
//!
//! Splits text into byte-bounded pieces, preferring natural boundaries in
//! order: blank line, single newline, sentence terminator (Chinese or
//! English), whitespace, and finally a bare character boundary. Used for
//! the paragraph fallback and for sub-splitting over-long articles.

/// Finds a valid UTF-8 character boundary at or before the given position.
#[must_use]
pub fn find_char_boundary(s: &str, pos: usize) -> usize {
    if pos >= s.len() {
        return s.len();
    }
    let mut boundary = pos;
    while !s.is_char_boundary(boundary) && boundary > 0 {
        boundary -= 1;
    }
    boundary
}

/// Sentence terminators recognized when searching for a cut point.
const SENTENCE_TERMINATORS: [char; 8] = ['。', '！', '？', '；', '.', '!', '?', ';'];

/// Boundary-aware splitter with a byte budget per piece.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    /// Maximum piece size in bytes.
    max_bytes: usize,
}

impl RecursiveSplitter {
    /// Creates a splitter with the given byte budget per piece.
    #[must_use]
    pub const fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    /// Splits `text` into pieces of at most `max_bytes` bytes each.
    ///
    /// Pieces partition the input exactly: concatenating them reproduces
    /// `text`. Empty input yields no pieces.
    #[must_use]
    pub fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        if text.is_empty() {
            return Vec::new();
        }
        if text.len() <= self.max_bytes {
            return vec![text];
        }

        let mut pieces = Vec::new();
        let mut start = 0;

        while start < text.len() {
            let remaining = &text[start..];
            if remaining.len() <= self.max_bytes {
                pieces.push(remaining);
                break;
            }

            let target = find_char_boundary(remaining, self.max_bytes);
            let end = self.best_boundary(remaining, target);
            let end = find_char_boundary(remaining, end);
            // Always make progress, even when the budget is smaller than
            // the first character.
            let end = if end == 0 {
                remaining.chars().next().map_or(remaining.len(), char::len_utf8)
            } else {
                end
            };

            pieces.push(&remaining[..end]);
            start += end;
        }

        pieces
    }

    /// Finds the best cut at or before `target`, walking the separator
    /// ladder: blank line, newline, sentence terminator, whitespace.
    fn best_boundary(&self, text: &str, target: usize) -> usize {
        if target >= text.len() {
            return text.len();
        }

        // Search back up to half the budget for a natural boundary.
        let window_start = find_char_boundary(text, target.saturating_sub(self.max_bytes / 2));
        let window = &text[window_start..target];

        if let Some(pos) = window.rfind("\n\n") {
            return window_start + pos + 2;
        }
        if let Some(pos) = window.rfind('\n') {
            return window_start + pos + 1;
        }
        if let Some(pos) = window.rfind(SENTENCE_TERMINATORS) {
            // Cut after the terminator character.
            let c_len = window[pos..]
                .chars()
                .next()
                .map_or(1, char::len_utf8);
            return window_start + pos + c_len;
        }
        if let Some(pos) = window.rfind(char::is_whitespace) {
            return window_start + pos + 1;
        }

        target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text() {
        let splitter = RecursiveSplitter::new(100);
        assert!(splitter.split("").is_empty());
    }

    #[test]
    fn test_small_text_single_piece() {
        let splitter = RecursiveSplitter::new(100);
        let pieces = splitter.split("short text");
        assert_eq!(pieces, vec!["short text"]);
    }

    #[test]
    fn test_pieces_partition_input() {
        let splitter = RecursiveSplitter::new(40);
        let text = "First paragraph here.\n\nSecond paragraph follows.\n\nThird one.";
        let pieces = splitter.split(text);
        assert!(pieces.len() > 1);
        let rejoined: String = pieces.concat();
        assert_eq!(rejoined, text);
    }

    #[test]
    fn test_respects_byte_budget() {
        let splitter = RecursiveSplitter::new(50);
        let text = "句子一。句子二。句子三。句子四。句子五。句子六。句子七。";
        for piece in splitter.split(text) {
            assert!(piece.len() <= 50, "piece too large: {}", piece.len());
        }
    }

    #[test]
    fn test_prefers_paragraph_break() {
        let splitter = RecursiveSplitter::new(20);
        let text = "aaaa bbbb cccc\n\ndddd eeee ffff";
        let pieces = splitter.split(text);
        assert_eq!(pieces[0], "aaaa bbbb cccc\n\n");
    }

    #[test]
    fn test_prefers_sentence_terminator_for_cjk() {
        let splitter = RecursiveSplitter::new(31);
        // 10 CJK chars = 30 bytes; the terminator should pull the cut after 。
        let text = "这是第一句话。这是第二句话跟在后面继续延伸。";
        let pieces = splitter.split(text);
        assert!(pieces[0].ends_with('。'), "got {:?}", pieces[0]);
    }

    #[test]
    fn test_boundary_free_input_still_progresses() {
        let splitter = RecursiveSplitter::new(10);
        let text = "A".repeat(95);
        let pieces = splitter.split(&text);
        assert_eq!(pieces.concat(), text);
        for piece in &pieces {
            assert!(piece.len() <= 10);
        }
    }

    #[test]
    fn test_multibyte_never_split_mid_char() {
        let splitter = RecursiveSplitter::new(10);
        let text = "法律条文内容不断延续下去没有任何标点";
        let pieces = splitter.split(text);
        assert_eq!(pieces.concat(), text);
        for piece in &pieces {
            assert!(!piece.is_empty());
        }
    }

    #[test]
    fn test_find_char_boundary() {
        let s = "ab世界";
        assert_eq!(find_char_boundary(s, 2), 2);
        assert_eq!(find_char_boundary(s, 3), 2);
        assert_eq!(find_char_boundary(s, 4), 2);
        assert_eq!(find_char_boundary(s, 5), 5);
        assert_eq!(find_char_boundary(s, 99), s.len());
    }

    mod properties {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            /// Pieces always partition the input and respect the budget.
            #[test]
            fn partition_and_budget(text in "\\PC{0,300}", budget in 8usize..64) {
                let splitter = RecursiveSplitter::new(budget);
                let pieces = splitter.split(&text);
                let rejoined: String = pieces.concat();
                prop_assert_eq!(rejoined, text.clone());
                for piece in &pieces {
                    // A single char can exceed a tiny budget; allow up to
                    // one max-width char of slack.
                    prop_assert!(piece.len() <= budget.max(4));
                }
            }
        }
    }
}
