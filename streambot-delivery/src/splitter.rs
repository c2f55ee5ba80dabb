//! Boundary-preserving text splitting under a hard length ceiling.
//!
//! Used both for splitting a live buffer across continuation messages and for
//! splitting a too-long final message. Lengths are counted in chars, so a cut
//! can never land inside a UTF-8 sequence.

/// Result of one split: `current` + `remaining` always reconstructs the input
/// exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitResult {
    pub current: String,
    pub remaining: String,
}

/// Splits `text` so that `current` holds at most `max_len` chars.
///
/// Prefers the last newline within range (kept with `current`), then the last
/// space, then a hard cut at `max_len`. `current` is never empty for non-empty
/// input, so a splitting loop always makes progress. `max_len` is floored at 1.
pub fn smart_split(text: &str, max_len: usize) -> SplitResult {
    let max_len = max_len.max(1);
    // Byte offset of the char boundary after max_len chars; None when the
    // whole text already fits.
    let window_end = text.char_indices().nth(max_len).map(|(i, _)| i);
    let Some(window_end) = window_end else {
        return SplitResult {
            current: text.to_string(),
            remaining: String::new(),
        };
    };

    let window = &text[..window_end];
    let cut = if let Some(pos) = window.rfind('\n') {
        pos + 1
    } else if let Some(pos) = window.rfind(' ') {
        pos + 1
    } else {
        window_end
    };

    SplitResult {
        current: text[..cut].to_string(),
        remaining: text[cut..].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_round_trip(text: &str, max_len: usize) {
        let split = smart_split(text, max_len);
        assert_eq!(
            format!("{}{}", split.current, split.remaining),
            text,
            "round trip failed for max_len={}",
            max_len
        );
        if !text.is_empty() {
            assert!(!split.current.is_empty(), "empty part for max_len={}", max_len);
        }
    }

    /// **Test: text within the limit is returned whole.**
    #[test]
    fn fits_entirely() {
        let split = smart_split("short", 10);
        assert_eq!(split.current, "short");
        assert_eq!(split.remaining, "");
    }

    /// **Test: splits after the last newline in range, newline kept with current.**
    #[test]
    fn prefers_newline() {
        let split = smart_split("line one\nline two and more", 15);
        assert_eq!(split.current, "line one\n");
        assert_eq!(split.remaining, "line two and more");
    }

    /// **Test: falls back to the last space when no newline is in range.**
    #[test]
    fn falls_back_to_space() {
        let split = smart_split("alpha beta gamma", 12);
        assert_eq!(split.current, "alpha beta ");
        assert_eq!(split.remaining, "gamma");
    }

    /// **Test: hard cut when neither newline nor space exists in range.**
    #[test]
    fn hard_cut_without_boundaries() {
        let split = smart_split("abcdefghij", 4);
        assert_eq!(split.current, "abcd");
        assert_eq!(split.remaining, "efghij");
    }

    /// **Test: round trip holds for a spread of inputs and limits, including multibyte.**
    #[test]
    fn round_trip_property() {
        let samples = [
            "",
            "a",
            "hello world",
            "line\nline\nline",
            "много букв и ещё немного текста",
            "日本語のテキストを分割する",
            "mixed 混合 text\nwith 改行 newlines",
            "nospacesatallinthisratherlongstring",
        ];
        for text in samples {
            for max_len in 1..=text.chars().count().max(1) + 2 {
                assert_round_trip(text, max_len);
            }
        }
    }

    /// **Test: a multibyte hard cut lands on a char boundary.**
    #[test]
    fn multibyte_hard_cut() {
        let split = smart_split("日本語テキスト", 3);
        assert_eq!(split.current, "日本語");
        assert_eq!(split.remaining, "テキスト");
    }

    /// **Test: max_len of zero is floored so progress is still made.**
    #[test]
    fn zero_max_len_floored() {
        let split = smart_split("ab", 0);
        assert_eq!(split.current, "a");
        assert_eq!(split.remaining, "b");
    }

    /// **Test: repeated splitting terminates and reassembles the input.**
    #[test]
    fn repeated_splitting_terminates() {
        let text = "word ".repeat(100);
        let mut rest = text.clone();
        let mut parts = Vec::new();
        while !rest.is_empty() {
            let split = smart_split(&rest, 23);
            assert!(!split.current.is_empty());
            parts.push(split.current);
            rest = split.remaining;
        }
        assert_eq!(parts.concat(), text);
    }
}
