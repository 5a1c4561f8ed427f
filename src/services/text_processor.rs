// Text Processing Service
// Transcript normalization and line splitting for line-level moderation

use regex::Regex;
use std::sync::OnceLock;

fn odd_space_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\u{3000}\u{00A0}\u{2007}\u{202F}]").unwrap())
}

fn trailing_ws_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)[ \t]+$").unwrap())
}

/// Normalize a transcript before chunking.
///
/// Line structure is preserved: line-level findings are numbered by literal
/// line breaks, so only line endings are rewritten, never removed.
pub fn normalize_transcript(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let mut s = text.to_string();

    // Replace smart quotes
    s = s.replace('\u{201c}', "\"")
         .replace('\u{201d}', "\"")
         .replace('\u{2018}', "'")
         .replace('\u{2019}', "'");

    // Replace ideographic and non-breaking spaces
    s = odd_space_re().replace_all(&s, " ").to_string();

    // Normalize line endings
    s = s.replace("\r\n", "\n").replace('\r', "\n");

    s = trailing_ws_re().replace_all(&s, "").to_string();

    s.trim().to_string()
}

/// Non-empty lines of a chunk with their 1-based line numbers.
///
/// Lines are trimmed; blank lines are skipped but still counted.
pub fn numbered_lines(chunk_text: &str) -> Vec<(usize, &str)> {
    chunk_text
        .split('\n')
        .enumerate()
        .filter_map(|(idx, line)| {
            let line = line.trim();
            (!line.is_empty()).then_some((idx + 1, line))
        })
        .collect()
}

/// Shorten text for log lines.
pub fn preview(s: &str, max_chars: usize) -> String {
    let mut out: String = s.chars().take(max_chars).collect();
    if s.chars().count() > max_chars {
        out.push_str("...");
    }
    out.replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_transcript() {
        let input = "Host:\u{00A0}\u{201c}Hello\u{201d}  \r\nGuest: it\u{2019}s fine\r";
        let output = normalize_transcript(input);
        assert_eq!(output, "Host: \"Hello\"\nGuest: it's fine");
    }

    #[test]
    fn test_normalize_keeps_blank_lines() {
        let output = normalize_transcript("one\n\n\ntwo");
        assert_eq!(output, "one\n\n\ntwo");
    }

    #[test]
    fn test_numbered_lines_skips_blank_but_counts_them() {
        let lines = numbered_lines("first\n\n   \n  fourth  \nfifth");
        assert_eq!(lines, vec![(1, "first"), (4, "fourth"), (5, "fifth")]);
    }

    #[test]
    fn test_numbered_lines_empty_chunk() {
        assert!(numbered_lines("").is_empty());
        assert!(numbered_lines("\n \n").is_empty());
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("abc\ndef", 10), "abc def");
        assert_eq!(preview("abcdef", 3), "abc...");
    }
}
