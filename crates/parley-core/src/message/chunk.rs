//! Reply chunking.
//!
//! Chat platforms cap message length, so long answers go out as several
//! messages. Splits prefer natural boundaries and keep markdown code fences
//! balanced per chunk so every message renders on its own.

/// Platform message limit, in characters.
pub const MAX_MESSAGE_CHARS: usize = 2000;

const FENCE: &str = "```";

/// Room kept free in each chunk for a reopening and a closing fence.
const FENCE_OVERHEAD: usize = 2 * (FENCE.len() + 1);

/// Split `text` into chunks of at most `max_chars` characters.
///
/// A chunk ends at the last blank line before the limit, else the last
/// newline, else the last space; the separator itself is dropped. Text with
/// no such boundary is split hard at the limit. A chunk that leaves a code
/// fence open is closed with a fence and the next chunk reopens it.
///
/// Lengths are counted in `char`s. Limits below the fence overhead still
/// produce non-empty chunks but may exceed `max_chars`.
pub fn chunk_message(text: &str, max_chars: usize) -> Vec<String> {
    let limit = max_chars.saturating_sub(FENCE_OVERHEAD).max(1);
    let mut chunks = split_at_boundaries(text, limit);
    balance_fences(&mut chunks);
    chunks
}

fn split_at_boundaries(text: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = start + limit;
        if end >= chars.len() {
            chunks.push(chars[start..].iter().collect());
            break;
        }

        // (chunk end, separator length)
        let (split, skip) = if is_separator(chars[end]) {
            (end, 1)
        } else if let Some(at) = rfind(&chars, start, end, &['\n', '\n']) {
            (at, 2)
        } else if let Some(at) = rfind(&chars, start, end, &['\n']) {
            (at, 1)
        } else if let Some(at) = rfind(&chars, start, end, &[' ']) {
            (at, 1)
        } else {
            (end, 0)
        };

        chunks.push(chars[start..split].iter().collect());
        start = split + skip;
    }

    chunks
}

fn is_separator(c: char) -> bool {
    matches!(c, ' ' | '\n' | '\t')
}

/// Last index in `(start, end]` where `pattern` begins and fits before `end`.
fn rfind(chars: &[char], start: usize, end: usize, pattern: &[char]) -> Option<usize> {
    (start + 1..=end)
        .rev()
        .find(|&i| chars.get(i..i + pattern.len()) == Some(pattern))
}

fn balance_fences(chunks: &mut [String]) {
    for i in 0..chunks.len() {
        if chunks[i].matches(FENCE).count() % 2 == 0 {
            continue;
        }
        chunks[i].push('\n');
        chunks[i].push_str(FENCE);
        if let Some(next) = chunks.get_mut(i + 1) {
            next.insert_str(0, "```\n");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 28 - 8 of fence overhead leaves 20 characters of text per chunk.
    const SMALL: usize = 28;

    #[test]
    fn test_short_text_is_one_chunk() {
        assert_eq!(chunk_message("hello world", MAX_MESSAGE_CHARS), vec!["hello world"]);
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(chunk_message("", MAX_MESSAGE_CHARS).is_empty());
    }

    #[test]
    fn test_prefers_blank_line() {
        let chunks = chunk_message("aaaa bbbb\n\ncccc ddddd eeee", SMALL);
        assert_eq!(chunks, vec!["aaaa bbbb", "cccc ddddd eeee"]);
    }

    #[test]
    fn test_falls_back_to_newline() {
        let chunks = chunk_message("aaaa bbbb\ncccc ddddddd", SMALL);
        assert_eq!(chunks, vec!["aaaa bbbb", "cccc ddddddd"]);
    }

    #[test]
    fn test_falls_back_to_space() {
        let chunks = chunk_message("aaaa bbbb cccc ddddddd", SMALL);
        assert_eq!(chunks, vec!["aaaa bbbb cccc", "ddddddd"]);
    }

    #[test]
    fn test_splits_at_whitespace_on_the_limit() {
        let text = format!("{} bbb", "a".repeat(20));
        assert_eq!(chunk_message(&text, SMALL), vec!["a".repeat(20), "bbb".to_string()]);
    }

    #[test]
    fn test_hard_split_loses_nothing() {
        let text = "a".repeat(45);
        let chunks = chunk_message(&text, SMALL);
        let lengths: Vec<usize> = chunks.iter().map(|c| c.chars().count()).collect();
        assert_eq!(lengths, vec![20, 20, 5]);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        let text = "é".repeat(50);
        let chunks = chunk_message(&text, SMALL);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= SMALL));
    }

    #[test]
    fn test_balanced_fence_is_untouched() {
        let text = "```rust\nlet x = 1;\n```";
        assert_eq!(chunk_message(text, MAX_MESSAGE_CHARS), vec![text]);
    }

    #[test]
    fn test_open_fence_is_closed_and_reopened() {
        let chunks = chunk_message("```\naaaa bbbb cccc dddd eeee\n```", SMALL);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert_eq!(chunk.matches(FENCE).count() % 2, 0, "unbalanced chunk: {chunk:?}");
            assert!(chunk.chars().count() <= SMALL, "oversized chunk: {chunk:?}");
        }
        assert!(chunks[0].ends_with("\n```"));
        assert!(chunks[1].starts_with("```\n"));
    }

    #[test]
    fn test_default_limit_keeps_long_replies_under_2000() {
        let paragraph = "word ".repeat(100);
        let text = vec![paragraph.trim_end(); 12].join("\n\n");
        let chunks = chunk_message(&text, MAX_MESSAGE_CHARS);

        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.chars().count() <= MAX_MESSAGE_CHARS));
    }
}
