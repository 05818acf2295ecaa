/// Longest single cast the composer will emit.
pub const MAX_POST_LENGTH: usize = 320;
/// Most posts a single imported thread may contain.
pub const MAX_THREAD_POSTS: usize = 10;
/// DirectCast rejects longer message bodies.
pub const MAX_MESSAGE_LENGTH: usize = 1024;

/// Ordered output of [`segment`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segmentation {
    pub segments: Vec<String>,
    /// Set when non-whitespace input was dropped because the segment cap was reached.
    pub truncated: bool,
}

impl Segmentation {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Splits `text` into segments of at most `max_segment_length` chars.
///
/// Paragraphs (separated by blank lines) are never merged. Oversized paragraphs are cut at the
/// last whitespace inside the limit, or hard-cut at the limit when that whitespace falls in the
/// first half. Output stops after `max_segments` segments.
///
/// Lengths count Unicode scalar values, so multi-byte text is never cut inside a character.
pub fn segment(text: &str, max_segment_length: usize, max_segments: usize) -> Segmentation {
    let mut output = Segmentation::default();
    if max_segment_length == 0 || max_segments == 0 {
        output.truncated = !text.trim().is_empty();
        return output;
    }

    // Runs of three or more newlines leave empty or newline-led pieces; trim and filter fold
    // them into a single paragraph break.
    let paragraphs = text
        .split("\n\n")
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty());

    for paragraph in paragraphs {
        let mut remaining = paragraph;
        while !remaining.is_empty() {
            if output.segments.len() == max_segments {
                output.truncated = true;
                return output;
            }

            let (head, tail) = split_once_within(remaining, max_segment_length);
            output.segments.push(head.to_string());
            remaining = tail;
        }
    }

    output
}

/// Returns the next segment and the trimmed remainder of `text`.
fn split_once_within(text: &str, limit: usize) -> (&str, &str) {
    let Some((limit_byte, _)) = text.char_indices().nth(limit) else {
        return (text, "");
    };

    // Boundary search is inclusive of the char at `limit`, so a space right after a full-length
    // word still counts.
    let boundary = text
        .char_indices()
        .take(limit + 1)
        .enumerate()
        .filter(|(_, (_, ch))| ch.is_whitespace())
        .last()
        .map(|(char_idx, (byte_idx, _))| (char_idx, byte_idx));

    let cut_byte = match boundary {
        Some((char_idx, byte_idx)) if char_idx * 2 >= limit && char_idx > 0 => byte_idx,
        _ => limit_byte,
    };

    (text[..cut_byte].trim_end(), text[cut_byte..].trim_start())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lens(result: &Segmentation) -> Vec<usize> {
        result.segments.iter().map(|s| s.chars().count()).collect()
    }

    #[test]
    fn prefers_word_boundaries() {
        let result = segment("AAAA BBBB CCCC", 9, 10);
        assert_eq!(result.segments, vec!["AAAA BBBB", "CCCC"]);
        assert!(!result.truncated);
    }

    #[test]
    fn empty_and_whitespace_input_produce_nothing() {
        assert!(segment("", 10, 10).is_empty());
        assert!(segment(" \n\n\t \n\n ", 10, 10).is_empty());
        assert!(!segment("   ", 10, 10).truncated);
    }

    #[test]
    fn single_character_is_one_segment() {
        assert_eq!(segment("x", 1, 1).segments, vec!["x"]);
    }

    #[test]
    fn paragraphs_split_on_blank_line_runs() {
        let result = segment("first para\n\n\n\n  second para  \n\nthird", 320, 10);
        assert_eq!(result.segments, vec!["first para", "second para", "third"]);
    }

    #[test]
    fn odd_and_even_newline_runs_are_one_break() {
        assert_eq!(segment("a\n\n\n\nb", 320, 10).segments, vec!["a", "b"]);
        assert_eq!(segment("a\n\n\nb", 320, 10).segments, vec!["a", "b"]);
        assert_eq!(segment("a\n\n\n\n\n\nb", 320, 10).segments, vec!["a", "b"]);
    }

    #[test]
    fn single_newlines_stay_inside_a_paragraph() {
        let result = segment("line one\nline two", 320, 10);
        assert_eq!(result.segments, vec!["line one\nline two"]);
    }

    #[test]
    fn forces_cut_when_boundary_is_in_first_half() {
        // The only space sits at index 2, well under half of 10.
        let result = segment("ab cdefghijklmnopqrstuvwxyz", 10, 10);
        assert_eq!(result.segments, vec!["ab cdefghi", "jklmnopqrs", "tuvwxyz"]);
        assert!(lens(&result).iter().all(|len| *len <= 10));
    }

    #[test]
    fn unbroken_text_is_hard_cut_at_limit() {
        let result = segment(&"x".repeat(25), 10, 10);
        assert_eq!(lens(&result), vec![10, 10, 5]);
    }

    #[test]
    fn truncates_to_max_segments_and_flags_it() {
        let text = (0..30).map(|i| format!("p{i}")).collect::<Vec<_>>().join("\n\n");
        let result = segment(&text, 320, MAX_THREAD_POSTS);
        assert_eq!(result.len(), MAX_THREAD_POSTS);
        assert!(result.truncated);
        assert_eq!(result.segments[9], "p9");
    }

    #[test]
    fn truncates_mid_paragraph() {
        let result = segment("aaaa bbbb cccc dddd", 4, 2);
        assert_eq!(result.segments, vec!["aaaa", "bbbb"]);
        assert!(result.truncated);
    }

    #[test]
    fn exact_fit_is_not_reported_as_truncated() {
        let result = segment("one\n\ntwo", 10, 2);
        assert_eq!(result.len(), 2);
        assert!(!result.truncated);
    }

    #[test]
    fn counts_chars_not_bytes() {
        let text = "é".repeat(12);
        let result = segment(&text, 5, 10);
        assert_eq!(lens(&result), vec![5, 5, 2]);
    }

    #[test]
    fn rejoined_segments_preserve_every_token_in_order() {
        let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit.\n\n\
                    Sed do eiusmod tempor incididunt ut labore et dolore magna aliqua. \
                    Ut enim ad minim veniam, quis nostrud exercitation ullamco laboris.";
        for limit in [25, 40, 80] {
            let result = segment(text, limit, usize::MAX);
            assert!(lens(&result).iter().all(|len| *len <= limit));

            let rejoined = result.segments.join(" ");
            let expected: Vec<&str> = text.split_whitespace().collect();
            let actual: Vec<&str> = rejoined.split_whitespace().collect();
            assert_eq!(actual, expected, "limit {limit}");
        }
    }
}
