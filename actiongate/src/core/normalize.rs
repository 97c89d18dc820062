//! Message normalization used to correlate inspections with the turn that
//! requested them.

const TRAILING_PUNCTUATION: &[char] = &['.', '!', '?', ',', ';', ':', '…'];

/// Lowercase, trim, collapse whitespace and strip trailing punctuation.
pub fn normalize_message(message: &str) -> String {
    let collapsed = message
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed
        .trim_end_matches(|c: char| TRAILING_PUNCTUATION.contains(&c) || c.is_whitespace())
        .to_string()
}

/// True when both messages normalize to the same non-empty text.
pub fn same_message(a: &str, b: &str) -> bool {
    let a = normalize_message(a);
    !a.is_empty() && a == normalize_message(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_spacing_and_punctuation() {
        assert_eq!(
            normalize_message("  Fix   the\tHeader!! "),
            "fix the header"
        );
        assert_eq!(normalize_message("make it blue ?"), "make it blue");
    }

    #[test]
    fn different_requests_do_not_match() {
        assert!(same_message("fix the header", "Fix the header."));
        assert!(!same_message("fix the header", "fix the footer"));
        assert!(!same_message("", "   "));
    }
}
