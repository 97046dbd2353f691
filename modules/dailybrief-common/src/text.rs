//! Small text helpers shared across crates. Everything operates on characters,
//! not bytes — most of the content flowing through here is mixed CJK/ASCII.

/// Number of characters in `s`.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// First `max` characters of `s`.
pub fn take_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Truncate to `max` characters, replacing the tail with `...` when cut.
pub fn ellipsize(s: &str, max: usize) -> String {
    let trimmed = s.trim();
    if char_len(trimmed) <= max {
        return trimmed.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out = take_chars(trimmed, keep);
    out.push_str("...");
    out
}

/// Collapse all whitespace runs to single spaces.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ellipsize_respects_char_boundaries() {
        let s = "这是一段很长的中文文本内容";
        let cut = ellipsize(s, 8);
        assert_eq!(char_len(&cut), 8);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn ellipsize_keeps_short_strings() {
        assert_eq!(ellipsize("short", 100), "short");
        assert_eq!(ellipsize("  padded  ", 100), "padded");
    }

    #[test]
    fn normalize_whitespace_collapses_runs() {
        assert_eq!(normalize_whitespace("a\n b\t\tc"), "a b c");
    }
}
