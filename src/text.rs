//! Keyword matching over user questions.
//!
//! ASCII keywords match whole words (or whole phrases) case-insensitively so
//! that `it` does not fire inside `profit`. Keywords containing other scripts
//! match as plain substrings, since CJK text has no word separators.

/// Lowercase a question once so callers can run many keyword checks on it.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
}

/// Whether `keyword` occurs in the already-normalized `text`.
pub fn contains_keyword(text: &str, keyword: &str) -> bool {
    let keyword = keyword.trim().to_lowercase();
    if keyword.is_empty() {
        return false;
    }
    if !keyword.is_ascii() {
        return text.contains(&keyword);
    }

    let mut start = 0;
    while let Some(pos) = text[start..].find(&keyword) {
        let begin = start + pos;
        let end = begin + keyword.len();
        let before_ok = text[..begin]
            .chars()
            .next_back()
            .map_or(true, |c| !is_word_char(c));
        let after_ok = text[end..].chars().next().map_or(true, |c| !is_word_char(c));
        if before_ok && after_ok {
            return true;
        }
        start = begin + keyword.len();
    }
    false
}

/// `order_count` → `order count`, the way people type member names.
pub fn humanize(member: &str) -> String {
    member.replace(['_', '-'], " ").to_lowercase()
}

/// Split a member name into its lowercase `_`-separated tokens.
pub fn tokens(member: &str) -> Vec<String> {
    member
        .split(|c: char| c == '_' || c == '-' || c == '.')
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_boundaries() {
        assert!(contains_keyword("show it again", "it"));
        assert!(!contains_keyword("total profit", "it"));
        assert!(contains_keyword("last 7 days revenue", "last"));
        assert!(!contains_keyword("lasting revenue", "last"));
        assert!(contains_keyword("revenue, by region", "by"));
    }

    #[test]
    fn test_phrases_and_case() {
        let text = normalize("Revenue Last 7 Days");
        assert!(contains_keyword(&text, "last 7 days"));
        assert!(contains_keyword(&text, "Revenue"));
    }

    #[test]
    fn test_cjk_substring() {
        assert!(contains_keyword("最近7天的销售额", "最近"));
        assert!(contains_keyword("最近7天的销售额", "销售额"));
    }

    #[test]
    fn test_repeated_occurrence_after_non_boundary() {
        // first hit is inside "itself", second is a real word
        assert!(contains_keyword("itself and it", "it"));
    }

    #[test]
    fn test_humanize_and_tokens() {
        assert_eq!(humanize("order_count"), "order count");
        assert_eq!(tokens("Orders.total_revenue"), vec!["orders", "total", "revenue"]);
    }
}
