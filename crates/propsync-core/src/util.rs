//! Small text and clock helpers shared by the store, remote clients and CLI.

/// Trim optional text, treating blank values as absent.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Collapse whitespace runs to single spaces and cap the result at
/// `max_chars`, ending truncated text with `...`.
pub fn compact_text(value: &str, max_chars: usize) -> String {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }

    let mut truncated: String = collapsed.chars().take(max_chars.saturating_sub(3)).collect();
    truncated.push_str("...");
    truncated
}

/// Current Unix timestamp in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_is_absent() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some(" \t ".to_string())), None);
        assert_eq!(
            normalize_text_option(Some(" https://api.example.com ".to_string())),
            Some("https://api.example.com".to_string())
        );
    }

    #[test]
    fn only_http_schemes_are_urls() {
        assert!(is_http_url("http://localhost:8080"));
        assert!(is_http_url("https://api.example.com"));
        assert!(!is_http_url("ftp://api.example.com"));
        assert!(!is_http_url("api.example.com"));
    }

    #[test]
    fn compact_text_collapses_and_truncates() {
        assert_eq!(compact_text("  1   Oak\n St ", 40), "1 Oak St");

        let long = compact_text(&"x".repeat(500), 180);
        assert_eq!(long.chars().count(), 180);
        assert!(long.ends_with("..."));
    }
}
