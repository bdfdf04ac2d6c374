use std::sync::OnceLock;

use regex::Regex;

fn transient_text_regex() -> Option<&'static Regex> {
    static CACHED: OnceLock<Option<Regex>> = OnceLock::new();
    CACHED
        .get_or_init(|| {
            Regex::new(
                r"(?i)rate.?limit|overloaded|service.?unavailable|upstream.?connect|connection.?refused",
            )
            .ok()
        })
        .as_ref()
}

/// Classifies a failure as transient from its status code and message text.
///
/// Used to annotate failures for the caller; requests are never retried
/// automatically.
pub fn is_transient_failure(status: u16, error_text: &str) -> bool {
    if error_text.contains("usage limit") {
        return false;
    }
    matches!(status, 429 | 500 | 502 | 503 | 504 | 529)
        || transient_text_regex().is_some_and(|regex| regex.is_match(error_text))
}

#[cfg(test)]
mod tests {
    use super::is_transient_failure;

    #[test]
    fn server_overload_is_transient() {
        assert!(is_transient_failure(503, ""));
        assert!(is_transient_failure(0, "Overloaded, please retry"));
    }

    #[test]
    fn client_errors_and_usage_limits_are_not_transient() {
        assert!(!is_transient_failure(400, "invalid model"));
        assert!(!is_transient_failure(429, "You have hit your usage limit."));
    }
}
