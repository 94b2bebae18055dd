//! Deterministic object-store key derivation.
//!
//! `screenshots/YYYY-MM-DD/<requestId>_<sanitized-url>.<format>` - a pure
//! function of (url, requestId, format, current UTC date), kept separate
//! from any adapter so it is directly unit-testable without a store.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::Format;

const MAX_SANITIZED_LEN: usize = 50;

/// Strip the scheme, replace non-alphanumerics with `_`, truncate to 50.
fn sanitize_url(url: &str) -> String {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);

    let sanitized: String = without_scheme
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();

    sanitized.chars().take(MAX_SANITIZED_LEN).collect()
}

pub fn derive_key(url: &str, request_id: Uuid, format: Format, now: DateTime<Utc>) -> String {
    let date = now.format("%Y-%m-%d");
    let sanitized = sanitize_url(url);
    format!("screenshots/{date}/{request_id}_{sanitized}.{}", format.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 27, 12, 0, 0).unwrap()
    }

    #[test]
    fn matches_expected_layout() {
        let id = Uuid::parse_str("00000000-0000-0000-0000-00000000000a").unwrap();
        let key = derive_key("example.com", id, Format::Png, fixed_now());
        assert_eq!(key, format!("screenshots/2026-07-27/{id}_example_com.png"));
    }

    #[test]
    fn strips_scheme_before_sanitizing() {
        let id = Uuid::new_v4();
        let with_scheme = derive_key("https://example.com/a?b=c", id, Format::Jpeg, fixed_now());
        let without_scheme = derive_key("example.com/a?b=c", id, Format::Jpeg, fixed_now());
        assert_eq!(with_scheme, without_scheme);
    }

    #[test]
    fn truncates_to_fifty_chars() {
        let id = Uuid::new_v4();
        let long_url = format!("https://example.com/{}", "a".repeat(100));
        let key = derive_key(&long_url, id, Format::Png, fixed_now());
        let prefix = format!("screenshots/2026-07-27/{id}_");
        let sanitized = key.strip_prefix(&prefix).unwrap().trim_end_matches(".png");
        assert_eq!(sanitized.len(), MAX_SANITIZED_LEN);
    }

    #[test]
    fn is_pure_same_inputs_same_key() {
        let id = Uuid::new_v4();
        let a = derive_key("example.com", id, Format::Png, fixed_now());
        let b = derive_key("example.com", id, Format::Png, fixed_now());
        assert_eq!(a, b);
    }

    #[test]
    fn date_changes_the_key() {
        let id = Uuid::new_v4();
        let tomorrow = fixed_now() + chrono::Duration::days(1);
        assert_ne!(derive_key("example.com", id, Format::Png, fixed_now()), derive_key("example.com", id, Format::Png, tomorrow));
    }
}
