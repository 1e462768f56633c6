//! Title cleanup, publish-date parsing and HTML escaping.
//!
//! Search titles arrive with `<b>` highlighting around matched terms and with
//! HTML entities; everything downstream (filtering, messages) works on the
//! cleaned plain text.

use chrono::{DateTime, FixedOffset};
use once_cell::sync::Lazy;
use quick_xml::escape::{resolve_predefined_entity, unescape_with};
use regex::Regex;
use std::borrow::Cow;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static HIGHLIGHT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</?b>").unwrap());

/// Decode HTML entities and strip the highlighting markup from a title.
///
/// Only `<b>`/`</b>` are removed, including ones that appear after entity
/// decoding (`&lt;b&gt;`). Any other `<` is ordinary title text. Runs of
/// whitespace collapse to a single space.
///
/// # Arguments
///
/// * `raw` - The title as returned by the search API
///
/// # Returns
///
/// Plain text suitable for keyword matching and for re-escaping into a
/// message.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(clean_title("<b>Election</b> &amp; results"), "Election & results");
/// assert_eq!(clean_title("Rates <up again"), "Rates <up again");
/// ```
pub fn clean_title(raw: &str) -> String {
    let decoded = decode_entities(raw);
    let stripped = HIGHLIGHT.replace_all(&decoded, "");
    WHITESPACE.replace_all(stripped.trim(), " ").into_owned()
}

/// Named and numeric character references; malformed input stays as is.
fn decode_entities(raw: &str) -> Cow<'_, str> {
    unescape_with(raw, |entity| match entity {
        "nbsp" => Some(" "),
        "middot" => Some("·"),
        _ => resolve_predefined_entity(entity),
    })
    .unwrap_or(Cow::Borrowed(raw))
}

/// Parse an RFC 2822 publish date and shift it into `tz`.
///
/// Returns `None` for anything that does not parse; callers treat such items
/// as undated.
pub fn parse_pub_date(raw: &str, tz: &FixedOffset) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc2822(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(tz))
}

/// Escape a string for Telegram's HTML parse mode.
///
/// Only `<`, `>` and `&` are escaped; Telegram rejects `&apos;`.
pub fn escape_html(s: &str) -> String {
    quick_xml::escape::partial_escape(s).into_owned()
}

/// Format a publish time for operator reports, `N/A` when absent.
pub fn short_time(ts: Option<&DateTime<FixedOffset>>) -> String {
    match ts {
        Some(ts) => ts.format("%m-%d(%H:%M)").to_string(),
        None => "N/A".to_string(),
    }
}

/// Truncate a string for logging purposes.
///
/// Cuts on a character boundary so multi-byte titles never panic.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((idx, _)) => format!("{}…(+{} bytes)", &s[..idx], s.len() - idx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn kst() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    #[test]
    fn test_clean_title_strips_highlighting() {
        assert_eq!(
            clean_title("<b>Election</b> results announced"),
            "Election results announced"
        );
    }

    #[test]
    fn test_clean_title_decodes_entities() {
        assert_eq!(
            clean_title("Tom &amp; Jerry &quot;reunion&quot; &#39;24"),
            "Tom & Jerry \"reunion\" '24"
        );
    }

    #[test]
    fn test_clean_title_strips_escaped_highlighting() {
        assert_eq!(clean_title("&lt;b&gt;Rates&lt;/b&gt; rise"), "Rates rise");
    }

    #[test]
    fn test_clean_title_keeps_bare_angle_bracket() {
        assert_eq!(clean_title("Rates <up again"), "Rates <up again");
        assert_eq!(clean_title("<b>Rates</b> &lt;up again"), "Rates <up again");
        assert_eq!(clean_title("a<b>c</b> <br> d"), "ac <br> d");
    }

    #[test]
    fn test_clean_title_tolerates_stray_ampersand() {
        assert_eq!(clean_title("<b>AT&T</b> earnings"), "AT&T earnings");
    }

    #[test]
    fn test_clean_title_decodes_nbsp() {
        assert_eq!(clean_title("Budget&nbsp;&nbsp;vote"), "Budget vote");
    }

    #[test]
    fn test_clean_title_collapses_whitespace() {
        assert_eq!(clean_title("  Budget \n  vote  "), "Budget vote");
    }

    #[test]
    fn test_clean_title_keeps_unicode() {
        assert_eq!(clean_title("<b>선거</b> 결과"), "선거 결과");
    }

    #[test]
    fn test_parse_pub_date_normalizes_offset() {
        let parsed = parse_pub_date("Mon, 06 May 2025 05:30:00 +0000", &kst()).unwrap();
        assert_eq!(parsed, kst().with_ymd_and_hms(2025, 5, 6, 14, 30, 0).unwrap());
        assert_eq!(parsed.offset(), &kst());
    }

    #[test]
    fn test_parse_pub_date_rejects_garbage() {
        assert!(parse_pub_date("2025-05-06 14:30", &kst()).is_none());
        assert!(parse_pub_date("", &kst()).is_none());
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a < b & c > d"), "a &lt; b &amp; c &gt; d");
        assert_eq!(escape_html("it's"), "it's");
    }

    #[test]
    fn test_short_time() {
        let ts = kst().with_ymd_and_hms(2025, 5, 6, 9, 5, 0).unwrap();
        assert_eq!(short_time(Some(&ts)), "05-06(09:05)");
        assert_eq!(short_time(None), "N/A");
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("short", 100), "short");
        let long = "a".repeat(500);
        let result = truncate_for_log(&long, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_multibyte() {
        let result = truncate_for_log("가나다라", 2);
        assert_eq!(result, "가나…(+6 bytes)");
    }
}
