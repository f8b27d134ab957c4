//! Message normalization: an ordered substitution pipeline that replaces
//! volatile substrings with fixed placeholder tokens before hashing.
//!
//! Order matters. Timestamp, UUID, and path passes must run before the
//! generic numeric pass or their digits would be partially consumed by it.
//! Every placeholder (`<ts>`, `<uuid>`, ...) is inert to all passes, which
//! makes the pipeline idempotent.

use regex::Regex;
use std::sync::OnceLock;

fn re(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("valid normalization regex"))
}

/// Apply the full normalization pipeline to a string.
///
/// # Examples
///
/// ```
/// use oxtrack_fingerprint::normalize_message;
///
/// let s = normalize_message("timeout for user 10.0.0.1 at 2024-01-15T10:30:00Z");
/// assert_eq!(s, "timeout for user <ip> at <ts>");
/// ```
pub fn normalize_message(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }

    let mut s = input.to_string();
    s = replace_timestamps(&s);
    s = replace_uuids(&s);
    s = replace_urls_and_paths(&s);
    s = replace_ips(&s);
    s = replace_emails(&s);
    s = replace_versions(&s);
    s = replace_id_pairs(&s);
    s = replace_numbers(&s);
    collapse_whitespace(&s)
}

fn replace_timestamps(s: &str) -> String {
    static ISO: OnceLock<Regex> = OnceLock::new();
    static DATE: OnceLock<Regex> = OnceLock::new();
    static SLASH_DATE: OnceLock<Regex> = OnceLock::new();
    static TIME: OnceLock<Regex> = OnceLock::new();
    static UNIX: OnceLock<Regex> = OnceLock::new();

    let s = re(
        &ISO,
        r"\b\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?",
    )
    .replace_all(s, "<ts>");
    let s = re(&DATE, r"\b\d{4}-\d{2}-\d{2}\b").replace_all(&s, "<ts>");
    let s = re(&SLASH_DATE, r"\b\d{2}/\d{2}/\d{4}\b").replace_all(&s, "<ts>");
    let s = re(&TIME, r"\b\d{2}:\d{2}:\d{2}(?:\.\d+)?\b").replace_all(&s, "<ts>");
    // Unix epoch seconds or milliseconds (13-digit alternative first).
    let s = re(&UNIX, r"\b1\d{12}\b|\b1\d{9}\b").replace_all(&s, "<ts>");
    s.into_owned()
}

fn replace_uuids(s: &str) -> String {
    static UUID: OnceLock<Regex> = OnceLock::new();
    re(
        &UUID,
        r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b",
    )
    .replace_all(s, "<uuid>")
    .into_owned()
}

fn replace_urls_and_paths(s: &str) -> String {
    static URL: OnceLock<Regex> = OnceLock::new();
    static WIN_PATH: OnceLock<Regex> = OnceLock::new();
    static UNIX_PATH: OnceLock<Regex> = OnceLock::new();

    let s = re(&URL, r"\bhttps?://[^\s]+").replace_all(s, "<url>");
    let s = re(&WIN_PATH, r"\b[A-Za-z]:\\[^\s]+").replace_all(&s, "<path>");
    let s = re(&UNIX_PATH, r"(?:/[\w.\-]+){2,}/?").replace_all(&s, "<path>");
    s.into_owned()
}

fn replace_ips(s: &str) -> String {
    static IPV4: OnceLock<Regex> = OnceLock::new();
    static IPV6: OnceLock<Regex> = OnceLock::new();

    let s = re(&IPV4, r"\b(?:\d{1,3}\.){3}\d{1,3}\b").replace_all(s, "<ip>");
    let s = re(&IPV6, r"\b(?:[0-9a-fA-F]{1,4}:){2,7}[0-9a-fA-F]{1,4}\b").replace_all(&s, "<ip>");
    s.into_owned()
}

fn replace_emails(s: &str) -> String {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    re(&EMAIL, r"\b[\w.+\-]+@[\w\-]+(?:\.[\w\-]+)+\b")
        .replace_all(s, "<email>")
        .into_owned()
}

fn replace_versions(s: &str) -> String {
    static SEMVER: OnceLock<Regex> = OnceLock::new();
    re(&SEMVER, r"\bv?\d+\.\d+\.\d+(?:[-+][0-9A-Za-z.\-]+)?\b")
        .replace_all(s, "<version>")
        .into_owned()
}

/// Collapse `id=...` / `session: ...` style pairs for a fixed set of
/// identifier keys. Longer key alternatives come first so `user_id` is not
/// half-eaten by `id`.
fn replace_id_pairs(s: &str) -> String {
    static PAIR: OnceLock<Regex> = OnceLock::new();
    re(
        &PAIR,
        r"(?i)\b(?P<key>user_id|userid|session|token|id)\s*[:=]\s*[\w\-]+",
    )
    .replace_all(s, "${key}=<id>")
    .into_owned()
}

fn replace_numbers(s: &str) -> String {
    static DECIMAL: OnceLock<Regex> = OnceLock::new();
    static HEX0X: OnceLock<Regex> = OnceLock::new();
    static LONG_NUM: OnceLock<Regex> = OnceLock::new();
    static BARE_HEX: OnceLock<Regex> = OnceLock::new();

    let s = re(&DECIMAL, r"\b\d+\.\d+\b").replace_all(s, "<num>");
    let s = re(&HEX0X, r"\b0x[0-9a-fA-F]+\b").replace_all(&s, "<hex>");
    let s = re(&LONG_NUM, r"\b\d{4,}\b").replace_all(&s, "<num>");
    let s = re(&BARE_HEX, r"\b[0-9a-fA-F]{8,}\b").replace_all(&s, "<hex>");
    s.into_owned()
}

fn collapse_whitespace(s: &str) -> String {
    static WS: OnceLock<Regex> = OnceLock::new();
    re(&WS, r"\s+").replace_all(s, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_message_stays_empty() {
        assert_eq!(normalize_message(""), "");
    }

    #[test]
    fn timestamps_are_replaced() {
        assert_eq!(
            normalize_message("started at 2024-01-15T10:30:00.123Z done"),
            "started at <ts> done"
        );
        assert_eq!(normalize_message("on 2024-01-15 it broke"), "on <ts> it broke");
        assert_eq!(normalize_message("at 10:30:45 exactly"), "at <ts> exactly");
        assert_eq!(normalize_message("epoch 1705312200 hit"), "epoch <ts> hit");
        assert_eq!(normalize_message("epoch 1705312200123 hit"), "epoch <ts> hit");
    }

    #[test]
    fn uuids_are_replaced() {
        assert_eq!(
            normalize_message("user 550e8400-e29b-41d4-a716-446655440000 missing"),
            "user <uuid> missing"
        );
    }

    #[test]
    fn urls_and_paths_are_replaced() {
        assert_eq!(
            normalize_message("GET https://api.example.com/v2/users?id=9 failed"),
            "GET <url> failed"
        );
        assert_eq!(
            normalize_message("no such file /usr/lib/libfoo.so found"),
            "no such file <path> found"
        );
        assert_eq!(
            normalize_message(r"cannot open C:\Users\bob\app.log here"),
            "cannot open <path> here"
        );
    }

    #[test]
    fn addresses_are_replaced() {
        assert_eq!(
            normalize_message("refused by 192.168.0.1 upstream"),
            "refused by <ip> upstream"
        );
        assert_eq!(
            normalize_message("peer 2001:0db8:85a3:0000:0000:8a2e:0370:7334 gone"),
            "peer <ip> gone"
        );
        assert_eq!(
            normalize_message("mail to ops+alerts@example.co.uk bounced"),
            "mail to <email> bounced"
        );
    }

    #[test]
    fn versions_and_id_pairs_are_replaced() {
        assert_eq!(
            normalize_message("incompatible with v2.14.3 runtime"),
            "incompatible with <version> runtime"
        );
        assert_eq!(
            normalize_message("lookup failed for user_id=48213 session: abc-99"),
            "lookup failed for user_id=<id> session=<id>"
        );
    }

    #[test]
    fn long_numbers_and_hex_are_replaced() {
        assert_eq!(
            normalize_message("rc 12345 hash deadbeefcafe offset 0x7f3a"),
            "rc <num> hash <hex> offset <hex>"
        );
        assert_eq!(normalize_message("ratio was 0.75 here"), "ratio was <num> here");
        // Short numbers survive: they are usually semantic (HTTP codes, counts).
        assert_eq!(normalize_message("got 404 from origin"), "got 404 from origin");
    }

    #[test]
    fn whitespace_is_collapsed_and_trimmed() {
        assert_eq!(normalize_message("  too   many\t spaces \n"), "too many spaces");
    }

    #[test]
    fn pipeline_is_idempotent() {
        let samples = [
            "job 9912345 failed at 2024-01-15T10:30:00Z for user 550e8400-e29b-41d4-a716-446655440000",
            "GET https://x.io/a/b from 10.0.0.1 user_id=7781 took 3.14s",
            "read /var/log/app/current.log at 10:30:45 token: aaaa-bbbb",
            "plain message with 404 and nothing volatile",
            "",
        ];
        for s in samples {
            let once = normalize_message(s);
            let twice = normalize_message(&once);
            assert_eq!(once, twice, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn ordering_keeps_timestamps_whole() {
        // Were the numeric pass to run first, the date would degrade into
        // mixed <num> fragments instead of a single <ts>.
        assert_eq!(
            normalize_message("saw 2024-01-15 10:30:00 in log"),
            "saw <ts> in log"
        );
    }
}
