//! Content-derived ETags and overwrite precondition checks.
//!
//! An ETag is `v{version}-{sha256 hex}`. The version prefix leaves room
//! to change the derivation later while still recognizing old tags.

const CURRENT_VERSION: &str = "v1";

/// Builds the current-version ETag for a content hash.
pub fn generate(content_hash: &str) -> String {
    format!("{CURRENT_VERSION}-{content_hash}")
}

/// Pulls the hash out of a versioned ETag. Tags without a recognizable
/// `v{digits}-` prefix are treated as bare hashes.
pub fn extract_hash(etag: &str) -> &str {
    if let Some(rest) = etag.strip_prefix('v') {
        if let Some(idx) = rest.find('-') {
            if idx > 0 && rest[..idx].bytes().all(|b| b.is_ascii_digit()) {
                return &rest[idx + 1..];
            }
        }
    }
    etag
}

/// Case-insensitive hash comparison. Absent or empty hashes never match,
/// not even each other.
pub fn compare_hashes(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

/// Parses an `If-Match` header value, stripping one pair of surrounding
/// quotes. Returns None for a missing or blank header.
pub fn parse_if_match(header: Option<&str>) -> Option<String> {
    let value = header?.trim();
    if value.is_empty() {
        return None;
    }
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
        .trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Quotes an ETag for an HTTP response header, unless already quoted.
pub fn format_header(etag: &str) -> String {
    if etag.starts_with('"') && etag.ends_with('"') && etag.len() >= 2 {
        etag.to_string()
    } else {
        format!("\"{etag}\"")
    }
}

/// Outcome of checking an overwrite against the stored content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwriteDecision {
    /// No `If-Match` was sent. The caller must fetch the current ETag
    /// first (HTTP 428).
    PreconditionRequired,
    /// The client's ETag no longer matches the stored content (HTTP 412).
    PreconditionFailed,
    /// New content is byte-identical to what is stored. Nothing to write.
    Unchanged,
    /// Precondition holds and content differs. Go ahead.
    Proceed,
}

/// Decides whether an overwrite may proceed.
///
/// Order matters: a missing header is reported before anything else, and
/// a stale ETag is reported even when the upload would be a no-op.
pub fn evaluate_overwrite(
    if_match: Option<&str>,
    current_hash: &str,
    new_hash: &str,
) -> OverwriteDecision {
    let client_etag = match parse_if_match(if_match) {
        Some(etag) => etag,
        None => return OverwriteDecision::PreconditionRequired,
    };
    if !compare_hashes(Some(extract_hash(&client_etag)), Some(current_hash)) {
        return OverwriteDecision::PreconditionFailed;
    }
    if compare_hashes(Some(new_hash), Some(current_hash)) {
        return OverwriteDecision::Unchanged;
    }
    OverwriteDecision::Proceed
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn generate_and_extract_round_trip() {
        let etag = generate(HASH);
        assert_eq!(etag, format!("v1-{HASH}"));
        assert_eq!(extract_hash(&etag), HASH);
    }

    #[test]
    fn unversioned_tag_is_taken_as_bare_hash() {
        assert_eq!(extract_hash(HASH), HASH);
        assert_eq!(extract_hash("weird-tag"), "weird-tag");
        assert_eq!(extract_hash("v-abc"), "v-abc");
    }

    #[test]
    fn future_versions_still_extract() {
        assert_eq!(extract_hash("v2-abc"), "abc");
        assert_eq!(extract_hash("v12-abc"), "abc");
    }

    #[test]
    fn hash_comparison_rules() {
        assert!(compare_hashes(Some("ABC"), Some("abc")));
        assert!(!compare_hashes(Some("abc"), Some("abd")));
        assert!(!compare_hashes(None, None));
        assert!(!compare_hashes(Some(""), Some("")));
        assert!(!compare_hashes(Some("abc"), None));
    }

    #[test]
    fn if_match_parsing() {
        assert_eq!(parse_if_match(Some("\"v1-abc\"")), Some("v1-abc".into()));
        assert_eq!(parse_if_match(Some("  v1-abc  ")), Some("v1-abc".into()));
        assert_eq!(parse_if_match(Some("")), None);
        assert_eq!(parse_if_match(Some("  ")), None);
        assert_eq!(parse_if_match(Some("\"\"")), None);
        assert_eq!(parse_if_match(None), None);
        // Whitespace inside the quotes goes too.
        assert_eq!(parse_if_match(Some("\" v1-abc \"")), Some("v1-abc".into()));
        assert_eq!(parse_if_match(Some("\"  \"")), None);
    }

    #[test]
    fn header_formatting_is_idempotent() {
        assert_eq!(format_header("v1-abc"), "\"v1-abc\"");
        assert_eq!(format_header("\"v1-abc\""), "\"v1-abc\"");
    }

    #[test]
    fn overwrite_requires_a_header_first() {
        assert_eq!(
            evaluate_overwrite(None, HASH, "other"),
            OverwriteDecision::PreconditionRequired
        );
        assert_eq!(
            evaluate_overwrite(Some("  "), HASH, "other"),
            OverwriteDecision::PreconditionRequired
        );
    }

    #[test]
    fn stale_etag_fails_even_for_identical_content() {
        assert_eq!(
            evaluate_overwrite(Some("v1-stale"), HASH, HASH),
            OverwriteDecision::PreconditionFailed
        );
    }

    #[test]
    fn matching_header_and_identical_content_is_a_no_op() {
        let header = format!("\"v1-{HASH}\"");
        assert_eq!(
            evaluate_overwrite(Some(&header), HASH, HASH),
            OverwriteDecision::Unchanged
        );
    }

    #[test]
    fn matching_header_and_new_content_proceeds() {
        let header = format!("v1-{HASH}");
        assert_eq!(
            evaluate_overwrite(Some(&header), HASH, "otherhash"),
            OverwriteDecision::Proceed
        );
    }

    #[test]
    fn bare_hash_in_if_match_is_accepted() {
        assert_eq!(
            evaluate_overwrite(Some(HASH), HASH, "otherhash"),
            OverwriteDecision::Proceed
        );
    }
}
