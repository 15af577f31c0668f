//! Helpers for cleaning up user-supplied names and keeping span fields tidy.
//!
//! Uploaded filenames become part of blob keys, and blob references end up in
//! logs. Nothing here should let a filename escape its batch directory or
//! leak the blob root into a trace.

/// Longest filename kept in a blob key, in characters.
const MAX_FILENAME_CHARS: usize = 120;

/// Turns an uploaded filename into a single safe path segment.
///
/// - directory components are dropped (`../../etc/passwd` → `passwd`)
/// - control characters and reserved characters become `_`
/// - leading dots are stripped so the result is never hidden or `..`
/// - an empty result becomes `resume`
pub fn sanitize_filename(name: &str) -> String {
    let last = name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();

    let cleaned: String = last
        .chars()
        .map(|c| match c {
            c if c.is_control() => '_',
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();

    let trimmed = cleaned.trim().trim_start_matches('.');
    let truncated: String = trimmed.chars().take(MAX_FILENAME_CHARS).collect();

    if truncated.is_empty() {
        "resume".to_string()
    } else {
        truncated
    }
}

/// Returns only the last segment of a blob reference.
///
/// Safe for span fields: names the file without exposing the blob root.
pub fn redact_reference(reference: &str) -> String {
    reference
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or("<unknown>")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_plain_name_unchanged() {
        assert_eq!(sanitize_filename("Jane Doe CV.pdf"), "Jane Doe CV.pdf");
    }

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\cv.pdf"), "cv.pdf");
    }

    #[test]
    fn test_sanitize_dot_names() {
        assert_eq!(sanitize_filename(".."), "resume");
        assert_eq!(sanitize_filename(".hidden.pdf"), "hidden.pdf");
        assert_eq!(sanitize_filename(""), "resume");
        assert_eq!(sanitize_filename("dir/"), "resume");
    }

    #[test]
    fn test_sanitize_control_and_reserved_chars() {
        assert_eq!(sanitize_filename("a\nb\tc?.pdf"), "a_b_c_.pdf");
    }

    #[test]
    fn test_sanitize_truncates_long_names() {
        let long = "x".repeat(500);
        assert_eq!(sanitize_filename(&long).chars().count(), MAX_FILENAME_CHARS);
    }

    #[test]
    fn test_redact_reference_returns_last_segment() {
        assert_eq!(
            redact_reference("file:///home/me/.batchrank/blobs/resumes/b1/j1_cv.pdf"),
            "j1_cv.pdf"
        );
    }

    #[test]
    fn test_redact_reference_no_segment() {
        assert_eq!(redact_reference("///"), "<unknown>");
    }
}
