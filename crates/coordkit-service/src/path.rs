//! Path and sequential-name helpers.
//!
//! Paths are absolute, `/`-separated, with no trailing slash except for the
//! root `/` itself. Sequential nodes carry a fixed-width decimal suffix, so
//! lexicographic order of names sharing a prefix equals creation order.

use crate::ServiceError;

/// Width of the zero-padded sequence suffix appended to sequential nodes.
pub const SEQUENCE_DIGITS: usize = 10;

/// Path of the namespace root.
pub const ROOT: &str = "/";

/// Join a parent path and a child name.
pub fn join(parent: &str, child: &str) -> String {
    if parent == ROOT {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Parent of an absolute path (`None` for the root).
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last component of an absolute path.
pub fn name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Validate an absolute node path.
pub fn validate(path: &str) -> Result<(), ServiceError> {
    let invalid = |reason: &str| ServiceError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if !path.starts_with('/') {
        return Err(invalid("path must be absolute"));
    }
    if path == ROOT {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(invalid("path must not end with '/'"));
    }
    if path.split('/').skip(1).any(str::is_empty) {
        return Err(invalid("empty path component"));
    }
    Ok(())
}

/// Append the fixed-width sequence suffix to a requested path.
pub fn with_sequence(path: &str, sequence: u64) -> String {
    format!("{path}{sequence:0width$}", width = SEQUENCE_DIGITS)
}

/// Split a sequential node name into its prefix and sequence number.
///
/// Returns `None` if the name does not end in a full-width decimal suffix.
pub fn split_sequence(name: &str) -> Option<(&str, u64)> {
    if name.len() < SEQUENCE_DIGITS {
        return None;
    }
    let split_at = name.len() - SEQUENCE_DIGITS;
    if !name.is_char_boundary(split_at) {
        return None;
    }
    let (prefix, digits) = name.split_at(split_at);
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(|seq| (prefix, seq))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn join_and_parent() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
        assert_eq!(parent("/a/b"), Some("/a"));
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/"), None);
        assert_eq!(name("/a/b"), "b");
    }

    #[test]
    fn validate_rejects_malformed_paths() {
        assert!(validate("/").is_ok());
        assert!(validate("/a/b").is_ok());
        assert!(validate("a/b").is_err());
        assert!(validate("/a/").is_err());
        assert!(validate("/a//b").is_err());
    }

    #[test]
    fn sequence_suffix_is_fixed_width() {
        assert_eq!(with_sequence("/q/entry-", 7), "/q/entry-0000000007");
        assert_eq!(split_sequence("entry-0000000007"), Some(("entry-", 7)));
        assert_eq!(split_sequence("0000000012"), Some(("", 12)));
        assert_eq!(split_sequence("entry-12"), None);
        assert_eq!(split_sequence("entry-00000000x7"), None);
    }

    proptest! {
        #[test]
        fn suffix_order_matches_numeric_order(a in 0u64..9_999_999_999, b in 0u64..9_999_999_999) {
            let na = with_sequence("n-", a);
            let nb = with_sequence("n-", b);
            prop_assert_eq!(na.cmp(&nb), a.cmp(&b));
            prop_assert_eq!(split_sequence(&na), Some(("n-", a)));
        }
    }
}
