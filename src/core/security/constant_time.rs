//! Constant-time comparisons for secret material.

use subtle::ConstantTimeEq;

/// Compares two byte slices in constant time.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Checks a presented admin credential against the configured one.
///
/// Always false when no admin key is configured.
#[must_use]
pub fn verify_admin_key(configured: Option<&str>, presented: Option<&str>) -> bool {
    match (configured, presented) {
        (Some(expected), Some(given)) if !expected.is_empty() => {
            constant_time_eq(expected.as_bytes(), given.as_bytes())
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }

    #[test]
    fn test_admin_key_requires_configuration() {
        assert!(verify_admin_key(Some("k"), Some("k")));
        assert!(!verify_admin_key(Some("k"), Some("x")));
        assert!(!verify_admin_key(Some("k"), None));
        assert!(!verify_admin_key(None, Some("k")));
        assert!(!verify_admin_key(Some(""), Some("")));
    }
}
