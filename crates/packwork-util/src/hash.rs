/// Compute the BLAKE3 hash of a byte slice, returning the hex-encoded digest.
#[must_use]
pub fn blake3_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Short content fingerprint used in output file names.
///
/// The first `len` hex characters of the BLAKE3 digest. `len` is clamped to
/// the digest length (64).
#[must_use]
pub fn fingerprint(data: &[u8], len: usize) -> String {
    let mut hex = blake3_bytes(data);
    hex.truncate(len.min(64));
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake3_bytes_known_digest() {
        assert_eq!(
            blake3_bytes(b"hello world"),
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
    }

    #[test]
    fn test_fingerprint_truncates() {
        assert_eq!(fingerprint(b"hello world", 10), "d74981efa7");
        assert_eq!(fingerprint(b"hello world", 200).len(), 64);
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        assert_eq!(fingerprint(b"a", 10), fingerprint(b"a", 10));
        assert_ne!(fingerprint(b"a", 10), fingerprint(b"b", 10));
    }
}
