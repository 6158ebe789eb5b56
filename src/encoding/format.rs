//! Formats raw keys for diagnostics. Blob records carry arbitrary binary
//! keys; log lines and error messages escape them rather than assume UTF-8.

use itertools::Itertools as _;

/// Formats raw bytes as escaped ASCII strings.
pub fn bytes(bytes: &[u8]) -> String {
    let escaped = bytes
        .iter()
        .copied()
        .flat_map(std::ascii::escape_default)
        .collect_vec();
    format!("\"{}\"", String::from_utf8_lossy(&escaped))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_printable() {
        assert_eq!(bytes(b"abc"), "\"abc\"");
    }

    #[test]
    fn test_escapes_binary() {
        assert_eq!(bytes(&[0x00, 0xff]), "\"\\x00\\xff\"");
    }
}
