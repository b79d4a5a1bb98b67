//! Percent escaping for free-text command arguments.
//!
//! Nicknames, personal messages, group names and display-picture objects
//! travel as single space-free tokens: everything outside the RFC 3986
//! unreserved set is percent-escaped, UTF-8 before encoding.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

use crate::error::ProtocolError;

/// Escape everything but ALPHA / DIGIT / `-` / `.` / `_` / `~`.
const ARG_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Encodes a free-text argument for the wire.
pub fn encode_arg(value: &str) -> String {
    utf8_percent_encode(value, ARG_SET).to_string()
}

/// Decodes a percent-escaped argument into plain UTF-8.
pub fn decode_arg(value: &str) -> Result<String, ProtocolError> {
    percent_decode_str(value)
        .decode_utf8()
        .map(|cow| cow.into_owned())
        .map_err(|_| ProtocolError::InvalidEscape {
            arg: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreserved_passes_through() {
        assert_eq!(encode_arg("Abc-12.3_z~"), "Abc-12.3_z~");
    }

    #[test]
    fn spaces_and_percent() {
        assert_eq!(encode_arg("Example Name"), "Example%20Name");
        assert_eq!(encode_arg("50%"), "50%25");
        assert_eq!(decode_arg("Example%20Name").unwrap(), "Example Name");
    }

    #[test]
    fn non_ascii_roundtrip() {
        for value in ["héllo", "日本語", "smiley ☺", "a b%c~d"] {
            assert_eq!(decode_arg(&encode_arg(value)).unwrap(), value);
        }
    }

    #[test]
    fn invalid_utf8_rejected() {
        // %FF alone is not valid UTF-8.
        assert!(decode_arg("%ff%fe").is_err());
    }

    #[test]
    fn plain_text_decodes_unchanged() {
        assert_eq!(decode_arg("nickname").unwrap(), "nickname");
    }
}
