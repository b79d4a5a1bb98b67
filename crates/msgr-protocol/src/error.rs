//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while framing or decoding commands.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// IO error during read/write.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The byte stream ended in the middle of a frame.
    #[error("connection closed mid-frame")]
    Transport,

    /// A header line could not be decoded.
    #[error("malformed command ({reason}): {line:?}")]
    MalformedCommand { line: String, reason: String },

    /// A declared payload exceeds the accepted maximum.
    #[error("payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A header line exceeds the accepted maximum.
    #[error("header line too long (max: {max} bytes)")]
    LineTooLong { max: usize },

    /// A percent-escaped argument could not be decoded as UTF-8.
    #[error("invalid percent-escaped argument: {arg:?}")]
    InvalidEscape { arg: String },

    /// A header line was not valid UTF-8.
    #[error("header line is not valid UTF-8")]
    LineEncoding,
}

impl PartialEq for ProtocolError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Io(a), Self::Io(b)) => a.kind() == b.kind(),
            (Self::Transport, Self::Transport) => true,
            (
                Self::MalformedCommand { line: l1, reason: r1 },
                Self::MalformedCommand { line: l2, reason: r2 },
            ) => l1 == l2 && r1 == r2,
            (
                Self::PayloadTooLarge { size: s1, max: m1 },
                Self::PayloadTooLarge { size: s2, max: m2 },
            ) => s1 == s2 && m1 == m2,
            (Self::LineTooLong { max: m1 }, Self::LineTooLong { max: m2 }) => m1 == m2,
            (Self::InvalidEscape { arg: a1 }, Self::InvalidEscape { arg: a2 }) => a1 == a2,
            (Self::LineEncoding, Self::LineEncoding) => true,
            _ => false,
        }
    }
}

impl ProtocolError {
    /// Shorthand for a malformed-command error.
    pub(crate) fn malformed(line: &str, reason: impl Into<String>) -> Self {
        Self::MalformedCommand {
            line: line.to_string(),
            reason: reason.into(),
        }
    }
}
