//! Chat message payloads.
//!
//! The payload of a `MSG` command is a block of MIME-style headers, a blank
//! line, and the body bytes:
//!
//! ```text
//! MIME-Version: 1.0\r\n
//! Content-Type: text/plain; charset=UTF-8\r\n
//! X-MMS-IM-Format: FN=Segoe%20UI; EF=; CO=0; CS=0; PF=0\r\n
//! \r\n
//! Hi!
//! ```
//!
//! The body is kept as opaque bytes; only the content type is interpreted,
//! to route text messages and typing notifications.

use std::fmt;

use thiserror::Error;

/// Content type of plain text messages.
pub const CONTENT_TYPE_TEXT: &str = "text/plain; charset=UTF-8";

/// Content type of typing notifications.
pub const CONTENT_TYPE_CONTROL: &str = "text/x-msmsgscontrol";

/// Default text formatting header value.
const DEFAULT_IM_FORMAT: &str = "FN=Segoe%20UI; EF=; CO=0; CS=0; PF=0";

/// Errors from parsing a message payload.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The payload has no blank line separating headers from body.
    #[error("message payload has no header/body separator")]
    MissingSeparator,

    /// A header line is not `Name: value`.
    #[error("malformed message header: {0:?}")]
    MalformedHeader(String),

    /// The header block is not valid UTF-8.
    #[error("message headers are not valid UTF-8")]
    HeaderEncoding,
}

/// How a received message should be routed, by content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A plain text message.
    Text,
    /// A typing notification (`TypingUser` header names the typist).
    Typing,
    /// Anything else; the body is surfaced raw.
    Raw,
}

/// A chat message: typed headers, a content type, and opaque body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    content_type: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl ChatMessage {
    /// Creates a plain text message with the default formatting header.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            content_type: CONTENT_TYPE_TEXT.to_string(),
            headers: vec![("X-MMS-IM-Format".to_string(), DEFAULT_IM_FORMAT.to_string())],
            body: body.into().into_bytes(),
        }
    }

    /// Creates a typing notification for the given login name.
    pub fn typing(user: impl Into<String>) -> Self {
        Self {
            content_type: CONTENT_TYPE_CONTROL.to_string(),
            headers: vec![("TypingUser".to_string(), user.into())],
            body: b"\r\n".to_vec(),
        }
    }

    /// Creates a message with an arbitrary content type and body.
    pub fn raw(content_type: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            headers: Vec::new(),
            body,
        }
    }

    /// Builder: adds a header. Replaces an existing header with the same name.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    /// Returns the content type string.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Returns the value of a header, if present (case-insensitive name).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the body bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Returns the body as text, if it is valid UTF-8.
    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Classifies this message by content type.
    pub fn kind(&self) -> MessageKind {
        let ct = self.content_type.split(';').next().unwrap_or("").trim();
        if ct.eq_ignore_ascii_case("text/plain") {
            MessageKind::Text
        } else if ct.eq_ignore_ascii_case(CONTENT_TYPE_CONTROL) {
            MessageKind::Typing
        } else {
            MessageKind::Raw
        }
    }

    /// Renders the message into a `MSG` payload.
    ///
    /// `MIME-Version` and `Content-Type` come first, then the remaining
    /// headers in insertion order, a blank line, and the body.
    pub fn render(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(b"MIME-Version: 1.0\r\n");
        out.extend_from_slice(b"Content-Type: ");
        out.extend_from_slice(self.content_type.as_bytes());
        out.extend_from_slice(b"\r\n");
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    /// Parses a `MSG` payload into a message.
    ///
    /// `MIME-Version` is dropped; `Content-Type` defaults to `text/plain`
    /// when absent. Other headers are kept in wire order.
    pub fn parse(payload: &[u8]) -> Result<Self, MessageError> {
        let split = find_separator(payload).ok_or(MessageError::MissingSeparator)?;
        let (head, body) = (&payload[..split], &payload[split + 4..]);

        let head = std::str::from_utf8(head).map_err(|_| MessageError::HeaderEncoding)?;
        let mut content_type = None;
        let mut headers = Vec::new();

        for line in head.split("\r\n").filter(|l| !l.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| MessageError::MalformedHeader(line.to_string()))?;
            let (name, value) = (name.trim(), value.trim());
            if name.eq_ignore_ascii_case("MIME-Version") {
                continue;
            }
            if name.eq_ignore_ascii_case("Content-Type") {
                content_type = Some(value.to_string());
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        Ok(Self {
            content_type: content_type.unwrap_or_else(|| "text/plain".to_string()),
            headers,
            body: body.to_vec(),
        })
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.body_text() {
            Some(text) => write!(f, "{text}"),
            None => write!(f, "<{} bytes of {}>", self.body.len(), self.content_type),
        }
    }
}

/// Finds the offset of the `\r\n\r\n` header/body separator.
fn find_separator(payload: &[u8]) -> Option<usize> {
    payload.windows(4).position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_render_layout() {
        let msg = ChatMessage::text("Hi!");
        let rendered = msg.render();
        let text = std::str::from_utf8(&rendered).unwrap();

        assert!(text.starts_with("MIME-Version: 1.0\r\nContent-Type: text/plain; charset=UTF-8\r\n"));
        assert!(text.ends_with("\r\n\r\nHi!"));
        assert!(text.contains("X-MMS-IM-Format"));
    }

    #[test]
    fn render_parse_roundtrip() {
        let msg = ChatMessage::text("hello there").with_header("X-Custom", "v");
        let parsed = ChatMessage::parse(&msg.render()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn typing_notification() {
        let msg = ChatMessage::typing("a@b.c");
        assert_eq!(msg.kind(), MessageKind::Typing);
        assert_eq!(msg.header("TypingUser"), Some("a@b.c"));

        let parsed = ChatMessage::parse(&msg.render()).unwrap();
        assert_eq!(parsed.kind(), MessageKind::Typing);
        assert_eq!(parsed.header("typinguser"), Some("a@b.c"));
    }

    #[test]
    fn kind_routing() {
        assert_eq!(ChatMessage::text("x").kind(), MessageKind::Text);
        assert_eq!(
            ChatMessage::raw("text/x-msmsgsprofile; charset=UTF-8", vec![]).kind(),
            MessageKind::Raw
        );
        assert_eq!(
            ChatMessage::raw("text/plain; charset=ascii", b"hi".to_vec()).kind(),
            MessageKind::Text
        );
    }

    #[test]
    fn parse_missing_separator() {
        let err = ChatMessage::parse(b"Content-Type: text/plain\r\n").unwrap_err();
        assert!(matches!(err, MessageError::MissingSeparator));
    }

    #[test]
    fn parse_malformed_header() {
        let err = ChatMessage::parse(b"not a header\r\n\r\nbody").unwrap_err();
        assert!(matches!(err, MessageError::MalformedHeader(_)));
    }

    #[test]
    fn parse_defaults_content_type() {
        let msg = ChatMessage::parse(b"X-A: 1\r\n\r\nbody").unwrap();
        assert_eq!(msg.content_type(), "text/plain");
        assert_eq!(msg.body(), b"body");
    }

    #[test]
    fn body_can_contain_separator_bytes() {
        let msg = ChatMessage::raw("application/octet-stream", b"a\r\n\r\nb".to_vec());
        let parsed = ChatMessage::parse(&msg.render()).unwrap();
        assert_eq!(parsed.body(), b"a\r\n\r\nb");
    }

    #[test]
    fn with_header_replaces() {
        let msg = ChatMessage::text("x")
            .with_header("X-H", "1")
            .with_header("x-h", "2");
        assert_eq!(msg.header("X-H"), Some("2"));
    }
}
