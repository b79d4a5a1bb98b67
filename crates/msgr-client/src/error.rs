//! Client error types.

use thiserror::Error;

use msgr_auth::AuthError;
use msgr_protocol::ProtocolError;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// TCP connect/read/write fault; ends the affected session.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Malformed wire traffic.
    #[error("protocol error: {0}")]
    Protocol(ProtocolError),

    /// A three-digit error reply from the peer.
    #[error("{}", format_server_error(.code))]
    Server { code: u16 },

    /// No reply arrived within the deadline. Not retried automatically.
    #[error("timed out waiting for a reply")]
    Timeout,

    /// The authentication path rejected the credentials. Never retried.
    #[error("credentials rejected")]
    BadCredentials,

    /// The SSO exchange failed for a reason other than the credentials.
    #[error("authentication service error: {0}")]
    AuthService(String),

    /// The operation was cancelled by `close()` or shutdown.
    #[error("operation cancelled")]
    Cancelled,

    /// The switchboard refused the message (`NAK`).
    #[error("message delivery failed")]
    DeliveryFailed,

    /// The dispatcher kept redirecting past the configured limit.
    #[error("too many notification-server redirects")]
    Redirected,

    /// The operation needs a live, logged-in session.
    #[error("client is not ready: {0}")]
    NotReady(String),

    /// A caller-supplied argument cannot be sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The server answered with a command the request cannot accept.
    #[error("unexpected {verb} reply")]
    UnexpectedReply {
        /// The reply's identifier.
        verb: String,
    },
}

impl ClientError {
    /// Creates a server-error value from a reply code.
    pub fn server(code: u16) -> Self {
        Self::Server { code }
    }

    /// Returns the server error code, if this is a server error.
    pub fn server_code(&self) -> Option<u16> {
        match self {
            Self::Server { code } => Some(*code),
            _ => None,
        }
    }

    /// Creates an unexpected-reply error for a command.
    pub(crate) fn unexpected(command: &msgr_protocol::Command) -> Self {
        Self::UnexpectedReply {
            verb: command.verb().to_string(),
        }
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(io) => Self::Transport(io),
            ProtocolError::Transport => Self::Transport(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed mid-frame",
            )),
            other => Self::Protocol(other),
        }
    }
}

impl From<AuthError> for ClientError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::BadCredentials(_) => Self::BadCredentials,
            AuthError::Network(msg) | AuthError::InvalidResponse(msg) => Self::AuthService(msg),
        }
    }
}

fn format_server_error(code: &u16) -> String {
    match describe(*code) {
        Some(desc) => format!("server error {code} ({desc})"),
        None => format!("server error {code}"),
    }
}

/// Returns a description for well-known server error codes.
pub fn describe(code: u16) -> Option<&'static str> {
    match code {
        200 => Some("syntax error"),
        201 => Some("invalid parameter"),
        205 => Some("invalid user"),
        206 => Some("domain name missing"),
        207 => Some("server busy"),
        208 => Some("invalid username"),
        210 => Some("list full"),
        215 => Some("user already on list"),
        216 => Some("user not on list"),
        217 => Some("user offline"),
        223 => Some("too many groups"),
        224 => Some("invalid group"),
        225 => Some("user not in group"),
        229 => Some("group name too long"),
        230 => Some("cannot remove default group"),
        280 => Some("switchboard failed"),
        281 => Some("switchboard transfer failed"),
        500 => Some("internal server error"),
        540 => Some("challenge response failed"),
        600 => Some("server unavailable"),
        601 => Some("server unavailable"),
        710 => Some("bad CVR parameters"),
        713 => Some("too many sessions"),
        715 => Some("not expected"),
        717 => Some("bad friend file"),
        911 => Some("authentication failed"),
        913 => Some("not allowed while hidden"),
        920 => Some("not accepting new users"),
        928 => Some("bad ticket"),
        _ => None,
    }
}
