//! MSNP12 wire codec for msgr.
//!
//! The notification server and every switchboard speak the same framing: an
//! ASCII header line terminated by `\r\n`, with space-separated tokens, the
//! first of which is a three-letter command identifier. Payload-bearing
//! commands (`MSG`, `UUX`, `UBX`, `NOT`, `QRY`) declare a decimal byte count
//! in the header; the payload follows the line with no extra framing.
//!
//! # Overview
//!
//! - [`Command`]: one typed variant per recognized identifier, with
//!   [`Command::encode`] and the two-phase [`Command::decode`] (header line
//!   first, declared payload second).
//! - [`LineFramer`]: CRLF line scanning and exact-length payload reads over
//!   any async byte stream.
//! - [`CommandReader`] / [`CommandWriter`]: a lazy inbound command producer
//!   and a frame-at-a-time outbound sink.
//! - [`escape`]: the percent-escaping applied to nicknames, group names and
//!   other free-text arguments.

pub mod command;
pub mod error;
pub mod escape;
pub mod framing;

pub use command::{Command, Decoded, MsgClass, PartialCommand, Verb};
pub use error::{ProtocolError, ProtocolResult};
pub use framing::{CommandReader, CommandWriter, LineFramer};

/// The protocol dialect spoken by this library.
pub const DIALECT: &str = "MSNP12";

/// The well-known dispatch server dialed first at login.
pub const DEFAULT_DISPATCH_SERVER: &str = "messenger.hotmail.com:1863";

/// Client id submitted in the `QRY` challenge reply.
pub const CHALLENGE_CLIENT_ID: &str = "msmsgs@msnmsgr.com";

/// Product key mixed into the challenge hash.
pub const CHALLENGE_PRODUCT_KEY: &str = "Q1P7W2E4J9R8U3S5";

/// Maximum accepted payload size (64 KiB).
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Maximum accepted header line length.
pub const MAX_LINE_LENGTH: usize = 4096;

/// Transport read granularity for the line framer.
pub const READ_CHUNK: usize = 1024;
