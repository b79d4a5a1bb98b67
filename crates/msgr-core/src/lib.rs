//! Core domain types for the msgr MSNP12 client.
//!
//! This crate holds the value types shared by the protocol codec and the
//! client proper:
//! - [`Presence`]: the advertised presence states and their wire codes
//! - [`List`] / [`ListSet`]: contact-list membership bitmask
//! - [`ChatMessage`]: the MIME-ish payload carried inside `MSG` commands

pub mod list;
pub mod message;
pub mod presence;

pub use list::{List, ListSet};
pub use message::{ChatMessage, MessageError, MessageKind};
pub use presence::{Capabilities, Presence};
