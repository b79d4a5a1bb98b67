//! An MSNP12 instant-messaging client.
//!
//! The library logs a user into a notification server, mirrors presence and
//! contact state, and brokers switchboard IM sessions over separate TCP
//! connections.
//!
//! # Overview
//!
//! - [`Client`]: the notification-server session. Login, presence, roster
//!   and group operations, and session brokering live here.
//! - [`Switchboard`]: one IM session on its own connection; message send
//!   and receive, typing notifications, participant roster.
//! - [`ClientEvent`] / [`SessionEvent`]: typed events over broadcast
//!   channels, delivered in wire order.
//!
//! Callers supply a [`TransportFactory`] (default: TCP) and an
//! [`Authenticator`](msgr_auth::Authenticator) (default: Passport RST over
//! HTTPS); both are injection points for tests.
//!
//! # Example
//!
//! ```ignore
//! use msgr_client::{Client, ClientConfig, Credentials};
//!
//! let client = Client::new(ClientConfig::new());
//! let mut events = client.events();
//! client.login(&Credentials::new("a@b.c", "password")).await?;
//!
//! let session = client.start_session("friend@example.com").await?;
//! session.send_message(&msgr_client::ChatMessage::text("Hi!")).await?;
//! ```

mod connection;
mod psm;

pub mod config;
pub mod error;
pub mod event;
pub mod notification;
pub mod roster;
pub mod switchboard;
pub mod transport;

pub use config::{ClientConfig, ClientInfo, Credentials};
pub use error::{ClientError, ClientResult, describe};
pub use event::{ClientEvent, LogoutReason, SessionEvent};
pub use notification::{Client, ConnectionState};
pub use roster::{Contact, Group, LocalUser};
pub use switchboard::{Invitation, Participant, Switchboard};
pub use transport::{BoxedTransport, StreamTransport, TcpFactory, TransportFactory};

pub use msgr_auth::{Authenticator, PassportAuthenticator, SsoTicket, StaticAuthenticator};
pub use msgr_core::{Capabilities, ChatMessage, List, ListSet, MessageKind, Presence};
