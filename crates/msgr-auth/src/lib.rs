//! Authentication for msgr.
//!
//! Login needs two things from this crate:
//!
//! 1. An SSO ticket: the notification server answers the first `USR` with a
//!    policy string, and the client must exchange login name, password and
//!    that policy for an opaque ticket over HTTPS. The exchange is behind
//!    the [`Authenticator`] trait so tests (and anyone talking to a revived
//!    server with its own auth) can substitute their own implementation;
//!    [`PassportAuthenticator`] is the real one.
//! 2. The challenge hash: the server periodically issues `CHL` nonces that
//!    must be answered with a product-key-salted MD5 ([`challenge_response`]).

pub mod authenticator;
pub mod challenge;
pub mod error;
pub mod passport;

pub use authenticator::{Authenticator, BoxFuture, SsoTicket, StaticAuthenticator};
pub use challenge::challenge_response;
pub use error::{AuthError, AuthResult};
pub use passport::PassportAuthenticator;
