//! The pluggable token-acquisition interface.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use crate::error::{AuthError, AuthResult};

/// A boxed future for async trait methods.
///
/// This is used because async functions in traits are not yet stable in a
/// way that works well with dynamic dispatch. Using boxed futures allows
/// the trait to be object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An opaque SSO ticket, submitted verbatim in the second `USR` command.
#[derive(Clone, PartialEq, Eq)]
pub struct SsoTicket(String);

impl SsoTicket {
    /// Wraps a raw ticket string.
    pub fn new(ticket: impl Into<String>) -> Self {
        Self(ticket.into())
    }

    /// Returns the raw ticket for the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SsoTicket {
    // Tickets are bearer credentials; keep them out of logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SsoTicket({} bytes)", self.0.len())
    }
}

/// Exchanges credentials and a server-issued policy string for a ticket.
///
/// Implementations must not retain the password beyond the call.
pub trait Authenticator: Send + Sync {
    /// Performs the token exchange.
    fn authenticate<'a>(
        &'a self,
        login: &'a str,
        password: &'a str,
        policy: &'a str,
    ) -> BoxFuture<'a, AuthResult<SsoTicket>>;
}

/// A test double that returns a fixed ticket and records the policy string
/// it was handed.
pub struct StaticAuthenticator {
    ticket: String,
    reject: bool,
    seen_policy: Mutex<Option<String>>,
}

impl StaticAuthenticator {
    /// Creates a double that always succeeds with the given ticket.
    pub fn new(ticket: impl Into<String>) -> Self {
        Self {
            ticket: ticket.into(),
            reject: false,
            seen_policy: Mutex::new(None),
        }
    }

    /// Creates a double that always fails with `BadCredentials`.
    pub fn rejecting() -> Self {
        Self {
            ticket: String::new(),
            reject: true,
            seen_policy: Mutex::new(None),
        }
    }

    /// Returns the policy string from the most recent exchange.
    pub fn seen_policy(&self) -> Option<String> {
        self.seen_policy.lock().expect("policy lock").clone()
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate<'a>(
        &'a self,
        _login: &'a str,
        _password: &'a str,
        policy: &'a str,
    ) -> BoxFuture<'a, AuthResult<SsoTicket>> {
        Box::pin(async move {
            *self.seen_policy.lock().expect("policy lock") = Some(policy.to_string());
            if self.reject {
                Err(AuthError::BadCredentials("static rejection".into()))
            } else {
                Ok(SsoTicket::new(self.ticket.clone()))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_authenticator_returns_ticket() {
        let auth = StaticAuthenticator::new("t=abc&p=def");
        let ticket = auth
            .authenticate("a@b.c", "hunter2", "ct=1,rver=1")
            .await
            .unwrap();
        assert_eq!(ticket.as_str(), "t=abc&p=def");
        assert_eq!(auth.seen_policy().as_deref(), Some("ct=1,rver=1"));
    }

    #[tokio::test]
    async fn rejecting_authenticator() {
        let auth = StaticAuthenticator::rejecting();
        let err = auth.authenticate("a@b.c", "wrong", "policy").await;
        assert!(matches!(err, Err(AuthError::BadCredentials(_))));
    }

    #[test]
    fn ticket_debug_hides_contents() {
        let ticket = SsoTicket::new("t=secret");
        assert!(!format!("{ticket:?}").contains("secret"));
    }
}
