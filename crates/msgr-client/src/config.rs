//! Client configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use msgr_auth::{Authenticator, PassportAuthenticator};
use msgr_core::{Capabilities, Presence};
use msgr_protocol::DEFAULT_DISPATCH_SERVER;

use crate::transport::{TcpFactory, TransportFactory};

/// Login name and password, used once per login to request an SSO ticket.
#[derive(Clone)]
pub struct Credentials {
    /// The login name (an email address).
    pub login: String,
    /// The account password. Never retained beyond the login sequence.
    pub password: String,
}

impl Credentials {
    /// Creates a credentials pair.
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    // Passwords stay out of logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .finish_non_exhaustive()
    }
}

/// The client-version fields sent in `CVR`.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// Locale id, e.g. `0x0409`.
    pub locale: String,
    /// Operating system name.
    pub os: String,
    /// Operating system version.
    pub os_version: String,
    /// Architecture.
    pub arch: String,
    /// Client name.
    pub client_name: String,
    /// Client version.
    pub client_version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            locale: "0x0409".into(),
            os: "winnt".into(),
            os_version: "5.1".into(),
            arch: "i386".into(),
            client_name: "MSNMSGR".into(),
            client_version: "8.1.0178".into(),
        }
    }
}

impl ClientInfo {
    /// Builds the `CVR` argument list for the given login name.
    pub fn cvr_args(&self, login: &str) -> Vec<String> {
        vec![
            self.locale.clone(),
            self.os.clone(),
            self.os_version.clone(),
            self.arch.clone(),
            self.client_name.clone(),
            self.client_version.clone(),
            "msmsgs".into(),
            login.to_string(),
        ]
    }
}

/// Configuration for a [`Client`](crate::Client).
///
/// Defaults dial the well-known dispatch server over plain TCP and
/// authenticate against the Passport RST endpoint.
#[derive(Clone)]
pub struct ClientConfig {
    /// The dispatch server dialed first at login.
    pub dispatch_server: String,
    /// Deadline for each reply-awaiting request.
    pub reply_timeout: Duration,
    /// Overall deadline for the whole login sequence.
    pub login_timeout: Duration,
    /// Ping interval until the first `QNG` supplies one.
    pub initial_ping_interval: Duration,
    /// Presence requested by the initial `CHG`.
    pub initial_status: Presence,
    /// Capabilities advertised in `CHG`.
    pub capabilities: Capabilities,
    /// `CVR` fields.
    pub client_info: ClientInfo,
    /// How many dispatcher redirects to follow before giving up.
    pub redirect_limit: u32,
    /// Per-consumer buffer for the event and command broadcasts.
    pub event_buffer: usize,
    /// Opens byte streams to servers.
    pub transport: Arc<dyn TransportFactory>,
    /// Exchanges credentials for SSO tickets.
    pub authenticator: Arc<dyn Authenticator>,
}

impl ClientConfig {
    /// Creates a configuration with production defaults.
    pub fn new() -> Self {
        Self {
            dispatch_server: DEFAULT_DISPATCH_SERVER.into(),
            reply_timeout: Duration::from_secs(60),
            login_timeout: Duration::from_secs(120),
            initial_ping_interval: Duration::from_secs(50),
            initial_status: Presence::Online,
            capabilities: Capabilities::NONE,
            client_info: ClientInfo::default(),
            redirect_limit: 3,
            event_buffer: 256,
            transport: Arc::new(TcpFactory::new()),
            authenticator: Arc::new(PassportAuthenticator::new(Duration::from_secs(30))),
        }
    }

    /// Builder: set the dispatch server endpoint.
    pub fn with_dispatch_server(mut self, endpoint: impl Into<String>) -> Self {
        self.dispatch_server = endpoint.into();
        self
    }

    /// Builder: set the per-request reply timeout.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Builder: set the overall login deadline.
    pub fn with_login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = timeout;
        self
    }

    /// Builder: set the presence requested at login.
    pub fn with_initial_status(mut self, status: Presence) -> Self {
        self.initial_status = status;
        self
    }

    /// Builder: set the advertised capabilities.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Builder: set the `CVR` fields.
    pub fn with_client_info(mut self, info: ClientInfo) -> Self {
        self.client_info = info;
        self
    }

    /// Builder: set the redirect limit.
    pub fn with_redirect_limit(mut self, limit: u32) -> Self {
        self.redirect_limit = limit;
        self
    }

    /// Builder: set the transport factory.
    pub fn with_transport(mut self, transport: Arc<dyn TransportFactory>) -> Self {
        self.transport = transport;
        self
    }

    /// Builder: set the authenticator.
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("dispatch_server", &self.dispatch_server)
            .field("reply_timeout", &self.reply_timeout)
            .field("login_timeout", &self.login_timeout)
            .field("initial_status", &self.initial_status)
            .field("redirect_limit", &self.redirect_limit)
            .finish_non_exhaustive()
    }
}
