//! Switchboard IM sessions.
//!
//! Every IM session is its own TCP connection to a switchboard server,
//! with the same framing as the notification connection but a separate
//! transaction space. Sessions are born two ways:
//!
//! - **Outbound call**: the NS hands out a switchboard endpoint (`XFR SB`),
//!   the client joins with `USR` and rings the remote user with `CAL`.
//! - **Inbound answer**: an invitation arrived over the NS (`RNG`); the
//!   client dials the endpoint from the invitation and joins with `ANS`,
//!   receiving the existing roster as a burst of `IRO` lines.
//!
//! A session stays usable while at least one remote participant is joined;
//! when the last one `BYE`s (or the transport drops) it emits
//! [`SessionEvent::Closed`] and refuses further sends.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use msgr_core::{Capabilities, ChatMessage, MessageKind};
use msgr_protocol::{Command, MsgClass, Verb};

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::{ClientError, ClientResult};
use crate::event::SessionEvent;
use crate::transport::split_endpoint;

/// An inbound IM request, created from a `RNG` command.
///
/// Consumed by [`Client::accept_invitation`](crate::Client::accept_invitation)
/// or [`Client::reject_invitation`](crate::Client::reject_invitation) and
/// discarded after either.
#[derive(Debug, Clone)]
pub struct Invitation {
    /// The switchboard session id.
    pub session_id: String,
    /// The switchboard endpoint to dial (`host:port`).
    pub endpoint: String,
    /// The authentication string for `ANS`.
    pub auth: String,
    /// The inviting user's login name.
    pub inviter_login: String,
    /// The inviting user's nickname.
    pub inviter_nickname: String,
}

/// A user currently joined to a session.
#[derive(Debug, Clone)]
pub struct Participant {
    /// Login name.
    pub login: String,
    /// Nickname.
    pub nickname: String,
    /// Advertised capabilities.
    pub capabilities: Capabilities,
}

/// One IM session over its own switchboard connection.
pub struct Switchboard {
    conn: Arc<Connection>,
    local_login: String,
    session_id: StdMutex<Option<String>>,
    participants: StdMutex<HashMap<String, Participant>>,
    events: broadcast::Sender<SessionEvent>,
    reply_timeout: Duration,
    closed_emitted: AtomicBool,
}

impl Switchboard {
    /// Starts an outbound session: join the assigned switchboard, ring the
    /// remote user, and wait for them to join.
    pub(crate) async fn call(
        config: &ClientConfig,
        endpoint: &str,
        ticket: &str,
        local_login: &str,
        remote_login: &str,
    ) -> ClientResult<Arc<Self>> {
        let sb = Self::dial(config, endpoint, local_login).await?;

        let trid = sb.conn.next_trid();
        let reply = sb
            .conn
            .request(
                Command::UsrSwitchboard {
                    trid,
                    login: local_login.to_string(),
                    ticket: ticket.to_string(),
                },
                &[Verb::Usr],
                sb.reply_timeout,
            )
            .await?;
        if !matches!(reply, Command::UsrOk { .. }) {
            return Err(ClientError::unexpected(&reply));
        }

        // Subscribe before ringing: the JOI can arrive on the heels of the
        // CAL reply.
        let mut rx = sb.conn.subscribe();

        let trid = sb.conn.next_trid();
        let reply = sb
            .conn
            .request(
                Command::Cal {
                    trid,
                    login: remote_login.to_string(),
                },
                &[Verb::Cal],
                sb.reply_timeout,
            )
            .await?;
        match reply {
            Command::CalRinging { session_id, .. } => {
                *sb.session_id.lock().expect("session id lock") = Some(session_id);
            }
            other => return Err(ClientError::unexpected(&other)),
        }

        // The session is usable only once somebody joins.
        let joined = tokio::time::timeout(sb.reply_timeout, async {
            loop {
                match rx.recv().await {
                    Ok(cmd) => {
                        let was_join = matches!(cmd, Command::Joi { .. });
                        sb.handle_command(cmd).await;
                        if was_join {
                            return true;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "lagged while waiting for join");
                    }
                    Err(broadcast::error::RecvError::Closed) => return false,
                }
            }
        })
        .await;
        match joined {
            Ok(true) => {}
            Ok(false) => return Err(ClientError::Cancelled),
            Err(_) => return Err(ClientError::Timeout),
        }

        sb.spawn_dispatcher(rx);
        Ok(sb)
    }

    /// Answers an invitation: dial its endpoint, `ANS`, and absorb the
    /// roster burst.
    pub(crate) async fn answer(
        config: &ClientConfig,
        invitation: &Invitation,
        local_login: &str,
    ) -> ClientResult<Arc<Self>> {
        let sb = Self::dial(config, &invitation.endpoint, local_login).await?;
        *sb.session_id.lock().expect("session id lock") = Some(invitation.session_id.clone());

        // Subscribe before answering: the IRO burst precedes the ANS OK.
        let mut rx = sb.conn.subscribe();

        let trid = sb.conn.next_trid();
        let reply = sb
            .conn
            .request(
                Command::Ans {
                    trid,
                    login: local_login.to_string(),
                    auth: invitation.auth.clone(),
                    session_id: invitation.session_id.clone(),
                },
                &[Verb::Ans],
                sb.reply_timeout,
            )
            .await?;
        if !matches!(reply, Command::AnsOk { .. }) {
            return Err(ClientError::unexpected(&reply));
        }

        // Everything the server sent before the OK (the IRO burst, at
        // least) is already buffered; apply it before handing the stream to
        // the dispatcher.
        while let Ok(cmd) = rx.try_recv() {
            sb.handle_command(cmd).await;
        }

        sb.spawn_dispatcher(rx);
        Ok(sb)
    }

    async fn dial(
        config: &ClientConfig,
        endpoint: &str,
        local_login: &str,
    ) -> ClientResult<Arc<Self>> {
        let (host, port) = split_endpoint(endpoint)?;
        let transport = config
            .transport
            .connect(&host, port)
            .await
            .map_err(ClientError::Transport)?;
        let conn = Connection::open(transport, config.event_buffer);
        let (events, _) = broadcast::channel(config.event_buffer);

        Ok(Arc::new(Self {
            conn,
            local_login: local_login.to_string(),
            session_id: StdMutex::new(None),
            participants: StdMutex::new(HashMap::new()),
            events,
            reply_timeout: config.reply_timeout,
            closed_emitted: AtomicBool::new(false),
        }))
    }

    /// Subscribes to this session's events.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// The switchboard session id, once known.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().expect("session id lock").clone()
    }

    /// The local user's login name.
    pub fn local_login(&self) -> &str {
        &self.local_login
    }

    /// Snapshot of the remote participants currently joined.
    pub fn participants(&self) -> Vec<Participant> {
        self.participants
            .lock()
            .expect("participants lock")
            .values()
            .cloned()
            .collect()
    }

    /// Returns true while the session can carry messages.
    pub fn is_active(&self) -> bool {
        !self.conn.is_closed()
    }

    /// Sends a chat message with acknowledged delivery.
    ///
    /// Waits for the switchboard's `ACK`; a `NAK` is
    /// [`ClientError::DeliveryFailed`].
    pub async fn send_message(&self, message: &ChatMessage) -> ClientResult<()> {
        self.ensure_active()?;
        let trid = self.conn.next_trid();
        let reply = self
            .conn
            .request(
                Command::MsgSend {
                    trid,
                    class: MsgClass::Acknowledged,
                    payload: message.render(),
                },
                &[Verb::Ack, Verb::Nak],
                self.reply_timeout,
            )
            .await?;
        match reply {
            Command::Ack { .. } => Ok(()),
            Command::Nak { .. } => Err(ClientError::DeliveryFailed),
            other => Err(ClientError::unexpected(&other)),
        }
    }

    /// Sends a typing notification. Fire-and-forget.
    pub async fn send_typing(&self) -> ClientResult<()> {
        self.ensure_active()?;
        let trid = self.conn.next_trid();
        self.conn
            .send(&Command::MsgSend {
                trid,
                class: MsgClass::Unacknowledged,
                payload: ChatMessage::typing(&self.local_login).render(),
            })
            .await
    }

    /// Invites another user into this session and waits for their `JOI`.
    pub async fn invite(&self, login: &str) -> ClientResult<()> {
        self.ensure_active()?;
        let mut rx = self.events.subscribe();

        let trid = self.conn.next_trid();
        let reply = self
            .conn
            .request(
                Command::Cal {
                    trid,
                    login: login.to_string(),
                },
                &[Verb::Cal],
                self.reply_timeout,
            )
            .await?;
        if !matches!(reply, Command::CalRinging { .. }) {
            return Err(ClientError::unexpected(&reply));
        }

        tokio::time::timeout(self.reply_timeout, async {
            loop {
                match rx.recv().await {
                    Ok(SessionEvent::UserJoined { login: joined, .. }) if joined == login => {
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(ClientError::Cancelled);
                    }
                }
            }
        })
        .await
        .map_err(|_| ClientError::Timeout)?
    }

    /// Leaves the session and closes its connection. Idempotent.
    pub async fn close(&self) {
        self.conn.close().await;
        self.emit_closed();
    }

    fn ensure_active(&self) -> ClientResult<()> {
        if self.conn.is_closed() {
            return Err(ClientError::NotReady("session is closed".into()));
        }
        Ok(())
    }

    fn spawn_dispatcher(self: &Arc<Self>, mut rx: broadcast::Receiver<Command>) {
        let sb = self.clone();
        let mut closed = self.conn.closed_watch();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    res = rx.recv() => match res {
                        Ok(cmd) => sb.handle_command(cmd).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "session dispatcher lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = closed.changed() => break,
                }
            }
            sb.emit_closed();
        });
    }

    async fn handle_command(&self, command: Command) {
        match command {
            Command::Joi {
                login,
                nickname,
                capabilities,
            } => {
                self.insert_participant(&login, &nickname, capabilities);
                let _ = self.events.send(SessionEvent::UserJoined { login, nickname });
            }
            Command::Iro {
                login,
                nickname,
                capabilities,
                ..
            } => {
                // Roster enumeration after ANS; already-present users are
                // not announced as joins.
                self.insert_participant(&login, &nickname, capabilities);
            }
            Command::Bye { login, idle } => {
                let empty = {
                    let mut participants =
                        self.participants.lock().expect("participants lock");
                    participants.remove(&login);
                    participants.is_empty()
                };
                let _ = self.events.send(SessionEvent::UserParted { login, idle });
                if empty {
                    debug!("last participant left, closing session");
                    self.conn.close().await;
                    self.emit_closed();
                }
            }
            Command::MsgReceive {
                sender,
                nickname,
                payload,
            } => match ChatMessage::parse(&payload) {
                Ok(message) => match message.kind() {
                    MessageKind::Typing => {
                        let login = message
                            .header("TypingUser")
                            .unwrap_or(&sender)
                            .to_string();
                        let _ = self.events.send(SessionEvent::TypingUser { login });
                    }
                    _ => {
                        let _ = self.events.send(SessionEvent::MessageReceived {
                            sender,
                            nickname,
                            message,
                        });
                    }
                },
                Err(err) => {
                    warn!(sender = %sender, error = %err, "dropping unparseable message");
                }
            },
            other => {
                debug!(verb = %other.verb(), "ignoring switchboard command");
            }
        }
    }

    fn insert_participant(
        &self,
        login: &str,
        nickname: &str,
        capabilities: Option<Capabilities>,
    ) {
        self.participants.lock().expect("participants lock").insert(
            login.to_string(),
            Participant {
                login: login.to_string(),
                nickname: nickname.to_string(),
                capabilities: capabilities.unwrap_or_default(),
            },
        );
    }

    fn emit_closed(&self) {
        if !self.closed_emitted.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(SessionEvent::Closed);
        }
    }
}

impl fmt::Debug for Switchboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Switchboard")
            .field("session_id", &self.session_id())
            .field("participants", &self.participants().len())
            .field("active", &self.is_active())
            .finish()
    }
}
