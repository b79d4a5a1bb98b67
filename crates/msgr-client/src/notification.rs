//! The notification client.
//!
//! One [`Client`] owns the always-on notification-server connection: it runs
//! the login sequence (dispatcher redirects, SSO exchange, challenge, list
//! synchronization, initial presence), dispatches unsolicited server
//! traffic to the roster and event subscribers, keeps the connection alive
//! with pings, and brokers switchboard sessions.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{RwLock, broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use msgr_auth::challenge_response;
use msgr_core::Presence;
use msgr_core::list::List;
use msgr_protocol::{CHALLENGE_CLIENT_ID, Command, DIALECT, Verb};

use crate::config::{ClientConfig, Credentials};
use crate::connection::Connection;
use crate::error::{ClientError, ClientResult};
use crate::event::{ClientEvent, LogoutReason};
use crate::psm::{parse_personal_message, render_personal_message};
use crate::roster::{Contact, Group, LocalUser, Roster};
use crate::switchboard::{Invitation, Switchboard};
use crate::transport::split_endpoint;

/// Where the notification connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection.
    Disconnected,
    /// Dialing a dispatch or notification server.
    Connecting,
    /// `VER` exchange.
    NegotiatingVersion,
    /// `CVR` exchange.
    NegotiatingClient,
    /// First `USR`, awaiting the policy string or a redirect.
    RequestingAuth,
    /// SSO ticket exchange over HTTPS.
    FetchingToken,
    /// Second `USR`, submitting the ticket.
    SubmittingToken,
    /// `SYN` list synchronization.
    Synchronizing,
    /// Initial `CHG`.
    SettingStatus,
    /// Logged in; dispatching notifications.
    Ready,
}

/// The MSNP12 client.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    roster: RwLock<Roster>,
    local_user: RwLock<LocalUser>,
    events: broadcast::Sender<ClientEvent>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    conn: StdMutex<Option<Arc<Connection>>>,
    invitations: StdMutex<HashMap<String, Invitation>>,
    logout_reason: StdMutex<Option<LogoutReason>>,
    logged_in: AtomicBool,
    ping_interval_secs: AtomicU64,
    last_pong: StdMutex<Instant>,
    /// Count of `LST` entries the dispatcher has applied this session;
    /// login waits on this before declaring the roster synchronized.
    lst_progress_tx: watch::Sender<u32>,
    lst_progress_rx: watch::Receiver<u32>,
}

impl Client {
    /// Creates a client. Nothing is dialed until [`Client::login`].
    pub fn new(config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (lst_progress_tx, lst_progress_rx) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                config,
                roster: RwLock::new(Roster::new()),
                local_user: RwLock::new(LocalUser::new(String::new())),
                events,
                state_tx,
                state_rx,
                conn: StdMutex::new(None),
                invitations: StdMutex::new(HashMap::new()),
                logout_reason: StdMutex::new(None),
                logged_in: AtomicBool::new(false),
                ping_interval_secs: AtomicU64::new(50),
                last_pong: StdMutex::new(Instant::now()),
                lst_progress_tx,
                lst_progress_rx,
            }),
        }
    }

    /// Subscribes to client events.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// The current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_rx.borrow()
    }

    /// A watch over connection-state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    /// Snapshot of the local user.
    pub async fn local_user(&self) -> LocalUser {
        self.inner.local_user.read().await.clone()
    }

    /// Snapshot of every known contact.
    pub async fn contacts(&self) -> Vec<Contact> {
        self.inner.roster.read().await.contacts()
    }

    /// Snapshot of one contact.
    pub async fn contact(&self, login: &str) -> Option<Contact> {
        self.inner.roster.read().await.contact(login).cloned()
    }

    /// Snapshot of every group.
    pub async fn groups(&self) -> Vec<Group> {
        self.inner.roster.read().await.groups()
    }

    /// Logs in: dials the dispatch server, follows redirects, exchanges the
    /// SSO ticket, synchronizes the contact list and publishes the initial
    /// presence. Emits [`ClientEvent::LoggedIn`] exactly once on success.
    pub async fn login(&self, credentials: &Credentials) -> ClientResult<()> {
        match tokio::time::timeout(
            self.inner.config.login_timeout,
            self.login_inner(credentials),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                self.teardown_failed_login().await;
                Err(ClientError::Timeout)
            }
        }
    }

    async fn login_inner(&self, credentials: &Credentials) -> ClientResult<()> {
        let inner = &self.inner;
        if self.ns().is_ok() {
            return Err(ClientError::NotReady("already connected".into()));
        }

        inner.logged_in.store(false, Ordering::SeqCst);
        *inner.logout_reason.lock().expect("reason lock") = None;
        inner.lst_progress_tx.send_replace(0);
        *inner.local_user.write().await = LocalUser::new(credentials.login.clone());
        inner.roster.write().await.clear();
        inner.invitations.lock().expect("invitations lock").clear();

        let rt = inner.config.reply_timeout;
        let mut endpoint = inner.config.dispatch_server.clone();
        let mut redirects = 0;

        // The dispatcher may bounce us to an assigned notification server;
        // each hop restarts the negotiation on a fresh connection.
        let (conn, policy) = loop {
            inner.set_state(ConnectionState::Connecting);
            let (host, port) = split_endpoint(&endpoint)?;
            let transport = inner
                .config
                .transport
                .connect(&host, port)
                .await
                .map_err(ClientError::Transport)?;
            let conn = Connection::open(transport, inner.config.event_buffer);

            inner.set_state(ConnectionState::NegotiatingVersion);
            let trid = conn.next_trid();
            let reply = conn
                .request(
                    Command::Ver {
                        trid,
                        dialects: vec![DIALECT.to_string()],
                    },
                    &[Verb::Ver],
                    rt,
                )
                .await?;
            match &reply {
                Command::Ver { dialects, .. } if dialects.iter().any(|d| d == DIALECT) => {}
                other => {
                    conn.close().await;
                    inner.set_state(ConnectionState::Disconnected);
                    return Err(ClientError::unexpected(other));
                }
            }

            inner.set_state(ConnectionState::NegotiatingClient);
            let trid = conn.next_trid();
            conn.request(
                Command::Cvr {
                    trid,
                    args: inner.config.client_info.cvr_args(&credentials.login),
                },
                &[Verb::Cvr],
                rt,
            )
            .await?;

            inner.set_state(ConnectionState::RequestingAuth);
            let trid = conn.next_trid();
            let reply = conn
                .request(
                    Command::UsrTwnInitial {
                        trid,
                        login: credentials.login.clone(),
                    },
                    &[Verb::Usr, Verb::Xfr],
                    rt,
                )
                .await?;
            match reply {
                Command::XfrNotification { endpoint: next, .. } => {
                    conn.close().await;
                    redirects += 1;
                    if redirects > inner.config.redirect_limit {
                        inner.set_state(ConnectionState::Disconnected);
                        return Err(ClientError::Redirected);
                    }
                    info!(endpoint = %next, "redirected to assigned notification server");
                    endpoint = next;
                }
                Command::UsrTwnToken { token, .. } => break (conn, token),
                other => {
                    conn.close().await;
                    inner.set_state(ConnectionState::Disconnected);
                    return Err(ClientError::unexpected(&other));
                }
            }
        };

        *inner.conn.lock().expect("conn lock") = Some(conn.clone());

        if let Err(err) = self.login_session(&conn, credentials, &policy).await {
            self.teardown_failed_login().await;
            return Err(err);
        }
        Ok(())
    }

    /// The post-redirect half of login, on the final NS connection.
    async fn login_session(
        &self,
        conn: &Arc<Connection>,
        credentials: &Credentials,
        policy: &str,
    ) -> ClientResult<()> {
        let inner = &self.inner;
        let rt = inner.config.reply_timeout;

        inner.set_state(ConnectionState::FetchingToken);
        let ticket = inner
            .config
            .authenticator
            .authenticate(&credentials.login, &credentials.password, policy)
            .await?;

        inner.set_state(ConnectionState::SubmittingToken);
        let trid = conn.next_trid();
        let reply = conn
            .request(
                Command::UsrTwnToken {
                    trid,
                    token: ticket.as_str().to_string(),
                },
                &[Verb::Usr],
                rt,
            )
            .await
            .map_err(|err| {
                if err.server_code() == Some(911) {
                    ClientError::BadCredentials
                } else {
                    err
                }
            })?;
        if !matches!(reply, Command::UsrOk { .. }) {
            return Err(ClientError::unexpected(&reply));
        }

        // From here every unsolicited command, challenges included, goes
        // through the dispatcher.
        self.spawn_dispatcher(conn);

        inner.set_state(ConnectionState::Synchronizing);
        let trid = conn.next_trid();
        let reply = conn
            .request(
                Command::Syn {
                    trid,
                    timestamp1: "0".into(),
                    timestamp2: "0".into(),
                    counts: None,
                },
                &[Verb::Syn],
                rt,
            )
            .await?;
        let contact_total = match reply {
            Command::Syn { counts, .. } => counts.map(|(contacts, _)| contacts).unwrap_or(0),
            other => return Err(ClientError::unexpected(&other)),
        };

        // The dispatcher applies the SYN stream; login waits until the last
        // LST has actually landed in the roster before presence goes out.
        let mut progress = inner.lst_progress_rx.clone();
        let mut conn_closed = conn.closed_watch();
        loop {
            if *progress.borrow_and_update() >= contact_total {
                break;
            }
            if conn.is_closed() {
                return Err(ClientError::Cancelled);
            }
            tokio::select! {
                res = progress.changed() => {
                    if res.is_err() {
                        return Err(ClientError::Cancelled);
                    }
                }
                _ = conn_closed.changed() => {}
            }
        }

        inner.set_state(ConnectionState::SettingStatus);
        let status = inner.config.initial_status;
        let object = inner.local_user.read().await.display_picture.clone();
        let trid = conn.next_trid();
        conn.request(
            Command::Chg {
                trid,
                status,
                capabilities: inner.config.capabilities,
                object,
            },
            &[Verb::Chg],
            rt,
        )
        .await?;
        {
            let mut local = inner.local_user.write().await;
            local.presence = status;
            local.capabilities = inner.config.capabilities;
        }

        self.spawn_ping_loop(conn);
        inner.logged_in.store(true, Ordering::SeqCst);
        inner.set_state(ConnectionState::Ready);
        info!(login = %credentials.login, "logged in");
        let _ = inner.events.send(ClientEvent::LoggedIn);
        Ok(())
    }

    async fn teardown_failed_login(&self) {
        let conn = self.inner.conn.lock().expect("conn lock").take();
        if let Some(conn) = conn {
            conn.close().await;
        }
        self.inner.set_state(ConnectionState::Disconnected);
    }

    /// Logs out: sends `OUT`, closes the connection, and lets the
    /// dispatcher emit a single [`ClientEvent::LoggedOut`].
    pub async fn logout(&self) {
        let conn = self.inner.conn.lock().expect("conn lock").take();
        if let Some(conn) = conn {
            self.inner
                .logout_reason
                .lock()
                .expect("reason lock")
                .get_or_insert(LogoutReason::ClientRequest);
            let _ = conn.send(&Command::Out { reason: None }).await;
            conn.close().await;
        }
    }

    /// Publishes a new presence status.
    pub async fn change_status(&self, status: Presence) -> ClientResult<()> {
        if !status.is_settable() {
            return Err(ClientError::InvalidArgument(
                "FLN cannot be requested; use HDN to appear offline".into(),
            ));
        }
        let conn = self.ns()?;
        let inner = &self.inner;
        let object = inner.local_user.read().await.display_picture.clone();
        let trid = conn.next_trid();
        conn.request(
            Command::Chg {
                trid,
                status,
                capabilities: inner.config.capabilities,
                object,
            },
            &[Verb::Chg],
            inner.config.reply_timeout,
        )
        .await?;
        inner.local_user.write().await.presence = status;
        Ok(())
    }

    /// Changes the local user's display nickname.
    pub async fn change_nickname(&self, nickname: &str) -> ClientResult<()> {
        let conn = self.ns()?;
        let trid = conn.next_trid();
        conn.request(
            Command::Prp {
                trid: Some(trid),
                key: "MFN".into(),
                value: nickname.to_string(),
            },
            &[Verb::Prp],
            self.inner.config.reply_timeout,
        )
        .await?;
        self.inner.local_user.write().await.nickname = nickname.to_string();
        Ok(())
    }

    /// Publishes a new personal message.
    pub async fn change_personal_message(&self, message: &str) -> ClientResult<()> {
        let conn = self.ns()?;
        let trid = conn.next_trid();
        conn.request(
            Command::Uux {
                trid,
                payload: render_personal_message(message),
            },
            &[Verb::Uux],
            self.inner.config.reply_timeout,
        )
        .await?;
        self.inner.local_user.write().await.personal_message = message.to_string();
        Ok(())
    }

    /// Publishes a new display-picture object reference. The picture rides
    /// on `CHG`, so the current status is re-announced with it.
    pub async fn change_display_picture(&self, object: Option<String>) -> ClientResult<()> {
        if self.state() != ConnectionState::Ready {
            return Err(ClientError::NotReady("not logged in".into()));
        }
        let conn = self.ns()?;
        let inner = &self.inner;
        let status = inner.local_user.read().await.presence;
        let trid = conn.next_trid();
        conn.request(
            Command::Chg {
                trid,
                status,
                capabilities: inner.config.capabilities,
                object: object.clone(),
            },
            &[Verb::Chg],
            inner.config.reply_timeout,
        )
        .await?;
        inner.local_user.write().await.display_picture = object;
        Ok(())
    }

    /// Adds a contact to the roster (forward list), optionally straight
    /// into a group.
    pub async fn add_contact(
        &self,
        login: &str,
        nickname: &str,
        group: Option<&Group>,
    ) -> ClientResult<Contact> {
        let conn = self.ns()?;
        let inner = &self.inner;
        let rt = inner.config.reply_timeout;

        let trid = conn.next_trid();
        let reply = conn
            .request(
                Command::Adc {
                    trid,
                    list: List::Forward,
                    login: Some(login.to_string()),
                    nickname: Some(nickname.to_string()),
                    guid: None,
                    group: None,
                },
                &[Verb::Adc],
                rt,
            )
            .await?;
        let guid = match reply {
            Command::Adc { guid, .. } => guid,
            other => return Err(ClientError::unexpected(&other)),
        };

        {
            let mut roster = inner.roster.write().await;
            let contact = roster.ensure_contact(login);
            contact.nickname = nickname.to_string();
            contact.guid = guid.clone();
            contact.lists.insert(List::Forward);
        }
        let _ = inner.events.send(ClientEvent::ContactAdded {
            login: login.to_string(),
        });

        if let (Some(group), Some(guid)) = (group, guid) {
            let trid = conn.next_trid();
            conn.request(
                Command::Adc {
                    trid,
                    list: List::Forward,
                    login: None,
                    nickname: None,
                    guid: Some(guid.clone()),
                    group: Some(group.guid.clone()),
                },
                &[Verb::Adc],
                rt,
            )
            .await?;
            if let Some(contact) = inner.roster.write().await.contact_mut(login) {
                contact.groups.insert(group.guid.clone());
            }
        }

        self.contact(login)
            .await
            .ok_or_else(|| ClientError::NotReady("contact vanished during add".into()))
    }

    /// Removes a contact from the roster.
    pub async fn remove_contact(&self, contact: &Contact) -> ClientResult<()> {
        let conn = self.ns()?;
        // Forward-list removal keys on the guid when the server gave us one.
        let target = contact
            .guid
            .clone()
            .unwrap_or_else(|| contact.login.clone());
        let trid = conn.next_trid();
        conn.request(
            Command::Rem {
                trid,
                list: List::Forward,
                target,
                group: None,
            },
            &[Verb::Rem],
            self.inner.config.reply_timeout,
        )
        .await?;

        self.inner.roster.write().await.remove_contact(&contact.login);
        let _ = self.inner.events.send(ClientEvent::ContactRemoved {
            login: contact.login.clone(),
        });
        Ok(())
    }

    /// Blocks a contact. Allow and block are mutually exclusive; an
    /// existing allow-list entry is removed first.
    pub async fn block(&self, contact: &Contact) -> ClientResult<()> {
        let conn = self.ns()?;
        let inner = &self.inner;
        let rt = inner.config.reply_timeout;

        let on_allow = {
            let roster = inner.roster.read().await;
            roster
                .contact(&contact.login)
                .map(|c| c.lists.contains(List::Allow))
                .unwrap_or(false)
        };
        if on_allow {
            let trid = conn.next_trid();
            conn.request(
                Command::Rem {
                    trid,
                    list: List::Allow,
                    target: contact.login.clone(),
                    group: None,
                },
                &[Verb::Rem],
                rt,
            )
            .await?;
        }

        let trid = conn.next_trid();
        conn.request(
            Command::Adc {
                trid,
                list: List::Block,
                login: Some(contact.login.clone()),
                nickname: None,
                guid: None,
                group: None,
            },
            &[Verb::Adc],
            rt,
        )
        .await?;

        if let Some(entry) = inner.roster.write().await.contact_mut(&contact.login) {
            entry.lists.remove(List::Allow);
            entry.lists.insert(List::Block);
        }
        Ok(())
    }

    /// Unblocks a contact, restoring it to the allow list.
    pub async fn unblock(&self, contact: &Contact) -> ClientResult<()> {
        let conn = self.ns()?;
        let inner = &self.inner;
        let rt = inner.config.reply_timeout;

        let trid = conn.next_trid();
        conn.request(
            Command::Rem {
                trid,
                list: List::Block,
                target: contact.login.clone(),
                group: None,
            },
            &[Verb::Rem],
            rt,
        )
        .await?;

        let trid = conn.next_trid();
        conn.request(
            Command::Adc {
                trid,
                list: List::Allow,
                login: Some(contact.login.clone()),
                nickname: None,
                guid: None,
                group: None,
            },
            &[Verb::Adc],
            rt,
        )
        .await?;

        if let Some(entry) = inner.roster.write().await.contact_mut(&contact.login) {
            entry.lists.remove(List::Block);
            entry.lists.insert(List::Allow);
        }
        Ok(())
    }

    /// Creates a group.
    pub async fn add_group(&self, name: &str) -> ClientResult<Group> {
        let conn = self.ns()?;
        let trid = conn.next_trid();
        let reply = conn
            .request(
                Command::Adg {
                    trid,
                    name: name.to_string(),
                    guid: None,
                },
                &[Verb::Adg],
                self.inner.config.reply_timeout,
            )
            .await?;
        let group = match reply {
            Command::Adg {
                name,
                guid: Some(guid),
                ..
            } => Group { guid, name },
            other => return Err(ClientError::unexpected(&other)),
        };

        self.inner.roster.write().await.insert_group(group.clone());
        let _ = self.inner.events.send(ClientEvent::GroupAdded {
            guid: group.guid.clone(),
            name: group.name.clone(),
        });
        Ok(group)
    }

    /// Deletes a group. Contacts keep their other memberships.
    pub async fn remove_group(&self, group: &Group) -> ClientResult<()> {
        let conn = self.ns()?;
        let trid = conn.next_trid();
        conn.request(
            Command::Rmg {
                trid,
                guid: group.guid.clone(),
            },
            &[Verb::Rmg],
            self.inner.config.reply_timeout,
        )
        .await?;

        self.inner.roster.write().await.remove_group(&group.guid);
        let _ = self.inner.events.send(ClientEvent::GroupRemoved {
            guid: group.guid.clone(),
        });
        Ok(())
    }

    /// Renames a group. The in-memory name changes when the server echoes
    /// the rename back.
    pub async fn rename_group(&self, group: &Group, name: &str) -> ClientResult<()> {
        let conn = self.ns()?;
        let trid = conn.next_trid();
        let reply = conn
            .request(
                Command::Reg {
                    trid,
                    guid: group.guid.clone(),
                    name: name.to_string(),
                },
                &[Verb::Reg],
                self.inner.config.reply_timeout,
            )
            .await?;
        let confirmed = match reply {
            Command::Reg { name, .. } => name,
            other => return Err(ClientError::unexpected(&other)),
        };

        if let Some(entry) = self.inner.roster.write().await.group_mut(&group.guid) {
            entry.name = confirmed.clone();
        }
        let _ = self.inner.events.send(ClientEvent::GroupRenamed {
            guid: group.guid.clone(),
            name: confirmed,
        });
        Ok(())
    }

    /// Starts an IM session with a contact: requests a switchboard from the
    /// NS, joins it, and rings the contact. Returns once they have joined.
    pub async fn start_session(&self, login: &str) -> ClientResult<Arc<Switchboard>> {
        let conn = self.ns()?;
        let inner = &self.inner;

        let trid = conn.next_trid();
        let reply = conn
            .request(
                Command::XfrRequest { trid },
                &[Verb::Xfr],
                inner.config.reply_timeout,
            )
            .await?;
        let (endpoint, ticket) = match reply {
            Command::XfrSwitchboard {
                endpoint, ticket, ..
            } => (endpoint, ticket),
            other => return Err(ClientError::unexpected(&other)),
        };

        let local_login = inner.local_user.read().await.login.clone();
        let session =
            Switchboard::call(&inner.config, &endpoint, &ticket, &local_login, login).await?;
        let _ = inner.events.send(ClientEvent::SessionCreated {
            session: session.clone(),
        });
        Ok(session)
    }

    /// Accepts an inbound invitation and returns the joined session.
    pub async fn accept_invitation(
        &self,
        invitation: &Invitation,
    ) -> ClientResult<Arc<Switchboard>> {
        let known = self
            .inner
            .invitations
            .lock()
            .expect("invitations lock")
            .remove(&invitation.session_id);
        if known.is_none() {
            return Err(ClientError::InvalidArgument(
                "invitation is unknown or already consumed".into(),
            ));
        }

        let local_login = self.inner.local_user.read().await.login.clone();
        let session = Switchboard::answer(&self.inner.config, invitation, &local_login).await?;
        let _ = self.inner.events.send(ClientEvent::SessionCreated {
            session: session.clone(),
        });
        Ok(session)
    }

    /// Discards an inbound invitation. The switchboard gives up on its own;
    /// nothing is sent.
    pub fn reject_invitation(&self, invitation: &Invitation) {
        self.inner
            .invitations
            .lock()
            .expect("invitations lock")
            .remove(&invitation.session_id);
    }

    fn ns(&self) -> ClientResult<Arc<Connection>> {
        match self.inner.conn.lock().expect("conn lock").as_ref() {
            Some(conn) if !conn.is_closed() => Ok(conn.clone()),
            _ => Err(ClientError::NotReady("not connected".into())),
        }
    }

    fn spawn_dispatcher(&self, conn: &Arc<Connection>) {
        let inner = self.inner.clone();
        let conn = conn.clone();
        let mut rx = conn.subscribe();
        let mut closed = conn.closed_watch();
        tokio::spawn(async move {
            let mut last_lst: Option<String> = None;
            loop {
                tokio::select! {
                    res = rx.recv() => match res {
                        Ok(cmd) => inner.handle_command(&conn, cmd, &mut last_lst).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "notification dispatcher lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = closed.changed() => break,
                }
            }
            inner.finish_logout(LogoutReason::TransportLost);
        });
    }

    fn spawn_ping_loop(&self, conn: &Arc<Connection>) {
        let inner = self.inner.clone();
        let conn = conn.clone();
        let mut closed = conn.closed_watch();
        *inner.last_pong.lock().expect("pong lock") = Instant::now();
        inner.ping_interval_secs.store(
            inner.config.initial_ping_interval.as_secs().max(1),
            Ordering::Relaxed,
        );
        tokio::spawn(async move {
            loop {
                let interval = Duration::from_secs(
                    inner.ping_interval_secs.load(Ordering::Relaxed).max(1),
                );
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = closed.changed() => break,
                }

                let silent = inner.last_pong.lock().expect("pong lock").elapsed();
                if silent > interval * 2 {
                    warn!(
                        silent_secs = silent.as_secs(),
                        "no pong within twice the ping interval, dropping connection"
                    );
                    inner
                        .logout_reason
                        .lock()
                        .expect("reason lock")
                        .get_or_insert(LogoutReason::PingTimeout);
                    conn.close().await;
                    break;
                }

                if conn.send(&Command::Png).await.is_err() {
                    break;
                }
            }
        });
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        debug!(state = ?state, "connection state");
        let _ = self.state_tx.send(state);
    }

    /// Emits `LoggedOut` once per logged-in session and resets.
    fn finish_logout(self: &Arc<Self>, default_reason: LogoutReason) {
        *self.conn.lock().expect("conn lock") = None;
        self.set_state(ConnectionState::Disconnected);
        if self.logged_in.swap(false, Ordering::SeqCst) {
            let reason = self
                .logout_reason
                .lock()
                .expect("reason lock")
                .take()
                .unwrap_or(default_reason);
            info!(reason = ?reason, "logged out");
            let _ = self.events.send(ClientEvent::LoggedOut { reason });
        }
    }

    /// Applies one unsolicited server command.
    async fn handle_command(
        self: &Arc<Self>,
        conn: &Arc<Connection>,
        command: Command,
        last_lst: &mut Option<String>,
    ) {
        match command {
            Command::Nln {
                status,
                login,
                nickname,
                capabilities,
                object,
            } => {
                self.apply_presence(&login, status, Some(nickname), capabilities, object)
                    .await;
            }
            Command::Iln {
                status,
                login,
                nickname,
                capabilities,
                object,
                ..
            } => {
                self.apply_presence(&login, status, Some(nickname), capabilities, object)
                    .await;
            }
            Command::Fln { login } => {
                {
                    let mut roster = self.roster.write().await;
                    roster.ensure_contact(&login).presence = Presence::Offline;
                }
                let _ = self.events.send(ClientEvent::ContactPresenceChanged {
                    login,
                    presence: Presence::Offline,
                });
            }
            Command::Ubx { login, payload } => {
                let message = parse_personal_message(&payload);
                {
                    let mut roster = self.roster.write().await;
                    roster.ensure_contact(&login).personal_message = message.clone();
                }
                let _ = self
                    .events
                    .send(ClientEvent::PersonalMessageChanged { login, message });
            }
            Command::Chg { status, .. } => {
                // A stray CHG echo outside any transaction still reflects
                // our accepted presence.
                self.local_user.write().await.presence = status;
            }
            Command::Prp { key, value, .. } => {
                if key == "MFN" {
                    self.local_user.write().await.nickname = value;
                } else {
                    debug!(key = %key, "ignoring local-user property");
                }
            }
            Command::Sbp {
                guid, key, value, ..
            } => {
                if key == "MFN" {
                    let login = {
                        let mut roster = self.roster.write().await;
                        roster.contact_by_guid_mut(&guid).map(|contact| {
                            contact.nickname = value.clone();
                            contact.login.clone()
                        })
                    };
                    if let Some(login) = login {
                        let _ = self.events.send(ClientEvent::ContactNicknameChanged {
                            login,
                            nickname: value,
                        });
                    }
                } else if let Some(contact) =
                    self.roster.write().await.contact_by_guid_mut(&guid)
                {
                    contact.properties.insert(key, value);
                }
            }
            Command::Bpr { key, value } => {
                // BPR lines trail the LST they describe.
                if let Some(login) = last_lst.as_deref() {
                    if let Some(contact) = self.roster.write().await.contact_mut(login) {
                        contact.properties.insert(key, value);
                    }
                }
            }
            Command::Lst {
                login,
                nickname,
                guid,
                lists,
                groups,
            } => {
                {
                    let mut roster = self.roster.write().await;
                    let contact = roster.ensure_contact(&login);
                    if let Some(nickname) = nickname {
                        contact.nickname = nickname;
                    }
                    if guid.is_some() {
                        contact.guid = guid;
                    }
                    contact.lists = lists;
                    contact.groups = groups.into_iter().collect();
                }
                *last_lst = Some(login);
                self.lst_progress_tx.send_modify(|count| *count += 1);
            }
            Command::Lsg { name, guid } => {
                self.roster.write().await.insert_group(Group { guid, name });
            }
            Command::Gtc { setting, .. } => {
                self.local_user.write().await.reverse_list_prompt = setting;
            }
            Command::Blp { setting, .. } => {
                self.local_user.write().await.default_list = setting;
            }
            Command::Adc {
                list,
                login,
                nickname,
                guid,
                ..
            } => {
                // Server-initiated list change, e.g. a reverse-list add.
                let Some(login) = login else { return };
                {
                    let mut roster = self.roster.write().await;
                    let contact = roster.ensure_contact(&login);
                    contact.lists.insert(list);
                    if let Some(nickname) = nickname {
                        contact.nickname = nickname;
                    }
                    if guid.is_some() {
                        contact.guid = guid;
                    }
                }
                if list == List::Forward {
                    let _ = self.events.send(ClientEvent::ContactAdded { login });
                }
            }
            Command::Rem { list, target, .. } => {
                let login = {
                    let mut roster = self.roster.write().await;
                    let login = roster
                        .contact_by_guid(&target)
                        .map(|c| c.login.clone())
                        .unwrap_or(target);
                    if let Some(contact) = roster.contact_mut(&login) {
                        contact.lists.remove(list);
                    }
                    if list == List::Forward {
                        roster.remove_contact(&login);
                    }
                    login
                };
                if list == List::Forward {
                    let _ = self.events.send(ClientEvent::ContactRemoved { login });
                }
            }
            Command::Adg {
                name,
                guid: Some(guid),
                ..
            } => {
                self.roster
                    .write()
                    .await
                    .insert_group(Group { guid, name });
            }
            Command::Rmg { guid, .. } => {
                self.roster.write().await.remove_group(&guid);
            }
            Command::Reg { guid, name, .. } => {
                if let Some(group) = self.roster.write().await.group_mut(&guid) {
                    group.name = name;
                }
            }
            Command::Rng {
                session_id,
                endpoint,
                auth,
                login,
                nickname,
            } => {
                let invitation = Invitation {
                    session_id: session_id.clone(),
                    endpoint,
                    auth,
                    inviter_login: login,
                    inviter_nickname: nickname,
                };
                self.invitations
                    .lock()
                    .expect("invitations lock")
                    .insert(session_id, invitation.clone());
                let _ = self
                    .events
                    .send(ClientEvent::InvitedToSession { invitation });
            }
            Command::Chl { challenge } => {
                // Answer wherever we are in the lifecycle; an unanswered
                // challenge gets the connection dropped.
                let conn = conn.clone();
                let timeout = self.config.reply_timeout;
                tokio::spawn(async move {
                    let digest = challenge_response(&challenge);
                    let trid = conn.next_trid();
                    match conn
                        .request(
                            Command::Qry {
                                trid,
                                client_id: CHALLENGE_CLIENT_ID.to_string(),
                                digest,
                            },
                            &[Verb::Qry],
                            timeout,
                        )
                        .await
                    {
                        Ok(_) => debug!("challenge accepted"),
                        Err(err) => warn!(error = %err, "challenge response rejected"),
                    }
                });
            }
            Command::Qng { until_next } => {
                self.ping_interval_secs
                    .store(u64::from(until_next).max(1), Ordering::Relaxed);
                *self.last_pong.lock().expect("pong lock") = Instant::now();
            }
            Command::Not { payload } => {
                let _ = self
                    .events
                    .send(ClientEvent::NotificationReceived { payload });
            }
            Command::MsgReceive {
                sender, payload, ..
            } => {
                // The NS uses MSG for profile blobs and service notices.
                match msgr_core::ChatMessage::parse(&payload) {
                    Ok(message)
                        if message.content_type().starts_with("text/x-msmsgsprofile") =>
                    {
                        debug!("received profile message");
                    }
                    _ => {
                        debug!(sender = %sender, "unhandled notification-server message");
                        let _ = self
                            .events
                            .send(ClientEvent::NotificationReceived { payload });
                    }
                }
            }
            Command::Out { reason } => {
                let mapped = LogoutReason::from_out_code(reason.as_deref());
                self.logout_reason
                    .lock()
                    .expect("reason lock")
                    .get_or_insert(mapped);
                conn.close().await;
            }
            Command::Sbs { .. } => {
                // Partially documented; nothing to do.
            }
            other => {
                debug!(verb = %other.verb(), "ignoring notification command");
            }
        }
    }

    /// Updates a contact's presence block and emits the change.
    async fn apply_presence(
        self: &Arc<Self>,
        login: &str,
        status: Presence,
        nickname: Option<String>,
        capabilities: msgr_core::Capabilities,
        object: Option<String>,
    ) {
        let nickname_changed = {
            let mut roster = self.roster.write().await;
            let contact = roster.ensure_contact(login);
            contact.presence = status;
            contact.capabilities = capabilities;
            contact.display_picture = object;
            match nickname {
                Some(nickname) if nickname != contact.nickname => {
                    contact.nickname = nickname.clone();
                    Some(nickname)
                }
                _ => None,
            }
        };

        let _ = self.events.send(ClientEvent::ContactPresenceChanged {
            login: login.to_string(),
            presence: status,
        });
        if let Some(nickname) = nickname_changed {
            let _ = self.events.send(ClientEvent::ContactNicknameChanged {
                login: login.to_string(),
                nickname,
            });
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
