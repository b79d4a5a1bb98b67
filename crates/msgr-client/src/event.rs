//! Typed events surfaced to callers.
//!
//! Both the client and each IM session expose a broadcast of strongly-typed
//! events. Handlers run on the subscriber's own task; a subscriber that
//! falls behind loses the oldest events (and is told how many), never
//! stalling protocol processing.

use std::sync::Arc;

use msgr_core::{ChatMessage, Presence};

use crate::switchboard::{Invitation, Switchboard};

/// Why a notification session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// `logout()` was called.
    ClientRequest,
    /// `OUT OTH`: the account signed in elsewhere.
    OtherClient,
    /// `OUT SSD`: the server is shutting down.
    ServerShutdown,
    /// No `QNG` arrived within twice the ping interval.
    PingTimeout,
    /// The transport dropped.
    TransportLost,
}

impl LogoutReason {
    /// Maps an `OUT` argument to a reason.
    pub fn from_out_code(code: Option<&str>) -> Self {
        match code {
            Some("OTH") => Self::OtherClient,
            Some("SSD") => Self::ServerShutdown,
            _ => Self::TransportLost,
        }
    }
}

/// Events emitted by the notification client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Login completed; the roster is synchronized and presence is set.
    LoggedIn,
    /// The notification session ended.
    LoggedOut {
        /// Why.
        reason: LogoutReason,
    },
    /// A contact's presence changed (`NLN`/`ILN`/`FLN`).
    ContactPresenceChanged {
        /// The contact's login name.
        login: String,
        /// The new presence.
        presence: Presence,
    },
    /// A contact's nickname changed.
    ContactNicknameChanged {
        /// The contact's login name.
        login: String,
        /// The new nickname.
        nickname: String,
    },
    /// A contact's personal message changed (`UBX`).
    PersonalMessageChanged {
        /// The contact's login name.
        login: String,
        /// The new personal message.
        message: String,
    },
    /// A contact landed on the forward list.
    ContactAdded {
        /// The contact's login name.
        login: String,
    },
    /// A contact left the forward list.
    ContactRemoved {
        /// The contact's login name.
        login: String,
    },
    /// A group was created.
    GroupAdded {
        /// The group guid.
        guid: String,
        /// The group name.
        name: String,
    },
    /// A group was removed.
    GroupRemoved {
        /// The group guid.
        guid: String,
    },
    /// A group was renamed.
    GroupRenamed {
        /// The group guid.
        guid: String,
        /// The new name.
        name: String,
    },
    /// A remote user is ringing us (`RNG`). Accept or reject via the client.
    InvitedToSession {
        /// The invitation.
        invitation: Invitation,
    },
    /// An IM session opened, whether by outbound call or accepted invite.
    SessionCreated {
        /// The session.
        session: Arc<Switchboard>,
    },
    /// A `NOT` notification blob arrived.
    NotificationReceived {
        /// The raw notification payload.
        payload: Vec<u8>,
    },
}

/// Events emitted by one IM session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A participant joined.
    UserJoined {
        /// Their login name.
        login: String,
        /// Their nickname.
        nickname: String,
    },
    /// A participant left. `idle` marks an inactivity-triggered part.
    UserParted {
        /// Their login name.
        login: String,
        /// Whether the switchboard timed them out.
        idle: bool,
    },
    /// A chat message arrived.
    MessageReceived {
        /// The sender's login name.
        sender: String,
        /// The sender's nickname.
        nickname: String,
        /// The parsed message.
        message: ChatMessage,
    },
    /// A participant is typing.
    TypingUser {
        /// Their login name.
        login: String,
    },
    /// The session is over: every remote user left or the transport dropped.
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_code_mapping() {
        assert_eq!(
            LogoutReason::from_out_code(Some("OTH")),
            LogoutReason::OtherClient
        );
        assert_eq!(
            LogoutReason::from_out_code(Some("SSD")),
            LogoutReason::ServerShutdown
        );
        assert_eq!(
            LogoutReason::from_out_code(None),
            LogoutReason::TransportLost
        );
        assert_eq!(
            LogoutReason::from_out_code(Some("???")),
            LogoutReason::TransportLost
        );
    }
}
