//! Typed MSNP12 commands and their wire codec.
//!
//! Every command is a header line of space-separated tokens; free-text
//! arguments (nicknames, group names, personal messages, display-picture
//! objects) are percent-escaped so they stay single tokens. Payload-bearing
//! commands declare a decimal byte count and are decoded in two phases:
//! [`Command::decode`] returns [`Decoded::NeedsPayload`] and the caller
//! finishes with [`PartialCommand::into_command`] once the declared bytes
//! have been read.
//!
//! Identifiers made of three decimal digits are server error replies and
//! decode to [`Command::ServerError`]. Identifiers this module does not
//! recognize decode to [`Command::Unknown`] so the reader can log and skip
//! them without losing the stream.

use std::fmt;

use msgr_core::{Capabilities, ListSet, Presence};
use msgr_core::list::List;

use crate::error::{ProtocolError, ProtocolResult};
use crate::escape::{decode_arg, encode_arg};

/// Delivery class letter carried by outbound `MSG` commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgClass {
    /// `U`: fire-and-forget (typing notifications).
    Unacknowledged,
    /// `A`: the server acknowledges delivery with `ACK`/`NAK`.
    Acknowledged,
    /// `N`: notification, no acknowledgement expected.
    Notification,
}

impl MsgClass {
    /// Returns the wire letter.
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Unacknowledged => "U",
            Self::Acknowledged => "A",
            Self::Notification => "N",
        }
    }

    /// Parses the wire letter.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "U" => Some(Self::Unacknowledged),
            "A" => Some(Self::Acknowledged),
            "N" => Some(Self::Notification),
            _ => None,
        }
    }
}

impl fmt::Display for MsgClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

/// The command identifier, used for dispatch and accepted-reply sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Ver,
    Cvr,
    Usr,
    Xfr,
    Qry,
    Chl,
    Chg,
    Nln,
    Iln,
    Fln,
    Ubx,
    Uux,
    Prp,
    Sbp,
    Bpr,
    Syn,
    Gtc,
    Blp,
    Lsg,
    Lst,
    Adc,
    Rem,
    Adg,
    Rmg,
    Reg,
    Msg,
    Rng,
    Cal,
    Ans,
    Joi,
    Iro,
    Bye,
    Ack,
    Nak,
    Png,
    Qng,
    Not,
    Out,
    Sbs,
    /// A three-digit server error reply.
    Error,
    /// An identifier this codec does not recognize.
    Unknown,
}

impl Verb {
    /// Returns the wire identifier ("ERR"/"???" for the synthetic verbs).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ver => "VER",
            Self::Cvr => "CVR",
            Self::Usr => "USR",
            Self::Xfr => "XFR",
            Self::Qry => "QRY",
            Self::Chl => "CHL",
            Self::Chg => "CHG",
            Self::Nln => "NLN",
            Self::Iln => "ILN",
            Self::Fln => "FLN",
            Self::Ubx => "UBX",
            Self::Uux => "UUX",
            Self::Prp => "PRP",
            Self::Sbp => "SBP",
            Self::Bpr => "BPR",
            Self::Syn => "SYN",
            Self::Gtc => "GTC",
            Self::Blp => "BLP",
            Self::Lsg => "LSG",
            Self::Lst => "LST",
            Self::Adc => "ADC",
            Self::Rem => "REM",
            Self::Adg => "ADG",
            Self::Rmg => "RMG",
            Self::Reg => "REG",
            Self::Msg => "MSG",
            Self::Rng => "RNG",
            Self::Cal => "CAL",
            Self::Ans => "ANS",
            Self::Joi => "JOI",
            Self::Iro => "IRO",
            Self::Bye => "BYE",
            Self::Ack => "ACK",
            Self::Nak => "NAK",
            Self::Png => "PNG",
            Self::Qng => "QNG",
            Self::Not => "NOT",
            Self::Out => "OUT",
            Self::Sbs => "SBS",
            Self::Error => "ERR",
            Self::Unknown => "???",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded or encodable MSNP12 command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    // --- session negotiation ---
    /// `VER <trid> <dialects…>`: protocol version negotiation (both ways).
    Ver { trid: u32, dialects: Vec<String> },
    /// `CVR <trid> <args…>`: client version exchange (both ways).
    Cvr { trid: u32, args: Vec<String> },
    /// `USR <trid> TWN I <login>`: start authentication.
    UsrTwnInitial { trid: u32, login: String },
    /// `USR <trid> TWN S <token>`: the server's policy string, or the
    /// client's SSO ticket, submitted verbatim.
    UsrTwnToken { trid: u32, token: String },
    /// `USR <trid> <login> <ticket>`: switchboard join (client side).
    UsrSwitchboard {
        trid: u32,
        login: String,
        ticket: String,
    },
    /// `USR <trid> OK <login> <verified> 0` (notification server) or
    /// `USR <trid> OK <login> <nickname>` (switchboard).
    UsrOk {
        trid: u32,
        login: String,
        nickname: Option<String>,
        verified: bool,
    },
    /// `XFR <trid> SB`: ask the NS for a switchboard.
    XfrRequest { trid: u32 },
    /// `XFR <trid> NS <endpoint> 0 <backup>`: dispatcher redirect.
    XfrNotification {
        trid: u32,
        endpoint: String,
        backup: Option<String>,
    },
    /// `XFR <trid> SB <endpoint> CKI <ticket>`: assigned switchboard.
    XfrSwitchboard {
        trid: u32,
        endpoint: String,
        ticket: String,
    },
    /// `QRY <trid> <client-id> <len>` + hex digest payload.
    Qry {
        trid: u32,
        client_id: String,
        digest: String,
    },
    /// `QRY <trid>`: challenge accepted.
    QryOk { trid: u32 },
    /// `CHL 0 <challenge>`: server-issued challenge nonce.
    Chl { challenge: String },

    // --- presence and user state ---
    /// `CHG <trid> <status> <caps> [<object>]` (both ways).
    Chg {
        trid: u32,
        status: Presence,
        capabilities: Capabilities,
        object: Option<String>,
    },
    /// `NLN <status> <login> <nickname> <caps> [<object>]`: presence change.
    Nln {
        status: Presence,
        login: String,
        nickname: String,
        capabilities: Capabilities,
        object: Option<String>,
    },
    /// `ILN <trid> <status> <login> <nickname> <caps> [<object>]`: initial
    /// presence, correlated to the `CHG` that triggered it.
    Iln {
        trid: u32,
        status: Presence,
        login: String,
        nickname: String,
        capabilities: Capabilities,
        object: Option<String>,
    },
    /// `FLN <login>`: contact signed out.
    Fln { login: String },
    /// `UBX <login> <len>` + payload: a contact's personal-message XML.
    Ubx { login: String, payload: Vec<u8> },
    /// `UUX <trid> <len>` + payload: publish the local personal message.
    /// The server acknowledges with a zero-length `UUX <trid> 0`.
    Uux { trid: u32, payload: Vec<u8> },
    /// `PRP [<trid>] <key> <value>`: local-user property (MFN = nickname).
    Prp {
        trid: Option<u32>,
        key: String,
        value: String,
    },
    /// `SBP <trid> <guid> <key> <value>`: contact property.
    Sbp {
        trid: u32,
        guid: String,
        key: String,
        value: String,
    },
    /// `BPR <key> <value>`: contact property in the `SYN` stream.
    Bpr { key: String, value: String },

    // --- roster and groups ---
    /// `SYN <trid> <ts1> <ts2> [<contacts> <groups>]`: list synchronization.
    Syn {
        trid: u32,
        timestamp1: String,
        timestamp2: String,
        counts: Option<(u32, u32)>,
    },
    /// `GTC [<trid>] <A|N>`: reverse-list prompt setting.
    Gtc { trid: Option<u32>, setting: String },
    /// `BLP [<trid>] <AL|BL>`: default list for unknown users.
    Blp { trid: Option<u32>, setting: String },
    /// `LSG <name> <guid>`: group definition in the `SYN` stream.
    Lsg { name: String, guid: String },
    /// `LST N=<login> [F=<nick>] [C=<guid>] <bits> [<group-guids>]`.
    Lst {
        login: String,
        nickname: Option<String>,
        guid: Option<String>,
        lists: ListSet,
        groups: Vec<String>,
    },
    /// `ADC <trid> <list> [N=<login>] [F=<nick>] [C=<guid>] [<group>]`.
    Adc {
        trid: u32,
        list: List,
        login: Option<String>,
        nickname: Option<String>,
        guid: Option<String>,
        group: Option<String>,
    },
    /// `REM <trid> <list> <target> [<group>]`: target is a guid on FL,
    /// a login name elsewhere.
    Rem {
        trid: u32,
        list: List,
        target: String,
        group: Option<String>,
    },
    /// `ADG <trid> <name> [<guid>]`: guid present on the server reply.
    Adg {
        trid: u32,
        name: String,
        guid: Option<String>,
    },
    /// `RMG <trid> <guid>`.
    Rmg { trid: u32, guid: String },
    /// `REG <trid> <guid> <name>`.
    Reg {
        trid: u32,
        guid: String,
        name: String,
    },

    // --- messaging and switchboards ---
    /// `MSG <trid> <class> <len>` + payload (client side).
    MsgSend {
        trid: u32,
        class: MsgClass,
        payload: Vec<u8>,
    },
    /// `MSG <sender> <nickname> <len>` + payload (server side).
    MsgReceive {
        sender: String,
        nickname: String,
        payload: Vec<u8>,
    },
    /// `RNG <session> <endpoint> CKI <auth> <login> <nickname>`: inbound
    /// session invitation, delivered over the NS.
    Rng {
        session_id: String,
        endpoint: String,
        auth: String,
        login: String,
        nickname: String,
    },
    /// `CAL <trid> <login>`: invite a user into the switchboard.
    Cal { trid: u32, login: String },
    /// `CAL <trid> RINGING <session>`: the invite went out.
    CalRinging { trid: u32, session_id: String },
    /// `ANS <trid> <login> <auth> <session>`: answer an invitation.
    Ans {
        trid: u32,
        login: String,
        auth: String,
        session_id: String,
    },
    /// `ANS <trid> OK`: roster burst complete.
    AnsOk { trid: u32 },
    /// `JOI <login> <nickname> [<caps>]`: participant joined.
    Joi {
        login: String,
        nickname: String,
        capabilities: Option<Capabilities>,
    },
    /// `IRO <trid> <index> <count> <login> <nickname> [<caps>]`: roster
    /// enumeration after `ANS`.
    Iro {
        trid: u32,
        index: u32,
        count: u32,
        login: String,
        nickname: String,
        capabilities: Option<Capabilities>,
    },
    /// `BYE <login> [1]`: participant left; `1` marks inactivity.
    Bye { login: String, idle: bool },
    /// `ACK <trid>`: message delivered.
    Ack { trid: u32 },
    /// `NAK <trid>`: message delivery failed.
    Nak { trid: u32 },

    // --- housekeeping ---
    /// `PNG`: client keepalive.
    Png,
    /// `QNG <seconds>`: pong, with the seconds until the next expected ping.
    Qng { until_next: u32 },
    /// `NOT <len>` + payload: server notification blob.
    Not { payload: Vec<u8> },
    /// `OUT [<reason>]`: session over (OTH = elsewhere, SSD = shutdown).
    Out { reason: Option<String> },
    /// `SBS <value> <arg>`: partially documented; preserved and ignored.
    Sbs { value: u32, arg: String },
    /// `<code> <trid>`: three-digit server error reply.
    ServerError { code: u16, trid: u32 },
    /// An identifier this codec does not recognize; carried verbatim.
    Unknown { verb: String, line: String },
}

/// Result of decoding a header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// The line was a complete command.
    Complete(Command),
    /// The header declares a payload; read that many bytes and finish with
    /// [`PartialCommand::into_command`].
    NeedsPayload(PartialCommand),
}

/// A payload-bearing command whose header has been decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialCommand {
    kind: PartialKind,
    len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PartialKind {
    MsgSend { trid: u32, class: MsgClass },
    MsgReceive { sender: String, nickname: String },
    Ubx { login: String },
    Uux { trid: u32 },
    Not,
    Qry { trid: u32, client_id: String },
}

impl PartialCommand {
    /// The declared payload length in bytes.
    pub fn payload_len(&self) -> usize {
        self.len
    }

    /// Completes the command with the payload bytes.
    pub fn into_command(self, payload: Vec<u8>) -> Command {
        debug_assert_eq!(payload.len(), self.len);
        match self.kind {
            PartialKind::MsgSend { trid, class } => Command::MsgSend {
                trid,
                class,
                payload,
            },
            PartialKind::MsgReceive { sender, nickname } => Command::MsgReceive {
                sender,
                nickname,
                payload,
            },
            PartialKind::Ubx { login } => Command::Ubx { login, payload },
            PartialKind::Uux { trid } => Command::Uux { trid, payload },
            PartialKind::Not => Command::Not { payload },
            PartialKind::Qry { trid, client_id } => Command::Qry {
                trid,
                client_id,
                digest: String::from_utf8_lossy(&payload).into_owned(),
            },
        }
    }
}

impl Command {
    /// Returns the command identifier.
    pub fn verb(&self) -> Verb {
        match self {
            Self::Ver { .. } => Verb::Ver,
            Self::Cvr { .. } => Verb::Cvr,
            Self::UsrTwnInitial { .. }
            | Self::UsrTwnToken { .. }
            | Self::UsrSwitchboard { .. }
            | Self::UsrOk { .. } => Verb::Usr,
            Self::XfrRequest { .. }
            | Self::XfrNotification { .. }
            | Self::XfrSwitchboard { .. } => Verb::Xfr,
            Self::Qry { .. } | Self::QryOk { .. } => Verb::Qry,
            Self::Chl { .. } => Verb::Chl,
            Self::Chg { .. } => Verb::Chg,
            Self::Nln { .. } => Verb::Nln,
            Self::Iln { .. } => Verb::Iln,
            Self::Fln { .. } => Verb::Fln,
            Self::Ubx { .. } => Verb::Ubx,
            Self::Uux { .. } => Verb::Uux,
            Self::Prp { .. } => Verb::Prp,
            Self::Sbp { .. } => Verb::Sbp,
            Self::Bpr { .. } => Verb::Bpr,
            Self::Syn { .. } => Verb::Syn,
            Self::Gtc { .. } => Verb::Gtc,
            Self::Blp { .. } => Verb::Blp,
            Self::Lsg { .. } => Verb::Lsg,
            Self::Lst { .. } => Verb::Lst,
            Self::Adc { .. } => Verb::Adc,
            Self::Rem { .. } => Verb::Rem,
            Self::Adg { .. } => Verb::Adg,
            Self::Rmg { .. } => Verb::Rmg,
            Self::Reg { .. } => Verb::Reg,
            Self::MsgSend { .. } | Self::MsgReceive { .. } => Verb::Msg,
            Self::Rng { .. } => Verb::Rng,
            Self::Cal { .. } | Self::CalRinging { .. } => Verb::Cal,
            Self::Ans { .. } | Self::AnsOk { .. } => Verb::Ans,
            Self::Joi { .. } => Verb::Joi,
            Self::Iro { .. } => Verb::Iro,
            Self::Bye { .. } => Verb::Bye,
            Self::Ack { .. } => Verb::Ack,
            Self::Nak { .. } => Verb::Nak,
            Self::Png => Verb::Png,
            Self::Qng { .. } => Verb::Qng,
            Self::Not { .. } => Verb::Not,
            Self::Out { .. } => Verb::Out,
            Self::Sbs { .. } => Verb::Sbs,
            Self::ServerError { .. } => Verb::Error,
            Self::Unknown { .. } => Verb::Unknown,
        }
    }

    /// Returns the transaction id, for commands that carry one.
    pub fn trid(&self) -> Option<u32> {
        match self {
            Self::Ver { trid, .. }
            | Self::Cvr { trid, .. }
            | Self::UsrTwnInitial { trid, .. }
            | Self::UsrTwnToken { trid, .. }
            | Self::UsrSwitchboard { trid, .. }
            | Self::UsrOk { trid, .. }
            | Self::XfrRequest { trid }
            | Self::XfrNotification { trid, .. }
            | Self::XfrSwitchboard { trid, .. }
            | Self::Qry { trid, .. }
            | Self::QryOk { trid }
            | Self::Chg { trid, .. }
            | Self::Iln { trid, .. }
            | Self::Uux { trid, .. }
            | Self::Sbp { trid, .. }
            | Self::Syn { trid, .. }
            | Self::Adc { trid, .. }
            | Self::Rem { trid, .. }
            | Self::Adg { trid, .. }
            | Self::Rmg { trid, .. }
            | Self::Reg { trid, .. }
            | Self::MsgSend { trid, .. }
            | Self::Cal { trid, .. }
            | Self::CalRinging { trid, .. }
            | Self::Ans { trid, .. }
            | Self::AnsOk { trid }
            | Self::Iro { trid, .. }
            | Self::Ack { trid }
            | Self::Nak { trid }
            | Self::ServerError { trid, .. } => Some(*trid),
            Self::Prp { trid, .. } | Self::Gtc { trid, .. } | Self::Blp { trid, .. } => *trid,
            _ => None,
        }
    }

    /// Returns the error code for [`Command::ServerError`].
    pub fn error_code(&self) -> Option<u16> {
        match self {
            Self::ServerError { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Serializes the command into wire bytes: the header line, `\r\n`,
    /// then the payload if the command carries one.
    pub fn encode(&self) -> Vec<u8> {
        let mut line = String::with_capacity(48);
        let mut payload: Option<&[u8]> = None;

        match self {
            Self::Ver { trid, dialects } => {
                line.push_str(&format!("VER {trid}"));
                for d in dialects {
                    line.push(' ');
                    line.push_str(d);
                }
            }
            Self::Cvr { trid, args } => {
                line.push_str(&format!("CVR {trid}"));
                for a in args {
                    line.push(' ');
                    line.push_str(a);
                }
            }
            Self::UsrTwnInitial { trid, login } => {
                line.push_str(&format!("USR {trid} TWN I {login}"));
            }
            Self::UsrTwnToken { trid, token } => {
                line.push_str(&format!("USR {trid} TWN S {token}"));
            }
            Self::UsrSwitchboard {
                trid,
                login,
                ticket,
            } => {
                line.push_str(&format!("USR {trid} {login} {ticket}"));
            }
            Self::UsrOk {
                trid,
                login,
                nickname,
                verified,
            } => match nickname {
                Some(nick) => {
                    line.push_str(&format!("USR {trid} OK {login} {}", encode_arg(nick)));
                }
                None => {
                    let v = if *verified { 1 } else { 0 };
                    line.push_str(&format!("USR {trid} OK {login} {v} 0"));
                }
            },
            Self::XfrRequest { trid } => line.push_str(&format!("XFR {trid} SB")),
            Self::XfrNotification {
                trid,
                endpoint,
                backup,
            } => {
                line.push_str(&format!("XFR {trid} NS {endpoint} 0"));
                if let Some(backup) = backup {
                    line.push(' ');
                    line.push_str(backup);
                }
            }
            Self::XfrSwitchboard {
                trid,
                endpoint,
                ticket,
            } => {
                line.push_str(&format!("XFR {trid} SB {endpoint} CKI {ticket}"));
            }
            Self::Qry {
                trid,
                client_id,
                digest,
            } => {
                line.push_str(&format!("QRY {trid} {client_id} {}", digest.len()));
                payload = Some(digest.as_bytes());
            }
            Self::QryOk { trid } => line.push_str(&format!("QRY {trid}")),
            Self::Chl { challenge } => line.push_str(&format!("CHL 0 {challenge}")),
            Self::Chg {
                trid,
                status,
                capabilities,
                object,
            } => {
                line.push_str(&format!("CHG {trid} {} {}", status.as_code(), capabilities));
                if let Some(object) = object {
                    line.push(' ');
                    line.push_str(&encode_arg(object));
                }
            }
            Self::Nln {
                status,
                login,
                nickname,
                capabilities,
                object,
            } => {
                line.push_str(&format!(
                    "NLN {} {login} {} {capabilities}",
                    status.as_code(),
                    encode_arg(nickname)
                ));
                if let Some(object) = object {
                    line.push(' ');
                    line.push_str(&encode_arg(object));
                }
            }
            Self::Iln {
                trid,
                status,
                login,
                nickname,
                capabilities,
                object,
            } => {
                line.push_str(&format!(
                    "ILN {trid} {} {login} {} {capabilities}",
                    status.as_code(),
                    encode_arg(nickname)
                ));
                if let Some(object) = object {
                    line.push(' ');
                    line.push_str(&encode_arg(object));
                }
            }
            Self::Fln { login } => line.push_str(&format!("FLN {login}")),
            Self::Ubx { login, payload: p } => {
                line.push_str(&format!("UBX {login} {}", p.len()));
                payload = Some(p);
            }
            Self::Uux { trid, payload: p } => {
                line.push_str(&format!("UUX {trid} {}", p.len()));
                payload = Some(p);
            }
            Self::Prp { trid, key, value } => {
                match trid {
                    Some(trid) => line.push_str(&format!("PRP {trid} {key} ")),
                    None => line.push_str(&format!("PRP {key} ")),
                }
                line.push_str(&encode_arg(value));
            }
            Self::Sbp {
                trid,
                guid,
                key,
                value,
            } => {
                line.push_str(&format!("SBP {trid} {guid} {key} {}", encode_arg(value)));
            }
            Self::Bpr { key, value } => {
                line.push_str(&format!("BPR {key} {}", encode_arg(value)));
            }
            Self::Syn {
                trid,
                timestamp1,
                timestamp2,
                counts,
            } => {
                line.push_str(&format!("SYN {trid} {timestamp1} {timestamp2}"));
                if let Some((contacts, groups)) = counts {
                    line.push_str(&format!(" {contacts} {groups}"));
                }
            }
            Self::Gtc { trid, setting } => match trid {
                Some(trid) => line.push_str(&format!("GTC {trid} {setting}")),
                None => line.push_str(&format!("GTC {setting}")),
            },
            Self::Blp { trid, setting } => match trid {
                Some(trid) => line.push_str(&format!("BLP {trid} {setting}")),
                None => line.push_str(&format!("BLP {setting}")),
            },
            Self::Lsg { name, guid } => {
                line.push_str(&format!("LSG {} {guid}", encode_arg(name)));
            }
            Self::Lst {
                login,
                nickname,
                guid,
                lists,
                groups,
            } => {
                line.push_str(&format!("LST N={login}"));
                if let Some(nick) = nickname {
                    line.push_str(&format!(" F={}", encode_arg(nick)));
                }
                if let Some(guid) = guid {
                    line.push_str(&format!(" C={guid}"));
                }
                line.push_str(&format!(" {}", lists.bits()));
                if !groups.is_empty() {
                    line.push(' ');
                    line.push_str(&groups.join(","));
                }
            }
            Self::Adc {
                trid,
                list,
                login,
                nickname,
                guid,
                group,
            } => {
                line.push_str(&format!("ADC {trid} {}", list.as_code()));
                if let Some(login) = login {
                    line.push_str(&format!(" N={login}"));
                }
                if let Some(nick) = nickname {
                    line.push_str(&format!(" F={}", encode_arg(nick)));
                }
                if let Some(guid) = guid {
                    line.push_str(&format!(" C={guid}"));
                }
                if let Some(group) = group {
                    line.push(' ');
                    line.push_str(group);
                }
            }
            Self::Rem {
                trid,
                list,
                target,
                group,
            } => {
                line.push_str(&format!("REM {trid} {} {target}", list.as_code()));
                if let Some(group) = group {
                    line.push(' ');
                    line.push_str(group);
                }
            }
            Self::Adg { trid, name, guid } => {
                line.push_str(&format!("ADG {trid} {}", encode_arg(name)));
                if let Some(guid) = guid {
                    line.push(' ');
                    line.push_str(guid);
                }
            }
            Self::Rmg { trid, guid } => line.push_str(&format!("RMG {trid} {guid}")),
            Self::Reg { trid, guid, name } => {
                line.push_str(&format!("REG {trid} {guid} {}", encode_arg(name)));
            }
            Self::MsgSend {
                trid,
                class,
                payload: p,
            } => {
                line.push_str(&format!("MSG {trid} {class} {}", p.len()));
                payload = Some(p);
            }
            Self::MsgReceive {
                sender,
                nickname,
                payload: p,
            } => {
                line.push_str(&format!("MSG {sender} {} {}", encode_arg(nickname), p.len()));
                payload = Some(p);
            }
            Self::Rng {
                session_id,
                endpoint,
                auth,
                login,
                nickname,
            } => {
                line.push_str(&format!(
                    "RNG {session_id} {endpoint} CKI {auth} {login} {}",
                    encode_arg(nickname)
                ));
            }
            Self::Cal { trid, login } => line.push_str(&format!("CAL {trid} {login}")),
            Self::CalRinging { trid, session_id } => {
                line.push_str(&format!("CAL {trid} RINGING {session_id}"));
            }
            Self::Ans {
                trid,
                login,
                auth,
                session_id,
            } => {
                line.push_str(&format!("ANS {trid} {login} {auth} {session_id}"));
            }
            Self::AnsOk { trid } => line.push_str(&format!("ANS {trid} OK")),
            Self::Joi {
                login,
                nickname,
                capabilities,
            } => {
                line.push_str(&format!("JOI {login} {}", encode_arg(nickname)));
                if let Some(caps) = capabilities {
                    line.push_str(&format!(" {caps}"));
                }
            }
            Self::Iro {
                trid,
                index,
                count,
                login,
                nickname,
                capabilities,
            } => {
                line.push_str(&format!(
                    "IRO {trid} {index} {count} {login} {}",
                    encode_arg(nickname)
                ));
                if let Some(caps) = capabilities {
                    line.push_str(&format!(" {caps}"));
                }
            }
            Self::Bye { login, idle } => {
                line.push_str(&format!("BYE {login}"));
                if *idle {
                    line.push_str(" 1");
                }
            }
            Self::Ack { trid } => line.push_str(&format!("ACK {trid}")),
            Self::Nak { trid } => line.push_str(&format!("NAK {trid}")),
            Self::Png => line.push_str("PNG"),
            Self::Qng { until_next } => line.push_str(&format!("QNG {until_next}")),
            Self::Not { payload: p } => {
                line.push_str(&format!("NOT {}", p.len()));
                payload = Some(p);
            }
            Self::Out { reason } => {
                line.push_str("OUT");
                if let Some(reason) = reason {
                    line.push(' ');
                    line.push_str(reason);
                }
            }
            Self::Sbs { value, arg } => line.push_str(&format!("SBS {value} {arg}")),
            Self::ServerError { code, trid } => line.push_str(&format!("{code} {trid}")),
            Self::Unknown { line: raw, .. } => line.push_str(raw),
        }

        let mut out = Vec::with_capacity(line.len() + 2 + payload.map_or(0, |p| p.len()));
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
        if let Some(p) = payload {
            out.extend_from_slice(p);
        }
        out
    }

    /// Decodes a header line.
    ///
    /// Unrecognized identifiers decode to [`Command::Unknown`]; malformed
    /// lines of recognized identifiers are an error.
    pub fn decode(line: &str) -> ProtocolResult<Decoded> {
        let tokens: Vec<&str> = line.split(' ').collect();
        let verb = *tokens
            .first()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ProtocolError::malformed(line, "empty line"))?;

        if verb.len() == 3 && verb.bytes().all(|b| b.is_ascii_digit()) {
            let code: u16 = verb
                .parse()
                .map_err(|_| ProtocolError::malformed(line, "bad error code"))?;
            let trid = tokens.get(1).and_then(|t| t.parse().ok()).unwrap_or(0);
            return Ok(Decoded::Complete(Command::ServerError { code, trid }));
        }

        let cmd = match verb {
            "VER" => Command::Ver {
                trid: parse_trid(&tokens, 1, line)?,
                dialects: tokens[2..].iter().map(|s| s.to_string()).collect(),
            },
            "CVR" => Command::Cvr {
                trid: parse_trid(&tokens, 1, line)?,
                args: tokens[2..].iter().map(|s| s.to_string()).collect(),
            },
            "USR" => return decode_usr(&tokens, line),
            "XFR" => return decode_xfr(&tokens, line),
            "QRY" => match tokens.len() {
                2 => Command::QryOk {
                    trid: parse_trid(&tokens, 1, line)?,
                },
                4 => {
                    let len = parse_len(&tokens, 3, line)?;
                    return Ok(Decoded::NeedsPayload(PartialCommand {
                        kind: PartialKind::Qry {
                            trid: parse_trid(&tokens, 1, line)?,
                            client_id: tokens[2].to_string(),
                        },
                        len,
                    }));
                }
                _ => return Err(ProtocolError::malformed(line, "bad QRY arity")),
            },
            "CHL" => Command::Chl {
                challenge: req(&tokens, 2, line)?.to_string(),
            },
            "CHG" => Command::Chg {
                trid: parse_trid(&tokens, 1, line)?,
                status: parse_status(&tokens, 2, line)?,
                capabilities: Capabilities::from_bits(parse_u32(&tokens, 3, line)?),
                object: opt_escaped(&tokens, 4)?,
            },
            "NLN" => Command::Nln {
                status: parse_status(&tokens, 1, line)?,
                login: req(&tokens, 2, line)?.to_string(),
                nickname: decode_arg(req(&tokens, 3, line)?)?,
                capabilities: Capabilities::from_bits(parse_u32(&tokens, 4, line)?),
                object: opt_escaped(&tokens, 5)?,
            },
            "ILN" => Command::Iln {
                trid: parse_trid(&tokens, 1, line)?,
                status: parse_status(&tokens, 2, line)?,
                login: req(&tokens, 3, line)?.to_string(),
                nickname: decode_arg(req(&tokens, 4, line)?)?,
                capabilities: Capabilities::from_bits(parse_u32(&tokens, 5, line)?),
                object: opt_escaped(&tokens, 6)?,
            },
            "FLN" => Command::Fln {
                login: req(&tokens, 1, line)?.to_string(),
            },
            "UBX" => {
                return Ok(Decoded::NeedsPayload(PartialCommand {
                    kind: PartialKind::Ubx {
                        login: req(&tokens, 1, line)?.to_string(),
                    },
                    len: parse_len(&tokens, 2, line)?,
                }));
            }
            "UUX" => {
                return Ok(Decoded::NeedsPayload(PartialCommand {
                    kind: PartialKind::Uux {
                        trid: parse_trid(&tokens, 1, line)?,
                    },
                    len: parse_len(&tokens, 2, line)?,
                }));
            }
            "PRP" => {
                // A leading numeric token is the transaction id; the SYN
                // stream form has none.
                let (trid, key_at) = match tokens.get(1).map(|t| t.parse::<u32>()) {
                    Some(Ok(trid)) => (Some(trid), 2),
                    _ => (None, 1),
                };
                Command::Prp {
                    trid,
                    key: req(&tokens, key_at, line)?.to_string(),
                    value: decode_arg(tokens.get(key_at + 1).copied().unwrap_or(""))?,
                }
            }
            "SBP" => Command::Sbp {
                trid: parse_trid(&tokens, 1, line)?,
                guid: req(&tokens, 2, line)?.to_string(),
                key: req(&tokens, 3, line)?.to_string(),
                value: decode_arg(tokens.get(4).copied().unwrap_or(""))?,
            },
            "BPR" => Command::Bpr {
                key: req(&tokens, 1, line)?.to_string(),
                value: decode_arg(tokens.get(2).copied().unwrap_or(""))?,
            },
            "SYN" => {
                let counts = if tokens.len() >= 6 {
                    Some((parse_u32(&tokens, 4, line)?, parse_u32(&tokens, 5, line)?))
                } else {
                    None
                };
                Command::Syn {
                    trid: parse_trid(&tokens, 1, line)?,
                    timestamp1: req(&tokens, 2, line)?.to_string(),
                    timestamp2: req(&tokens, 3, line)?.to_string(),
                    counts,
                }
            }
            "GTC" => {
                let (trid, at) = optional_trid(&tokens);
                Command::Gtc {
                    trid,
                    setting: req(&tokens, at, line)?.to_string(),
                }
            }
            "BLP" => {
                let (trid, at) = optional_trid(&tokens);
                Command::Blp {
                    trid,
                    setting: req(&tokens, at, line)?.to_string(),
                }
            }
            "LSG" => Command::Lsg {
                name: decode_arg(req(&tokens, 1, line)?)?,
                guid: req(&tokens, 2, line)?.to_string(),
            },
            "LST" => return decode_lst(&tokens, line),
            "ADC" => return decode_adc(&tokens, line),
            "REM" => Command::Rem {
                trid: parse_trid(&tokens, 1, line)?,
                list: parse_list(&tokens, 2, line)?,
                target: req(&tokens, 3, line)?.to_string(),
                group: tokens.get(4).map(|s| s.to_string()),
            },
            "ADG" => Command::Adg {
                trid: parse_trid(&tokens, 1, line)?,
                name: decode_arg(req(&tokens, 2, line)?)?,
                guid: tokens.get(3).map(|s| s.to_string()),
            },
            "RMG" => Command::Rmg {
                trid: parse_trid(&tokens, 1, line)?,
                guid: req(&tokens, 2, line)?.to_string(),
            },
            "REG" => Command::Reg {
                trid: parse_trid(&tokens, 1, line)?,
                guid: req(&tokens, 2, line)?.to_string(),
                name: decode_arg(req(&tokens, 3, line)?)?,
            },
            "MSG" => return decode_msg(&tokens, line),
            "RNG" => Command::Rng {
                session_id: req(&tokens, 1, line)?.to_string(),
                endpoint: req(&tokens, 2, line)?.to_string(),
                auth: req(&tokens, 4, line)?.to_string(),
                login: req(&tokens, 5, line)?.to_string(),
                nickname: decode_arg(req(&tokens, 6, line)?)?,
            },
            "CAL" => {
                if tokens.get(2) == Some(&"RINGING") {
                    Command::CalRinging {
                        trid: parse_trid(&tokens, 1, line)?,
                        session_id: req(&tokens, 3, line)?.to_string(),
                    }
                } else {
                    Command::Cal {
                        trid: parse_trid(&tokens, 1, line)?,
                        login: req(&tokens, 2, line)?.to_string(),
                    }
                }
            }
            "ANS" => {
                if tokens.get(2) == Some(&"OK") {
                    Command::AnsOk {
                        trid: parse_trid(&tokens, 1, line)?,
                    }
                } else {
                    Command::Ans {
                        trid: parse_trid(&tokens, 1, line)?,
                        login: req(&tokens, 2, line)?.to_string(),
                        auth: req(&tokens, 3, line)?.to_string(),
                        session_id: req(&tokens, 4, line)?.to_string(),
                    }
                }
            }
            "JOI" => Command::Joi {
                login: req(&tokens, 1, line)?.to_string(),
                nickname: decode_arg(req(&tokens, 2, line)?)?,
                capabilities: opt_caps(&tokens, 3, line)?,
            },
            "IRO" => Command::Iro {
                trid: parse_trid(&tokens, 1, line)?,
                index: parse_u32(&tokens, 2, line)?,
                count: parse_u32(&tokens, 3, line)?,
                login: req(&tokens, 4, line)?.to_string(),
                nickname: decode_arg(req(&tokens, 5, line)?)?,
                capabilities: opt_caps(&tokens, 6, line)?,
            },
            "BYE" => Command::Bye {
                login: req(&tokens, 1, line)?.to_string(),
                idle: tokens.get(2) == Some(&"1"),
            },
            "ACK" => Command::Ack {
                trid: parse_trid(&tokens, 1, line)?,
            },
            "NAK" => Command::Nak {
                trid: parse_trid(&tokens, 1, line)?,
            },
            "PNG" => Command::Png,
            "QNG" => Command::Qng {
                until_next: parse_u32(&tokens, 1, line)?,
            },
            "NOT" => {
                return Ok(Decoded::NeedsPayload(PartialCommand {
                    kind: PartialKind::Not,
                    len: parse_len(&tokens, 1, line)?,
                }));
            }
            "OUT" => Command::Out {
                reason: tokens.get(1).map(|s| s.to_string()),
            },
            "SBS" => Command::Sbs {
                value: parse_u32(&tokens, 1, line)?,
                arg: req(&tokens, 2, line)?.to_string(),
            },
            _ => Command::Unknown {
                verb: verb.to_string(),
                line: line.to_string(),
            },
        };
        Ok(Decoded::Complete(cmd))
    }
}

fn decode_usr(tokens: &[&str], line: &str) -> ProtocolResult<Decoded> {
    let trid = parse_trid(tokens, 1, line)?;
    let cmd = match tokens.get(2).copied() {
        Some("TWN") => match tokens.get(3).copied() {
            Some("I") => Command::UsrTwnInitial {
                trid,
                login: req(tokens, 4, line)?.to_string(),
            },
            Some("S") => Command::UsrTwnToken {
                trid,
                token: tokens[4..].join(" "),
            },
            _ => return Err(ProtocolError::malformed(line, "bad USR TWN phase")),
        },
        Some("OK") => {
            let login = req(tokens, 3, line)?.to_string();
            if tokens.len() >= 6 {
                Command::UsrOk {
                    trid,
                    login,
                    nickname: None,
                    verified: tokens[4] == "1",
                }
            } else {
                Command::UsrOk {
                    trid,
                    login,
                    nickname: Some(decode_arg(req(tokens, 4, line)?)?),
                    verified: true,
                }
            }
        }
        Some(login) if tokens.len() == 4 => Command::UsrSwitchboard {
            trid,
            login: login.to_string(),
            ticket: tokens[3].to_string(),
        },
        _ => return Err(ProtocolError::malformed(line, "bad USR arity")),
    };
    Ok(Decoded::Complete(cmd))
}

fn decode_xfr(tokens: &[&str], line: &str) -> ProtocolResult<Decoded> {
    let trid = parse_trid(tokens, 1, line)?;
    let cmd = match (tokens.get(2).copied(), tokens.len()) {
        (Some("SB"), 3) => Command::XfrRequest { trid },
        (Some("NS"), _) => Command::XfrNotification {
            trid,
            endpoint: req(tokens, 3, line)?.to_string(),
            backup: tokens.get(5).map(|s| s.to_string()),
        },
        (Some("SB"), _) => Command::XfrSwitchboard {
            trid,
            endpoint: req(tokens, 3, line)?.to_string(),
            ticket: req(tokens, 5, line)?.to_string(),
        },
        _ => return Err(ProtocolError::malformed(line, "bad XFR referral type")),
    };
    Ok(Decoded::Complete(cmd))
}

fn decode_lst(tokens: &[&str], line: &str) -> ProtocolResult<Decoded> {
    let mut login = None;
    let mut nickname = None;
    let mut guid = None;
    let mut bits = None;
    let mut groups = Vec::new();

    for token in &tokens[1..] {
        if let Some(v) = token.strip_prefix("N=") {
            login = Some(v.to_string());
        } else if let Some(v) = token.strip_prefix("F=") {
            nickname = Some(decode_arg(v)?);
        } else if let Some(v) = token.strip_prefix("C=") {
            guid = Some(v.to_string());
        } else if bits.is_none() && token.bytes().all(|b| b.is_ascii_digit()) {
            bits = Some(
                token
                    .parse::<u8>()
                    .map_err(|_| ProtocolError::malformed(line, "bad LST bitmask"))?,
            );
        } else if bits.is_some() {
            groups = token.split(',').map(|s| s.to_string()).collect();
        }
    }

    Ok(Decoded::Complete(Command::Lst {
        login: login.ok_or_else(|| ProtocolError::malformed(line, "LST without N="))?,
        nickname,
        guid,
        lists: ListSet::from_bits(
            bits.ok_or_else(|| ProtocolError::malformed(line, "LST without bitmask"))?,
        ),
        groups,
    }))
}

fn decode_adc(tokens: &[&str], line: &str) -> ProtocolResult<Decoded> {
    let trid = parse_trid(tokens, 1, line)?;
    let list = parse_list(tokens, 2, line)?;
    let mut login = None;
    let mut nickname = None;
    let mut guid = None;
    let mut group = None;

    for token in &tokens[3..] {
        if let Some(v) = token.strip_prefix("N=") {
            login = Some(v.to_string());
        } else if let Some(v) = token.strip_prefix("F=") {
            nickname = Some(decode_arg(v)?);
        } else if let Some(v) = token.strip_prefix("C=") {
            guid = Some(v.to_string());
        } else {
            group = Some(token.to_string());
        }
    }

    Ok(Decoded::Complete(Command::Adc {
        trid,
        list,
        login,
        nickname,
        guid,
        group,
    }))
}

fn decode_msg(tokens: &[&str], line: &str) -> ProtocolResult<Decoded> {
    let len = parse_len(tokens, 3, line)?;
    // Client form: MSG <trid> <class> <len>. Server form: MSG <sender>
    // <nickname> <len>. A numeric first argument plus a class letter is
    // unambiguous; sender names are login addresses.
    let kind = match (
        tokens.get(1).and_then(|t| t.parse::<u32>().ok()),
        tokens.get(2).and_then(|t| MsgClass::from_code(t)),
    ) {
        (Some(trid), Some(class)) => PartialKind::MsgSend { trid, class },
        _ => PartialKind::MsgReceive {
            sender: req(tokens, 1, line)?.to_string(),
            nickname: decode_arg(req(tokens, 2, line)?)?,
        },
    };
    Ok(Decoded::NeedsPayload(PartialCommand { kind, len }))
}

fn req<'a>(tokens: &[&'a str], idx: usize, line: &str) -> ProtocolResult<&'a str> {
    tokens
        .get(idx)
        .copied()
        .ok_or_else(|| ProtocolError::malformed(line, format!("missing argument {idx}")))
}

fn parse_trid(tokens: &[&str], idx: usize, line: &str) -> ProtocolResult<u32> {
    req(tokens, idx, line)?
        .parse()
        .map_err(|_| ProtocolError::malformed(line, "bad transaction id"))
}

fn parse_u32(tokens: &[&str], idx: usize, line: &str) -> ProtocolResult<u32> {
    req(tokens, idx, line)?
        .parse()
        .map_err(|_| ProtocolError::malformed(line, format!("bad numeric argument {idx}")))
}

fn parse_len(tokens: &[&str], idx: usize, line: &str) -> ProtocolResult<usize> {
    req(tokens, idx, line)?
        .parse()
        .map_err(|_| ProtocolError::malformed(line, "bad payload length"))
}

fn parse_status(tokens: &[&str], idx: usize, line: &str) -> ProtocolResult<Presence> {
    let code = req(tokens, idx, line)?;
    Presence::from_code(code)
        .ok_or_else(|| ProtocolError::malformed(line, format!("unknown status {code:?}")))
}

fn parse_list(tokens: &[&str], idx: usize, line: &str) -> ProtocolResult<List> {
    let code = req(tokens, idx, line)?;
    List::from_code(code)
        .ok_or_else(|| ProtocolError::malformed(line, format!("unknown list {code:?}")))
}

fn opt_escaped(tokens: &[&str], idx: usize) -> ProtocolResult<Option<String>> {
    tokens.get(idx).map(|t| decode_arg(t)).transpose()
}

fn opt_caps(tokens: &[&str], idx: usize, line: &str) -> ProtocolResult<Option<Capabilities>> {
    match tokens.get(idx) {
        Some(_) => Ok(Some(Capabilities::from_bits(parse_u32(tokens, idx, line)?))),
        None => Ok(None),
    }
}

fn optional_trid(tokens: &[&str]) -> (Option<u32>, usize) {
    // GTC/BLP carry a trid on replies but not in the SYN stream; the
    // settings themselves are never numeric.
    match tokens.get(1).map(|t| t.parse::<u32>()) {
        Some(Ok(trid)) => (Some(trid), 2),
        _ => (None, 1),
    }
}
