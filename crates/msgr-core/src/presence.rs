//! Presence states and client capabilities.

use std::fmt;

/// A user's advertised presence state.
///
/// Each state maps to a three-letter wire code used by `CHG`, `NLN` and
/// `ILN`. [`Presence::Offline`] is server-reported only (`FLN`): a client
/// that wants to appear offline while staying connected uses
/// [`Presence::Hidden`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Presence {
    /// Online (`NLN`).
    #[default]
    Online,
    /// Busy (`BSY`).
    Busy,
    /// Idle (`IDL`).
    Idle,
    /// Be right back (`BRB`).
    BeRightBack,
    /// Away (`AWY`).
    Away,
    /// On the phone (`PHN`).
    OnThePhone,
    /// Out to lunch (`LUN`).
    OutToLunch,
    /// Appear offline (`HDN`).
    Hidden,
    /// Offline (`FLN`). Server-reported only.
    Offline,
}

impl Presence {
    /// Returns the three-letter wire code for this state.
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Online => "NLN",
            Self::Busy => "BSY",
            Self::Idle => "IDL",
            Self::BeRightBack => "BRB",
            Self::Away => "AWY",
            Self::OnThePhone => "PHN",
            Self::OutToLunch => "LUN",
            Self::Hidden => "HDN",
            Self::Offline => "FLN",
        }
    }

    /// Parses a wire code into a presence state.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "NLN" => Some(Self::Online),
            "BSY" => Some(Self::Busy),
            "IDL" => Some(Self::Idle),
            "BRB" => Some(Self::BeRightBack),
            "AWY" => Some(Self::Away),
            "PHN" => Some(Self::OnThePhone),
            "LUN" => Some(Self::OutToLunch),
            "HDN" => Some(Self::Hidden),
            "FLN" => Some(Self::Offline),
            _ => None,
        }
    }

    /// Returns a human-readable name for this state.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Online => "Online",
            Self::Busy => "Busy",
            Self::Idle => "Idle",
            Self::BeRightBack => "Be Right Back",
            Self::Away => "Away",
            Self::OnThePhone => "On the Phone",
            Self::OutToLunch => "Out to Lunch",
            Self::Hidden => "Appear Offline",
            Self::Offline => "Offline",
        }
    }

    /// Returns true if a client may request this state via `CHG`.
    ///
    /// `FLN` is reported by the server when a contact signs out; it is not
    /// a settable status.
    pub fn is_settable(&self) -> bool {
        !matches!(self, Self::Offline)
    }
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// The client-capabilities bitmask advertised in `CHG`/`NLN`/`ILN`.
///
/// The full bit assignment is sprawling and mostly irrelevant to this
/// library; the mask is carried opaquely and compared for equality. A few
/// bits that influence behavior are named.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u32);

impl Capabilities {
    /// No capabilities.
    pub const NONE: Self = Self(0);

    /// Supports receiving ink (GIF) messages.
    pub const INK_GIF: Self = Self(0x0000_0400);

    /// Supports multi-packet (chunked) messaging.
    pub const MULTI_PACKET: Self = Self(0x0000_8000);

    /// Creates a capabilities mask from raw bits.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw bitmask.
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Returns true if every bit of `other` is set in `self`.
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_roundtrip() {
        for presence in [
            Presence::Online,
            Presence::Busy,
            Presence::Idle,
            Presence::BeRightBack,
            Presence::Away,
            Presence::OnThePhone,
            Presence::OutToLunch,
            Presence::Hidden,
            Presence::Offline,
        ] {
            assert_eq!(Presence::from_code(presence.as_code()), Some(presence));
        }
    }

    #[test]
    fn unknown_code() {
        assert_eq!(Presence::from_code("XYZ"), None);
        assert_eq!(Presence::from_code(""), None);
    }

    #[test]
    fn offline_is_not_settable() {
        assert!(!Presence::Offline.is_settable());
        assert!(Presence::Hidden.is_settable());
        assert!(Presence::Online.is_settable());
    }

    #[test]
    fn capabilities_contains() {
        let caps = Capabilities::from_bits(
            Capabilities::INK_GIF.bits() | Capabilities::MULTI_PACKET.bits(),
        );
        assert!(caps.contains(Capabilities::INK_GIF));
        assert!(caps.contains(Capabilities::MULTI_PACKET));
        assert!(!Capabilities::NONE.contains(Capabilities::INK_GIF));
        assert_eq!(format!("{}", Capabilities::NONE), "0");
    }
}
