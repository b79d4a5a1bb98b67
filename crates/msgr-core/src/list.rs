//! Contact-list membership bitmask.
//!
//! A contact can be a member of up to five server-side lists. The server
//! reports membership as a decimal bitmask in `LST` and list names as
//! two-letter codes in `ADC`/`REM`/`BLP`.

use std::fmt;

/// One of the five server-side contact lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum List {
    /// Forward list (`FL`, bit 1): the local user's roster.
    Forward,
    /// Allow list (`AL`, bit 2): may see presence and open sessions.
    Allow,
    /// Block list (`BL`, bit 4): sees the local user as offline.
    Block,
    /// Reverse list (`RL`, bit 8): remote users who have the local user on
    /// their roster.
    Reverse,
    /// Pending list (`PL`, bit 16): remote adds awaiting a decision.
    Pending,
}

impl List {
    /// All lists, in bit order.
    pub const ALL: [List; 5] = [
        List::Forward,
        List::Allow,
        List::Block,
        List::Reverse,
        List::Pending,
    ];

    /// Returns the bit value for this list.
    pub fn bit(&self) -> u8 {
        match self {
            Self::Forward => 1,
            Self::Allow => 2,
            Self::Block => 4,
            Self::Reverse => 8,
            Self::Pending => 16,
        }
    }

    /// Returns the two-letter wire code for this list.
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Forward => "FL",
            Self::Allow => "AL",
            Self::Block => "BL",
            Self::Reverse => "RL",
            Self::Pending => "PL",
        }
    }

    /// Parses a two-letter wire code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "FL" => Some(Self::Forward),
            "AL" => Some(Self::Allow),
            "BL" => Some(Self::Block),
            "RL" => Some(Self::Reverse),
            "PL" => Some(Self::Pending),
            _ => None,
        }
    }
}

impl fmt::Display for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

/// A set of list memberships, stored as the wire bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ListSet(u8);

impl ListSet {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// Creates a set from the wire bitmask. Bits above 16 are discarded.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits & 0x1f)
    }

    /// Returns the wire bitmask.
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Returns true if no list contains the contact.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Returns true if the given list contains the contact.
    pub fn contains(&self, list: List) -> bool {
        self.0 & list.bit() != 0
    }

    /// Adds a list membership.
    pub fn insert(&mut self, list: List) {
        self.0 |= list.bit();
    }

    /// Removes a list membership.
    pub fn remove(&mut self, list: List) {
        self.0 &= !list.bit();
    }

    /// Iterates over the lists present in this set, in bit order.
    pub fn iter(&self) -> impl Iterator<Item = List> + '_ {
        List::ALL.into_iter().filter(|l| self.contains(*l))
    }
}

impl fmt::Display for ListSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for list in self.iter() {
            if !first {
                f.write_str(",")?;
            }
            f.write_str(list.as_code())?;
            first = false;
        }
        Ok(())
    }
}

impl FromIterator<List> for ListSet {
    fn from_iter<I: IntoIterator<Item = List>>(iter: I) -> Self {
        let mut set = Self::EMPTY;
        for list in iter {
            set.insert(list);
        }
        set
    }
}
