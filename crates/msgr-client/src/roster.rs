//! The contact and group tables, and the local user.
//!
//! The tables are shared between the dispatcher task (applying `LST`, `NLN`,
//! `FLN` and friends) and caller operations. Reads take snapshots; writes
//! are short critical sections with no I/O under the lock.

use std::collections::{HashMap, HashSet};

use msgr_core::{Capabilities, ListSet, Presence};
use msgr_core::list::List;

/// A remote user.
///
/// The login name is the stable identity for roster membership; the guid
/// (known once the contact is on the forward list) is what group membership
/// and removal key on.
#[derive(Debug, Clone)]
pub struct Contact {
    /// Login name (an email address).
    pub login: String,
    /// Server-assigned contact guid, when known.
    pub guid: Option<String>,
    /// Display nickname.
    pub nickname: String,
    /// Current presence.
    pub presence: Presence,
    /// Advertised capabilities.
    pub capabilities: Capabilities,
    /// Display-picture object reference, when advertised.
    pub display_picture: Option<String>,
    /// List memberships.
    pub lists: ListSet,
    /// Guids of the groups this contact belongs to.
    pub groups: HashSet<String>,
    /// Current personal message.
    pub personal_message: String,
    /// Extra properties from `BPR`/`SBP` (phone numbers and the like).
    pub properties: HashMap<String, String>,
}

impl Contact {
    /// Creates an offline contact with no memberships.
    pub fn new(login: impl Into<String>) -> Self {
        let login = login.into();
        Self {
            nickname: login.clone(),
            login,
            guid: None,
            presence: Presence::Offline,
            capabilities: Capabilities::NONE,
            display_picture: None,
            lists: ListSet::EMPTY,
            groups: HashSet::new(),
            personal_message: String::new(),
            properties: HashMap::new(),
        }
    }

    /// A contact is on the roster iff it is on the forward list.
    pub fn is_on_roster(&self) -> bool {
        self.lists.contains(List::Forward)
    }

    /// Returns true if the contact is blocked.
    pub fn is_blocked(&self) -> bool {
        self.lists.contains(List::Block)
    }
}

/// A contact group: a name, a guid, and member contacts by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Server-assigned group guid.
    pub guid: String,
    /// Display name.
    pub name: String,
}

/// The authenticated user.
#[derive(Debug, Clone)]
pub struct LocalUser {
    /// Login name.
    pub login: String,
    /// Display nickname.
    pub nickname: String,
    /// Current presence.
    pub presence: Presence,
    /// Advertised capabilities.
    pub capabilities: Capabilities,
    /// Current personal message.
    pub personal_message: String,
    /// Display-picture object reference.
    pub display_picture: Option<String>,
    /// `GTC` setting: prompt (`A`) or auto-add (`N`) on reverse-list adds.
    pub reverse_list_prompt: String,
    /// `BLP` setting: default list for users on neither AL nor BL.
    pub default_list: String,
}

impl LocalUser {
    /// Creates a fresh local user for a login name.
    pub fn new(login: impl Into<String>) -> Self {
        let login = login.into();
        Self {
            nickname: login.clone(),
            login,
            presence: Presence::Offline,
            capabilities: Capabilities::NONE,
            personal_message: String::new(),
            display_picture: None,
            reverse_list_prompt: "A".into(),
            default_list: "AL".into(),
        }
    }
}

/// The contact/group tables for one notification session.
#[derive(Debug, Default)]
pub struct Roster {
    contacts: HashMap<String, Contact>,
    groups: HashMap<String, Group>,
}

impl Roster {
    /// Creates empty tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops everything (a fresh `SYN` starts over).
    pub fn clear(&mut self) {
        self.contacts.clear();
        self.groups.clear();
    }

    /// Looks up a contact by login name.
    pub fn contact(&self, login: &str) -> Option<&Contact> {
        self.contacts.get(login)
    }

    /// Looks up a contact by guid.
    pub fn contact_by_guid(&self, guid: &str) -> Option<&Contact> {
        self.contacts.values().find(|c| c.guid.as_deref() == Some(guid))
    }

    /// Returns the contact for a login, inserting a blank one if needed.
    pub fn ensure_contact(&mut self, login: &str) -> &mut Contact {
        self.contacts
            .entry(login.to_string())
            .or_insert_with(|| Contact::new(login))
    }

    /// Mutable lookup by login name.
    pub fn contact_mut(&mut self, login: &str) -> Option<&mut Contact> {
        self.contacts.get_mut(login)
    }

    /// Mutable lookup by guid.
    pub fn contact_by_guid_mut(&mut self, guid: &str) -> Option<&mut Contact> {
        self.contacts
            .values_mut()
            .find(|c| c.guid.as_deref() == Some(guid))
    }

    /// Removes a contact entirely.
    pub fn remove_contact(&mut self, login: &str) -> Option<Contact> {
        self.contacts.remove(login)
    }

    /// Snapshot of all contacts.
    pub fn contacts(&self) -> Vec<Contact> {
        self.contacts.values().cloned().collect()
    }

    /// Snapshot of the roster proper (forward-list contacts).
    pub fn roster_contacts(&self) -> Vec<Contact> {
        self.contacts
            .values()
            .filter(|c| c.is_on_roster())
            .cloned()
            .collect()
    }

    /// Number of known contacts.
    pub fn contact_count(&self) -> usize {
        self.contacts.len()
    }

    /// Looks up a group by guid.
    pub fn group(&self, guid: &str) -> Option<&Group> {
        self.groups.get(guid)
    }

    /// Mutable group lookup.
    pub fn group_mut(&mut self, guid: &str) -> Option<&mut Group> {
        self.groups.get_mut(guid)
    }

    /// Inserts or replaces a group.
    pub fn insert_group(&mut self, group: Group) {
        self.groups.insert(group.guid.clone(), group);
    }

    /// Removes a group and strips it from every contact.
    pub fn remove_group(&mut self, guid: &str) -> Option<Group> {
        for contact in self.contacts.values_mut() {
            contact.groups.remove(guid);
        }
        self.groups.remove(guid)
    }

    /// Snapshot of all groups.
    pub fn groups(&self) -> Vec<Group> {
        self.groups.values().cloned().collect()
    }

    /// Number of known groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_contact_inserts_once() {
        let mut roster = Roster::new();
        roster.ensure_contact("a@b.c").nickname = "A".into();
        roster.ensure_contact("a@b.c").lists.insert(List::Forward);

        let contact = roster.contact("a@b.c").unwrap();
        assert_eq!(contact.nickname, "A");
        assert!(contact.is_on_roster());
        assert_eq!(roster.contact_count(), 1);
    }

    #[test]
    fn lookup_by_guid() {
        let mut roster = Roster::new();
        roster.ensure_contact("a@b.c").guid = Some("guid-a".into());

        assert_eq!(roster.contact_by_guid("guid-a").unwrap().login, "a@b.c");
        assert!(roster.contact_by_guid("guid-x").is_none());
    }

    #[test]
    fn remove_group_strips_membership() {
        let mut roster = Roster::new();
        roster.insert_group(Group {
            guid: "g1".into(),
            name: "Friends".into(),
        });
        roster.ensure_contact("a@b.c").groups.insert("g1".into());

        roster.remove_group("g1");
        assert!(roster.group("g1").is_none());
        assert!(roster.contact("a@b.c").unwrap().groups.is_empty());
    }

    #[test]
    fn roster_contacts_filters_on_forward_list() {
        let mut roster = Roster::new();
        roster.ensure_contact("fl@b.c").lists.insert(List::Forward);
        roster.ensure_contact("rl@b.c").lists.insert(List::Reverse);

        let on_roster = roster.roster_contacts();
        assert_eq!(on_roster.len(), 1);
        assert_eq!(on_roster[0].login, "fl@b.c");
    }

    #[test]
    fn new_contact_defaults() {
        let contact = Contact::new("a@b.c");
        assert_eq!(contact.presence, Presence::Offline);
        assert_eq!(contact.nickname, "a@b.c");
        assert!(!contact.is_on_roster());
        assert!(!contact.is_blocked());
    }
}
