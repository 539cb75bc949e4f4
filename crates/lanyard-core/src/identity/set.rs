//! The set of identities a browser session is signed in as.

use serde::{Deserialize, Deserializer, Serialize};

use crate::types::UserId;

/// Coarse shape of an identity set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Nobody is signed in.
    Anonymous,
    /// Exactly one member, and it is active.
    SingleIdentity,
    /// Two or more members, one of them active.
    MultiIdentity,
}

/// Identities authenticated within one browser session.
///
/// Invariants held by every method:
/// - an active id is always a member;
/// - members are unique;
/// - removing the active member promotes the first remaining member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionIdentitySet {
    active: Option<UserId>,
    members: Vec<UserId>,
}

impl SessionIdentitySet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The active identity, if anyone is signed in.
    #[must_use]
    pub fn active(&self) -> Option<&UserId> {
        self.active.as_ref()
    }

    /// Members in the order they signed in.
    #[must_use]
    pub fn members(&self) -> &[UserId] {
        &self.members
    }

    /// Whether `id` signed in during this session.
    #[must_use]
    pub fn contains(&self, id: &UserId) -> bool {
        self.members.contains(id)
    }

    /// Whether nobody is signed in.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Current coarse state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        match self.members.len() {
            0 => SessionState::Anonymous,
            1 => SessionState::SingleIdentity,
            _ => SessionState::MultiIdentity,
        }
    }

    /// Append `id` if it is not already a member. Never changes the active id.
    ///
    /// Returns whether the set changed.
    pub fn add_member(&mut self, id: UserId) -> bool {
        if self.contains(&id) {
            return false;
        }
        self.members.push(id);
        true
    }

    /// Make `id` the active identity, adding it as a member first if needed.
    ///
    /// Returns whether the set changed.
    pub fn set_active(&mut self, id: UserId) -> bool {
        let added = self.add_member(id.clone());
        if self.active.as_ref() == Some(&id) {
            return added;
        }
        self.active = Some(id);
        true
    }

    /// Remove `id`, promoting the first remaining member if it was active.
    ///
    /// Returns whether the set changed.
    pub fn remove_member(&mut self, id: &UserId) -> bool {
        let Some(pos) = self.members.iter().position(|m| m == id) else {
            return false;
        };
        self.members.remove(pos);

        if self.active.as_ref() == Some(id) {
            self.active = self.members.first().cloned();
        }
        true
    }

    /// Forget every identity.
    ///
    /// Returns whether the set changed.
    pub fn clear(&mut self) -> bool {
        let changed = !self.members.is_empty() || self.active.is_some();
        self.active = None;
        self.members.clear();
        changed
    }

    /// Rebuild a set from raw parts, repairing anything that breaks the invariants.
    ///
    /// Duplicates keep their first position. An active id that is not a
    /// member is replaced by the first member, as if it had been logged out.
    #[must_use]
    pub fn from_parts(active: Option<UserId>, members: Vec<UserId>) -> Self {
        let mut set = Self::new();
        for id in members {
            set.add_member(id);
        }
        set.active = match active {
            Some(id) if set.contains(&id) => Some(id),
            Some(_) => set.members.first().cloned(),
            None => None,
        };
        set
    }
}

// Payloads come from storage that may predate the invariants or have been
// tampered with; route them through `from_parts`.
impl<'de> Deserialize<'de> for SessionIdentitySet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            active: Option<UserId>,
            #[serde(default)]
            members: Vec<UserId>,
        }

        let raw = Raw::deserialize(deserializer)?;
        Ok(Self::from_parts(raw.active, raw.members))
    }
}
