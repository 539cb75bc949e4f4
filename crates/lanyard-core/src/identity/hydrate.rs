//! Per-request resolution of an identity set, and the transitions over it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{IdentityError, IdentityKey, SessionIdentitySet, SessionState};
use crate::store::CredentialStore;
use crate::types::UserId;
use crate::user::UserRecord;

/// Records resolved for the members of one session, valid for one request.
pub type ResolvedUserCache = HashMap<UserId, UserRecord>;

/// What hydration does with member ids whose record no longer exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DanglingPolicy {
    /// Drop them from the set and persist the change.
    #[default]
    Prune,
    /// Keep them in the set; they are simply skipped by queries.
    Retain,
}

/// An identity set resolved against the credential store.
///
/// Built once per request by [`HydratedSession::hydrate`] and owned by the
/// request handler. All authentication operations go through it so the
/// cache and the set never disagree.
#[derive(Debug, Clone)]
pub struct HydratedSession {
    identities: SessionIdentitySet,
    cache: ResolvedUserCache,
    modified: bool,
    logged_in: bool,
}

impl HydratedSession {
    /// Resolve every member of `identities`.
    ///
    /// Never fails: a lookup error is logged and that member is treated as
    /// unresolved for this request. Members whose record is definitively
    /// missing are pruned under [`DanglingPolicy::Prune`].
    pub async fn hydrate(
        identities: SessionIdentitySet,
        store: &dyn CredentialStore,
        policy: DanglingPolicy,
    ) -> Self {
        let mut cache = ResolvedUserCache::with_capacity(identities.len());
        let mut dangling = Vec::new();

        for id in identities.members() {
            match store.find_by_id(id).await {
                Ok(Some(record)) => {
                    cache.insert(id.clone(), record);
                }
                Ok(None) => {
                    tracing::debug!(user_id = %id, "Session member has no record");
                    dangling.push(id.clone());
                }
                Err(e) => {
                    tracing::warn!(user_id = %id, error = %e, "Failed to resolve session member");
                }
            }
        }

        let mut session = Self {
            identities,
            cache,
            modified: false,
            logged_in: false,
        };

        if policy == DanglingPolicy::Prune {
            for id in &dangling {
                session.modified |= session.identities.remove_member(id);
            }
            if !dangling.is_empty() {
                tracing::info!(pruned = dangling.len(), "Pruned dangling session members");
            }
        }

        session
    }

    /// A session nobody is signed in to.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            identities: SessionIdentitySet::new(),
            cache: ResolvedUserCache::new(),
            modified: false,
            logged_in: false,
        }
    }

    /// The underlying identity set.
    #[must_use]
    pub fn identities(&self) -> &SessionIdentitySet {
        &self.identities
    }

    /// Give the identity set back for persisting.
    #[must_use]
    pub fn into_identities(self) -> SessionIdentitySet {
        self.identities
    }

    /// Whether anything changed since hydration and must be persisted.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Whether a login during this request changed the set.
    ///
    /// The session id must be replaced before such a set is persisted.
    #[must_use]
    pub fn is_escalated(&self) -> bool {
        self.logged_in
    }

    /// Coarse state of the set.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.identities.state()
    }

    /// The active user, if set and resolved.
    #[must_use]
    pub fn current(&self) -> Option<&UserRecord> {
        self.identities.active().and_then(|id| self.cache.get(id))
    }

    /// Every resolved member, in sign-in order.
    #[must_use]
    pub fn all(&self) -> Vec<&UserRecord> {
        self.identities
            .members()
            .iter()
            .filter_map(|id| self.cache.get(id))
            .collect()
    }

    /// The active user, or [`IdentityError::Unauthenticated`].
    ///
    /// # Errors
    ///
    /// Returns error if nobody is active or the active record is unresolved.
    pub fn require_current(&self) -> Result<&UserRecord, IdentityError> {
        self.current().ok_or(IdentityError::Unauthenticated)
    }

    /// Whether this session authenticated as `user`.
    #[must_use]
    pub fn is_authenticated_as(&self, user: &impl IdentityKey) -> bool {
        self.identities.contains(&user.identity_key())
    }

    /// Sign in as `user` and make it active.
    ///
    /// The caller must have authenticated `user` (password, OAuth) first.
    /// Logging in as an existing member just re-activates it.
    pub fn login(&mut self, user: UserRecord) {
        let id = user.identity_key();
        let changed = self.identities.set_active(id.clone());
        self.modified |= changed;
        self.logged_in |= changed;
        self.cache.insert(id, user);
    }

    /// Make a member the active identity.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Unauthorized`] if the session never
    /// authenticated as `user`, and [`IdentityError::NotFound`] if the member's
    /// record did not resolve this request. The set is unchanged on error.
    pub fn switch(&mut self, user: &impl IdentityKey) -> Result<&UserRecord, IdentityError> {
        let id = user.identity_key();
        if !self.identities.contains(&id) {
            tracing::warn!(user_id = %id, "Refused switch to an identity this session does not hold");
            return Err(IdentityError::Unauthorized(id));
        }
        if !self.cache.contains_key(&id) {
            return Err(IdentityError::NotFound(id));
        }

        self.modified |= self.identities.set_active(id.clone());
        self.cache.get(&id).ok_or(IdentityError::NotFound(id))
    }

    /// Sign `user` out of this session. No-op if it was not a member.
    ///
    /// Returns whether the set changed.
    pub fn logout(&mut self, user: &impl IdentityKey) -> bool {
        let id = user.identity_key();
        let changed = self.identities.remove_member(&id);
        if changed {
            self.cache.remove(&id);
            self.modified = true;
        }
        changed
    }

    /// Sign every identity out.
    pub fn logout_all(&mut self) {
        self.modified |= self.identities.clear();
        self.cache.clear();
    }

    /// Replace the cached record of a member after it was saved.
    ///
    /// Ignored for non-members so a refresh can never grant an identity.
    pub fn refresh(&mut self, user: UserRecord) {
        if self.identities.contains(&user.id) {
            self.cache.insert(user.id.clone(), user);
        }
    }
}
