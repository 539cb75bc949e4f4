use crate::types::UserId;
use crate::user::{PublicUser, UserRecord};

/// Anything that names a user for the purposes of an identity set.
///
/// The set only ever stores ids; operations accept any `IdentityKey` so
/// callers never need to hold a (possibly stale) full record to log out or
/// switch.
pub trait IdentityKey {
    /// The id stored in the identity set.
    fn identity_key(&self) -> UserId;
}

impl IdentityKey for UserId {
    fn identity_key(&self) -> UserId {
        self.clone()
    }
}

impl IdentityKey for UserRecord {
    fn identity_key(&self) -> UserId {
        self.id.clone()
    }
}

impl IdentityKey for PublicUser {
    fn identity_key(&self) -> UserId {
        self.id.clone()
    }
}
