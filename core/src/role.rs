//! The three user roles and the boundary trait the core consumes to
//! look one up. The identity store itself (passwords, email
//! uniqueness, user creation) is out of scope; `UserDirectory` is the
//! single slice of it the `KeyBroker` needs to synthesize the derived
//! `Role` attribute (spec §3).

/// A user's role, title-cased to match the casing a policy clause must
/// use (open question 4: casing is canonicalized once, here, rather
/// than left to whoever writes a `Role:...` clause).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Role {
    /// The uploader of an object; able to revoke and rewrite its policy.
    Owner,
    /// A requester who may be granted access under an object's policy.
    Reader,
    /// Mutates attribute bags; not otherwise distinguished by the core.
    Admin,
}

impl Role {
    /// The title-cased string a policy clause's value must equal.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "Owner",
            Role::Reader => "Reader",
            Role::Admin => "Admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The boundary the `KeyBroker` consumes to derive the reserved `Role`
/// attribute (spec §3, §4.9). `phr-server` supplies a concrete
/// implementation backed by the identity store; `phr-core` only
/// depends on this trait, never on a concrete user table.
pub trait UserDirectory {
    /// The role of `user_id`, or `None` if the user is unknown.
    fn role_of(&self, user_id: &str) -> Option<Role>;
}
