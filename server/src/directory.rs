//! A minimal `UserDirectory` backed by a `sled` tree mapping user id to
//! role. The identity store proper — password hashes, email uniqueness,
//! user creation — is out of scope (spec §1); this is only the sliver
//! the core needs to derive the reserved `Role` attribute (spec §4.9).

use phr_core::{Role, UserDirectory};

fn role_to_byte(role: Role) -> u8 {
    match role {
        Role::Owner => 0,
        Role::Reader => 1,
        Role::Admin => 2,
    }
}

fn byte_to_role(byte: u8) -> Option<Role> {
    match byte {
        0 => Some(Role::Owner),
        1 => Some(Role::Reader),
        2 => Some(Role::Admin),
        _ => None,
    }
}

/// Backs `UserDirectory` with a flat `user_id -> role` tree.
pub struct SledUserDirectory {
    tree: sled::Tree,
}

impl SledUserDirectory {
    /// Opens (creating if absent) the users tree rooted at `path`.
    pub fn open(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let db = sled::open(path)?;
        let tree = db.open_tree("users")?;
        Ok(Self { tree })
    }

    /// Registers or updates `user_id`'s role. Stands in for the
    /// identity store's user-creation flow, which is out of scope here.
    pub fn set_role(&self, user_id: &str, role: Role) -> anyhow::Result<()> {
        self.tree.insert(user_id, &[role_to_byte(role)][..])?;
        Ok(())
    }
}

impl UserDirectory for SledUserDirectory {
    fn role_of(&self, user_id: &str) -> Option<Role> {
        let bytes = self.tree.get(user_id).ok()??;
        byte_to_role(*bytes.first()?)
    }
}
