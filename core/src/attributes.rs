//! Per-user explicit attribute bags, backed by an embedded `sled` tree
//! keyed `"<user_id>\0<key>"`, the same flat key-prefixing idiom as the
//! teacher's `Secrets(sled::Tree)` in `src/secrets.rs`.

use std::collections::BTreeMap;

use phr_policy::{AttributeView, REVOKED_SENTINEL_VALUE};

use crate::error::Error;

/// A read-only view over one user's explicit attributes, in insertion
/// (lexical) order. Does not include the derived `Role` — callers that
/// need the effective bag merge it in (see `KeyBroker::effective_bag`).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AttributeBag(BTreeMap<String, String>);

impl AttributeBag {
    /// Looks up a single explicit attribute.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Iterates `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Builds an effective bag by merging a derived `Role` on top of
    /// the explicit attributes. `Role` always wins over any stray
    /// explicit row with that key, since it is the reserved, derived
    /// attribute (spec §3).
    pub fn with_role(&self, role: crate::role::Role) -> EffectiveBag {
        let mut merged = self.0.clone();
        merged.insert("Role".to_string(), role.as_str().to_string());
        EffectiveBag(merged)
    }
}

/// The bag the policy evaluator actually sees: explicit attributes plus
/// the synthesized `Role`.
pub struct EffectiveBag(BTreeMap<String, String>);

impl AttributeView for EffectiveBag {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

fn tree_key(user_id: &str, key: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(user_id.len() + key.len() + 1);
    bytes.extend_from_slice(user_id.as_bytes());
    bytes.push(0);
    bytes.extend_from_slice(key.as_bytes());
    bytes
}

/// Backs the `AttributeStore` component (spec §4.8).
pub struct AttributeStore {
    tree: sled::Tree,
}

impl AttributeStore {
    /// Opens (creating if absent) the attribute tree rooted at `path`.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let db = sled::open(path)?;
        let tree = db.open_tree("attributes")?;
        Ok(Self { tree })
    }

    /// Reads every explicit attribute stored for `user_id`.
    pub fn get_bag(&self, user_id: &str) -> Result<AttributeBag, Error> {
        let prefix = {
            let mut p = user_id.as_bytes().to_vec();
            p.push(0);
            p
        };
        let mut bag = BTreeMap::new();
        for entry in self.tree.scan_prefix(&prefix) {
            let (k, v) = entry?;
            let key = String::from_utf8_lossy(&k[prefix.len()..]).into_owned();
            let value = String::from_utf8_lossy(&v).into_owned();
            bag.insert(key, value);
        }
        Ok(AttributeBag(bag))
    }

    /// Admin mutation: sets one explicit attribute. Rejects the
    /// revoked-sentinel value outright so no real bag can ever collide
    /// with `Policy::revoked_sentinel` (spec §4.2).
    pub fn set_attribute(&self, user_id: &str, key: &str, value: &str) -> Result<(), Error> {
        if value == REVOKED_SENTINEL_VALUE {
            return Err(Error::BadRequest(format!(
                "{REVOKED_SENTINEL_VALUE} is a reserved value and cannot be stored"
            )));
        }
        self.tree.insert(tree_key(user_id, key), value.as_bytes())?;
        Ok(())
    }

    /// Admin mutation: removes one explicit attribute, if present.
    pub fn remove_attribute(&self, user_id: &str, key: &str) -> Result<(), Error> {
        self.tree.remove(tree_key(user_id, key))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::Role;

    #[test]
    fn set_get_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttributeStore::open(dir.path()).unwrap();

        store.set_attribute("u1", "Dept", "Cardiology").unwrap();
        let bag = store.get_bag("u1").unwrap();
        assert_eq!(bag.get("Dept"), Some("Cardiology"));

        store.remove_attribute("u1", "Dept").unwrap();
        let bag = store.get_bag("u1").unwrap();
        assert_eq!(bag.get("Dept"), None);
    }

    #[test]
    fn rejects_reserved_sentinel_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttributeStore::open(dir.path()).unwrap();
        assert!(store
            .set_attribute("u1", "Role", "__REVOKED__")
            .is_err());
    }

    #[test]
    fn effective_bag_merges_derived_role() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttributeStore::open(dir.path()).unwrap();
        store.set_attribute("u1", "Dept", "Cardiology").unwrap();

        let bag = store.get_bag("u1").unwrap();
        let effective = bag.with_role(Role::Reader);
        assert_eq!(
            phr_policy::AttributeView::get(&effective, "Role"),
            Some("Reader")
        );
        assert_eq!(
            phr_policy::AttributeView::get(&effective, "Dept"),
            Some("Cardiology")
        );
    }

    #[test]
    fn attributes_scoped_per_user() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttributeStore::open(dir.path()).unwrap();
        store.set_attribute("u1", "Dept", "Cardiology").unwrap();
        store.set_attribute("u2", "Dept", "Oncology").unwrap();

        assert_eq!(store.get_bag("u1").unwrap().get("Dept"), Some("Cardiology"));
        assert_eq!(store.get_bag("u2").unwrap().get("Dept"), Some("Oncology"));
    }
}
