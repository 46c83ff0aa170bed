//! Owner-initiated mutations: creating an object record on upload, and
//! revoking access either granularly (one target) or blanket (rewrite
//! the policy to the sentinel) — spec §4.4.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::info;

use crate::audit::{Action, AuditLog, Status};
use crate::error::Error;
use crate::metadata::{MetadataStore, ObjectRecord, StorageMode};
use crate::objects::BlindObjectStore;

/// Parameters for `OwnerOps::upload` (spec §4.4, §6.1). `owner_id` is
/// expected to equal the session's caller id — that equality is
/// enforced at the `SessionGate` boundary, out of this crate's scope;
/// this struct is already post-that-check.
#[derive(Clone, Debug)]
pub struct UploadRequest {
    /// The uploading user's id, already checked equal to the session
    /// caller id at the `SessionGate` boundary.
    pub owner_id: String,
    /// The logical name the object will be stored and looked up under.
    pub object_name: String,
    /// Attribute predicate string (validated under spec §4.2's grammar).
    pub policy: String,
    /// Hex of `RSA-OAEP(SRS_pub, content_key)`.
    pub wrapped_key_hex: String,
    /// Hex of the AEAD nonce.
    pub nonce_hex: String,
    /// Opaque ciphertext, stored byte-identical.
    pub blob: Vec<u8>,
}

/// Parameters for `OwnerOps::revoke` (spec §4.4). Presence of
/// `target_id` selects granular revocation; its absence selects
/// blanket revocation.
#[derive(Clone, Debug)]
pub struct RevokeRequest {
    /// Must equal the record's `owner_id`, or the call is denied.
    pub caller_id: String,
    /// The object to revoke access to.
    pub object_name: String,
    /// `Some(user_id)` for granular revocation; `None` for blanket.
    pub target_id: Option<String>,
}

fn is_even_length_hex(s: &str) -> bool {
    s.len() % 2 == 0 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Owner-only object lifecycle operations (spec §4.4).
pub struct OwnerOps {
    metadata: Arc<MetadataStore>,
    objects: Arc<BlindObjectStore>,
    audit: Arc<AuditLog>,
}

impl OwnerOps {
    /// Wires owner operations to the stores they mutate.
    pub fn new(
        metadata: Arc<MetadataStore>,
        objects: Arc<BlindObjectStore>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            metadata,
            objects,
            audit,
        }
    }

    /// Validates parameters, persists the blob byte-identical, and
    /// writes a new `mode = client_side_encryption` object record.
    /// Does not verify the wrap cryptographically — the broker's S3 is
    /// the integrity oracle (spec §4.4).
    pub fn upload(&self, request: UploadRequest) -> Result<(), Error> {
        phr_policy::parse(&request.policy)
            .map_err(|e| Error::BadRequest(format!("invalid policy: {e}")))?;
        if !is_even_length_hex(&request.wrapped_key_hex) {
            return Err(Error::BadRequest("wrapped_key_hex is not even-length hex".into()));
        }
        if !is_even_length_hex(&request.nonce_hex) {
            return Err(Error::BadRequest("nonce_hex is not even-length hex".into()));
        }

        let file = format!("{}.enc", request.object_name);
        self.objects.put(&file, &request.blob)?;
        self.metadata.create(
            &request.object_name,
            &ObjectRecord {
                owner: request.owner_id.clone(),
                file,
                policy: request.policy,
                key_blob: request.wrapped_key_hex,
                iv: request.nonce_hex,
                mode: StorageMode::BrokerMediated,
                revoked_users: BTreeSet::new(),
            },
        )?;
        info!(owner = %request.owner_id, object = %request.object_name, "uploaded");
        Ok(())
    }

    /// Granular revocation adds `target_id` to `revoked_users`
    /// (idempotent); blanket revocation rewrites `policy` to the
    /// reserved sentinel `Role:__REVOKED__`. Either form requires
    /// `caller_id` to equal the record's `owner_id`.
    pub fn revoke(&self, request: RevokeRequest) -> Result<(), Error> {
        let record = self
            .metadata
            .get(&request.object_name)?
            .ok_or(Error::NotFound)?;
        if record.owner != request.caller_id {
            self.audit.append(
                &request.caller_id,
                &request.object_name,
                Action::Revoke,
                Status::DeniedOwner,
            )?;
            return Err(Error::NotOwner);
        }

        let action = if request.target_id.is_some() {
            Action::RevokeUser
        } else {
            Action::Revoke
        };

        match &request.target_id {
            Some(target_id) => {
                let target_id = target_id.clone();
                self.metadata.mutate(&request.object_name, move |r| {
                    r.revoked_users.insert(target_id);
                })?;
            }
            None => {
                self.metadata.mutate(&request.object_name, |r| {
                    r.policy = phr_policy::Policy::revoked_sentinel().to_string();
                })?;
            }
        }

        self.audit
            .append(&request.caller_id, &request.object_name, action, Status::Success)?;
        Ok(())
    }
}
