//! The SRS state machine (spec §4.3): S0 LOOKUP → S1 POLICY →
//! S2 REVOCATION → S3 UNWRAP → S4 REWRAP → S5 EMIT. Denials are
//! expressed as an explicit outcome, not a thrown error (spec §9's
//! "exception-for-control-flow" redesign note) — only setup/integrity
//! failures propagate as `Err`.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::attributes::AttributeStore;
use crate::audit::{Action, AuditLog, Status};
use crate::error::Error;
use crate::keys::KeyStore;
use crate::metadata::MetadataStore;
use crate::role::UserDirectory;

/// `(caller_id, object_name)` — the request shape of spec §4.3.
/// `caller_role` is not carried here: it is looked up through
/// `UserDirectory` at S1, the same boundary `phr-server`'s `SessionGate`
/// feeds from.
#[derive(Clone, Debug)]
pub struct AccessRequest {
    /// The authenticated caller's id.
    pub caller_id: String,
    /// The object being requested.
    pub object_name: String,
}

/// What S5 hands back on a grant: a content key re-wrapped fresh for
/// the caller, never persisted (spec §4.3).
#[derive(Clone, Debug)]
pub struct AccessGrant {
    /// Hex of `RSA-OAEP(caller_pub, content_key)`.
    pub wrapped_key_hex: String,
    /// Hex of the unchanged AEAD nonce.
    pub nonce_hex: String,
    /// The logical blob name to fetch from `BlindObjectStore`.
    pub blob_ref: String,
}

/// The result of an access request: either a fresh re-wrap, or a denial
/// carrying the audit status it was recorded under (spec §3 invariant 5).
#[derive(Clone, Debug)]
pub enum AccessOutcome {
    /// S5 completed: the grant below has been audited `GRANTED_REWRAP`.
    Granted(AccessGrant),
    /// Denied at S0/S1/S2; already audited under the carried status.
    Denied(Status),
}

/// The SRS proxy re-encryption core (spec §4.3).
pub struct KeyBroker {
    keys: Arc<KeyStore>,
    metadata: Arc<MetadataStore>,
    attributes: Arc<AttributeStore>,
    audit: Arc<AuditLog>,
}

impl KeyBroker {
    /// Wires the broker to the stores it orchestrates.
    pub fn new(
        keys: Arc<KeyStore>,
        metadata: Arc<MetadataStore>,
        attributes: Arc<AttributeStore>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            keys,
            metadata,
            attributes,
            audit,
        }
    }

    fn deny(
        &self,
        caller_id: &str,
        object_name: &str,
        status: Status,
    ) -> Result<AccessOutcome, Error> {
        warn!(caller_id, object_name, ?status, "access denied");
        self.audit
            .append(caller_id, object_name, Action::Access, status)?;
        Ok(AccessOutcome::Denied(status))
    }

    /// Runs the full S0–S5 pipeline for one access request.
    pub fn access(
        &self,
        directory: &dyn UserDirectory,
        request: AccessRequest,
    ) -> Result<AccessOutcome, Error> {
        let AccessRequest {
            caller_id,
            object_name,
        } = request;

        // S0 LOOKUP
        debug!(caller_id, object_name, "S0 lookup");
        let record = match self.metadata.get(&object_name)? {
            Some(record) => record,
            None => return self.deny(&caller_id, &object_name, Status::InvalidRequest),
        };

        // S1 POLICY
        debug!(caller_id, object_name, "S1 policy");
        let role = directory.role_of(&caller_id).ok_or_else(|| {
            Error::SetupError(format!("no role on file for caller {caller_id:?}"))
        })?;
        let explicit = self.attributes.get_bag(&caller_id)?;
        let effective = explicit.with_role(role);
        if !phr_policy::is_satisfied(&record.policy, &effective) {
            return self.deny(&caller_id, &object_name, Status::DeniedPolicy);
        }

        // S2 REVOCATION
        debug!(caller_id, object_name, "S2 revocation");
        if record.revoked_users.contains(&caller_id) {
            return self.deny(&caller_id, &object_name, Status::DeniedRevoked);
        }

        // S3 UNWRAP
        debug!(caller_id, object_name, "S3 unwrap");
        let wrapped_key = hex::decode(&record.key_blob)
            .map_err(|e| Error::IntegrityError(format!("corrupt key_blob: {e}")))?;
        let content_key = self.keys.unwrap_with_srs(&wrapped_key)?;

        // S4 REWRAP
        debug!(caller_id, object_name, "S4 rewrap");
        let caller_public_pem = self
            .keys
            .get_user_public_key(&caller_id)?
            .ok_or_else(|| Error::SetupError(format!("no public key on file for {caller_id:?}")))?;
        let rewrapped = self
            .keys
            .wrap_with_public_pem(&caller_public_pem, content_key)?;

        // S5 EMIT
        debug!(caller_id, object_name, "S5 emit");
        self.audit
            .append(&caller_id, &object_name, Action::Access, Status::GrantedRewrap)?;

        Ok(AccessOutcome::Granted(AccessGrant {
            wrapped_key_hex: hex::encode(rewrapped),
            nonce_hex: record.iv,
            blob_ref: record.file,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ObjectRecord, StorageMode};
    use crate::role::Role;
    use std::collections::BTreeSet;

    struct FixedDirectory(Role);
    impl UserDirectory for FixedDirectory {
        fn role_of(&self, _user_id: &str) -> Option<Role> {
            Some(self.0)
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        broker: KeyBroker,
        keys: Arc<KeyStore>,
        metadata: Arc<MetadataStore>,
        audit: Arc<AuditLog>,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let keys = Arc::new(KeyStore::open(dir.path().join("keys")).unwrap());
        let metadata = Arc::new(MetadataStore::open(dir.path().join("meta")).unwrap());
        let attributes = Arc::new(AttributeStore::open(dir.path().join("attrs")).unwrap());
        let audit = Arc::new(AuditLog::open(dir.path().join("audit.log")).unwrap());
        let broker = KeyBroker::new(keys.clone(), metadata.clone(), attributes, audit.clone());
        Harness {
            _dir: dir,
            broker,
            keys,
            metadata,
            audit,
        }
    }

    fn upload_with_policy(h: &Harness, policy: &str, content_key: &[u8]) {
        use rsa::pkcs8::DecodePublicKey;
        use rsa::PublicKey as _;

        let (_srs_priv, srs_pub) = h.keys.get_or_create_srs().unwrap();
        let srs_pub_key = rsa::RsaPublicKey::from_public_key_pem(&srs_pub).unwrap();
        let wrapped = srs_pub_key
            .encrypt(
                &mut rand::rngs::OsRng,
                rsa::PaddingScheme::new_oaep::<sha2::Sha256>(),
                content_key,
            )
            .unwrap();
        h.metadata
            .create(
                "x",
                &ObjectRecord {
                    owner: "owner-1".into(),
                    file: "x.enc".into(),
                    policy: policy.into(),
                    key_blob: hex::encode(wrapped),
                    iv: hex::encode([9u8; 12]),
                    mode: StorageMode::BrokerMediated,
                    revoked_users: BTreeSet::new(),
                },
            )
            .unwrap();
    }

    #[test]
    fn scenario_s1_happy_path_round_trips_content_key() {
        let h = harness();
        let content_key = vec![42u8; 32];
        upload_with_policy(&h, "Role:Reader", &content_key);
        let (reader_priv_pem, _reader_pub_pem) = h.keys.generate_user_keys("reader-1").unwrap();

        let outcome = h
            .broker
            .access(
                &FixedDirectory(Role::Reader),
                AccessRequest {
                    caller_id: "reader-1".into(),
                    object_name: "x".into(),
                },
            )
            .unwrap();

        let grant = match outcome {
            AccessOutcome::Granted(grant) => grant,
            other => panic!("expected grant, got {other:?}"),
        };
        use rsa::pkcs8::DecodePrivateKey;
        let reader_priv = rsa::RsaPrivateKey::from_pkcs8_pem(&reader_priv_pem).unwrap();
        let recovered = reader_priv
            .decrypt(
                rsa::PaddingScheme::new_oaep::<sha2::Sha256>(),
                &hex::decode(grant.wrapped_key_hex).unwrap(),
            )
            .unwrap();
        assert_eq!(recovered, content_key);

        let records = h.audit.scan().unwrap();
        assert_eq!(records.last().unwrap().status, Status::GrantedRewrap);
    }

    #[test]
    fn scenario_s2_policy_denial_never_touches_srs_key() {
        let h = harness();
        upload_with_policy(&h, "Role:Reader", &[0u8; 32]);
        h.keys.generate_user_keys("other-1").unwrap();

        let outcome = h
            .broker
            .access(
                &FixedDirectory(Role::Admin),
                AccessRequest {
                    caller_id: "other-1".into(),
                    object_name: "x".into(),
                },
            )
            .unwrap();
        assert!(matches!(outcome, AccessOutcome::Denied(Status::DeniedPolicy)));
        let records = h.audit.scan().unwrap();
        assert_eq!(records.last().unwrap().status, Status::DeniedPolicy);
    }

    #[test]
    fn scenario_s3_granular_revocation_denies_only_target() {
        let h = harness();
        upload_with_policy(&h, "Role:Reader", &[1u8; 32]);
        h.keys.generate_user_keys("reader-1").unwrap();
        h.keys.generate_user_keys("reader-2").unwrap();

        h.metadata
            .mutate("x", |r| {
                r.revoked_users.insert("reader-1".to_string());
            })
            .unwrap();

        let denied = h
            .broker
            .access(
                &FixedDirectory(Role::Reader),
                AccessRequest {
                    caller_id: "reader-1".into(),
                    object_name: "x".into(),
                },
            )
            .unwrap();
        assert!(matches!(denied, AccessOutcome::Denied(Status::DeniedRevoked)));

        let granted = h
            .broker
            .access(
                &FixedDirectory(Role::Reader),
                AccessRequest {
                    caller_id: "reader-2".into(),
                    object_name: "x".into(),
                },
            )
            .unwrap();
        assert!(matches!(granted, AccessOutcome::Granted(_)));
    }

    #[test]
    fn lookup_of_unknown_object_is_invalid_request() {
        let h = harness();
        let outcome = h
            .broker
            .access(
                &FixedDirectory(Role::Reader),
                AccessRequest {
                    caller_id: "reader-1".into(),
                    object_name: "nope".into(),
                },
            )
            .unwrap();
        assert!(matches!(outcome, AccessOutcome::Denied(Status::InvalidRequest)));
    }

    #[test]
    fn unwrap_failure_surfaces_as_error_not_denial() {
        let h = harness();
        h.keys.get_or_create_srs().unwrap();
        h.keys.generate_user_keys("reader-1").unwrap();
        h.metadata
            .create(
                "x",
                &ObjectRecord {
                    owner: "owner-1".into(),
                    file: "x.enc".into(),
                    policy: "Role:Reader".into(),
                    key_blob: hex::encode([0u8; 32]),
                    iv: hex::encode([0u8; 12]),
                    mode: StorageMode::BrokerMediated,
                    revoked_users: BTreeSet::new(),
                },
            )
            .unwrap();

        let err = h
            .broker
            .access(
                &FixedDirectory(Role::Reader),
                AccessRequest {
                    caller_id: "reader-1".into(),
                    object_name: "x".into(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::IntegrityError(_)));
    }
}
