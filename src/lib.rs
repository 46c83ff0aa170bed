//! Facade crate that wires the PHR building blocks (key store, attribute
//! store, metadata store, blind object store, audit log, policy evaluator
//! and key broker) behind a single `PhrSystem`, the way `Sdk` in the
//! original local-first facade wired a CRDT `Backend` and a network swarm.
#![deny(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use phr_core::{
    AccessOutcome, AttributeStore, AuditLog, BlindObjectStore, Error, KeyBroker, KeyStore,
    MetadataStore, OwnerOps, UserDirectory,
};

pub use phr_core::{
    AccessGrant, AccessRequest, AttributeBag, AuditRecord, AuditVerification, ObjectRecord, Role,
    RevokeRequest, Status, UploadRequest,
};

/// Single explicit configuration record threaded into every component,
/// in place of the global singletons the teacher's original design note
/// flags as something to avoid re-architecting around.
#[derive(Clone, Debug)]
pub struct Config {
    /// Root directory under which `keys/`, `meta/`, `objects/`,
    /// `attributes/` and `audit.log` are kept.
    pub data_dir: PathBuf,
}

impl Config {
    /// Builds a config rooted at `data_dir`, creating it if necessary.
    pub fn new(data_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    fn sub(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }
}

/// Ties together the in-scope components into the three entry points an
/// HTTP layer (or a test) calls: `access`, `upload`, `revoke`.
pub struct PhrSystem {
    broker: KeyBroker,
    owner_ops: OwnerOps,
    keys: Arc<KeyStore>,
    attributes: Arc<AttributeStore>,
    audit: Arc<AuditLog>,
}

impl PhrSystem {
    /// Opens (creating if absent) every on-disk store under `config.data_dir`.
    pub fn open(config: &Config) -> Result<Self, Error> {
        let keys = Arc::new(KeyStore::open(config.sub("keys"))?);
        let metadata = Arc::new(MetadataStore::open(config.sub("meta"))?);
        let objects = Arc::new(BlindObjectStore::open(config.sub("objects"))?);
        let attributes = Arc::new(AttributeStore::open(config.sub("attributes"))?);
        let audit = Arc::new(AuditLog::open(config.sub("audit.log"))?);

        let broker = KeyBroker::new(
            keys.clone(),
            metadata.clone(),
            attributes.clone(),
            audit.clone(),
        );
        let owner_ops = OwnerOps::new(metadata, objects, audit.clone());

        Ok(Self {
            broker,
            owner_ops,
            keys,
            attributes,
            audit,
        })
    }

    /// The SRS proxy re-encryption operation (spec §4.3, S0-S5).
    pub fn access(
        &self,
        directory: &dyn UserDirectory,
        request: AccessRequest,
    ) -> Result<AccessOutcome, Error> {
        self.broker.access(directory, request)
    }

    /// Owner upload of a new object record + blob (spec §4.4).
    pub fn upload(&self, request: UploadRequest) -> Result<(), Error> {
        self.owner_ops.upload(request)
    }

    /// Owner revocation, granular or blanket (spec §4.4).
    pub fn revoke(&self, request: RevokeRequest) -> Result<(), Error> {
        self.owner_ops.revoke(request)
    }

    /// Fetches (creating on first call) the SRS public key, PEM-encoded.
    pub fn srs_public_key(&self) -> Result<String, Error> {
        Ok(self.keys.get_or_create_srs()?.1)
    }

    /// Ensures `user_id` has a key pair, generating one if absent, and
    /// returns both halves PEM-encoded. Used during a user's bootstrap.
    pub fn ensure_user_keys(&self, user_id: &str) -> Result<(String, String), Error> {
        self.keys.generate_user_keys(user_id)
    }

    /// Admin mutation of a user's explicit attribute bag.
    pub fn set_attribute(&self, user_id: &str, key: &str, value: &str) -> Result<(), Error> {
        self.attributes.set_attribute(user_id, key, value)
    }

    /// Admin mutation removing an explicit attribute.
    pub fn remove_attribute(&self, user_id: &str, key: &str) -> Result<(), Error> {
        self.attributes.remove_attribute(user_id, key)
    }

    /// Reads a user's explicit attribute bag (without the derived `Role`).
    pub fn attribute_bag(&self, user_id: &str) -> Result<AttributeBag, Error> {
        self.attributes.get_bag(user_id)
    }

    /// Scans the whole audit log, re-verifying the hash chain.
    pub fn verify_audit(&self) -> Result<AuditVerification, Error> {
        self.audit.verify()
    }

    /// Reads all audit records in append order.
    pub fn audit_records(&self) -> Result<Vec<AuditRecord>, Error> {
        self.audit.scan()
    }
}

/// Initializes `tracing` the way the teacher's `Migrate::new` does:
/// env-filtered, span events on enter/exit, panics routed through the
/// tracing subscriber so a panicking request handler still leaves a trace.
pub fn init_tracing() {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::EnvFilter;

    tracing_log::LogTracer::init().ok();
    let env = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| "info".to_owned());
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_span_events(FmtSpan::ACTIVE | FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::new(env))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
    log_panics::init();
}
