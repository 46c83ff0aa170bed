//! Persistence and protocol core for the PHR secure repository: the
//! `KeyStore`, `AttributeStore`, `MetadataStore`, `BlindObjectStore` and
//! `AuditLog` components, the `KeyBroker` state machine that ties them
//! together on access, and `OwnerOps` for upload/revoke. The workspace's
//! largest member, holding the storage and protocol logic everything
//! else calls into.
#![deny(missing_docs)]

mod attributes;
mod audit;
mod broker;
mod error;
mod keys;
mod metadata;
mod objects;
mod owner_ops;
mod role;

pub use attributes::{AttributeBag, AttributeStore};
pub use audit::{Action, AuditLog, AuditRecord, AuditVerification, Status};
pub use broker::{AccessGrant, AccessOutcome, AccessRequest, KeyBroker};
pub use error::Error;
pub use keys::KeyStore;
pub use metadata::{MetadataStore, ObjectRecord, StorageMode};
pub use objects::BlindObjectStore;
pub use owner_ops::{OwnerOps, RevokeRequest, UploadRequest};
pub use role::{Role, UserDirectory};
