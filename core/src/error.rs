//! Error taxonomy matching the table the rest of the system maps onto
//! HTTP status codes and audit statuses. Grounded on the teacher's use
//! of `thiserror` for its own `Error` enums (e.g. `acl`'s schema errors)
//! rather than `anyhow` inside library code — `anyhow` stays at the
//! binary boundary.

use crate::audit::Status;

/// Everything a `phr-core` operation can fail with.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing SRS or user public key; unreadable key file. Surfaced as
    /// 500 with no audit record — a setup bug, not a policy decision.
    #[error("setup error: {0}")]
    SetupError(String),

    /// RSA-OAEP unwrap failure, truncated metadata, or bad hex. Surfaced
    /// as 500 with no audit record: a crypto failure is distinguished
    /// from a policy denial.
    #[error("integrity error: {0}")]
    IntegrityError(String),

    /// The caller's attribute bag did not satisfy the object's policy.
    #[error("policy denied")]
    PolicyDenied,

    /// The caller is present in the object's `revoked_users`.
    #[error("revoked")]
    Revoked,

    /// A `revoke` call from someone other than the object's owner.
    #[error("not owner")]
    NotOwner,

    /// The object name does not resolve to a stored record.
    #[error("not found")]
    NotFound,

    /// Missing field, bad hex, or an unparseable policy string.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The audit record for this request could not be durably appended.
    /// Fail-closed: the response is an error even if the crypto
    /// succeeded.
    #[error("audit write failed: {0}")]
    AuditWriteFailed(String),
}

impl Error {
    /// The audit `status` this error corresponds to, for the handful of
    /// error variants that the broker itself turns into an audit record
    /// rather than a bare `Err` (see `KeyBroker::access`).
    pub fn audit_status(&self) -> Option<Status> {
        match self {
            Error::PolicyDenied => Some(Status::DeniedPolicy),
            Error::Revoked => Some(Status::DeniedRevoked),
            Error::NotOwner => Some(Status::DeniedOwner),
            Error::NotFound => Some(Status::InvalidRequest),
            _ => None,
        }
    }

    /// The HTTP status `phr-server` maps this error to (spec §6.4, §7).
    pub fn http_status(&self) -> u16 {
        match self {
            Error::SetupError(_) | Error::IntegrityError(_) | Error::AuditWriteFailed(_) => 500,
            Error::PolicyDenied | Error::Revoked | Error::NotOwner => 403,
            Error::NotFound => 404,
            Error::BadRequest(_) => 400,
        }
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        Error::SetupError(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::SetupError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::IntegrityError(err.to_string())
    }
}

impl From<rsa::errors::Error> for Error {
    fn from(err: rsa::errors::Error) -> Self {
        Error::IntegrityError(err.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(err: hex::FromHexError) -> Self {
        Error::BadRequest(format!("invalid hex: {err}"))
    }
}
