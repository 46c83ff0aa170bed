//! Append-only, hash-chained audit log (spec §4.5, §6.2). One JSON
//! object per line; each record's `hash` binds the previous record's
//! `hash` into its own digest. Appends are serialized behind a single
//! process-wide mutex (spec §5); readers scan the file lock-free and
//! tolerate up to the last durably flushed line.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Error;

/// What kind of event an audit record describes (spec §6.2).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Action {
    /// A `KeyBroker::access` attempt, granted or denied.
    #[serde(rename = "ACCESS")]
    Access,
    /// A blanket `revoke` (policy rewritten to the sentinel).
    #[serde(rename = "REVOKE")]
    Revoke,
    /// A granular `revoke` targeting one user.
    #[serde(rename = "REVOKE_USER")]
    RevokeUser,
}

/// The outcome of an event (spec §3 invariant 5, §7).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Status {
    /// S5: the content key was unwrapped and re-wrapped for the caller.
    #[serde(rename = "GRANTED_REWRAP")]
    GrantedRewrap,
    /// S1: the caller's attribute bag did not satisfy the policy.
    #[serde(rename = "DENIED_POLICY")]
    DeniedPolicy,
    /// S2: the caller is present in `revoked_users`.
    #[serde(rename = "DENIED_REVOKED")]
    DeniedRevoked,
    /// Reserved for a role-level denial ahead of the policy check.
    #[serde(rename = "DENIED_ROLE")]
    DeniedRole,
    /// Reserved for a missing/invalid session at the audit boundary.
    #[serde(rename = "DENIED_AUTH")]
    DeniedAuth,
    /// S0: the object name did not resolve to a record.
    #[serde(rename = "INVALID_REQUEST")]
    InvalidRequest,
    /// A `revoke` attempted by someone other than the owner.
    #[serde(rename = "DENIED_OWNER")]
    DeniedOwner,
    /// A `revoke` completed successfully.
    #[serde(rename = "SUCCESS")]
    Success,
}

/// One hash-chained audit record (spec §3, §6.2).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unix seconds at append time.
    pub timestamp: i64,
    /// The user id the event is attributed to.
    pub user: String,
    /// The object the event concerns.
    pub file: String,
    /// What kind of event this is.
    pub action: Action,
    /// The event's outcome.
    pub status: Status,
    /// The `hash` of the preceding record, or `""` for the first.
    pub prev_hash: String,
    /// SHA-256 of this record's canonical JSON with `hash` omitted.
    pub hash: String,
}

#[derive(Serialize)]
struct UnsignedFields<'a> {
    action: Action,
    file: &'a str,
    prev_hash: &'a str,
    status: Status,
    timestamp: i64,
    user: &'a str,
}

fn compute_hash(fields: &UnsignedFields<'_>) -> Result<String, Error> {
    // serde_json's `Map` is a `BTreeMap` (no `preserve_order` feature),
    // so this serialization is already key-sorted — the canonical form
    // spec §3/§4.5 require for the digest.
    let value = serde_json::to_value(fields)?;
    let canonical = serde_json::to_vec(&value)?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(hex::encode(hasher.finalize()))
}

struct Writer {
    file: File,
    last_hash: String,
}

/// The result of re-verifying the whole chain (spec §4.5, scenario S5).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AuditVerification {
    /// Indices (in append order) whose stored hash does not match the
    /// recomputed chain. Once one index breaks, every later index is
    /// also reported here — the contamination is downstream, not local.
    pub broken_indices: Vec<usize>,
    /// Line numbers that failed to parse as JSON at all; reported
    /// rather than treated as fatal (spec §9 open question 5).
    pub corrupt_lines: Vec<usize>,
}

impl AuditVerification {
    /// True iff every record's hash matches the recomputed chain and no
    /// line failed to parse.
    pub fn is_intact(&self) -> bool {
        self.broken_indices.is_empty() && self.corrupt_lines.is_empty()
    }
}

/// Append-only hash-chained log over a single NDJSON file (spec §4.5).
pub struct AuditLog {
    path: PathBuf,
    writer: Mutex<Writer>,
}

impl AuditLog {
    /// Opens (creating if absent) the log file at `path`, resuming the
    /// hash chain from its last line.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;

        let last_hash = last_line(&path)?
            .map(|line| serde_json::from_str::<AuditRecord>(&line))
            .transpose()
            .unwrap_or(None)
            .map(|r| r.hash)
            .unwrap_or_default();

        let file = OpenOptions::new().append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(Writer { file, last_hash }),
        })
    }

    /// Appends one record, computing `prev_hash`/`hash`, flushing and
    /// `sync_data`-ing before returning (atomic append-with-flush, spec
    /// §9 open question 5). Append failure is fatal to the caller's
    /// request (spec §5, §7 `AuditWriteFailed`) — the broker must not
    /// return a re-wrapped key without a durable record of having done so.
    pub fn append(
        &self,
        user: &str,
        file: &str,
        action: Action,
        status: Status,
    ) -> Result<AuditRecord, Error> {
        let mut writer = self.writer.lock();
        let timestamp = now_unix_seconds();
        let prev_hash = writer.last_hash.clone();
        let fields = UnsignedFields {
            action,
            file,
            prev_hash: &prev_hash,
            status,
            timestamp,
            user,
        };
        let hash = compute_hash(&fields)?;
        let record = AuditRecord {
            timestamp,
            user: user.to_string(),
            file: file.to_string(),
            action,
            status,
            prev_hash,
            hash: hash.clone(),
        };

        let line = serde_json::to_string(&record)?;
        writer
            .file
            .write_all(line.as_bytes())
            .and_then(|_| writer.file.write_all(b"\n"))
            .and_then(|_| writer.file.flush())
            .and_then(|_| writer.file.sync_data())
            .map_err(|e| Error::AuditWriteFailed(e.to_string()))?;

        writer.last_hash = hash;
        Ok(record)
    }

    /// Reads every record in append order, skipping lines that fail to
    /// parse (reported separately by `verify`, not here).
    pub fn scan(&self) -> Result<Vec<AuditRecord>, Error> {
        Ok(self.scan_with_corruption()?.0)
    }

    fn scan_with_corruption(&self) -> Result<(Vec<AuditRecord>, Vec<usize>), Error> {
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut corrupt = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditRecord>(&line) {
                Ok(record) => records.push(record),
                Err(_) => corrupt.push(index),
            }
        }
        Ok((records, corrupt))
    }

    /// Recomputes the chain in storage order and reports where it
    /// breaks (spec §4.5, scenario S5).
    pub fn verify(&self) -> Result<AuditVerification, Error> {
        let (records, corrupt_lines) = self.scan_with_corruption()?;
        let mut broken_indices = Vec::new();
        let mut expected_prev = String::new();

        for (i, record) in records.iter().enumerate() {
            let fields = UnsignedFields {
                action: record.action,
                file: &record.file,
                prev_hash: &expected_prev,
                status: record.status,
                timestamp: record.timestamp,
                user: &record.user,
            };
            let recomputed = compute_hash(&fields)?;
            if record.prev_hash != expected_prev || record.hash != recomputed {
                broken_indices.push(i);
            }
            expected_prev = recomputed;
        }

        Ok(AuditVerification {
            broken_indices,
            corrupt_lines,
        })
    }
}

fn last_line(path: &Path) -> Result<Option<String>, Error> {
    let mut file = File::open(path)?;
    let len = file.seek(SeekFrom::End(0))?;
    if len == 0 {
        return Ok(None);
    }
    let reader = BufReader::new(File::open(path)?);
    Ok(reader
        .lines()
        .filter_map(|l| l.ok())
        .filter(|l| !l.trim().is_empty())
        .last())
}

fn now_unix_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_chains_prev_hash_correctly() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("audit.log")).unwrap();
        let r1 = log.append("u1", "x", Action::Access, Status::GrantedRewrap).unwrap();
        assert_eq!(r1.prev_hash, "");
        let r2 = log.append("u1", "x", Action::Access, Status::DeniedRevoked).unwrap();
        assert_eq!(r2.prev_hash, r1.hash);
    }

    #[test]
    fn verify_reports_intact_chain() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("audit.log")).unwrap();
        log.append("u1", "x", Action::Access, Status::GrantedRewrap).unwrap();
        log.append("u1", "x", Action::Access, Status::DeniedPolicy).unwrap();
        assert!(log.verify().unwrap().is_intact());
    }

    #[test]
    fn chain_resumes_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let last = {
            let log = AuditLog::open(&path).unwrap();
            log.append("u1", "x", Action::Access, Status::GrantedRewrap).unwrap()
        };
        let log = AuditLog::open(&path).unwrap();
        let next = log.append("u1", "x", Action::Revoke, Status::Success).unwrap();
        assert_eq!(next.prev_hash, last.hash);
    }

    #[test]
    fn tamper_is_detected_and_contaminates_downstream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let log = AuditLog::open(&path).unwrap();
        log.append("u1", "x", Action::Access, Status::DeniedPolicy).unwrap();
        log.append("u1", "x", Action::Access, Status::DeniedPolicy).unwrap();
        log.append("u1", "x", Action::Access, Status::DeniedPolicy).unwrap();

        // Flip the middle record's status in place without recomputing
        // its hash, simulating scenario S5's in-place edit.
        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();
        lines[1] = lines[1].replace("DENIED_POLICY", "GRANTED_REWRAP");
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();

        let log = AuditLog::open(&path).unwrap();
        let verification = log.verify().unwrap();
        assert_eq!(verification.broken_indices, vec![1, 2]);
        assert!(!verification.is_intact());
    }

    #[test]
    fn corrupt_line_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let log = AuditLog::open(&path).unwrap();
        log.append("u1", "x", Action::Access, Status::GrantedRewrap).unwrap();
        let mut contents = std::fs::read_to_string(&path).unwrap();
        contents.push_str("not json at all\n");
        std::fs::write(&path, contents).unwrap();

        let log = AuditLog::open(&path).unwrap();
        let records = log.scan().unwrap();
        assert_eq!(records.len(), 1);
        let verification = log.verify().unwrap();
        assert_eq!(verification.corrupt_lines, vec![1]);
    }
}
