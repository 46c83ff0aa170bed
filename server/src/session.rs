//! Cookie-based `SessionGate` (spec §2, §4.10): the HTTP-facing half of
//! the authenticated-caller boundary the core consumes but does not
//! implement. The cookie is an HMAC-tagged opaque token — symmetric
//! rather than the teacher's `ed25519_dalek` capability tokens
//! (`crdt/src/crypto.rs`), since a session doesn't need public-key
//! semantics, only tamper-evidence against a server-held secret.

use hmac::{Hmac, Mac};
use phr_core::Role;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The authenticated caller for one request.
#[derive(Clone, Debug)]
pub struct Session {
    /// The caller's id.
    pub user_id: String,
    /// The caller's role, as cached in the cookie at issue time.
    pub role: Role,
}

fn role_tag(role: Role) -> &'static str {
    match role {
        Role::Owner => "owner",
        Role::Reader => "reader",
        Role::Admin => "admin",
    }
}

fn role_from_tag(tag: &str) -> Option<Role> {
    match tag {
        "owner" => Some(Role::Owner),
        "reader" => Some(Role::Reader),
        "admin" => Some(Role::Admin),
        _ => None,
    }
}

/// Issues and verifies signed session cookies.
pub struct CookieSessionGate {
    secret: Vec<u8>,
}

impl CookieSessionGate {
    /// Builds a gate keyed by `secret`. Losing or rotating the secret
    /// invalidates every outstanding cookie.
    pub fn new(secret: Vec<u8>) -> Self {
        Self { secret }
    }

    fn mac_of(&self, payload: &str) -> Result<Vec<u8>, hmac::digest::InvalidLength> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)?;
        mac.update(payload.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Issues a cookie value binding `user_id` and `role`.
    pub fn issue(&self, user_id: &str, role: Role) -> String {
        let payload = format!("{user_id}.{}", role_tag(role));
        let tag = self.mac_of(&payload).expect("HMAC accepts any key length");
        format!("{payload}.{}", hex::encode(tag))
    }

    /// Verifies a cookie value and, if valid, returns the session it
    /// encodes. Any parse or verification failure yields `None`, which
    /// the HTTP layer maps to 401 — missing session (spec §6.4).
    pub fn verify(&self, cookie: &str) -> Option<Session> {
        let (payload, tag_hex) = cookie.rsplit_once('.')?;
        let (user_id, role_tag_str) = payload.rsplit_once('.')?;
        let expected = self.mac_of(payload).ok()?;
        let given = hex::decode(tag_hex).ok()?;
        if given.len() != expected.len() || !constant_time_eq(&given, &expected) {
            return None;
        }
        Some(Session {
            user_id: user_id.to_string(),
            role: role_from_tag(role_tag_str)?,
        })
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
