//! RSA-2048 key pairs for the SRS and for individual users, persisted
//! as PEM (SPKi public / PKCS#8 private) per spec §6.3. All wrap/unwrap
//! uses RSA-OAEP with SHA-256 and an empty label, matching the client's
//! WebCrypto defaults (spec §4.1).

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{PaddingScheme, PublicKey, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::Error;

const KEY_BITS: usize = 2048;

fn oaep() -> PaddingScheme {
    PaddingScheme::new_oaep::<Sha256>()
}

/// User ids are caller-controlled and end up in filenames; hex-encode
/// them so no id can escape the `users/` directory or collide with the
/// fixed SRS filenames.
fn safe_file_stem(user_id: &str) -> String {
    hex::encode(user_id.as_bytes())
}

/// Persists and serves one SRS key pair and one key pair per user
/// (spec §4.1).
pub struct KeyStore {
    dir: PathBuf,
    srs: Mutex<Option<RsaPrivateKey>>,
}

impl KeyStore {
    /// Opens the key directory rooted at `path`, creating it (and its
    /// `users/` subdirectory) if absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(dir.join("users"))?;
        Ok(Self {
            dir,
            srs: Mutex::new(None),
        })
    }

    fn srs_private_path(&self) -> PathBuf {
        self.dir.join("srs_private.pem")
    }

    fn srs_public_path(&self) -> PathBuf {
        self.dir.join("srs_public.pem")
    }

    fn user_private_path(&self, user_id: &str) -> PathBuf {
        self.dir
            .join("users")
            .join(format!("{}_private.pem", safe_file_stem(user_id)))
    }

    fn user_public_path(&self, user_id: &str) -> PathBuf {
        self.dir
            .join("users")
            .join(format!("{}_public.pem", safe_file_stem(user_id)))
    }

    /// Idempotent: generates and persists the SRS pair on first call;
    /// every later call (in this process or a fresh one pointed at the
    /// same directory) returns the persisted pair. The mutex only
    /// guards the creation race — once loaded, the private half is
    /// shared read-only (spec §5).
    pub fn get_or_create_srs(&self) -> Result<(String, String), Error> {
        let mut guard = self.srs.lock();
        if let Some(private) = guard.as_ref() {
            let public_pem = RsaPublicKey::from(private)
                .to_public_key_pem(LineEnding::LF)
                .map_err(|e| Error::SetupError(e.to_string()))?;
            let private_pem = private
                .to_pkcs8_pem(LineEnding::LF)
                .map_err(|e| Error::SetupError(e.to_string()))?
                .to_string();
            return Ok((private_pem, public_pem));
        }

        if self.srs_private_path().is_file() {
            let private_pem = std::fs::read_to_string(self.srs_private_path())?;
            let private = RsaPrivateKey::from_pkcs8_pem(&private_pem)
                .map_err(|e| Error::SetupError(e.to_string()))?;
            let public_pem = std::fs::read_to_string(self.srs_public_path())?;
            *guard = Some(private);
            return Ok((private_pem, public_pem));
        }

        let private = RsaPrivateKey::new(&mut OsRng, KEY_BITS)
            .map_err(|e| Error::SetupError(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        let private_pem = private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| Error::SetupError(e.to_string()))?
            .to_string();
        let public_pem = public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| Error::SetupError(e.to_string()))?;
        std::fs::write(self.srs_private_path(), &private_pem)?;
        std::fs::write(self.srs_public_path(), &public_pem)?;
        *guard = Some(private);
        Ok((private_pem, public_pem))
    }

    /// Generates a fresh pair for `user_id`, persists both halves, and
    /// returns them. The private half is returned only to the caller of
    /// this function (a bootstrap flow); the broker never calls it.
    pub fn generate_user_keys(&self, user_id: &str) -> Result<(String, String), Error> {
        let private = RsaPrivateKey::new(&mut OsRng, KEY_BITS)
            .map_err(|e| Error::SetupError(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        let private_pem = private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| Error::SetupError(e.to_string()))?
            .to_string();
        let public_pem = public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| Error::SetupError(e.to_string()))?;
        std::fs::write(self.user_private_path(user_id), &private_pem)?;
        std::fs::write(self.user_public_path(user_id), &public_pem)?;
        Ok((private_pem, public_pem))
    }

    /// Look-up only; does not generate.
    pub fn get_user_public_key(&self, user_id: &str) -> Result<Option<String>, Error> {
        let path = self.user_public_path(user_id);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(path)?))
    }

    /// S3 UNWRAP: decrypts `wrapped` with the SRS private key. A
    /// decrypt failure is reported as an `IntegrityError`, never as a
    /// policy denial (spec §4.3).
    pub fn unwrap_with_srs(&self, wrapped: &[u8]) -> Result<Vec<u8>, Error> {
        self.get_or_create_srs()?;
        let guard = self.srs.lock();
        let private = guard
            .as_ref()
            .expect("get_or_create_srs just populated this");
        private
            .decrypt(oaep(), wrapped)
            .map_err(|e| Error::IntegrityError(format!("SRS unwrap failed: {e}")))
    }

    /// S4 REWRAP: encrypts `content_key` under `public_pem`, then
    /// zeroizes the caller's copy of `content_key` best-effort (spec §9
    /// — the buffer is released to the allocator with no further
    /// references; this is the documented guarantee, not a hardware one).
    pub fn wrap_with_public_pem(
        &self,
        public_pem: &str,
        mut content_key: Vec<u8>,
    ) -> Result<Vec<u8>, Error> {
        let public = RsaPublicKey::from_public_key_pem(public_pem)
            .map_err(|e| Error::SetupError(e.to_string()))?;
        let result = public
            .encrypt(&mut OsRng, oaep(), content_key.as_slice())
            .map_err(|e| Error::IntegrityError(format!("rewrap failed: {e}")));
        content_key.zeroize();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_srs_is_idempotent_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        let (priv1, pub1) = store.get_or_create_srs().unwrap();
        let (priv2, pub2) = store.get_or_create_srs().unwrap();
        assert_eq!(priv1, priv2);
        assert_eq!(pub1, pub2);
    }

    #[test]
    fn get_or_create_srs_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let pub1 = {
            let store = KeyStore::open(dir.path()).unwrap();
            store.get_or_create_srs().unwrap().1
        };
        let store = KeyStore::open(dir.path()).unwrap();
        let pub2 = store.get_or_create_srs().unwrap().1;
        assert_eq!(pub1, pub2);
    }

    #[test]
    fn user_keys_round_trip_wrap_unwrap() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        let (_user_priv_pem, user_pub_pem) = store.generate_user_keys("reader-1").unwrap();

        let content_key = b"0123456789abcdef0123456789abcdef".to_vec();
        let wrapped = store
            .wrap_with_public_pem(&user_pub_pem, content_key.clone())
            .unwrap();

        let user_priv = RsaPrivateKey::from_pkcs8_pem(&_user_priv_pem).unwrap();
        let recovered = user_priv.decrypt(oaep(), &wrapped).unwrap();
        assert_eq!(recovered, content_key);
    }

    #[test]
    fn unwrap_with_srs_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        let (_priv, srs_pub) = store.get_or_create_srs().unwrap();

        let srs_public = RsaPublicKey::from_public_key_pem(&srs_pub).unwrap();
        let content_key = vec![7u8; 32];
        let wrapped = srs_public
            .encrypt(&mut OsRng, oaep(), content_key.as_slice())
            .unwrap();

        let unwrapped = store.unwrap_with_srs(&wrapped).unwrap();
        assert_eq!(unwrapped, content_key);
    }

    #[test]
    fn unwrap_failure_is_integrity_error_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        store.get_or_create_srs().unwrap();
        let err = store.unwrap_with_srs(&[0u8; 32]).unwrap_err();
        assert!(matches!(err, Error::IntegrityError(_)));
    }

    #[test]
    fn missing_user_public_key_is_absent_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        assert!(store.get_user_public_key("nobody").unwrap().is_none());
    }

    #[test]
    fn user_ids_cannot_escape_the_users_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        store.generate_user_keys("../../etc/passwd").unwrap();
        assert!(store.user_private_path("../../etc/passwd").starts_with(dir.path().join("users")));
    }
}

#[cfg(test)]
mod props {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// No user id, however adversarial (path separators, `..`,
        /// null-adjacent bytes, empty string), can make either key file
        /// path resolve outside `<dir>/users/` — `safe_file_stem` hex-
        /// encodes the id before it ever touches the filesystem.
        #[test]
        fn arbitrary_user_ids_stay_inside_the_users_directory(user_id in ".{0,64}") {
            let dir = tempfile::tempdir().unwrap();
            let store = KeyStore::open(dir.path()).unwrap();
            let users_dir = dir.path().join("users");
            prop_assert!(store.user_private_path(&user_id).starts_with(&users_dir));
            prop_assert!(store.user_public_path(&user_id).starts_with(&users_dir));
        }
    }
}
