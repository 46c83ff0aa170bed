//! Byte-identical `put`/`get` over a flat directory of files, one per
//! logical blob name (spec §4.6). No transformation, no re-chunking, no
//! compression, no re-encryption — the core never touches plaintext
//! content.

use std::path::{Path, PathBuf};

use crate::error::Error;

/// Opaque ciphertext storage (spec §4.6).
pub struct BlindObjectStore {
    dir: PathBuf,
}

impl BlindObjectStore {
    /// Opens the object directory rooted at `path`, creating it if
    /// absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn blob_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Writes `bytes` under `name`, byte-identical, overwriting any
    /// prior contents.
    pub fn put(&self, name: &str, bytes: &[u8]) -> Result<(), Error> {
        std::fs::write(self.blob_path(name), bytes)?;
        Ok(())
    }

    /// Reads back exactly the bytes last `put` under `name`.
    pub fn get(&self, name: &str) -> Result<Vec<u8>, Error> {
        std::fs::read(self.blob_path(name)).map_err(|_| Error::NotFound)
    }
}
