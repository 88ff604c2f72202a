use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use walkdir::WalkDir;

use crate::context::Context;
use crate::error::{not_found_path, Result, TabulaError};
use crate::paths;
use crate::store::{address_for, ContentStore};

const LOCAL_PREFIX: &str = "local";
const BLOBS_DIR: &str = "blobs";
const PINS_DIR: &str = "pins";

/// Filesystem-backed content store. Blobs live under `<root>/blobs/<hash>`
/// and pins are empty marker files under `<root>/pins/<hash>`.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Opens a store rooted at `root`, creating the directory layout if it
    /// does not exist yet.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(BLOBS_DIR))?;
        fs::create_dir_all(root.join(PINS_DIR))?;

        Ok(Self { root })
    }

    /// Iterates the hashes of every stored blob
    pub fn hashes(&self) -> Result<Vec<String>> {
        let mut hashes = Vec::new();

        for entry in WalkDir::new(self.root.join(BLOBS_DIR)).min_depth(1).max_depth(1) {
            let entry = entry?;
            if entry.file_type().is_file() {
                hashes.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        Ok(hashes)
    }

    fn blob_path(&self, hash: &str) -> PathBuf {
        self.root.join(BLOBS_DIR).join(hash)
    }

    fn pin_path(&self, hash: &str) -> PathBuf {
        self.root.join(PINS_DIR).join(hash)
    }

    fn hash_of(&self, path: &str) -> Result<String> {
        let (_, hash) = paths::split_address(path)?;
        if hash.contains('.') || hash.contains('/') {
            return Err(TabulaError::IllegalArgument(format!(
                "Invalid content hash: {}",
                hash
            )));
        }
        Ok(hash.to_string())
    }
}

impl ContentStore for FsStore {
    fn prefix(&self) -> &str {
        LOCAL_PREFIX
    }

    fn get(&self, ctx: &Context, path: &str) -> Result<Vec<u8>> {
        ctx.check("store get")?;

        let blob_path = self.blob_path(&self.hash_of(path)?);
        match fs::read(&blob_path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found_path(path)),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, ctx: &Context, data: Vec<u8>, pin: bool) -> Result<String> {
        ctx.check("store put")?;

        let address = address_for(LOCAL_PREFIX, &data);
        let hash = self.hash_of(&address)?;
        let blob_path = self.blob_path(&hash);

        if !blob_path.exists() {
            // Write-then-rename so a crash cannot leave a partial blob at a
            // valid address
            let tmp_path = blob_path.with_extension("tmp");
            fs::write(&tmp_path, &data)?;
            fs::rename(&tmp_path, &blob_path)?;
            info!("Wrote blob {}", address);
        }

        if pin {
            fs::write(self.pin_path(&hash), [])?;
        }

        Ok(address)
    }

    fn has(&self, ctx: &Context, path: &str) -> Result<bool> {
        ctx.check("store has")?;
        Ok(self.blob_path(&self.hash_of(path)?).exists())
    }

    fn pin(&self, ctx: &Context, path: &str) -> Result<()> {
        ctx.check("store pin")?;

        let hash = self.hash_of(path)?;
        if !self.blob_path(&hash).exists() {
            return Err(not_found_path(path));
        }

        fs::write(self.pin_path(&hash), [])?;
        Ok(())
    }

    fn unpin(&self, ctx: &Context, path: &str) -> Result<()> {
        ctx.check("store unpin")?;

        let pin_path = self.pin_path(&self.hash_of(path)?);
        if let Err(e) = fs::remove_file(&pin_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn delete(&self, ctx: &Context, path: &str) -> Result<()> {
        ctx.check("store delete")?;

        let hash = self.hash_of(path)?;
        self.unpin(ctx, path)?;

        if let Err(e) = fs::remove_file(self.blob_path(&hash)) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn put_get_delete_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = FsStore::new(temp.path()).unwrap();
        let ctx = Context::background();

        let address = store.put(&ctx, b"on disk".to_vec(), true).unwrap();
        assert!(address.starts_with("/local/"));
        assert_eq!(b"on disk".to_vec(), store.get(&ctx, &address).unwrap());
        assert!(store.has(&ctx, &address).unwrap());

        store.delete(&ctx, &address).unwrap();
        assert!(!store.has(&ctx, &address).unwrap());
    }

    #[test]
    fn reopen_sees_existing_blobs() {
        let temp = TempDir::new().unwrap();
        let ctx = Context::background();

        let address = {
            let store = FsStore::new(temp.path()).unwrap();
            store.put(&ctx, b"durable".to_vec(), false).unwrap()
        };

        let store = FsStore::new(temp.path()).unwrap();
        assert_eq!(b"durable".to_vec(), store.get(&ctx, &address).unwrap());
        assert_eq!(1, store.hashes().unwrap().len());
    }
}
