use sha2::{Digest, Sha256};

use crate::context::Context;
use crate::error::Result;
use crate::paths;

pub mod fs;
pub mod mem;

// Multihash prefix for a 32-byte sha256 digest
const MULTIHASH_SHA256: u8 = 0x12;
const SHA256_LEN: u8 = 0x20;

/// Content-addressed blob storage. Implementations key immutable blobs by
/// the hash of their bytes and may be backed by the network, so every
/// operation takes a context and is expected to honor its deadline.
pub trait ContentStore: Send + Sync {
    /// The store's path prefix, eg `mem` or `local`
    fn prefix(&self) -> &str;

    /// Fetches the blob at the given `/store/hash` address, or a
    /// `TabulaError::NotFound` if it is absent.
    fn get(&self, ctx: &Context, path: &str) -> Result<Vec<u8>>;

    /// Writes a blob and returns its content address. When `pin` is set the
    /// blob is additionally protected from garbage collection.
    fn put(&self, ctx: &Context, data: Vec<u8>, pin: bool) -> Result<String>;

    /// Returns true if the blob is locally present
    fn has(&self, ctx: &Context, path: &str) -> Result<bool>;

    /// Pins the blob at the address. Stores that do not support pinning
    /// return `TabulaError::NotPinner`.
    fn pin(&self, ctx: &Context, path: &str) -> Result<()>;

    /// Removes the pin on the blob. Unpinning an address that is not pinned
    /// is not an error.
    fn unpin(&self, ctx: &Context, path: &str) -> Result<()>;

    /// Deletes the blob if present
    fn delete(&self, ctx: &Context, path: &str) -> Result<()>;
}

/// Hashes blob bytes into their base58btc multihash rendering, eg `Qm…`
pub fn hash_bytes(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut multihash = Vec::with_capacity(2 + digest.len());
    multihash.push(MULTIHASH_SHA256);
    multihash.push(SHA256_LEN);
    multihash.extend_from_slice(&digest);
    bs58::encode(multihash).into_string()
}

/// The content address `data` would be stored under in a store with the
/// given prefix
pub fn address_for(prefix: &str, data: &[u8]) -> String {
    paths::join_address(prefix, &hash_bytes(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_are_multihash_base58() {
        let hash = hash_bytes(b"hello");
        // sha256 multihashes render with a Qm prefix
        assert!(hash.starts_with("Qm"), "unexpected hash {}", hash);
        assert_eq!(46, hash.len());
    }

    #[test]
    fn identical_bytes_share_an_address() {
        assert_eq!(address_for("mem", b"abc"), address_for("mem", b"abc"));
        assert_ne!(address_for("mem", b"abc"), address_for("mem", b"abd"));
    }
}
