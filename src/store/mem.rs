use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::context::Context;
use crate::error::{not_found_path, Result};
use crate::paths;
use crate::store::{address_for, ContentStore};

const MEM_PREFIX: &str = "mem";

/// In-memory content store keyed by multihash. The primary store for tests
/// and ephemeral pipelines.
pub struct MemStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    pins: Mutex<HashSet<String>>,
    /// Simulated per-fetch latency, used to exercise walker deadlines
    latency: Option<Duration>,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            pins: Mutex::new(HashSet::new()),
            latency: None,
        }
    }

    /// A store that sleeps for `latency` on every fetch, imitating a
    /// networked store that is slow to resolve blocks.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::new()
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_pinned(&self, path: &str) -> bool {
        match paths::split_address(path) {
            Ok((_, hash)) => self.pins.lock().unwrap().contains(hash),
            Err(_) => false,
        }
    }

    fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentStore for MemStore {
    fn prefix(&self) -> &str {
        MEM_PREFIX
    }

    fn get(&self, ctx: &Context, path: &str) -> Result<Vec<u8>> {
        ctx.check("store get")?;
        self.simulate_latency();

        let (_, hash) = paths::split_address(path)?;

        match self.blobs.lock().unwrap().get(hash) {
            Some(data) => Ok(data.clone()),
            None => Err(not_found_path(path)),
        }
    }

    fn put(&self, ctx: &Context, data: Vec<u8>, pin: bool) -> Result<String> {
        ctx.check("store put")?;

        let address = address_for(MEM_PREFIX, &data);
        let (_, hash) = paths::split_address(&address)?;

        self.blobs.lock().unwrap().insert(hash.to_string(), data);
        if pin {
            self.pins.lock().unwrap().insert(hash.to_string());
        }

        Ok(address)
    }

    fn has(&self, ctx: &Context, path: &str) -> Result<bool> {
        ctx.check("store has")?;

        let (_, hash) = paths::split_address(path)?;
        Ok(self.blobs.lock().unwrap().contains_key(hash))
    }

    fn pin(&self, ctx: &Context, path: &str) -> Result<()> {
        ctx.check("store pin")?;

        let (_, hash) = paths::split_address(path)?;
        if !self.blobs.lock().unwrap().contains_key(hash) {
            return Err(not_found_path(path));
        }

        self.pins.lock().unwrap().insert(hash.to_string());
        Ok(())
    }

    fn unpin(&self, ctx: &Context, path: &str) -> Result<()> {
        ctx.check("store unpin")?;

        let (_, hash) = paths::split_address(path)?;
        self.pins.lock().unwrap().remove(hash);
        Ok(())
    }

    fn delete(&self, ctx: &Context, path: &str) -> Result<()> {
        ctx.check("store delete")?;

        let (_, hash) = paths::split_address(path)?;
        self.blobs.lock().unwrap().remove(hash);
        self.pins.lock().unwrap().remove(hash);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TabulaError;

    #[test]
    fn put_then_get_round_trips() {
        let store = MemStore::new();
        let ctx = Context::background();

        let address = store.put(&ctx, b"hello".to_vec(), false).unwrap();
        assert!(address.starts_with("/mem/"));
        assert_eq!(b"hello".to_vec(), store.get(&ctx, &address).unwrap());
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = MemStore::new();
        let ctx = Context::background();
        let address = address_for(MEM_PREFIX, b"never stored");

        match store.get(&ctx, &address) {
            Err(TabulaError::NotFound(_)) => (),
            other => panic!("Expected not found, got {:?}", other),
        }
    }

    #[test]
    fn pin_and_unpin() {
        let store = MemStore::new();
        let ctx = Context::background();

        let address = store.put(&ctx, b"pinned".to_vec(), true).unwrap();
        assert!(store.is_pinned(&address));

        store.unpin(&ctx, &address).unwrap();
        assert!(!store.is_pinned(&address));

        // Unpinning again is not an error
        store.unpin(&ctx, &address).unwrap();
    }

    #[test]
    fn expired_context_rejects_io() {
        let store = MemStore::new();
        let ctx = Context::with_timeout(Duration::from_millis(0));

        assert!(matches!(
            store.put(&ctx, b"data".to_vec(), false),
            Err(TabulaError::Timeout(_))
        ));
    }
}
