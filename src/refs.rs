use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;
use crate::error::{not_found, Result};
use crate::reference::DatasetRef;

/// A denormalized description of a dataset version: everything listings need
/// without touching the store.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    #[serde(rename = "initID", default, skip_serializing_if = "String::is_empty")]
    pub init_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(rename = "profileID", default, skip_serializing_if = "String::is_empty")]
    pub profile_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Content address of the version this info describes
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub published: bool,
    /// True when the version belongs to another author or is not present in
    /// the local store
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub foreign: bool,
    /// Optional link to a working-directory checkout
    #[serde(rename = "fsiPath", default, skip_serializing_if = "String::is_empty")]
    pub fsi_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub meta_title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body_format: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub body_size: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub body_rows: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commit_title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commit_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_time: Option<DateTime<Utc>>,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl VersionInfo {
    /// Denormalizes a loaded snapshot into listing fields
    pub fn from_dataset(ds: &Dataset) -> Self {
        let mut info = Self {
            username: ds.peername.clone(),
            profile_id: ds.profile_id.clone(),
            name: ds.name.clone(),
            path: ds.path.clone(),
            ..Self::default()
        };

        if let Some(meta) = &ds.meta {
            info.meta_title = meta.title.clone().unwrap_or_default();
        }
        if let Some(structure) = &ds.structure {
            info.body_format = structure.format.to_string();
            info.body_size = structure.length;
            info.body_rows = structure.entries;
        }
        if let Some(commit) = &ds.commit {
            info.commit_title = commit.title.clone();
            info.commit_message = commit.message.clone();
            info.commit_time = Some(commit.timestamp);
        }

        info
    }

    /// The `(username, name)` reference this info answers to
    pub fn simple_ref(&self) -> DatasetRef {
        let mut reference = DatasetRef::new(&self.username, &self.name);
        reference.profile_id = self.profile_id.clone();
        reference.init_id = self.init_id.clone();
        reference.path = self.path.clone();
        reference
    }

    pub fn alias(&self) -> String {
        format!("{}/{}", self.username, self.name)
    }
}

/// The local map from `(username, name)` to the current head of a dataset.
/// A projection derivable from the logbook plus store; operations are atomic
/// per entry.
pub struct RefIndex {
    /// Persistence location; in-memory only when absent
    path: Option<PathBuf>,
    inner: Mutex<BTreeMap<String, VersionInfo>>,
}

impl RefIndex {
    /// Opens an index persisted at `path`, loading existing entries
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = if path.exists() {
            let bytes = fs::read(&path)?;
            serde_json::from_slice(&bytes)?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: Some(path),
            inner: Mutex::new(entries),
        })
    }

    /// An index that lives only in memory
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    fn key(username: &str, name: &str) -> String {
        format!("{}/{}", username, name)
    }

    /// Inserts or replaces the entry for the info's `(username, name)` pair
    pub fn put(&self, info: VersionInfo) -> Result<()> {
        let key = Self::key(&info.username, &info.name);
        let mut entries = self.inner.lock().unwrap();
        entries.insert(key, info);
        self.flush(&entries)
    }

    pub fn get(&self, username: &str, name: &str) -> Result<VersionInfo> {
        let entries = self.inner.lock().unwrap();
        entries
            .get(&Self::key(username, name))
            .cloned()
            .ok_or_else(|| not_found(&Self::key(username, name)))
    }

    pub fn delete(&self, username: &str, name: &str) -> Result<()> {
        let key = Self::key(username, name);
        let mut entries = self.inner.lock().unwrap();

        if entries.remove(&key).is_none() {
            return Err(not_found(&key));
        }

        info!("Deleted reference {}", key);
        self.flush(&entries)
    }

    /// Lists entries in key order. `limit = 0` means no limit.
    pub fn list(&self, offset: usize, limit: usize) -> Vec<VersionInfo> {
        let entries = self.inner.lock().unwrap();
        let iter = entries.values().skip(offset);

        if limit == 0 {
            iter.cloned().collect()
        } else {
            iter.take(limit).cloned().collect()
        }
    }

    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Moves an entry to a new name, writing the new entry before deleting
    /// the old one so a crash mid-rename leaves the dataset addressable.
    pub fn rename(&self, username: &str, old_name: &str, new_name: &str) -> Result<()> {
        let mut entries = self.inner.lock().unwrap();

        let mut info = entries
            .get(&Self::key(username, old_name))
            .cloned()
            .ok_or_else(|| not_found(&Self::key(username, old_name)))?;
        info.name = new_name.to_string();

        entries.insert(Self::key(username, new_name), info);
        self.flush(&entries)?;

        entries.remove(&Self::key(username, old_name));
        self.flush(&entries)
    }

    /// Looks up any entry for the username, used to complete profile IDs
    pub fn profile_id_for_username(&self, username: &str) -> Option<String> {
        let entries = self.inner.lock().unwrap();
        entries
            .values()
            .find(|info| info.username == username && !info.profile_id.is_empty())
            .map(|info| info.profile_id.clone())
    }

    /// Serializes the map with a write-then-rename so a crash cannot corrupt
    /// the index file
    fn flush(&self, entries: &BTreeMap<String, VersionInfo>) -> Result<()> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };

        let bytes = serde_json::to_vec_pretty(entries)?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, bytes)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}
