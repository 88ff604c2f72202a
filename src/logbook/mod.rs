use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::consts::LOGBOOK_MODEL;
use crate::context::Context;
use crate::dataset::Dataset;
use crate::error::{not_found, Result, TabulaError};
use crate::identity::Profile;
use crate::reference::DatasetRef;
use crate::refs::VersionInfo;

pub mod op;
pub mod oplog;

pub use self::op::{Op, OpCategory, OpType};
pub use self::oplog::{derive_init_id, Oplog};

/// The persisted logbook wire file: a schema tag, the owner, a signature
/// over the owner's serialized logs, and the `InitID → log` map. Foreign
/// logs carry their own author signatures.
#[derive(Deserialize, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct LogbookFile {
    qri: String,
    author_id: String,
    username: String,
    signature: String,
    logs: BTreeMap<String, Oplog>,
}

/// A collection of per-author, append-only operation logs: the source of
/// truth for dataset identity and ordering. Writes are serialized by a
/// per-book lock; reads project from a snapshot taken at call entry.
pub struct Logbook {
    owner: Arc<Profile>,
    clock: Arc<dyn Clock>,
    path: Option<PathBuf>,
    logs: Mutex<BTreeMap<String, Oplog>>,
}

impl Logbook {
    /// Opens a logbook for `owner`, loading the wire file at `path` when one
    /// exists. The owner profile must hold a signing key.
    pub fn open(
        owner: Arc<Profile>,
        clock: Arc<dyn Clock>,
        path: Option<impl AsRef<Path>>,
    ) -> Result<Self> {
        if !owner.can_sign() {
            return Err(TabulaError::IllegalArgument(
                "Logbooks require a signing profile".to_string(),
            ));
        }

        let path = path.map(|p| p.as_ref().to_path_buf());

        let logs = match &path {
            Some(path) if path.exists() => {
                let bytes = fs::read(path)?;
                let file: LogbookFile = serde_cbor::from_slice(&bytes)?;

                if file.qri != LOGBOOK_MODEL {
                    return Err(TabulaError::IllegalState(format!(
                        "Unknown logbook wire version: {}",
                        file.qri
                    )));
                }

                let mut logs = file.logs;
                // Ownership is re-derived at load; the flag is not persisted
                for log in logs.values_mut() {
                    log.foreign = log.author_id != owner.id;
                    log.verify()?;
                }
                logs
            }
            _ => BTreeMap::new(),
        };

        Ok(Self {
            owner,
            clock,
            path,
            logs: Mutex::new(logs),
        })
    }

    pub fn owner(&self) -> &Profile {
        &self.owner
    }

    /// The owner's current username: the most recent UserRename wins
    pub fn username(&self) -> String {
        let logs = self.logs.lock().unwrap();
        self.owned_username(&logs)
    }

    fn owned_username(&self, logs: &BTreeMap<String, Oplog>) -> String {
        logs.values()
            .filter(|log| !log.foreign)
            .flat_map(|log| log.ops.iter())
            .filter(|op| op.op_type == OpType::UserRename)
            .max_by_key(|op| (op.timestamp, op.clock))
            .map(|op| op.name.clone())
            .unwrap_or_else(|| self.owner.username.clone())
    }

    /// Appends a NameInit op for a new dataset and returns its InitID
    pub fn write_dataset_init(&self, ctx: &Context, name: &str) -> Result<String> {
        ctx.check("logbook init")?;

        if !crate::reference::is_valid_name(name) {
            return Err(TabulaError::IllegalArgument(format!(
                "Invalid dataset name: {}",
                name
            )));
        }

        let mut logs = self.logs.lock().unwrap();

        let taken = logs
            .values()
            .any(|log| !log.foreign && !log.is_deleted() && log.name() == name);
        if taken {
            return Err(TabulaError::NameTaken(name.to_string()));
        }

        let mut init = Op::new(OpType::NameInit, 1, &self.owner.id, self.clock.now());
        init.name = name.to_string();

        let log = Oplog::create(&self.owner, init)?;
        let init_id = log.init_id.clone();
        info!("Initialized dataset {} as {}", name, init_id);

        logs.insert(init_id.clone(), log);
        self.persist(&logs)?;

        Ok(init_id)
    }

    /// Appends a VersionSave op carrying the written snapshot's address,
    /// commit title and message, and body size.
    pub fn write_version_save(&self, ctx: &Context, init_id: &str, ds: &Dataset) -> Result<()> {
        ctx.check("logbook save")?;

        let mut logs = self.logs.lock().unwrap();
        let log = owned_log_mut(&mut logs, init_id)?;

        let mut op = Op::new(
            OpType::VersionSave,
            log.next_clock(),
            &self.owner.id,
            self.clock.now(),
        );
        op.name = log.name().to_string();
        op.reference = ds.path.clone();
        op.prev_reference = ds.previous_path.clone();
        if let Some(commit) = &ds.commit {
            op.note = commit.title.clone();
            op.message = commit.message.clone();
        }
        if let Some(structure) = &ds.structure {
            op.size = structure.length;
        }

        log.append(&self.owner, op)?;
        self.persist(&logs)
    }

    /// Appends a NameChange op. Identity (the InitID) is untouched.
    pub fn write_dataset_rename(&self, ctx: &Context, init_id: &str, new_name: &str) -> Result<()> {
        ctx.check("logbook rename")?;

        let mut logs = self.logs.lock().unwrap();
        let log = owned_log_mut(&mut logs, init_id)?;

        let mut op = Op::new(
            OpType::NameChange,
            log.next_clock(),
            &self.owner.id,
            self.clock.now(),
        );
        op.name = new_name.to_string();

        log.append(&self.owner, op)?;
        self.persist(&logs)
    }

    /// Appends a NameDelete tombstone. Prior ops are shadowed in
    /// projections, never rewritten.
    pub fn write_dataset_delete(&self, ctx: &Context, init_id: &str) -> Result<()> {
        ctx.check("logbook delete")?;

        let mut logs = self.logs.lock().unwrap();
        let log = owned_log_mut(&mut logs, init_id)?;

        let mut op = Op::new(
            OpType::NameDelete,
            log.next_clock(),
            &self.owner.id,
            self.clock.now(),
        );
        op.name = log.name().to_string();

        log.append(&self.owner, op)?;
        self.persist(&logs)
    }

    /// Appends a VersionDelete tombstone shadowing the `n` most recent saves
    pub fn write_version_delete(&self, ctx: &Context, init_id: &str, n: u64) -> Result<()> {
        ctx.check("logbook version delete")?;

        let mut logs = self.logs.lock().unwrap();
        let log = owned_log_mut(&mut logs, init_id)?;

        let mut op = Op::new(
            OpType::VersionDelete,
            log.next_clock(),
            &self.owner.id,
            self.clock.now(),
        );
        op.name = log.name().to_string();
        op.size = n;

        log.append(&self.owner, op)?;
        self.persist(&logs)
    }

    /// Appends a VersionPublish or VersionUnpublish op for the dataset head
    pub fn write_version_publish(&self, ctx: &Context, init_id: &str, publish: bool) -> Result<()> {
        ctx.check("logbook publish")?;

        let mut logs = self.logs.lock().unwrap();
        let log = owned_log_mut(&mut logs, init_id)?;

        let op_type = if publish {
            OpType::VersionPublish
        } else {
            OpType::VersionUnpublish
        };
        let mut op = Op::new(op_type, log.next_clock(), &self.owner.id, self.clock.now());
        op.name = log.name().to_string();

        log.append(&self.owner, op)?;
        self.persist(&logs)
    }

    /// Appends a UserRename op to every owned log, changing the username all
    /// owned datasets resolve under.
    pub fn write_author_rename(&self, ctx: &Context, new_username: &str) -> Result<()> {
        ctx.check("logbook author rename")?;

        if !crate::reference::is_valid_name(new_username) {
            return Err(TabulaError::IllegalArgument(format!(
                "Invalid username: {}",
                new_username
            )));
        }

        let mut logs = self.logs.lock().unwrap();

        for log in logs.values_mut().filter(|log| !log.foreign) {
            let mut op = Op::new(
                OpType::UserRename,
                log.next_clock(),
                &self.owner.id,
                self.clock.now(),
            );
            op.name = new_username.to_string();
            log.append(&self.owner, op)?;
        }

        self.persist(&logs)
    }

    /// Fills the InitID and current head path for a `(username, name)` pair.
    /// Resolution prefers the most recent surviving save; a dataset with no
    /// saves resolves with an empty path.
    pub fn resolve_ref(&self, ctx: &Context, reference: &mut DatasetRef) -> Result<()> {
        ctx.check("logbook resolve")?;

        let logs = self.logs.lock().unwrap();

        let log = if !reference.init_id.is_empty() {
            logs.get(&reference.init_id)
        } else {
            logs.values().find(|log| {
                !log.is_deleted()
                    && log.name() == reference.name
                    && self.log_username(&logs, log) == reference.username
            })
        };

        match log {
            Some(log) => {
                reference.init_id = log.init_id.clone();
                reference.profile_id = log.author_id.clone();
                // an explicitly pinned version path is never rewritten
                if reference.path.is_empty() {
                    if let Some(head) = log.head_reference() {
                        reference.path = head.to_string();
                    }
                }
                Ok(())
            }
            None => Err(not_found(&reference.alias())),
        }
    }

    /// Projects a dataset's surviving versions newest-first as denormalized
    /// descriptors. Returns `NoHistory` for a freshly initialized dataset
    /// with no saves. `limit = 0` means no limit.
    pub fn items(
        &self,
        ctx: &Context,
        reference: &DatasetRef,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<VersionInfo>> {
        ctx.check("logbook items")?;

        let logs = self.logs.lock().unwrap();

        let log = match logs.get(&reference.init_id) {
            Some(log) => log,
            None => return Err(not_found(&reference.alias())),
        };

        let saves = log.version_saves();
        if saves.is_empty() {
            return Err(TabulaError::NoHistory(reference.alias()));
        }

        let published = log.published();
        let username = self.log_username(&logs, log);

        let mut items: Vec<VersionInfo> = saves
            .iter()
            .rev()
            .skip(offset)
            .map(|op| VersionInfo {
                init_id: log.init_id.clone(),
                username: username.clone(),
                profile_id: log.author_id.clone(),
                name: log.name().to_string(),
                path: op.reference.clone(),
                published,
                foreign: log.foreign,
                commit_title: op.note.clone(),
                commit_message: op.message.clone(),
                commit_time: Some(op.timestamp),
                body_size: op.size,
                ..VersionInfo::default()
            })
            .collect();

        if limit > 0 {
            items.truncate(limit);
        }

        Ok(items)
    }

    /// Integrates a log signed by another author. The signature must verify
    /// against the log's own author; merging a log claiming to be the local
    /// owner is an author mismatch. Foreign logs are read-only and may only
    /// grow: a merge that extends a known foreign log replaces it, one that
    /// diverges from it is rejected.
    pub fn merge_log(&self, ctx: &Context, mut incoming: Oplog) -> Result<()> {
        ctx.check("logbook merge")?;

        incoming.verify()?;

        if incoming.author_id == self.owner.id {
            return Err(TabulaError::SignatureInvalid(format!(
                "Refusing to merge a foreign log claiming local author {}",
                self.owner.id
            )));
        }
        incoming.foreign = true;

        let mut logs = self.logs.lock().unwrap();

        if let Some(existing) = logs.get(&incoming.init_id) {
            if !existing.foreign {
                return Err(TabulaError::SignatureInvalid(format!(
                    "Log {} is owned locally and cannot be replaced by a merge",
                    incoming.init_id
                )));
            }
            let prefix_matches = incoming.ops.len() >= existing.ops.len()
                && existing.ops == incoming.ops[..existing.ops.len()];
            if !prefix_matches {
                return Err(TabulaError::SignatureInvalid(format!(
                    "Merged log {} diverges from its known history",
                    incoming.init_id
                )));
            }
        }

        info!(
            "Merged foreign log {} from {}",
            incoming.init_id, incoming.author_id
        );
        logs.insert(incoming.init_id.clone(), incoming);
        self.persist(&logs)
    }

    /// Removes a log wholesale. Used for foreign logs, where tombstoning on
    /// behalf of the author is not possible.
    pub fn remove_log(&self, ctx: &Context, init_id: &str) -> Result<()> {
        ctx.check("logbook remove")?;

        let mut logs = self.logs.lock().unwrap();
        if logs.remove(init_id).is_none() {
            return Err(TabulaError::NotFound(format!("Log {}", init_id)));
        }
        self.persist(&logs)
    }

    /// A snapshot of one log, eg for exporting to another peer
    pub fn get_log(&self, init_id: &str) -> Result<Oplog> {
        let logs = self.logs.lock().unwrap();
        logs.get(init_id)
            .cloned()
            .ok_or_else(|| TabulaError::NotFound(format!("Log {}", init_id)))
    }

    /// Lists every live dataset log, owned logs first
    pub fn dataset_logs(&self) -> Vec<Oplog> {
        let logs = self.logs.lock().unwrap();
        let mut all: Vec<Oplog> = logs
            .values()
            .filter(|log| !log.is_deleted())
            .cloned()
            .collect();
        all.sort_by_key(|log| log.foreign);
        all
    }

    /// The username a log's datasets resolve under. Foreign logs keep the
    /// username recorded at their creation; cross-author renames arrive as
    /// merged UserRename ops.
    fn log_username(&self, logs: &BTreeMap<String, Oplog>, log: &Oplog) -> String {
        if log.foreign {
            log.ops
                .iter()
                .rev()
                .find(|op| op.op_type == OpType::UserRename)
                .map(|op| op.name.clone())
                .unwrap_or_else(|| log.username.clone())
        } else {
            self.owned_username(logs)
        }
    }

    /// Serializes the whole book with a write-then-rename. Called with the
    /// book lock held, so writers stay single-file.
    fn persist(&self, logs: &BTreeMap<String, Oplog>) -> Result<()> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };

        let signable = serde_cbor::to_vec(
            &logs
                .values()
                .filter(|log| !log.foreign)
                .collect::<Vec<&Oplog>>(),
        )?;
        let signature = match self.owner.sign(&signable) {
            Ok(signature) => hex::encode(signature),
            Err(e) => {
                warn!("Persisting logbook without a book signature: {}", e);
                String::new()
            }
        };

        let file = LogbookFile {
            qri: LOGBOOK_MODEL.to_string(),
            author_id: self.owner.id.clone(),
            username: self.owner.username.clone(),
            signature,
            logs: logs.clone(),
        };

        let bytes = serde_cbor::to_vec(&file)?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, bytes)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

/// Fetches a mutable owned log or explains why it cannot be written
fn owned_log_mut<'a>(
    logs: &'a mut BTreeMap<String, Oplog>,
    init_id: &str,
) -> Result<&'a mut Oplog> {
    match logs.get_mut(init_id) {
        Some(log) if log.foreign => Err(TabulaError::SignatureInvalid(format!(
            "Log {} belongs to another author and is merge-only",
            init_id
        ))),
        Some(log) => Ok(log),
        None => Err(TabulaError::NotFound(format!("Log {}", init_id))),
    }
}
