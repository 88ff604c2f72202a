use std::path::Path;
use std::sync::Arc;

use log::info;
use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::consts::{LOGBOOK_FILE, REFS_FILE};
use crate::context::Context;
use crate::dataset::Dataset;
use crate::dsfs::{self, SaveSwitches};
use crate::error::{Result, TabulaError};
use crate::history;
use crate::identity::Profile;
use crate::logbook::{Logbook, Oplog};
use crate::reference::{self, DatasetRef};
use crate::refs::{RefIndex, VersionInfo};
use crate::remove;
use crate::save::{self, SaveTarget};
use crate::store::mem::MemStore;
use crate::store::ContentStore;

/// Interface for interacting with a dataset repository: a content-addressed
/// store for snapshots, a logbook for identity and ordering, and a
/// reference index for fast listings, all owned by one local profile.
pub struct Repo {
    store: Box<dyn ContentStore>,
    logbook: Logbook,
    refs: RefIndex,
    owner: Arc<Profile>,
    clock: Arc<dyn Clock>,
}

impl Repo {
    /// Opens a repository persisting its logbook and reference index under
    /// `base_dir`. The store is supplied by the caller.
    pub fn open(
        store: Box<dyn ContentStore>,
        owner: Arc<Profile>,
        clock: Arc<dyn Clock>,
        base_dir: impl AsRef<Path>,
    ) -> Result<Self> {
        let base_dir = base_dir.as_ref();
        std::fs::create_dir_all(base_dir)?;

        let logbook = Logbook::open(owner.clone(), clock.clone(), Some(base_dir.join(LOGBOOK_FILE)))?;
        let refs = RefIndex::open(base_dir.join(REFS_FILE))?;

        Ok(Self {
            store,
            logbook,
            refs,
            owner,
            clock,
        })
    }

    /// An entirely in-memory repository backed by a `MemStore`. Nothing
    /// survives the value being dropped.
    pub fn mem(owner: Arc<Profile>, clock: Arc<dyn Clock>) -> Result<Self> {
        let logbook = Logbook::open(owner.clone(), clock.clone(), None::<&Path>)?;

        Ok(Self {
            store: Box::new(MemStore::new()),
            logbook,
            refs: RefIndex::ephemeral(),
            owner,
            clock,
        })
    }

    /// Same as `mem` with the wall clock
    pub fn mem_with_system_clock(owner: Arc<Profile>) -> Result<Self> {
        Self::mem(owner, Arc::new(SystemClock))
    }

    pub fn owner(&self) -> &Profile {
        &self.owner
    }

    pub fn store(&self) -> &dyn ContentStore {
        self.store.as_ref()
    }

    pub fn logbook(&self) -> &Logbook {
        &self.logbook
    }

    pub fn refs(&self) -> &RefIndex {
        &self.refs
    }

    /// Parses and completes a reference string, filling the InitID and the
    /// current head path from the logbook. Falls back to the reference
    /// index for datasets the logbook does not know.
    pub fn resolve_ref(&self, ctx: &Context, ref_str: &str) -> Result<DatasetRef> {
        let mut reference = reference::parse_ref(ref_str)?;
        reference::canonicalize_ref(
            &mut reference,
            &self.owner.username,
            &self.owner.id,
            |username| self.refs.profile_id_for_username(username),
        )?;

        match self.logbook.resolve_ref(ctx, &mut reference) {
            Ok(()) => Ok(reference),
            Err(e) if e.is_not_found() => {
                let info = self
                    .refs
                    .get(&reference.username, &reference.name)
                    .map_err(|_| e)?;
                reference.init_id = info.init_id;
                if reference.path.is_empty() {
                    reference.path = info.path;
                }
                Ok(reference)
            }
            Err(e) => Err(e),
        }
    }

    /// Saves a new version of a dataset. `ref_str` may be empty, in which
    /// case the name is derived from the attached body's filename;
    /// `want_new_name` auto-suffixes on collision.
    pub fn save(
        &self,
        ctx: &Context,
        ref_str: &str,
        changes: Dataset,
        switches: &SaveSwitches,
        want_new_name: bool,
    ) -> Result<Dataset> {
        let body_hint = changes.body_file.as_ref().map(|b| b.filename.clone());

        let target = save::prepare_save_ref(
            ctx,
            &self.owner,
            &self.logbook,
            &self.refs,
            ref_str,
            body_hint.as_deref(),
            want_new_name,
        )?;

        self.save_to(ctx, &target, changes, switches)
    }

    /// Saves against an already prepared target, for callers that resolved
    /// the destination themselves.
    pub fn save_to(
        &self,
        ctx: &Context,
        target: &SaveTarget,
        changes: Dataset,
        switches: &SaveSwitches,
    ) -> Result<Dataset> {
        save::save_dataset(
            ctx,
            self.store.as_ref(),
            &self.logbook,
            &self.refs,
            &self.owner,
            self.clock.as_ref(),
            target,
            changes,
            switches,
        )
    }

    /// Lists a dataset's versions, newest first. See `history::dataset_log`
    /// for the logbook/store fallback and timeout behavior.
    pub fn log(
        &self,
        ctx: &Context,
        ref_str: &str,
        limit: usize,
        offset: usize,
        load_datasets: bool,
    ) -> Result<Vec<VersionInfo>> {
        let reference = self.resolve_ref(ctx, ref_str)?;
        history::dataset_log(
            ctx,
            &self.logbook,
            self.store.as_ref(),
            &reference,
            limit,
            offset,
            load_datasets,
        )
    }

    /// Loads the head (or the explicitly addressed) version of a dataset
    pub fn get_dataset(&self, ctx: &Context, ref_str: &str) -> Result<Dataset> {
        let reference = self.resolve_ref(ctx, ref_str)?;

        if reference.path.is_empty() {
            return Err(TabulaError::NoHistory(reference.alias()));
        }

        dsfs::load_dataset(ctx, self.store.as_ref(), &reference.path)
    }

    /// Paged structured read of a dataset's body. `all = true` ignores
    /// `limit` and `offset`.
    pub fn get_body(
        &self,
        ctx: &Context,
        ref_str: &str,
        limit: usize,
        offset: usize,
        all: bool,
    ) -> Result<Value> {
        let ds = self.get_dataset(ctx, ref_str)?;
        let structure = ds
            .structure
            .as_ref()
            .ok_or_else(|| TabulaError::NoBodyToInline)?;

        let data = dsfs::load_body(ctx, self.store.as_ref(), &ds)?;
        crate::body::convert::get_body(data, structure, limit, offset, all)
    }

    /// Drops a dataset entirely. Returns the comma-separated list of
    /// subsystems that were cleared.
    pub fn remove_dataset(&self, ctx: &Context, ref_str: &str) -> Result<String> {
        let reference = self.resolve_ref(ctx, ref_str)?;

        let history = match history::dataset_log(
            ctx,
            &self.logbook,
            self.store.as_ref(),
            &reference,
            0,
            0,
            false,
        ) {
            Ok(history) => history,
            Err(TabulaError::NoHistory(_)) => Vec::new(),
            Err(e) => return Err(e),
        };

        remove::remove_entire_dataset(
            ctx,
            self.store.as_ref(),
            &self.logbook,
            &self.refs,
            &reference,
            &history,
        )
    }

    /// Drops the `n` most recent versions; `n = -1` drops them all. Returns
    /// the new head, if one remains.
    pub fn remove_versions(
        &self,
        ctx: &Context,
        ref_str: &str,
        n: i64,
    ) -> Result<Option<VersionInfo>> {
        let reference = self.resolve_ref(ctx, ref_str)?;
        remove::remove_n_versions(
            ctx,
            self.store.as_ref(),
            &self.logbook,
            &self.refs,
            &reference,
            n,
        )
    }

    /// Renames a dataset, preserving its InitID
    pub fn rename_dataset(
        &self,
        ctx: &Context,
        ref_str: &str,
        new_name: &str,
    ) -> Result<DatasetRef> {
        let reference = self.resolve_ref(ctx, ref_str)?;
        remove::rename_dataset_ref(ctx, &self.logbook, &self.refs, &reference, new_name)
    }

    /// Merges a log received from another author and projects its head into
    /// the reference index so listings see it. See `Logbook::merge_log`.
    pub fn merge_foreign_log(&self, ctx: &Context, log: Oplog) -> Result<()> {
        let init_id = log.init_id.clone();
        self.logbook.merge_log(ctx, log)?;

        let merged = self.logbook.get_log(&init_id)?;
        if let Some(head) = merged.head_reference() {
            let info = VersionInfo {
                init_id,
                username: merged.username.clone(),
                profile_id: merged.author_id.clone(),
                name: merged.name().to_string(),
                path: head.to_string(),
                foreign: true,
                ..VersionInfo::default()
            };
            self.refs.put(info)?;
        }
        Ok(())
    }

    /// Lists known datasets from the reference index
    pub fn list(&self, offset: usize, limit: usize) -> Vec<VersionInfo> {
        self.refs.list(offset, limit)
    }

    /// Rebuilds a missing logbook entry from the store chain for a dataset
    /// the local user owns
    pub fn reconstruct_history(&self, ctx: &Context, ref_str: &str) -> Result<String> {
        let mut reference = reference::parse_ref(ref_str)?;
        reference::canonicalize_ref(
            &mut reference,
            &self.owner.username,
            &self.owner.id,
            |username| self.refs.profile_id_for_username(username),
        )?;

        if reference.path.is_empty() {
            if let Ok(info) = self.refs.get(&reference.username, &reference.name) {
                reference.path = info.path;
            }
        }

        let init_id = history::construct_dataset_log_from_history(
            ctx,
            &self.logbook,
            self.store.as_ref(),
            &reference,
        )?;
        info!("Reconstructed history for {}", reference.alias());
        Ok(init_id)
    }
}
