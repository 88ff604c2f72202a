use log::{debug, info, warn};

use crate::context::Context;
use crate::error::{Result, TabulaError};
use crate::history;
use crate::logbook::Logbook;
use crate::reference::{self, DatasetRef};
use crate::refs::{RefIndex, VersionInfo};
use crate::store::ContentStore;

/// Removes a dataset wholesale: unpins every snapshot in `history`, drops
/// the logbook entry (tombstone for owned logs, removal for foreign ones),
/// and deletes the reference index entry.
///
/// Cleanup is best-effort: sub-failures are logged and skipped so as much as
/// possible is cleared. The returned string names the subsystems that were
/// actually touched, comma-separated.
pub fn remove_entire_dataset(
    ctx: &Context,
    store: &dyn ContentStore,
    logbook: &Logbook,
    index: &RefIndex,
    reference: &DatasetRef,
    history: &[VersionInfo],
) -> Result<String> {
    let mut touched = Vec::new();

    let mut unpinned = false;
    for version in history {
        if version.path.is_empty() {
            continue;
        }
        match store.unpin(ctx, &version.path) {
            Ok(()) => unpinned = true,
            Err(e) => debug!("Skipping unpin of {}: {}", version.path, e),
        }
    }
    if unpinned {
        touched.push("unpin");
    }

    if !reference.init_id.is_empty() {
        let result = match logbook.get_log(&reference.init_id) {
            Ok(log) if log.foreign => logbook.remove_log(ctx, &reference.init_id),
            Ok(_) => logbook.write_dataset_delete(ctx, &reference.init_id),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => touched.push("logbook"),
            Err(e) => warn!("Failed to drop logbook entry for {}: {}", reference.alias(), e),
        }
    }

    match index.delete(&reference.username, &reference.name) {
        Ok(()) => touched.push("index"),
        Err(e) if e.is_not_found() => (),
        Err(e) => warn!("Failed to drop index entry for {}: {}", reference.alias(), e),
    }

    info!("Removed dataset {}", reference.alias());
    Ok(touched.join(","))
}

/// Drops the `n` most recent versions of a dataset, rewinding its head.
/// `n = -1` drops every version; `n < -1` is an error; `n = 0` leaves the
/// history untouched and returns the current head. Walks the
/// `previous_path` chain under the walker's bounded timeout, unpins each
/// dropped snapshot, appends a VersionDelete op, and rewrites the reference
/// index to the new head. Returns the new head, or `None` when no versions
/// remain.
pub fn remove_n_versions(
    ctx: &Context,
    store: &dyn ContentStore,
    logbook: &Logbook,
    index: &RefIndex,
    reference: &DatasetRef,
    n: i64,
) -> Result<Option<VersionInfo>> {
    if n < -1 {
        return Err(TabulaError::IllegalArgument(format!(
            "Invalid number of versions to remove: {}",
            n
        )));
    }

    let versions = history::dataset_log(ctx, logbook, store, reference, 0, 0, false)?;

    let drop_count = if n == -1 {
        versions.len()
    } else {
        (n as usize).min(versions.len())
    };

    if drop_count == 0 {
        return Ok(versions.first().cloned());
    }

    for dropped in &versions[..drop_count] {
        if dropped.path.is_empty() {
            continue;
        }
        if let Err(e) = store.unpin(ctx, &dropped.path) {
            debug!("Skipping unpin of {}: {}", dropped.path, e);
        }
    }

    if !reference.init_id.is_empty() {
        logbook.write_version_delete(ctx, &reference.init_id, drop_count as u64)?;
    }

    let new_head = versions.get(drop_count).cloned();
    match &new_head {
        Some(head) => {
            let mut info = match index.get(&reference.username, &reference.name) {
                Ok(existing) => existing,
                Err(_) => head.clone(),
            };
            info.path = head.path.clone();
            info.commit_title = head.commit_title.clone();
            info.commit_message = head.commit_message.clone();
            info.commit_time = head.commit_time;
            index.put(info)?;
        }
        None => {
            if let Err(e) = index.delete(&reference.username, &reference.name) {
                if !e.is_not_found() {
                    return Err(e);
                }
            }
        }
    }

    info!(
        "Removed {} version(s) of {}",
        drop_count,
        reference.alias()
    );
    Ok(new_head)
}

/// Renames a dataset. The new name must be strictly valid and must not
/// resolve to an existing dataset. Identity (the InitID) is preserved; the
/// reference index entry moves with its FSI path intact.
pub fn rename_dataset_ref(
    ctx: &Context,
    logbook: &Logbook,
    index: &RefIndex,
    reference: &DatasetRef,
    new_name: &str,
) -> Result<DatasetRef> {
    if reference::is_bad_case_name(new_name) {
        return Err(TabulaError::BadCase(new_name.to_string()));
    }
    if !reference::is_valid_name(new_name) {
        return Err(TabulaError::IllegalArgument(format!(
            "Invalid dataset name: {}",
            new_name
        )));
    }

    let mut target = DatasetRef::new(&reference.username, new_name);
    if logbook.resolve_ref(ctx, &mut target).is_ok() {
        return Err(TabulaError::NameTaken(new_name.to_string()));
    }

    if reference.init_id.is_empty() {
        return Err(TabulaError::NotFound(format!(
            "Dataset {}",
            reference.alias()
        )));
    }

    logbook.write_dataset_rename(ctx, &reference.init_id, new_name)?;

    match index.rename(&reference.username, &reference.name, new_name) {
        Ok(()) => (),
        // datasets with no saves have no index entry yet
        Err(e) if e.is_not_found() => (),
        Err(e) => return Err(e),
    }

    let mut renamed = reference.clone();
    renamed.name = new_name.to_string();
    info!("Renamed {} to {}", reference.alias(), renamed.alias());
    Ok(renamed)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::FixedClock;
    use crate::dataset::{BodyFile, Dataset};
    use crate::dsfs::SaveSwitches;
    use crate::identity::{seed_from_string, Profile};
    use crate::save::{prepare_save_ref, save_dataset};
    use crate::store::mem::MemStore;

    struct Fixture {
        store: MemStore,
        logbook: Logbook,
        index: RefIndex,
        owner: Arc<Profile>,
        clock: FixedClock,
    }

    fn fixture() -> Fixture {
        let owner =
            Arc::new(Profile::from_seed("peer", seed_from_string("remove test key")).unwrap());
        Fixture {
            store: MemStore::new(),
            logbook: Logbook::open(
                owner.clone(),
                Arc::new(FixedClock::default_epoch()),
                None::<&std::path::Path>,
            )
            .unwrap(),
            index: RefIndex::ephemeral(),
            owner,
            clock: FixedClock::default_epoch(),
        }
    }

    fn save_versions(fx: &Fixture, count: usize) -> DatasetRef {
        let ctx = Context::background();
        let mut reference = DatasetRef::default();

        for index in 0..count {
            let target = prepare_save_ref(
                &ctx,
                &fx.owner,
                &fx.logbook,
                &fx.index,
                "me/cities",
                None,
                false,
            )
            .unwrap();

            let mut changes = Dataset::new();
            changes.body_file = Some(BodyFile::new(
                "cities.csv",
                format!("city,pop\nny,{}\n", 8500000 + index).into_bytes(),
            ));

            let switches = SaveSwitches {
                pin: true,
                ..SaveSwitches::default()
            };
            save_dataset(
                &ctx,
                &fx.store,
                &fx.logbook,
                &fx.index,
                &fx.owner,
                &fx.clock,
                &target,
                changes,
                &switches,
            )
            .unwrap();

            reference = target.reference.clone();
        }

        let mut resolved = DatasetRef::new("peer", "cities");
        fx.logbook.resolve_ref(&ctx, &mut resolved).unwrap();
        resolved.username = reference.username;
        resolved
    }

    #[test]
    fn remove_one_of_three_rewinds_the_head() {
        let fx = fixture();
        let ctx = Context::background();
        let reference = save_versions(&fx, 3);

        let history =
            history::dataset_log(&ctx, &fx.logbook, &fx.store, &reference, 0, 0, false).unwrap();
        assert_eq!(3, history.len());

        let new_head = remove_n_versions(&ctx, &fx.store, &fx.logbook, &fx.index, &reference, 1)
            .unwrap()
            .unwrap();

        assert_eq!(history[1].path, new_head.path);
        assert_eq!(history[1].path, fx.index.get("peer", "cities").unwrap().path);
        assert!(!fx.store.is_pinned(&history[0].path));
        assert!(fx.store.is_pinned(&history[1].path));

        let mut resolved = DatasetRef::new("peer", "cities");
        fx.logbook.resolve_ref(&ctx, &mut resolved).unwrap();
        let remaining =
            history::dataset_log(&ctx, &fx.logbook, &fx.store, &resolved, 0, 0, false).unwrap();
        assert_eq!(2, remaining.len());
        assert_eq!(history[1].path, remaining[0].path);
    }

    #[test]
    fn remove_all_versions_clears_the_index() {
        let fx = fixture();
        let ctx = Context::background();
        let reference = save_versions(&fx, 2);

        let new_head =
            remove_n_versions(&ctx, &fx.store, &fx.logbook, &fx.index, &reference, -1).unwrap();
        assert!(new_head.is_none());
        assert!(fx.index.get("peer", "cities").is_err());
    }

    #[test]
    fn invalid_counts_are_rejected() {
        let fx = fixture();
        let ctx = Context::background();
        let reference = save_versions(&fx, 1);

        assert!(
            remove_n_versions(&ctx, &fx.store, &fx.logbook, &fx.index, &reference, -2).is_err()
        );
    }

    #[test]
    fn removing_zero_versions_leaves_history_untouched() {
        let fx = fixture();
        let ctx = Context::background();
        let reference = save_versions(&fx, 2);

        let head_before = fx.index.get("peer", "cities").unwrap().path;
        let ops_before = fx.logbook.get_log(&reference.init_id).unwrap().ops.len();

        let head = remove_n_versions(&ctx, &fx.store, &fx.logbook, &fx.index, &reference, 0)
            .unwrap()
            .unwrap();
        assert_eq!(head_before, head.path);

        // no tombstone was appended and the full history survives
        assert_eq!(
            ops_before,
            fx.logbook.get_log(&reference.init_id).unwrap().ops.len()
        );
        let history =
            history::dataset_log(&ctx, &fx.logbook, &fx.store, &reference, 0, 0, false).unwrap();
        assert_eq!(2, history.len());
        assert!(fx.store.is_pinned(&head.path));
    }

    #[test]
    fn remove_entire_dataset_reports_subsystems() {
        let fx = fixture();
        let ctx = Context::background();
        let reference = save_versions(&fx, 2);

        let history =
            history::dataset_log(&ctx, &fx.logbook, &fx.store, &reference, 0, 0, false).unwrap();

        let touched = remove_entire_dataset(
            &ctx,
            &fx.store,
            &fx.logbook,
            &fx.index,
            &reference,
            &history,
        )
        .unwrap();

        assert_eq!("unpin,logbook,index", touched);
        assert!(fx.index.get("peer", "cities").is_err());

        let mut resolved = DatasetRef::new("peer", "cities");
        assert!(fx.logbook.resolve_ref(&ctx, &mut resolved).is_err());
    }

    #[test]
    fn rename_preserves_identity() {
        let fx = fixture();
        let ctx = Context::background();
        let reference = save_versions(&fx, 1);
        let original_init_id = reference.init_id.clone();

        let renamed =
            rename_dataset_ref(&ctx, &fx.logbook, &fx.index, &reference, "metros").unwrap();
        assert_eq!("metros", renamed.name);

        let mut resolved = DatasetRef::new("peer", "metros");
        fx.logbook.resolve_ref(&ctx, &mut resolved).unwrap();
        assert_eq!(original_init_id, resolved.init_id);

        assert!(fx.index.get("peer", "metros").is_ok());
        assert!(fx.index.get("peer", "cities").is_err());
    }

    #[test]
    fn rename_rejects_taken_and_bad_case_names() {
        let fx = fixture();
        let ctx = Context::background();
        let reference = save_versions(&fx, 1);

        assert!(matches!(
            rename_dataset_ref(&ctx, &fx.logbook, &fx.index, &reference, "cities"),
            Err(TabulaError::NameTaken(_))
        ));
        assert!(matches!(
            rename_dataset_ref(&ctx, &fx.logbook, &fx.index, &reference, "Metros"),
            Err(TabulaError::BadCase(_))
        ));
    }
}
