use log::{debug, info, warn};

use crate::body::convert::convert_body_format;
use crate::body::BodyFormat;
use crate::clock::Clock;
use crate::context::Context;
use crate::dataset::{BodyFile, Dataset};
use crate::detect;
use crate::dsfs::{self, SaveSwitches};
use crate::error::{Result, TabulaError};
use crate::identity::Profile;
use crate::logbook::Logbook;
use crate::reference::{self, DatasetRef};
use crate::refs::{RefIndex, VersionInfo};
use crate::store::ContentStore;

/// The resolved target of a save: where the new version will land and
/// whether the dataset is being created by this save.
#[derive(Debug, Clone)]
pub struct SaveTarget {
    pub reference: DatasetRef,
    pub is_new: bool,
}

/// Resolves where a save should land.
///
/// An empty ref derives the dataset name from the body filename; if that
/// name is taken, `want_new_name` auto-suffixes (`_2`, `_3`, …) and anything
/// else is an error recommending `--new`. Explicit refs reject cross-user
/// saves, and reject bad-case names only when the dataset does not already
/// exist. New datasets are allocated an InitID via a logbook init op.
pub fn prepare_save_ref(
    ctx: &Context,
    owner: &Profile,
    logbook: &Logbook,
    index: &RefIndex,
    ref_str: &str,
    body_hint: Option<&str>,
    want_new_name: bool,
) -> Result<SaveTarget> {
    if ref_str.is_empty() {
        return prepare_inferred_ref(ctx, owner, logbook, body_hint, want_new_name);
    }

    let mut reference = reference::parse_human_ref(ref_str)?;
    reference::canonicalize_ref(&mut reference, &owner.username, &owner.id, |username| {
        index.profile_id_for_username(username)
    })?;

    if reference.username != owner.username {
        return Err(TabulaError::IllegalArgument(format!(
            "Cannot save to another user's dataset: {}",
            reference.alias()
        )));
    }

    match logbook.resolve_ref(ctx, &mut reference) {
        Ok(()) => {
            if want_new_name {
                return Err(TabulaError::NameTaken(reference.name.clone()));
            }
            if reference::is_bad_case_name(&reference.name) {
                warn!(
                    "Dataset name {} uses bad case; it remains addressable but new names must be lowercase",
                    reference.name
                );
            }
            Ok(SaveTarget {
                reference,
                is_new: false,
            })
        }
        Err(e) if e.is_not_found() => {
            if reference::is_bad_case_name(&reference.name) {
                return Err(TabulaError::BadCase(reference.alias()));
            }
            reference.init_id = logbook.write_dataset_init(ctx, &reference.name)?;
            Ok(SaveTarget {
                reference,
                is_new: true,
            })
        }
        Err(e) => Err(e),
    }
}

fn prepare_inferred_ref(
    ctx: &Context,
    owner: &Profile,
    logbook: &Logbook,
    body_hint: Option<&str>,
    want_new_name: bool,
) -> Result<SaveTarget> {
    let base_name = body_hint
        .map(detect::name_from_filename)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            TabulaError::IllegalArgument(
                "A dataset name or a body file to derive one from is required".to_string(),
            )
        })?;

    let mut reference = DatasetRef::new(&owner.username, &base_name);
    reference.profile_id = owner.id.clone();

    let mut probe = reference.clone();
    match logbook.resolve_ref(ctx, &mut probe) {
        Err(e) if e.is_not_found() => {
            reference.init_id = logbook.write_dataset_init(ctx, &reference.name)?;
            return Ok(SaveTarget {
                reference,
                is_new: true,
            });
        }
        Err(e) => return Err(e),
        Ok(()) => (),
    }

    if !want_new_name {
        return Err(TabulaError::NameTaken(format!(
            "{}. Use --new to save a new dataset with a generated name",
            base_name
        )));
    }

    // Auto-suffix until a free name turns up
    for suffix in 2.. {
        let candidate = format!("{}_{}", base_name, suffix);
        let mut probe = DatasetRef::new(&owner.username, &candidate);

        match logbook.resolve_ref(ctx, &mut probe) {
            Err(e) if e.is_not_found() => {
                let mut reference = DatasetRef::new(&owner.username, &candidate);
                reference.profile_id = owner.id.clone();
                reference.init_id = logbook.write_dataset_init(ctx, &candidate)?;
                return Ok(SaveTarget {
                    reference,
                    is_new: true,
                });
            }
            Err(e) => return Err(e),
            Ok(()) => debug!("Name {} is taken, trying the next suffix", candidate),
        }
    }

    unreachable!("suffix search either returns or errors")
}

/// Orchestrates one save: load the previous version, reconcile the body
/// format, patch the changes onto the previous version, infer missing
/// fields, assemble and write the snapshot, then record it in the logbook
/// and the reference index, in that order.
#[allow(clippy::too_many_arguments)]
pub fn save_dataset(
    ctx: &Context,
    store: &dyn ContentStore,
    logbook: &Logbook,
    index: &RefIndex,
    owner: &Profile,
    clock: &dyn Clock,
    target: &SaveTarget,
    mut changes: Dataset,
    switches: &SaveSwitches,
) -> Result<Dataset> {
    let prev_path = target.reference.path.clone();

    let prev = if prev_path.is_empty() {
        None
    } else {
        Some(dsfs::load_dataset(ctx, store, &prev_path)?)
    };

    if let Some(prev) = &prev {
        reconcile_body_format(&mut changes, prev, switches)?;
    }

    if !switches.replace {
        if let Some(prev) = &prev {
            let mut mutable = prev.clone();
            mutable.commit = None;
            mutable.path = String::new();
            mutable.previous_path = String::new();
            mutable.assign(changes);
            changes = mutable;
        }
    }

    changes.name = target.reference.name.clone();
    changes.peername = target.reference.username.clone();
    changes.profile_id = owner.id.clone();

    detect::infer_values(owner, &mut changes)?;

    changes.previous_path = prev_path;

    dsfs::create_dataset(ctx, store, &mut changes, prev.as_ref(), owner, clock, switches)?;

    // Store write happens-before logbook write happens-before index write: a
    // crash leaves at worst an orphan snapshot, never an index entry
    // pointing at a missing one
    logbook.write_version_save(ctx, &target.reference.init_id, &changes)?;

    let mut info = VersionInfo::from_dataset(&changes);
    info.init_id = target.reference.init_id.clone();
    if let Ok(existing) = index.get(&changes.peername, &changes.name) {
        info.fsi_path = existing.fsi_path;
        info.published = existing.published;
    }
    index.put(info)?;

    info!("Saved {} at {}", changes.alias(), changes.path);
    Ok(changes)
}

/// When an attached body's format differs from the previous version's,
/// either transcode it back to the previous format or refuse the save.
fn reconcile_body_format(
    changes: &mut Dataset,
    prev: &Dataset,
    switches: &SaveSwitches,
) -> Result<()> {
    let body_file = match &changes.body_file {
        Some(body_file) => body_file,
        None => return Ok(()),
    };
    let prev_structure = match &prev.structure {
        Some(structure) => structure,
        None => return Ok(()),
    };

    let incoming_format = match BodyFormat::from_filename(&body_file.filename) {
        Some(format) => format,
        None => return Ok(()),
    };

    if incoming_format == prev_structure.format {
        return Ok(());
    }

    if !switches.convert_format_to_prev {
        return Err(TabulaError::IllegalArgument(format!(
            "Body format changed from {} to {}; pass convert_format_to_prev to transcode",
            prev_structure.format, incoming_format
        )));
    }

    debug!(
        "Transcoding body from {} back to {}",
        incoming_format, prev_structure.format
    );

    let src = detect::detect_structure(body_file)?;
    let converted = convert_body_format(body_file.data.clone(), &src, prev_structure)?;

    changes.body_file = Some(BodyFile::new(
        &prev_structure.format.body_filename(),
        converted,
    ));
    // the declared structure keeps the previous format
    if let Some(structure) = changes.structure.as_mut() {
        structure.format = prev_structure.format;
    }

    Ok(())
}
