use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::body::new_entry_reader;
use crate::clock::Clock;
use crate::component::{parse_component_list, Component};
use crate::consts::*;
use crate::context::Context;
use crate::dataset::{Commit, Dataset, Envelope, Meta, Readme, Structure, Transform, Viz};
use crate::detect;
use crate::error::{Result, TabulaError};
use crate::identity::Profile;
use crate::store::{hash_bytes, ContentStore};

/// Behavior switches for `create_dataset`
#[derive(Debug, Clone, Default)]
pub struct SaveSwitches {
    /// Treat the incoming dataset as a full replacement, skipping the patch
    /// onto the previous version
    pub replace: bool,
    /// Ask the store to pin the written blobs
    pub pin: bool,
    /// Transcode a changed body back to the previous format instead of
    /// erroring
    pub convert_format_to_prev: bool,
    /// Produce a commit even when nothing changed
    pub force_if_no_changes: bool,
    /// Render viz and readme HTML as part of the write
    pub should_render: bool,
    /// Comma-separated component short codes to clear before assembly
    pub drop: String,
}

/// Serializes a component as canonical JSON and writes it to the store.
/// Struct fields serialize in declaration order and map extensions are kept
/// sorted, so identical components always land at identical addresses.
fn put_component<T: Serialize>(
    ctx: &Context,
    store: &dyn ContentStore,
    component: &T,
    pin: bool,
) -> Result<(String, Vec<u8>)> {
    let bytes = serde_json::to_vec(component)?;
    let address = store.put(ctx, bytes.clone(), pin)?;
    Ok((address, bytes))
}

fn get_component<T: DeserializeOwned>(
    ctx: &Context,
    store: &dyn ContentStore,
    path: &str,
) -> Result<T> {
    let bytes = store.get(ctx, path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Loads only the envelope of a snapshot: component fields come back as
/// address-only stubs.
pub fn load_dataset_refs(ctx: &Context, store: &dyn ContentStore, path: &str) -> Result<Dataset> {
    let envelope: Envelope = get_component(ctx, store, path)?;
    Ok(Dataset::from_envelope(envelope, path))
}

/// Loads a snapshot and each referenced component shallowly. Viz and readme
/// loads are bounded by the open-file timeout and tolerated when they miss;
/// core components propagate their errors.
pub fn load_dataset(ctx: &Context, store: &dyn ContentStore, path: &str) -> Result<Dataset> {
    let mut ds = load_dataset_refs(ctx, store, path)?;

    if let Some(stub) = &ds.meta {
        let mut meta: Meta = get_component(ctx, store, &stub.path)?;
        meta.path = stub.path.clone();
        ds.meta = Some(meta);
    }
    if let Some(stub) = &ds.structure {
        let mut structure: Structure = get_component(ctx, store, &stub.path)?;
        structure.path = stub.path.clone();
        ds.structure = Some(structure);
    }
    if let Some(stub) = &ds.commit {
        let mut commit: Commit = get_component(ctx, store, &stub.path)?;
        commit.path = stub.path.clone();
        ds.commit = Some(commit);
    }
    if let Some(stub) = &ds.transform {
        let mut transform: Transform = get_component(ctx, store, &stub.path)?;
        transform.path = stub.path.clone();
        ds.transform = Some(transform);
    }

    // Viz and readme may be missing locally; a bounded miss degrades to the
    // address-only stub
    if let Some(stub) = &ds.viz {
        let child = ctx.child_timeout(OPEN_FILE_TIMEOUT);
        match get_component::<Viz>(&child, store, &stub.path) {
            Ok(mut viz) => {
                viz.path = stub.path.clone();
                ds.viz = Some(viz);
            }
            Err(e) if e.is_not_found() || e.is_timeout() => {
                debug!("Leaving viz unloaded for {}: {}", path, e);
            }
            Err(e) => return Err(e),
        }
    }
    if let Some(stub) = &ds.readme {
        let child = ctx.child_timeout(OPEN_FILE_TIMEOUT);
        match get_component::<Readme>(&child, store, &stub.path) {
            Ok(mut readme) => {
                readme.path = stub.path.clone();
                ds.readme = Some(readme);
            }
            Err(e) if e.is_not_found() || e.is_timeout() => {
                debug!("Leaving readme unloaded for {}: {}", path, e);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(ds)
}

/// Fetches the body blob for a loaded snapshot
pub fn load_body(ctx: &Context, store: &dyn ContentStore, ds: &Dataset) -> Result<Vec<u8>> {
    if ds.body_path.is_empty() {
        return Err(TabulaError::NoBodyToInline);
    }
    store.get(ctx, &ds.body_path)
}

/// Components whose content differs between two snapshots. Content
/// addressing makes this an address comparison.
pub fn changed_components(prev: &Dataset, curr: &Dataset) -> Vec<Component> {
    fn path_of<T>(component: &Option<T>, path: impl Fn(&T) -> &str) -> String {
        component.as_ref().map(|c| path(c).to_string()).unwrap_or_default()
    }

    let mut changed = Vec::new();

    if prev.body_path != curr.body_path {
        changed.push(Component::Body);
    }
    if path_of(&prev.structure, |c| &c.path) != path_of(&curr.structure, |c| &c.path) {
        changed.push(Component::Structure);
    }
    if path_of(&prev.meta, |c| &c.path) != path_of(&curr.meta, |c| &c.path) {
        changed.push(Component::Meta);
    }
    if path_of(&prev.transform, |c| &c.path) != path_of(&curr.transform, |c| &c.path) {
        changed.push(Component::Transform);
    }
    if path_of(&prev.viz, |c| &c.path) != path_of(&curr.viz, |c| &c.path) {
        changed.push(Component::Viz);
    }
    if path_of(&prev.readme, |c| &c.path) != path_of(&curr.readme, |c| &c.path) {
        changed.push(Component::Readme);
    }

    changed
}

fn component_noun(component: Component) -> &'static str {
    match component {
        Component::Dataset => "dataset",
        Component::Meta => "meta",
        Component::Structure => "structure",
        Component::Commit => "commit",
        Component::Transform => "transform",
        Component::Viz => "viz",
        Component::Readme => "readme",
        Component::Body => "body",
    }
}

fn synthesize_title(changed: &[Component]) -> String {
    match changed {
        [] => "forced update".to_string(),
        [only] => format!("updated {}", component_noun(*only)),
        [first, second] => format!(
            "updated {} and {}",
            component_noun(*first),
            component_noun(*second)
        ),
        many => format!("updated {} components", many.len()),
    }
}

/// Assembles a dataset snapshot and writes it to the store, returning the
/// new content address.
///
/// The sequence is deterministic: drop requested components, validate,
/// stream the body into the store while deriving stats, write each
/// subcomponent in a fixed order, synthesize the commit title from the diff
/// against `prev`, sign the canonical signable form, and write the envelope.
pub fn create_dataset(
    ctx: &Context,
    store: &dyn ContentStore,
    ds: &mut Dataset,
    prev: Option<&Dataset>,
    author: &Profile,
    clock: &dyn Clock,
    switches: &SaveSwitches,
) -> Result<String> {
    if !switches.drop.is_empty() {
        for component in parse_component_list(&switches.drop)? {
            debug!("Dropping component {}", component);
            ds.drop_component(component);
        }
    }

    if ds.profile_id.is_empty() {
        ds.profile_id = author.id.clone();
    }

    detect::validate_dataset(ds)?;
    ctx.check("create dataset")?;

    // Stream the attached body into the store, deriving stats as it goes
    if let Some(body_file) = ds.body_file.take() {
        let structure = ds
            .structure
            .as_mut()
            .expect("validate_dataset guarantees a structure when a body is attached");

        let stats = body_stats(structure, &body_file.data)?;
        structure.entries = stats.entries;
        structure.depth = stats.depth;
        structure.err_count = stats.err_count;
        structure.length = body_file.data.len() as u64;

        ds.body_path = store.put(ctx, body_file.data, switches.pin)?;
    } else if let Some(prev) = prev {
        if ds.body_path.is_empty() {
            ds.body_path = prev.body_path.clone();
        }
    }

    // Fixed component write order: structure, meta, transform, viz, readme
    let mut structure_digest = String::new();
    if let Some(structure) = ds.structure.as_mut() {
        let (address, bytes) = put_component(ctx, store, structure, switches.pin)?;
        structure_digest = hash_bytes(&bytes);
        structure.path = address;
    }
    if let Some(meta) = ds.meta.as_mut() {
        if meta.qri.is_empty() {
            meta.qri = META_MODEL.to_string();
        }
        let (address, _) = put_component(ctx, store, meta, switches.pin)?;
        meta.path = address;
    }
    if let Some(transform) = ds.transform.as_mut() {
        if let Some(script) = transform.script.take() {
            transform.script_path = store.put(ctx, script, switches.pin)?;
        }
        let (address, _) = put_component(ctx, store, transform, switches.pin)?;
        transform.path = address;
    }
    if let Some(viz) = ds.viz.as_mut() {
        if let Some(script) = viz.script.take() {
            viz.script_path = store.put(ctx, script.clone(), switches.pin)?;
            if switches.should_render {
                let rendered = render_html(&ds.name, &script);
                viz.rendered_path = store.put(ctx, rendered, switches.pin)?;
            }
        }
        let (address, _) = put_component(ctx, store, viz, switches.pin)?;
        viz.path = address;
    }
    if let Some(readme) = ds.readme.as_mut() {
        if let Some(script) = readme.script.take() {
            readme.script_path = store.put(ctx, script.clone(), switches.pin)?;
            if switches.should_render {
                let rendered = render_html(&ds.name, &script);
                readme.rendered_path = store.put(ctx, rendered, switches.pin)?;
            }
        }
        let (address, _) = put_component(ctx, store, readme, switches.pin)?;
        readme.path = address;
    }

    // Commit: synthesize a title from the diff when the caller did not set
    // one, and refuse empty commits unless forced
    let commit = ds.commit.get_or_insert_with(Commit::new);
    commit.timestamp = clock.now();

    let title_missing = commit.title.is_empty();
    match prev {
        None => {
            if title_missing {
                commit.title = DEFAULT_COMMIT_TITLE.to_string();
            }
        }
        Some(prev) => {
            let changed = changed_components(prev, ds);
            if changed.is_empty() && !switches.force_if_no_changes {
                return Err(TabulaError::IllegalState(format!(
                    "Dataset {} has no changes to save",
                    ds.alias()
                )));
            }
            if changed.is_empty() {
                warn!("Forcing a commit with no changes for {}", ds.alias());
            }
            if title_missing {
                let commit = ds.commit.as_mut().unwrap();
                commit.title = synthesize_title(&changed);
            }
        }
    }

    let signable = ds.signable_bytes(&structure_digest)?;
    let signature = author.sign(&signable)?;

    let commit = ds.commit.as_mut().unwrap();
    commit.signature = hex::encode(signature);
    let commit_snapshot = commit.clone();
    let (address, _) = put_component(ctx, store, &commit_snapshot, switches.pin)?;
    ds.commit.as_mut().unwrap().path = address;

    let envelope_bytes = serde_json::to_vec(&ds.to_envelope())?;
    ds.path = store.put(ctx, envelope_bytes, switches.pin)?;

    info!("Wrote dataset {} at {}", ds.alias(), ds.path);
    Ok(ds.path.clone())
}

struct BodyStats {
    entries: u64,
    depth: u32,
    err_count: u64,
}

/// Streams the body through its format reader, counting entries and nesting
/// depth, then runs schema validation for the error count.
fn body_stats(structure: &Structure, data: &[u8]) -> Result<BodyStats> {
    let mut reader = new_entry_reader(structure, data.to_vec())?;

    let mut entries = 0u64;
    let mut depth = 1u32;

    while let Some(entry) = reader.read_entry()? {
        entries += 1;
        depth = depth.max(1 + value_depth(&entry.value));
    }

    let err_count = detect::validate_body(structure, data.to_vec())?.len() as u64;

    Ok(BodyStats {
        entries,
        depth,
        err_count,
    })
}

fn value_depth(value: &serde_json::Value) -> u32 {
    match value {
        serde_json::Value::Array(values) => {
            1 + values.iter().map(value_depth).max().unwrap_or(0)
        }
        serde_json::Value::Object(map) => {
            1 + map.values().map(value_depth).max().unwrap_or(0)
        }
        _ => 1,
    }
}

/// Minimal HTML rendering for readme and viz scripts. Template engines live
/// outside this crate; the rendered blob is the script wrapped in a page.
fn render_html(name: &str, script: &[u8]) -> Vec<u8> {
    let body = String::from_utf8_lossy(script);
    format!(
        "<!DOCTYPE html>\n<html>\n<head><title>{}</title></head>\n<body>\n{}\n</body>\n</html>\n",
        name, body
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyFormat;
    use crate::clock::FixedClock;
    use crate::dataset::BodyFile;
    use crate::identity::seed_from_string;
    use crate::store::mem::MemStore;

    fn author() -> Profile {
        Profile::from_seed("peer", seed_from_string("dsfs test key")).unwrap()
    }

    fn cities_dataset(author: &Profile) -> Dataset {
        let mut ds = Dataset::new();
        ds.name = "cities".to_string();
        ds.peername = author.username.clone();
        ds.body_file = Some(BodyFile::new(
            "cities.csv",
            b"city,pop,avg_age,is_big\nny,8500000,44.4,true\n".to_vec(),
        ));
        detect::infer_values(author, &mut ds).unwrap();
        ds
    }

    fn create(
        store: &MemStore,
        ds: &mut Dataset,
        prev: Option<&Dataset>,
        switches: &SaveSwitches,
    ) -> Result<String> {
        let ctx = Context::background();
        let clock = FixedClock::default_epoch();
        create_dataset(&ctx, store, ds, prev, &author(), &clock, switches)
    }

    #[test]
    fn genesis_create_writes_all_files() {
        let store = MemStore::new();
        let mut ds = cities_dataset(&author());

        let path = create(&store, &mut ds, None, &SaveSwitches::default()).unwrap();

        assert_eq!(path, ds.path);
        assert_eq!(DEFAULT_COMMIT_TITLE, ds.commit.as_ref().unwrap().title);
        assert!(ds.previous_path.is_empty());
        assert!(!ds.body_path.is_empty());
        assert!(!ds.commit.as_ref().unwrap().signature.is_empty());

        // envelope + structure + commit + body
        assert_eq!(4, store.len());

        let structure = ds.structure.as_ref().unwrap();
        assert_eq!(1, structure.entries);
        assert_eq!(2, structure.depth);
        assert_eq!(0, structure.err_count);
    }

    #[test]
    fn load_round_trips_the_envelope() {
        let store = MemStore::new();
        let ctx = Context::background();
        let mut ds = cities_dataset(&author());
        let path = create(&store, &mut ds, None, &SaveSwitches::default()).unwrap();

        let loaded = load_dataset(&ctx, &store, &path).unwrap();
        assert_eq!("cities", loaded.name);
        assert_eq!(ds.body_path, loaded.body_path);
        assert_eq!(
            ds.commit.as_ref().unwrap().title,
            loaded.commit.as_ref().unwrap().title
        );
        assert_eq!(
            BodyFormat::Csv,
            loaded.structure.as_ref().unwrap().format
        );

        let body = load_body(&ctx, &store, &loaded).unwrap();
        assert!(body.starts_with(b"city,pop"));
    }

    #[test]
    fn refs_load_returns_stubs() {
        let store = MemStore::new();
        let ctx = Context::background();
        let mut ds = cities_dataset(&author());
        let path = create(&store, &mut ds, None, &SaveSwitches::default()).unwrap();

        let refs = load_dataset_refs(&ctx, &store, &path).unwrap();
        let structure = refs.structure.as_ref().unwrap();
        assert!(!structure.path.is_empty());
        assert!(structure.schema.is_none());
    }

    #[test]
    fn unchanged_save_is_rejected() {
        let store = MemStore::new();
        let mut first = cities_dataset(&author());
        let path = create(&store, &mut first, None, &SaveSwitches::default()).unwrap();

        let mut second = cities_dataset(&author());
        second.previous_path = path;

        match create(&store, &mut second, Some(&first), &SaveSwitches::default()) {
            Err(TabulaError::IllegalState(msg)) => assert!(msg.contains("no changes")),
            other => panic!("Expected no-changes error, got {:?}", other),
        }
    }

    #[test]
    fn forced_save_commits_anyway() {
        let store = MemStore::new();
        let mut first = cities_dataset(&author());
        let path = create(&store, &mut first, None, &SaveSwitches::default()).unwrap();

        let mut second = cities_dataset(&author());
        second.previous_path = path.clone();

        let switches = SaveSwitches {
            force_if_no_changes: true,
            ..SaveSwitches::default()
        };
        create(&store, &mut second, Some(&first), &switches).unwrap();

        assert_eq!("forced update", second.commit.as_ref().unwrap().title);
        assert_eq!(path, second.previous_path);
        assert_ne!(path, second.path);
    }

    #[test]
    fn meta_change_synthesizes_title() {
        let store = MemStore::new();
        let mut first = cities_dataset(&author());
        let path = create(&store, &mut first, None, &SaveSwitches::default()).unwrap();

        let mut second = cities_dataset(&author());
        second.previous_path = path;
        let mut meta = Meta::new();
        meta.title = Some("this is the new title".to_string());
        second.meta = Some(meta);

        create(&store, &mut second, Some(&first), &SaveSwitches::default()).unwrap();
        assert_eq!("updated meta", second.commit.as_ref().unwrap().title);
    }

    #[test]
    fn drop_switch_clears_components() {
        let store = MemStore::new();
        let author = author();
        let mut ds = cities_dataset(&author);
        let mut meta = Meta::new();
        meta.title = Some("dropped".to_string());
        ds.meta = Some(meta);

        let switches = SaveSwitches {
            drop: "md".to_string(),
            ..SaveSwitches::default()
        };
        create(&store, &mut ds, None, &switches).unwrap();

        assert!(ds.meta.is_none());
    }

    #[test]
    fn pin_switch_pins_every_blob() {
        let store = MemStore::new();
        let mut ds = cities_dataset(&author());

        let switches = SaveSwitches {
            pin: true,
            ..SaveSwitches::default()
        };
        let path = create(&store, &mut ds, None, &switches).unwrap();

        assert!(store.is_pinned(&path));
        assert!(store.is_pinned(&ds.body_path));
        assert!(store.is_pinned(&ds.structure.as_ref().unwrap().path));
    }

    #[test]
    fn rendered_readme_is_written_when_asked() {
        let store = MemStore::new();
        let ctx = Context::background();
        let mut ds = cities_dataset(&author());
        let mut readme = Readme::new();
        readme.script = Some(b"# Cities\n".to_vec());
        ds.readme = Some(readme);

        let switches = SaveSwitches {
            should_render: true,
            ..SaveSwitches::default()
        };
        create(&store, &mut ds, None, &switches).unwrap();

        let readme = ds.readme.as_ref().unwrap();
        assert!(!readme.rendered_path.is_empty());
        let rendered = store.get(&ctx, &readme.rendered_path).unwrap();
        assert!(String::from_utf8(rendered).unwrap().contains("# Cities"));
    }

    #[test]
    fn signature_covers_the_body() {
        let store = MemStore::new();
        let mut first = cities_dataset(&author());
        create(&store, &mut first, None, &SaveSwitches::default()).unwrap();

        let mut other = cities_dataset(&author());
        other.body_file = Some(BodyFile::new("cities.csv", b"city\nla\n".to_vec()));
        create(&store, &mut other, None, &SaveSwitches::default()).unwrap();

        assert_ne!(
            first.commit.as_ref().unwrap().signature,
            other.commit.as_ref().unwrap().signature
        );
    }
}
