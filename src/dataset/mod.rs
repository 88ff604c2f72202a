use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::component::Component;
use crate::consts::*;
use crate::error::Result;

mod components;

pub use components::{License, Meta, Readme, Structure, Transform, Viz};

/// One immutable dataset version: an envelope of up to seven optional
/// components. `path` is the envelope's own content address and is set only
/// after the snapshot is written; it is never stored inside the file.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub qri: String,
    pub name: String,
    pub peername: String,
    pub profile_id: String,
    /// Self address, assigned by the store at write time
    pub path: String,
    /// Address of the preceding snapshot, empty at genesis
    pub previous_path: String,
    pub meta: Option<Meta>,
    pub structure: Option<Structure>,
    pub commit: Option<Commit>,
    pub transform: Option<Transform>,
    pub viz: Option<Viz>,
    pub readme: Option<Readme>,
    /// Address of the written body blob
    pub body_path: String,
    /// A pending body attached for the next save, not yet in the store
    pub body_file: Option<BodyFile>,
}

/// Commit metadata for one version
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub qri: String,
    #[serde(skip)]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Hex-encoded ed25519 signature over the canonical signable form
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<CommitAuthor>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct CommitAuthor {
    pub id: String,
}

impl Commit {
    pub fn new() -> Self {
        Self {
            qri: COMMIT_MODEL.to_string(),
            path: String::new(),
            title: String::new(),
            message: String::new(),
            timestamp: Utc.timestamp_opt(0, 0).unwrap(),
            signature: String::new(),
            author: None,
        }
    }

    pub fn new_ref(path: &str) -> Self {
        let mut commit = Self::new();
        commit.qri = String::new();
        commit.path = path.to_string();
        commit
    }
}

impl Default for Commit {
    fn default() -> Self {
        Self::new()
    }
}

/// A body attached from outside the store, pending write
#[derive(Debug, Clone, PartialEq)]
pub struct BodyFile {
    pub filename: String,
    pub data: Vec<u8>,
}

impl BodyFile {
    pub fn new(filename: &str, data: Vec<u8>) -> Self {
        Self {
            filename: filename.to_string(),
            data,
        }
    }
}

/// The persisted `dataset.json` file: the envelope references every written
/// component by its content address.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub qri: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub peername: String,
    #[serde(rename = "profileID", default, skip_serializing_if = "String::is_empty")]
    pub profile_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub previous_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub meta: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub structure: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commit: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub transform: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub viz: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub readme: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body_path: String,
}

/// The canonical signable form of a snapshot: a fixed-order JSON object of
/// the commit timestamp (RFC 3339 UTC), commit title, previous path, body
/// path, and the structure file's content digest.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignableDataset<'a> {
    timestamp: String,
    title: &'a str,
    previous_path: &'a str,
    body_path: &'a str,
    structure_digest: &'a str,
}

impl Dataset {
    pub fn new() -> Self {
        Self {
            qri: DATASET_MODEL.to_string(),
            ..Self::default()
        }
    }

    pub fn alias(&self) -> String {
        format!("{}/{}", self.peername, self.name)
    }

    /// True when the dataset carries no components and no pending body
    pub fn is_empty(&self) -> bool {
        self.meta.is_none()
            && self.structure.is_none()
            && self.commit.is_none()
            && self.transform.is_none()
            && self.viz.is_none()
            && self.readme.is_none()
            && self.body_file.is_none()
            && self.body_path.is_empty()
    }

    /// Overlays `changes` onto this dataset as a patch. Components present in
    /// `changes` replace their counterparts wholesale; empty fields in
    /// `changes` leave the existing values alone.
    pub fn assign(&mut self, changes: Dataset) {
        if !changes.qri.is_empty() {
            self.qri = changes.qri;
        }
        if !changes.name.is_empty() {
            self.name = changes.name;
        }
        if !changes.peername.is_empty() {
            self.peername = changes.peername;
        }
        if !changes.profile_id.is_empty() {
            self.profile_id = changes.profile_id;
        }
        if !changes.previous_path.is_empty() {
            self.previous_path = changes.previous_path;
        }
        if !changes.body_path.is_empty() {
            self.body_path = changes.body_path;
        }
        if changes.meta.is_some() {
            self.meta = changes.meta;
        }
        if changes.structure.is_some() {
            self.structure = changes.structure;
        }
        if changes.commit.is_some() {
            self.commit = changes.commit;
        }
        if changes.transform.is_some() {
            self.transform = changes.transform;
        }
        if changes.viz.is_some() {
            self.viz = changes.viz;
        }
        if changes.readme.is_some() {
            self.readme = changes.readme;
        }
        if changes.body_file.is_some() {
            self.body_file = changes.body_file;
        }
    }

    /// Clears the named component. Dropping `ds` resets everything except
    /// identity fields.
    pub fn drop_component(&mut self, component: Component) {
        match component {
            Component::Dataset => {
                self.meta = None;
                self.structure = None;
                self.commit = None;
                self.transform = None;
                self.viz = None;
                self.readme = None;
                self.body_file = None;
                self.body_path = String::new();
            }
            Component::Meta => self.meta = None,
            Component::Structure => self.structure = None,
            Component::Commit => self.commit = None,
            Component::Transform => self.transform = None,
            Component::Viz => self.viz = None,
            Component::Readme => self.readme = None,
            Component::Body => {
                self.body_file = None;
                self.body_path = String::new();
            }
        }
    }

    /// Builds the persisted envelope from the component addresses recorded
    /// after each component write
    pub fn to_envelope(&self) -> Envelope {
        Envelope {
            qri: self.qri.clone(),
            name: self.name.clone(),
            peername: self.peername.clone(),
            profile_id: self.profile_id.clone(),
            previous_path: self.previous_path.clone(),
            meta: self.meta.as_ref().map(|c| c.path.clone()).unwrap_or_default(),
            structure: self
                .structure
                .as_ref()
                .map(|c| c.path.clone())
                .unwrap_or_default(),
            commit: self
                .commit
                .as_ref()
                .map(|c| c.path.clone())
                .unwrap_or_default(),
            transform: self
                .transform
                .as_ref()
                .map(|c| c.path.clone())
                .unwrap_or_default(),
            viz: self.viz.as_ref().map(|c| c.path.clone()).unwrap_or_default(),
            readme: self
                .readme
                .as_ref()
                .map(|c| c.path.clone())
                .unwrap_or_default(),
            body_path: self.body_path.clone(),
        }
    }

    /// Reconstructs a dataset from a loaded envelope. Components come back as
    /// address-only stubs; `load_dataset` fills them in.
    pub fn from_envelope(envelope: Envelope, self_path: &str) -> Self {
        let mut ds = Dataset::new();
        ds.qri = envelope.qri;
        ds.name = envelope.name;
        ds.peername = envelope.peername;
        ds.profile_id = envelope.profile_id;
        ds.previous_path = envelope.previous_path;
        ds.body_path = envelope.body_path;
        ds.path = self_path.to_string();

        if !envelope.meta.is_empty() {
            ds.meta = Some(Meta::new_ref(&envelope.meta));
        }
        if !envelope.structure.is_empty() {
            ds.structure = Some(Structure::new_ref(&envelope.structure));
        }
        if !envelope.commit.is_empty() {
            ds.commit = Some(Commit::new_ref(&envelope.commit));
        }
        if !envelope.transform.is_empty() {
            ds.transform = Some(Transform::new_ref(&envelope.transform));
        }
        if !envelope.viz.is_empty() {
            ds.viz = Some(Viz::new_ref(&envelope.viz));
        }
        if !envelope.readme.is_empty() {
            ds.readme = Some(Readme::new_ref(&envelope.readme));
        }

        ds
    }

    /// Serializes the canonical signable form. The structure digest ties the
    /// signature to the schema and stats without inlining them.
    pub fn signable_bytes(&self, structure_digest: &str) -> Result<Vec<u8>> {
        let commit = self.commit.as_ref();

        let signable = SignableDataset {
            timestamp: commit
                .map(|c| c.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true))
                .unwrap_or_default(),
            title: commit.map(|c| c.title.as_str()).unwrap_or(""),
            previous_path: &self.previous_path,
            body_path: &self.body_path,
            structure_digest,
        };

        Ok(serde_json::to_vec(&signable)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyFormat;

    #[test]
    fn assign_overlays_components() {
        let mut base = Dataset::new();
        base.name = "cities".to_string();
        base.meta = Some(Meta::new());
        base.structure = Some(Structure::new(BodyFormat::Csv));

        let mut changes = Dataset::new();
        let mut meta = Meta::new();
        meta.title = Some("new title".to_string());
        changes.meta = Some(meta);

        base.assign(changes);

        assert_eq!("cities", base.name);
        assert_eq!(Some("new title".to_string()), base.meta.unwrap().title);
        // untouched component survives
        assert!(base.structure.is_some());
    }

    #[test]
    fn assign_ignores_empty_fields() {
        let mut base = Dataset::new();
        base.name = "cities".to_string();
        base.previous_path = "/mem/QmPrev".to_string();

        base.assign(Dataset::new());

        assert_eq!("cities", base.name);
        assert_eq!("/mem/QmPrev", base.previous_path);
    }

    #[test]
    fn drop_body_clears_path_and_file() {
        let mut ds = Dataset::new();
        ds.body_path = "/mem/QmBody".to_string();
        ds.body_file = Some(BodyFile::new("cities.csv", b"a,b".to_vec()));

        ds.drop_component(Component::Body);

        assert!(ds.body_path.is_empty());
        assert!(ds.body_file.is_none());
    }

    #[test]
    fn envelope_round_trip() {
        let mut ds = Dataset::new();
        ds.name = "cities".to_string();
        ds.peername = "peer".to_string();
        ds.profile_id = "QmProfile".to_string();
        ds.previous_path = "/mem/QmPrev".to_string();
        ds.body_path = "/mem/QmBody".to_string();
        let mut structure = Structure::new(BodyFormat::Csv);
        structure.path = "/mem/QmStructure".to_string();
        ds.structure = Some(structure);

        let envelope = ds.to_envelope();
        let encoded = serde_json::to_vec(&envelope).unwrap();
        let decoded: Envelope = serde_json::from_slice(&encoded).unwrap();
        let restored = Dataset::from_envelope(decoded, "/mem/QmSelf");

        assert_eq!("cities", restored.name);
        assert_eq!("/mem/QmSelf", restored.path);
        assert_eq!("/mem/QmPrev", restored.previous_path);
        assert_eq!(
            "/mem/QmStructure",
            restored.structure.as_ref().unwrap().path
        );
    }

    #[test]
    fn path_is_never_serialized() {
        let mut ds = Dataset::new();
        ds.path = "/mem/QmSelf".to_string();

        let encoded = serde_json::to_string(&ds.to_envelope()).unwrap();
        assert!(!encoded.contains("QmSelf"));
    }

    #[test]
    fn signable_bytes_are_deterministic() {
        let mut ds = Dataset::new();
        ds.previous_path = "/mem/QmPrev".to_string();
        ds.body_path = "/mem/QmBody".to_string();
        let mut commit = Commit::new();
        commit.title = "initial commit".to_string();
        commit.timestamp = Utc.with_ymd_and_hms(2001, 1, 1, 1, 1, 1).unwrap();
        ds.commit = Some(commit);

        let first = ds.signable_bytes("QmStructureDigest").unwrap();
        let second = ds.signable_bytes("QmStructureDigest").unwrap();
        assert_eq!(first, second);

        let other = ds.signable_bytes("QmOtherDigest").unwrap();
        assert_ne!(first, other);
    }
}
