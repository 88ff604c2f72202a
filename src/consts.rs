use std::time::Duration;

pub const ENVELOPE_FILE: &str = "dataset.json";
pub const META_FILE: &str = "meta.json";
pub const STRUCTURE_FILE: &str = "structure.json";
pub const COMMIT_FILE: &str = "commit.json";
pub const TRANSFORM_FILE: &str = "transform.json";
pub const VIZ_FILE: &str = "viz.json";
pub const README_FILE: &str = "readme.md";
pub const VIZ_RENDERED_FILE: &str = "index.html";
pub const README_RENDERED_FILE: &str = "readme.html";
pub const BODY_FILE_PREFIX: &str = "body";

pub const DATASET_MODEL: &str = "ds:0";
pub const META_MODEL: &str = "md:0";
pub const STRUCTURE_MODEL: &str = "st:0";
pub const COMMIT_MODEL: &str = "cm:0";
pub const TRANSFORM_MODEL: &str = "tf:0";
pub const VIZ_MODEL: &str = "vz:0";
pub const README_MODEL: &str = "rm:0";
pub const LOGBOOK_MODEL: &str = "lb:1";

pub const LOGBOOK_FILE: &str = "logbook.cbor";
pub const REFS_FILE: &str = "refs.json";

pub const DEFAULT_COMMIT_TITLE: &str = "initial commit";

/// Maximum length of dataset and user names
pub const MAX_NAME_LEN: usize = 144;

/// Number of characters in a rendered InitID
pub const INIT_ID_LEN: usize = 26;

/// Bounds individual subcomponent loads that might miss locally
pub const OPEN_FILE_TIMEOUT: Duration = Duration::from_millis(250);

/// Soft end-to-end deadline on store fallbacks while walking history
pub const HISTORY_WALK_TIMEOUT: Duration = Duration::from_millis(700);

/// Number of body entries sniffed when inferring a schema
pub const SCHEMA_SNIFF_ENTRIES: usize = 100;

pub const VALID_STORE_PREFIXES: &[&str] = &["ipfs", "mem", "map", "local", "http"];
