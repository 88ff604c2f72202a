//! Content-addressed dataset versioning: immutable snapshots in a
//! content-addressed store, an append-only signed logbook for identity and
//! ordering, and format-aware tabular body codecs.
//!
//! Open an in-memory repository as follows:
//!
//! ```rust
//! use std::sync::Arc;
//! use tabula::identity::{seed_from_string, Profile};
//! use tabula::Repo;
//!
//! let owner = Arc::new(Profile::from_seed("peer", seed_from_string("demo key")).unwrap());
//! let repo = Repo::mem_with_system_clock(owner).unwrap();
//! ```

pub use self::body::BodyFormat;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::component::Component;
pub use self::context::{CancelHandle, Context};
pub use self::dataset::{
    BodyFile, Commit, CommitAuthor, Dataset, License, Meta, Readme, Structure, Transform, Viz,
};
pub use self::dsfs::SaveSwitches;
pub use self::error::{Result, TabulaError};
pub use self::history::{ComponentDiff, DiffKind};
pub use self::logbook::{Logbook, Op, OpType, Oplog};
pub use self::reference::DatasetRef;
pub use self::refs::{RefIndex, VersionInfo};
pub use self::repo::Repo;
pub use self::save::SaveTarget;
pub use self::store::ContentStore;

pub mod body;
pub mod clock;
pub mod component;
pub mod consts;
pub mod context;
pub mod dataset;
pub mod detect;
pub mod dsfs;
pub mod error;
pub mod history;
pub mod identity;
pub mod logbook;
pub mod paths;
pub mod reference;
pub mod refs;
pub mod remove;
pub mod repo;
pub mod save;
pub mod store;
