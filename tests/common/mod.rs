#![allow(dead_code)]

use std::sync::Arc;

use tabula::identity::{seed_from_string, Profile};
use tabula::{BodyFile, Context, Dataset, FixedClock, Repo, SaveSwitches};

pub const CITIES_CSV: &[u8] = b"city,pop,avg_age,is_big\nny,8500000,44.4,true\n";

pub fn profile(username: &str) -> Arc<Profile> {
    Arc::new(Profile::from_seed(username, seed_from_string(&format!("{} test key", username))).unwrap())
}

/// An in-memory repository with a pinned clock for deterministic commits
pub fn mem_repo(username: &str) -> Repo {
    let _ = env_logger::builder().is_test(true).try_init();
    Repo::mem(profile(username), Arc::new(FixedClock::default_epoch())).unwrap()
}

pub fn csv_changes(filename: &str, body: &[u8]) -> Dataset {
    let mut changes = Dataset::new();
    changes.body_file = Some(BodyFile::new(filename, body.to_vec()));
    changes
}

pub fn save(repo: &Repo, ref_str: &str, changes: Dataset) -> tabula::Result<Dataset> {
    repo.save(
        &Context::background(),
        ref_str,
        changes,
        &SaveSwitches::default(),
        false,
    )
}
