use core::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::consts::VALID_STORE_PREFIXES;
use crate::error::{Result, TabulaError};

static NAME_STRICT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_-]{0,143}$").unwrap());
static NAME_BAD_CASE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]{0,143}$").unwrap());
static REF_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([A-Za-z][A-Za-z0-9_-]{0,143})/([A-Za-z][A-Za-z0-9_-]{0,143})(?:@([1-9A-HJ-NP-Za-km-z]+))?(?:/([a-z]+)/([A-Za-z0-9]+))?$",
    )
    .unwrap()
});

/// Shorthand for the local user in the username position
pub const ME: &str = "me";

/// A reference to a dataset: `username/name[@profileID][/store/hash]`.
/// `init_id` is not part of the string form; it is filled in by resolution
/// and is the only stable identity.
#[derive(Deserialize, Serialize, Debug, Default, Eq, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DatasetRef {
    pub username: String,
    #[serde(rename = "profileID", default, skip_serializing_if = "String::is_empty")]
    pub profile_id: String,
    pub name: String,
    #[serde(rename = "initID", default, skip_serializing_if = "String::is_empty")]
    pub init_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

impl DatasetRef {
    pub fn new(username: &str, name: &str) -> Self {
        Self {
            username: username.to_string(),
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// The human alias `username/name`
    pub fn alias(&self) -> String {
        format!("{}/{}", self.username, self.name)
    }

    /// True when neither a path nor an InitID has been resolved yet
    pub fn is_unresolved(&self) -> bool {
        self.init_id.is_empty() && self.path.is_empty()
    }
}

impl Display for DatasetRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.username, self.name)?;
        if !self.profile_id.is_empty() {
            write!(f, "@{}", self.profile_id)?;
        }
        if !self.path.is_empty() {
            write!(f, "{}", self.path)?;
        }
        Ok(())
    }
}

impl FromStr for DatasetRef {
    type Err = TabulaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_ref(s)
    }
}

/// Parses `username/name[@profileID][/store/hash]`. The username and name are
/// matched leniently here; strict-case enforcement happens at save time so
/// existing bad-case datasets remain addressable.
pub fn parse_ref(s: &str) -> Result<DatasetRef> {
    let captures = REF_REGEX
        .captures(s)
        .ok_or_else(|| TabulaError::IllegalArgument(format!("Invalid dataset reference: {}", s)))?;

    let mut reference = DatasetRef::new(&captures[1], &captures[2]);

    if let Some(profile_id) = captures.get(3) {
        reference.profile_id = profile_id.as_str().to_string();
    }

    if let (Some(store), Some(hash)) = (captures.get(4), captures.get(5)) {
        if !VALID_STORE_PREFIXES.contains(&store.as_str()) {
            return Err(TabulaError::IllegalArgument(format!(
                "Unknown store prefix: {}",
                store.as_str()
            )));
        }
        reference.path = format!("/{}/{}", store.as_str(), hash.as_str());
    }

    Ok(reference)
}

/// Same as `parse_ref` except references carrying a content path are
/// rejected, for call sites that require a human-friendly reference.
pub fn parse_human_ref(s: &str) -> Result<DatasetRef> {
    let reference = parse_ref(s)?;

    if !reference.path.is_empty() {
        return Err(TabulaError::IllegalArgument(format!(
            "References to specific versions are not allowed here: {}",
            s
        )));
    }

    Ok(reference)
}

/// True when the name satisfies the strict lowercase grammar
pub fn is_valid_name(name: &str) -> bool {
    NAME_STRICT_REGEX.is_match(name)
}

/// True when the name is well formed but contains uppercase characters.
/// Bad-case names are only accepted for datasets that already exist.
pub fn is_bad_case_name(name: &str) -> bool {
    !is_valid_name(name) && NAME_BAD_CASE_REGEX.is_match(name)
}

/// Completes a reference in place: `me` becomes the owner's username, and an
/// empty profile ID is filled from the owner or the supplied resolver. A
/// valid explicit profile ID is never rewritten.
pub fn canonicalize_ref(
    reference: &mut DatasetRef,
    owner_username: &str,
    owner_profile_id: &str,
    resolve_profile_id: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if reference.username == ME {
        reference.username = owner_username.to_string();
    }

    if reference.profile_id.is_empty() {
        if reference.username == owner_username {
            reference.profile_id = owner_profile_id.to_string();
        } else if let Some(id) = resolve_profile_id(&reference.username) {
            reference.profile_id = id;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_ref() {
        let reference = parse_ref("peer/cities").unwrap();
        assert_eq!("peer", reference.username);
        assert_eq!("cities", reference.name);
        assert!(reference.profile_id.is_empty());
        assert!(reference.path.is_empty());
    }

    #[test]
    fn parse_full_ref() {
        let reference =
            parse_ref("peer/cities@QmZePf5LeXow3RW5U1AgEiNbW46YnRGhZ7HPvm1UmPFPwt/ipfs/QmHashHash")
                .unwrap();
        assert_eq!("QmZePf5LeXow3RW5U1AgEiNbW46YnRGhZ7HPvm1UmPFPwt", reference.profile_id);
        assert_eq!("/ipfs/QmHashHash", reference.path);
    }

    #[test]
    fn parse_rejects_unknown_store() {
        assert!(parse_ref("peer/cities/floppy/QmHashHash").is_err());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_ref("no-slash").is_err());
        assert!(parse_ref("peer/9starts_with_digit").is_err());
        assert!(parse_ref("").is_err());
    }

    #[test]
    fn human_ref_rejects_paths() {
        assert!(parse_human_ref("peer/cities").is_ok());
        assert!(parse_human_ref("peer/cities/mem/QmHashHash").is_err());
    }

    #[test]
    fn display_round_trips() {
        for s in ["peer/cities", "peer/cities/mem/QmHashHash"] {
            assert_eq!(s, parse_ref(s).unwrap().to_string());
        }
    }

    #[test]
    fn name_case_rules() {
        assert!(is_valid_name("cities"));
        assert!(is_valid_name("a_b-c9"));
        assert!(!is_valid_name("Cities"));
        assert!(is_bad_case_name("Cities"));
        assert!(!is_bad_case_name("cities"));
        assert!(!is_bad_case_name("9cities"));
    }

    #[test]
    fn name_length_limit() {
        let long = "a".repeat(144);
        assert!(is_valid_name(&long));
        let too_long = "a".repeat(145);
        assert!(!is_valid_name(&too_long));
    }

    #[test]
    fn canonicalize_resolves_me() {
        let mut reference = parse_ref("me/cities").unwrap();
        canonicalize_ref(&mut reference, "peer", "QmProfile", |_| None).unwrap();
        assert_eq!("peer", reference.username);
        assert_eq!("QmProfile", reference.profile_id);
    }

    #[test]
    fn canonicalize_keeps_explicit_profile_id() {
        let mut reference = parse_ref("other/cities@QmWzYxVu1111111111111111111111111").unwrap();
        canonicalize_ref(&mut reference, "peer", "QmProfile", |_| {
            Some("QmResolved".to_string())
        })
        .unwrap();
        assert_eq!("QmWzYxVu1111111111111111111111111", reference.profile_id);
    }

    #[test]
    fn canonicalize_fills_profile_id_from_resolver() {
        let mut reference = parse_ref("other/cities").unwrap();
        canonicalize_ref(&mut reference, "peer", "QmProfile", |_| {
            Some("QmResolved".to_string())
        })
        .unwrap();
        assert_eq!("QmResolved", reference.profile_id);
    }
}
