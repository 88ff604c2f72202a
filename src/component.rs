use serde::{Deserialize, Serialize};
use strum_macros::{Display as EnumDisplay, EnumString};

use crate::consts::*;
use crate::error::{Result, TabulaError};

/// Enum of dataset components, keyed by their two-letter short codes. The
/// short codes appear in drop lists and rev selectors.
#[derive(
    Deserialize, Serialize, Debug, Hash, Eq, PartialEq, Copy, Clone, EnumString, EnumDisplay,
)]
pub enum Component {
    #[serde(rename = "ds")]
    #[strum(serialize = "ds")]
    Dataset,
    #[serde(rename = "md")]
    #[strum(serialize = "md")]
    Meta,
    #[serde(rename = "st")]
    #[strum(serialize = "st")]
    Structure,
    #[serde(rename = "cm")]
    #[strum(serialize = "cm")]
    Commit,
    #[serde(rename = "tf")]
    #[strum(serialize = "tf")]
    Transform,
    #[serde(rename = "vz")]
    #[strum(serialize = "vz")]
    Viz,
    #[serde(rename = "rm")]
    #[strum(serialize = "rm")]
    Readme,
    #[serde(rename = "bd")]
    #[strum(serialize = "bd")]
    Body,
}

impl Component {
    /// The filename the component is persisted under, or `None` for the body,
    /// whose filename depends on the declared format.
    pub fn filename(&self) -> Option<&'static str> {
        match self {
            Component::Dataset => Some(ENVELOPE_FILE),
            Component::Meta => Some(META_FILE),
            Component::Structure => Some(STRUCTURE_FILE),
            Component::Commit => Some(COMMIT_FILE),
            Component::Transform => Some(TRANSFORM_FILE),
            Component::Viz => Some(VIZ_FILE),
            Component::Readme => Some(README_FILE),
            Component::Body => None,
        }
    }
}

/// Parses a comma-separated list of component short codes, eg `md,st,bd`
pub fn parse_component_list(list: &str) -> Result<Vec<Component>> {
    let mut components = Vec::new();

    for code in list.split(',') {
        let code = code.trim();
        if code.is_empty() {
            continue;
        }

        let component = code.parse::<Component>().map_err(|_| {
            TabulaError::IllegalArgument(format!("Unknown component code: {}", code))
        })?;

        if !components.contains(&component) {
            components.push(component);
        }
    }

    Ok(components)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_component_codes() {
        assert_eq!(
            vec![Component::Meta, Component::Structure, Component::Body],
            parse_component_list("md,st,bd").unwrap()
        );
    }

    #[test]
    fn parse_dedupes_and_skips_blanks() {
        assert_eq!(
            vec![Component::Meta],
            parse_component_list("md, ,md").unwrap()
        );
    }

    #[test]
    fn parse_rejects_unknown_codes() {
        assert!(parse_component_list("md,zz").is_err());
    }
}
