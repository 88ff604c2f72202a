use crate::body::BodyFormat;
use crate::component::Component;
use crate::error::{Result, TabulaError};

/// Splits a content address `/store/hash` into its store prefix and hash
pub fn split_address(path: &str) -> Result<(&str, &str)> {
    let mut parts = path.splitn(3, '/');

    match (parts.next(), parts.next(), parts.next()) {
        (Some(""), Some(store), Some(hash)) if !store.is_empty() && !hash.is_empty() => {
            Ok((store, hash))
        }
        _ => Err(TabulaError::IllegalArgument(format!(
            "Invalid content address: {}",
            path
        ))),
    }
}

/// Joins a store prefix and hash into a content address
pub fn join_address(store: &str, hash: &str) -> String {
    format!("/{}/{}", store, hash)
}

/// Derives the store path of a snapshot subcomponent, eg
/// `/mem/QmHash/meta.json`. The body's filename carries the declared format's
/// extension, so it must be supplied for `Component::Body`.
pub fn component_path(
    snapshot_path: &str,
    component: Component,
    body_format: Option<BodyFormat>,
) -> Result<String> {
    let filename = match component.filename() {
        Some(filename) => filename.to_string(),
        None => match body_format {
            Some(format) => format.body_filename(),
            None => {
                return Err(TabulaError::IllegalArgument(
                    "Body paths require a declared format".to_string(),
                ))
            }
        },
    };

    // Validates the address shape before deriving from it
    split_address(snapshot_path)?;

    Ok(format!("{}/{}", snapshot_path, filename))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_valid_address() {
        let (store, hash) = split_address("/mem/QmHash").unwrap();
        assert_eq!("mem", store);
        assert_eq!("QmHash", hash);
    }

    #[test]
    fn split_rejects_malformed() {
        assert!(split_address("mem/QmHash").is_err());
        assert!(split_address("/mem/").is_err());
        assert!(split_address("/QmHash").is_err());
    }

    #[test]
    fn derive_component_paths() {
        assert_eq!(
            "/mem/QmHash/meta.json",
            component_path("/mem/QmHash", Component::Meta, None).unwrap()
        );
        assert_eq!(
            "/mem/QmHash/body.csv",
            component_path("/mem/QmHash", Component::Body, Some(BodyFormat::Csv)).unwrap()
        );
        assert!(component_path("/mem/QmHash", Component::Body, None).is_err());
    }
}
