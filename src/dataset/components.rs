use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::body::BodyFormat;
use crate::consts::*;

/// Descriptive, human-oriented metadata
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub qri: String,
    #[serde(skip)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrual_periodicity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<License>,
    /// Arbitrary user extensions, kept sorted for canonical serialization
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct License {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub license_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

impl Meta {
    pub fn new() -> Self {
        Self {
            qri: META_MODEL.to_string(),
            ..Self::default()
        }
    }

    /// A stub carrying only the component's content address
    pub fn new_ref(path: &str) -> Self {
        Self {
            path: path.to_string(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.keywords.is_none()
            && self.accrual_periodicity.is_none()
            && self.license.is_none()
            && self.extra.is_empty()
    }
}

/// Declares the body's wire format, its schema, and stats derived while the
/// body was last written.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Structure {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub qri: String,
    #[serde(skip)]
    pub path: String,
    pub format: BodyFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_config: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub entries: u64,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub length: u64,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub depth: u32,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub err_count: u64,
}

fn is_zero_u64(n: &u64) -> bool {
    *n == 0
}

fn is_zero_u32(n: &u32) -> bool {
    *n == 0
}

impl Structure {
    pub fn new(format: BodyFormat) -> Self {
        Self {
            qri: STRUCTURE_MODEL.to_string(),
            path: String::new(),
            format,
            format_config: None,
            schema: None,
            entries: 0,
            length: 0,
            depth: 0,
            err_count: 0,
        }
    }

    /// A stub carrying only the component's content address. The format is a
    /// placeholder until the component is loaded.
    pub fn new_ref(path: &str) -> Self {
        let mut structure = Self::new(BodyFormat::Json);
        structure.qri = String::new();
        structure.path = path.to_string();
        structure
    }

    /// True when the schema's top level type is `object`, meaning body
    /// entries are keyed
    pub fn is_keyed(&self) -> bool {
        matches!(
            self.schema.as_ref().and_then(|s| s.get("type")).and_then(Value::as_str),
            Some("object")
        )
    }

    fn config_flag(&self, key: &str) -> bool {
        self.format_config
            .as_ref()
            .and_then(|config| config.get(key))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// CSV format config: whether the first row is a header
    pub fn header_row(&self) -> bool {
        self.config_flag("headerRow")
    }

    /// JSON format config: pretty-printing is an opt-in; default is compact
    pub fn pretty(&self) -> bool {
        self.config_flag("pretty")
    }

    /// Derives a new structure with the same schema but a different wire
    /// format, for cross-format body conversion.
    pub fn with_format(&self, format: BodyFormat) -> Self {
        let mut converted = self.clone();
        converted.format = format;
        converted.path = String::new();
        if format != BodyFormat::Csv {
            converted.format_config = None;
        }
        converted
    }
}

/// References to a transform script and its configuration
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Transform {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub qri: String,
    #[serde(skip)]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub script_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<BTreeMap<String, String>>,
    /// Pending script bytes, written to the store at save time
    #[serde(skip)]
    pub script: Option<Vec<u8>>,
}

impl Transform {
    pub fn new() -> Self {
        Self {
            qri: TRANSFORM_MODEL.to_string(),
            ..Self::default()
        }
    }

    pub fn new_ref(path: &str) -> Self {
        Self {
            path: path.to_string(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.script_path.is_empty()
            && self.config.is_none()
            && self.secrets.is_none()
            && self.script.is_none()
    }
}

/// A visualization script and its rendered output
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Viz {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub qri: String,
    #[serde(skip)]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub script_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rendered_path: String,
    #[serde(skip)]
    pub script: Option<Vec<u8>>,
}

impl Viz {
    pub fn new() -> Self {
        Self {
            qri: VIZ_MODEL.to_string(),
            format: "html".to_string(),
            ..Self::default()
        }
    }

    pub fn new_ref(path: &str) -> Self {
        Self {
            path: path.to_string(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.script_path.is_empty() && self.script.is_none()
    }
}

/// A markdown readme and its rendered output
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Readme {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub qri: String,
    #[serde(skip)]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub script_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rendered_path: String,
    #[serde(skip)]
    pub script: Option<Vec<u8>>,
}

impl Readme {
    pub fn new() -> Self {
        Self {
            qri: README_MODEL.to_string(),
            format: "md".to_string(),
            ..Self::default()
        }
    }

    pub fn new_ref(path: &str) -> Self {
        Self {
            path: path.to_string(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.script_path.is_empty() && self.script.is_none()
    }
}

#[cfg(test)]
mod tests {
    use maplit::btreemap;
    use serde_json::json;

    use super::*;

    #[test]
    fn meta_extra_fields_round_trip() {
        let mut meta = Meta::new();
        meta.title = Some("a title".to_string());
        meta.extra = btreemap! {
            "spatial".to_string() => json!("nyc"),
        };

        let encoded = serde_json::to_string(&meta).unwrap();
        let decoded: Meta = serde_json::from_str(&encoded).unwrap();

        assert_eq!(meta, decoded);
        assert!(encoded.contains("spatial"));
    }

    #[test]
    fn structure_keyed_detection() {
        let mut structure = Structure::new(BodyFormat::Json);
        assert!(!structure.is_keyed());

        structure.schema = Some(json!({"type": "object"}));
        assert!(structure.is_keyed());

        structure.schema = Some(json!({"type": "array"}));
        assert!(!structure.is_keyed());
    }

    #[test]
    fn structure_omits_zero_stats() {
        let structure = Structure::new(BodyFormat::Csv);
        let encoded = serde_json::to_string(&structure).unwrap();
        assert!(!encoded.contains("entries"));
        assert!(!encoded.contains("errCount"));
    }

    #[test]
    fn empty_transform_detection() {
        assert!(Transform::new().is_empty());

        let mut transform = Transform::new();
        transform.script_path = "/mem/QmScript".to_string();
        assert!(!transform.is_empty());
    }
}
