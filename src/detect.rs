use std::path::Path;

use log::debug;
use once_cell::sync::Lazy;
use serde_json::{json, Value};

use crate::body::{new_entry_reader, BodyFormat};
use crate::consts::SCHEMA_SNIFF_ENTRIES;
use crate::dataset::{BodyFile, Commit, CommitAuthor, Dataset, Structure};
use crate::error::{Result, TabulaError};
use crate::identity::Profile;
use crate::reference;

/// Default schema for bodies whose top level is an array
pub static BASE_SCHEMA_ARRAY: Lazy<Value> = Lazy::new(|| json!({"type": "array"}));

/// Default schema for bodies whose top level is an object
pub static BASE_SCHEMA_OBJECT: Lazy<Value> = Lazy::new(|| json!({"type": "object"}));

/// One body validation failure
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaError {
    pub path: String,
    pub message: String,
}

/// Fills in fields a partial dataset is missing before assembly: the commit
/// author, and, when a body is attached without a declared structure or
/// schema, a structure detected from the body itself. Empty transforms are
/// cleared.
pub fn infer_values(author: &Profile, ds: &mut Dataset) -> Result<()> {
    let commit = ds.commit.get_or_insert_with(Commit::new);
    if commit.author.is_none() {
        commit.author = Some(CommitAuthor {
            id: author.id.clone(),
        });
    }

    let needs_structure = ds.structure.is_none();
    let needs_schema = ds
        .structure
        .as_ref()
        .map(|s| s.schema.is_none())
        .unwrap_or(false);

    if (needs_structure || needs_schema) && ds.body_file.is_some() {
        let detected = detect_structure(ds.body_file.as_ref().unwrap())?;
        debug!(
            "Detected {} body for {}",
            detected.format,
            ds.body_file.as_ref().unwrap().filename
        );

        match ds.structure.as_mut() {
            Some(structure) => {
                structure.schema = detected.schema;
                if structure.format_config.is_none() {
                    structure.format_config = detected.format_config;
                }
            }
            None => ds.structure = Some(detected),
        }
    }

    if let Some(transform) = &ds.transform {
        if transform.is_empty() {
            ds.transform = None;
        }
    }

    Ok(())
}

/// Derives a variable-safe dataset name from the body filename when no name
/// is set. Returns true if a name was assigned.
pub fn maybe_infer_name(ds: &mut Dataset) -> bool {
    if !ds.name.is_empty() {
        return false;
    }

    let filename = match &ds.body_file {
        Some(body_file) => &body_file.filename,
        None => return false,
    };

    ds.name = name_from_filename(filename);
    !ds.name.is_empty()
}

/// Maps a filename to a valid dataset name: the stem with illegal characters
/// replaced, prefixed with `dataset_` when the first rune is not a lowercase
/// letter.
pub fn name_from_filename(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    if stem.is_empty() {
        return String::new();
    }

    let mut name: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if !name.chars().next().unwrap().is_ascii_lowercase() {
        name = format!("dataset_{}", name);
    }

    name.truncate(crate::consts::MAX_NAME_LEN);
    name
}

/// Structural validation ahead of assembly. Bad-case names pass here so
/// existing datasets stay addressable; strict-case enforcement for new
/// datasets happens during save-ref preparation.
pub fn validate_dataset(ds: &Dataset) -> Result<()> {
    if ds.name.is_empty() {
        return Err(TabulaError::IllegalArgument(
            "Dataset name is required".to_string(),
        ));
    }
    if !reference::is_valid_name(&ds.name) && !reference::is_bad_case_name(&ds.name) {
        return Err(TabulaError::IllegalArgument(format!(
            "Invalid dataset name: {}",
            ds.name
        )));
    }
    if ds.peername.is_empty() {
        return Err(TabulaError::IllegalArgument(
            "Dataset peername is required".to_string(),
        ));
    }

    if ds.body_file.is_some() && ds.structure.is_none() {
        return Err(TabulaError::IllegalState(
            "Datasets with a body require a structure".to_string(),
        ));
    }

    if let Some(body_file) = &ds.body_file {
        if let (Some(structure), Some(detected)) = (
            ds.structure.as_ref(),
            BodyFormat::from_filename(&body_file.filename),
        ) {
            if structure.format != detected {
                return Err(TabulaError::IllegalArgument(format!(
                    "Structure format {} does not match body file {}",
                    structure.format, body_file.filename
                )));
            }
        }
    }

    Ok(())
}

/// Runs JSON-schema validation over a body, transcoding it to JSON first
/// when its wire format is not JSON. Returns one error per failing entry
/// location; an empty vector means the body is valid.
pub fn validate_body(structure: &Structure, data: Vec<u8>) -> Result<Vec<SchemaError>> {
    let schema = match &structure.schema {
        Some(schema) => schema.clone(),
        None => return Ok(Vec::new()),
    };

    let instance = crate::body::convert::get_body(data, structure, 0, 0, true)?;

    let compiled = jsonschema::JSONSchema::compile(&schema)
        .map_err(|e| TabulaError::IllegalArgument(format!("Invalid schema: {}", e)))?;

    let mut errors = Vec::new();
    if let Err(failures) = compiled.validate(&instance) {
        for failure in failures {
            errors.push(SchemaError {
                path: failure.instance_path.to_string(),
                message: failure.to_string(),
            });
        }
    }

    Ok(errors)
}

/// Detects a structure from an attached body: the format comes from the
/// filename extension and the schema from streaming a prefix of the body
/// through the format's reader.
pub fn detect_structure(body_file: &BodyFile) -> Result<Structure> {
    let format = BodyFormat::from_filename(&body_file.filename).ok_or_else(|| {
        TabulaError::IllegalArgument(format!(
            "Cannot detect body format from filename: {}",
            body_file.filename
        ))
    })?;

    let mut structure = Structure::new(format);

    match format {
        BodyFormat::Csv => detect_csv(&mut structure, &body_file.data)?,
        BodyFormat::Xlsx => {
            structure.schema = Some(BASE_SCHEMA_ARRAY.clone());
        }
        BodyFormat::Json | BodyFormat::Cbor => {
            structure.schema = Some(detect_top_level(&structure, &body_file.data)?);
        }
    }

    Ok(structure)
}

fn detect_top_level(structure: &Structure, data: &[u8]) -> Result<Value> {
    // A keyed reader refuses scalar bodies, so a successful open means the
    // top level is an array or an object
    let keyed = match structure.format {
        BodyFormat::Json => serde_json::from_slice::<Value>(data)?.is_object(),
        _ => matches!(
            serde_cbor::from_slice::<serde_cbor::Value>(data)?,
            serde_cbor::Value::Map(_)
        ),
    };

    Ok(if keyed {
        BASE_SCHEMA_OBJECT.clone()
    } else {
        BASE_SCHEMA_ARRAY.clone()
    })
}

/// Sniffs a CSV body: decides whether the first row is a header and derives
/// per-column titles and types from a prefix of the rows.
fn detect_csv(structure: &mut Structure, data: &[u8]) -> Result<()> {
    // Read raw rows without header handling so the first row is visible
    let mut sniff = Structure::new(BodyFormat::Csv);
    sniff.schema = None;
    let mut reader = new_entry_reader(&sniff, data.to_vec())?;

    let mut rows: Vec<Vec<Value>> = Vec::new();
    while rows.len() < SCHEMA_SNIFF_ENTRIES {
        match reader.read_entry()? {
            Some(entry) => match entry.value {
                Value::Array(cells) => rows.push(cells),
                _ => break,
            },
            None => break,
        }
    }

    if rows.is_empty() {
        structure.schema = Some(BASE_SCHEMA_ARRAY.clone());
        return Ok(());
    }

    let header_row = looks_like_header(&rows);
    let type_row = if header_row && rows.len() > 1 { 1 } else { 0 };

    let columns: Vec<Value> = rows[type_row]
        .iter()
        .enumerate()
        .map(|(index, cell)| {
            let title = if header_row {
                rows[0]
                    .get(index)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("field_{}", index + 1))
            } else {
                format!("field_{}", index + 1)
            };

            json!({"title": title, "type": value_type_name(cell)})
        })
        .collect();

    if header_row {
        let mut config = serde_json::Map::new();
        config.insert("headerRow".to_string(), json!(true));
        structure.format_config = Some(config);
    }

    structure.schema = Some(json!({
        "type": "array",
        "items": {
            "type": "array",
            "items": columns,
        }
    }));

    Ok(())
}

/// The first row is treated as a header when it is all strings and a later
/// row carries at least one non-string cell
fn looks_like_header(rows: &[Vec<Value>]) -> bool {
    let first_all_strings = rows[0].iter().all(|cell| cell.is_string());

    first_all_strings
        && rows
            .iter()
            .skip(1)
            .any(|row| row.iter().any(|cell| !cell.is_string()))
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::seed_from_string;

    fn cities_body() -> BodyFile {
        BodyFile::new(
            "cities.csv",
            b"city,pop,avg_age,is_big\nny,8500000,44.4,true\n".to_vec(),
        )
    }

    #[test]
    fn detect_csv_header_and_types() {
        let structure = detect_structure(&cities_body()).unwrap();

        assert_eq!(BodyFormat::Csv, structure.format);
        assert!(structure.header_row());

        let columns = structure
            .schema
            .as_ref()
            .unwrap()
            .pointer("/items/items")
            .unwrap()
            .as_array()
            .unwrap();
        assert_eq!(4, columns.len());
        assert_eq!("city", columns[0]["title"]);
        assert_eq!("integer", columns[1]["type"]);
        assert_eq!("number", columns[2]["type"]);
        assert_eq!("boolean", columns[3]["type"]);
    }

    #[test]
    fn detect_csv_without_header() {
        let body = BodyFile::new("rows.csv", b"1,2\n3,4\n".to_vec());
        let structure = detect_structure(&body).unwrap();

        assert!(!structure.header_row());
        let columns = structure
            .schema
            .as_ref()
            .unwrap()
            .pointer("/items/items")
            .unwrap()
            .as_array()
            .unwrap();
        assert_eq!("field_1", columns[0]["title"]);
    }

    #[test]
    fn detect_json_top_level() {
        let array = BodyFile::new("a.json", b"[[1]]".to_vec());
        assert_eq!(
            Some(&*BASE_SCHEMA_ARRAY),
            detect_structure(&array).unwrap().schema.as_ref()
        );

        let object = BodyFile::new("o.json", br#"{"k":1}"#.to_vec());
        assert_eq!(
            Some(&*BASE_SCHEMA_OBJECT),
            detect_structure(&object).unwrap().schema.as_ref()
        );
    }

    #[test]
    fn detect_rejects_unknown_extension() {
        let body = BodyFile::new("data.parquet", Vec::new());
        assert!(detect_structure(&body).is_err());
    }

    #[test]
    fn infer_name_rules() {
        assert_eq!("cities", name_from_filename("cities.csv"));
        assert_eq!("dataset_Cities", name_from_filename("Cities.csv"));
        assert_eq!("dataset_2019_data", name_from_filename("2019 data.csv"));
        assert_eq!("more_water", name_from_filename("more water.csv"));
    }

    #[test]
    fn infer_name_only_when_unset() {
        let mut ds = Dataset::new();
        ds.body_file = Some(cities_body());
        assert!(maybe_infer_name(&mut ds));
        assert_eq!("cities", ds.name);

        ds.name = "existing".to_string();
        assert!(!maybe_infer_name(&mut ds));
        assert_eq!("existing", ds.name);
    }

    #[test]
    fn infer_values_fills_author_and_structure() {
        let author = Profile::from_seed("peer", seed_from_string("detect test key")).unwrap();
        let mut ds = Dataset::new();
        ds.body_file = Some(cities_body());

        infer_values(&author, &mut ds).unwrap();

        assert_eq!(
            author.id,
            ds.commit.as_ref().unwrap().author.as_ref().unwrap().id
        );
        assert!(ds.structure.is_some());
        assert!(ds.structure.as_ref().unwrap().schema.is_some());
    }

    #[test]
    fn infer_values_clears_empty_transform() {
        let author = Profile::from_seed("peer", seed_from_string("detect test key")).unwrap();
        let mut ds = Dataset::new();
        ds.transform = Some(crate::dataset::Transform::new());

        infer_values(&author, &mut ds).unwrap();
        assert!(ds.transform.is_none());
    }

    #[test]
    fn validate_body_reports_schema_failures() {
        let mut structure = Structure::new(BodyFormat::Json);
        structure.schema = Some(json!({
            "type": "array",
            "items": {"type": "array"}
        }));

        let errors = validate_body(&structure, br#"[[1],"not an array"]"#.to_vec()).unwrap();
        assert_eq!(1, errors.len());
        assert!(errors[0].path.contains('1'));
    }

    #[test]
    fn validate_dataset_requires_matching_format() {
        let mut ds = Dataset::new();
        ds.name = "cities".to_string();
        ds.peername = "peer".to_string();
        ds.structure = Some(Structure::new(BodyFormat::Json));
        ds.body_file = Some(cities_body());

        assert!(validate_dataset(&ds).is_err());
    }
}
