use serde_json::{Map, Value};

use crate::body::{new_entry_reader, new_entry_writer};
use crate::dataset::Structure;
use crate::error::Result;

/// Streams a body from its source format into the destination format.
/// Pass-through conversion (same format on both sides) still re-serializes,
/// which normalizes the encoding.
pub fn convert_body_format(data: Vec<u8>, src: &Structure, dst: &Structure) -> Result<Vec<u8>> {
    let mut reader = new_entry_reader(src, data)?;
    let mut writer = new_entry_writer(dst)?;

    while let Some(entry) = reader.read_entry()? {
        writer.write_entry(entry)?;
    }

    writer.finish()
}

/// Paged body read: skips `offset` entries and emits at most `limit`,
/// serialized in the destination structure's format. `all` ignores paging.
pub fn read_body(
    data: Vec<u8>,
    src: &Structure,
    dst: &Structure,
    limit: usize,
    offset: usize,
    all: bool,
) -> Result<Vec<u8>> {
    let mut reader = new_entry_reader(src, data)?;
    let mut writer = new_entry_writer(dst)?;

    let mut index = 0usize;
    let mut taken = 0usize;

    while let Some(entry) = reader.read_entry()? {
        if !all {
            if index < offset {
                index += 1;
                continue;
            }
            if taken >= limit {
                break;
            }
        }

        writer.write_entry(entry)?;
        index += 1;
        taken += 1;
    }

    writer.finish()
}

/// Like `read_body` but returns a native structured value: an array of rows,
/// or an object of keyed rows when the schema's top level type is `object`.
pub fn get_body(
    data: Vec<u8>,
    structure: &Structure,
    limit: usize,
    offset: usize,
    all: bool,
) -> Result<Value> {
    let mut reader = new_entry_reader(structure, data)?;
    let keyed = structure.is_keyed();

    let mut rows = Vec::new();
    let mut object = Map::new();

    let mut index = 0usize;
    let mut taken = 0usize;

    while let Some(entry) = reader.read_entry()? {
        if !all {
            if index < offset {
                index += 1;
                continue;
            }
            if taken >= limit {
                break;
            }
        }

        match entry.key {
            Some(key) if keyed => {
                object.insert(key, entry.value);
            }
            _ => rows.push(entry.value),
        }

        index += 1;
        taken += 1;
    }

    Ok(if keyed {
        Value::Object(object)
    } else {
        Value::Array(rows)
    })
}
