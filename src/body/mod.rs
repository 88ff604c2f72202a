use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display as EnumDisplay, EnumString};

use crate::dataset::Structure;
use crate::error::{Result, TabulaError};

pub mod cbor;
pub mod convert;
pub mod csv;
pub mod json;
pub mod xlsx;

/// Enum of the wire formats a dataset body may be stored in
#[derive(
    Deserialize, Serialize, Debug, Hash, Eq, PartialEq, Copy, Clone, EnumString, EnumDisplay,
)]
pub enum BodyFormat {
    #[serde(rename = "csv")]
    #[strum(serialize = "csv")]
    Csv,
    #[serde(rename = "json")]
    #[strum(serialize = "json")]
    Json,
    #[serde(rename = "xlsx")]
    #[strum(serialize = "xlsx")]
    Xlsx,
    #[serde(rename = "cbor")]
    #[strum(serialize = "cbor")]
    Cbor,
}

impl BodyFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            BodyFormat::Csv => "csv",
            BodyFormat::Json => "json",
            BodyFormat::Xlsx => "xlsx",
            BodyFormat::Cbor => "cbor",
        }
    }

    /// The filename the body is persisted under, eg `body.csv`
    pub fn body_filename(&self) -> String {
        format!("{}.{}", crate::consts::BODY_FILE_PREFIX, self.extension())
    }

    /// Detects the format from a filename extension
    pub fn from_filename(filename: &str) -> Option<Self> {
        let extension = Path::new(filename).extension()?.to_str()?;
        extension.to_lowercase().parse().ok()
    }
}

/// One body entry. Entries of array-shaped bodies carry only a value; object
/// shaped bodies additionally carry the entry's key.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: Option<String>,
    pub value: Value,
}

impl Entry {
    pub fn value(value: Value) -> Self {
        Self { key: None, value }
    }

    pub fn keyed(key: &str, value: Value) -> Self {
        Self {
            key: Some(key.to_string()),
            value,
        }
    }
}

/// Streams entries out of an encoded body. `read_entry` returns `Ok(None)`
/// at end of input; EOF is a normal terminator, never an error.
pub trait EntryReader {
    fn read_entry(&mut self) -> Result<Option<Entry>>;
}

/// Streams entries into an encoded body. Writers buffer as their format
/// requires and produce the final bytes only on `finish`.
pub trait EntryWriter {
    fn write_entry(&mut self, entry: Entry) -> Result<()>;
    fn finish(self: Box<Self>) -> Result<Vec<u8>>;
}

/// Constructs a reader for the structure's declared format
pub fn new_entry_reader(structure: &Structure, data: Vec<u8>) -> Result<Box<dyn EntryReader>> {
    Ok(match structure.format {
        BodyFormat::Csv => Box::new(csv::CsvReader::new(structure, data)?),
        BodyFormat::Json => Box::new(json::JsonReader::new(structure, &data)?),
        BodyFormat::Cbor => Box::new(cbor::CborReader::new(structure, &data)?),
        BodyFormat::Xlsx => Box::new(xlsx::XlsxReader::new(structure, data)?),
    })
}

/// Constructs a writer for the structure's declared format
pub fn new_entry_writer(structure: &Structure) -> Result<Box<dyn EntryWriter>> {
    Ok(match structure.format {
        BodyFormat::Csv => Box::new(csv::CsvWriter::new(structure)),
        BodyFormat::Json => Box::new(json::JsonWriter::new(structure)),
        BodyFormat::Cbor => Box::new(cbor::CborWriter::new(structure)),
        BodyFormat::Xlsx => Box::new(xlsx::XlsxWriter::new(structure)),
    })
}

/// Rejects entries whose shape disagrees with the body's top level type
pub(crate) fn check_entry_shape(keyed_body: bool, entry: &Entry) -> Result<()> {
    if keyed_body && entry.key.is_none() {
        return Err(TabulaError::IllegalArgument(
            "Object bodies require keyed entries".to_string(),
        ));
    }
    if !keyed_body && entry.key.is_some() {
        return Err(TabulaError::IllegalArgument(
            "Array bodies do not accept keyed entries".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_filename() {
        assert_eq!(Some(BodyFormat::Csv), BodyFormat::from_filename("cities.csv"));
        assert_eq!(Some(BodyFormat::Json), BodyFormat::from_filename("a/b/data.JSON"));
        assert_eq!(None, BodyFormat::from_filename("noext"));
        assert_eq!(None, BodyFormat::from_filename("data.parquet"));
    }

    #[test]
    fn body_filenames_carry_extensions() {
        assert_eq!("body.cbor", BodyFormat::Cbor.body_filename());
    }
}
