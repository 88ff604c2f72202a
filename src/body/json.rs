use serde_json::{Map, Value};

use crate::body::{check_entry_shape, Entry, EntryReader, EntryWriter};
use crate::dataset::Structure;
use crate::error::{Result, TabulaError};

enum JsonEntries {
    Array(std::vec::IntoIter<Value>),
    Object(serde_json::map::IntoIter),
}

/// Streams entries out of a JSON body. Arrays yield plain entries, objects
/// yield keyed entries.
pub struct JsonReader {
    entries: JsonEntries,
}

impl JsonReader {
    pub fn new(_structure: &Structure, data: &[u8]) -> Result<Self> {
        let body: Value = serde_json::from_slice(data)?;

        let entries = match body {
            Value::Array(values) => JsonEntries::Array(values.into_iter()),
            Value::Object(map) => JsonEntries::Object(map.into_iter()),
            other => {
                return Err(TabulaError::IllegalArgument(format!(
                    "JSON bodies must be arrays or objects, got: {}",
                    other
                )))
            }
        };

        Ok(Self { entries })
    }
}

impl EntryReader for JsonReader {
    fn read_entry(&mut self) -> Result<Option<Entry>> {
        Ok(match &mut self.entries {
            JsonEntries::Array(iter) => iter.next().map(Entry::value),
            JsonEntries::Object(iter) => iter.next().map(|(key, value)| Entry::keyed(&key, value)),
        })
    }
}

enum JsonCollector {
    Array(Vec<Value>),
    Object(Map<String, Value>),
}

/// Streams entries into a JSON body. Output is compact unless the format
/// config opts into pretty-printing.
pub struct JsonWriter {
    collector: JsonCollector,
    pretty: bool,
}

impl JsonWriter {
    pub fn new(structure: &Structure) -> Self {
        let collector = if structure.is_keyed() {
            JsonCollector::Object(Map::new())
        } else {
            JsonCollector::Array(Vec::new())
        };

        Self {
            collector,
            pretty: structure.pretty(),
        }
    }
}

impl EntryWriter for JsonWriter {
    fn write_entry(&mut self, entry: Entry) -> Result<()> {
        match &mut self.collector {
            JsonCollector::Array(values) => {
                check_entry_shape(false, &entry)?;
                values.push(entry.value);
            }
            JsonCollector::Object(map) => {
                check_entry_shape(true, &entry)?;
                map.insert(entry.key.unwrap(), entry.value);
            }
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>> {
        let body = match self.collector {
            JsonCollector::Array(values) => Value::Array(values),
            JsonCollector::Object(map) => Value::Object(map),
        };

        let encoded = if self.pretty {
            serde_json::to_vec_pretty(&body)?
        } else {
            serde_json::to_vec(&body)?
        };

        Ok(encoded)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::body::BodyFormat;

    #[test]
    fn read_array_body() {
        let structure = Structure::new(BodyFormat::Json);
        let mut reader = JsonReader::new(&structure, br#"[["x","y"],["z","w"]]"#).unwrap();

        assert_eq!(json!(["x", "y"]), reader.read_entry().unwrap().unwrap().value);
        assert_eq!(json!(["z", "w"]), reader.read_entry().unwrap().unwrap().value);
        assert!(reader.read_entry().unwrap().is_none());
    }

    #[test]
    fn read_object_body_yields_keys() {
        let structure = Structure::new(BodyFormat::Json);
        let mut reader = JsonReader::new(&structure, br#"{"a":1,"b":2}"#).unwrap();

        let entry = reader.read_entry().unwrap().unwrap();
        assert_eq!(Some("a".to_string()), entry.key);
        assert_eq!(json!(1), entry.value);
    }

    #[test]
    fn read_rejects_scalar_bodies() {
        let structure = Structure::new(BodyFormat::Json);
        assert!(JsonReader::new(&structure, b"42").is_err());
    }

    #[test]
    fn write_compact_by_default() {
        let structure = Structure::new(BodyFormat::Json);
        let mut writer = Box::new(JsonWriter::new(&structure));
        writer.write_entry(Entry::value(json!([1, 2]))).unwrap();

        let encoded = writer.finish().unwrap();
        assert_eq!(br#"[[1,2]]"#.to_vec(), encoded);
    }

    #[test]
    fn write_pretty_is_an_opt_in() {
        let mut structure = Structure::new(BodyFormat::Json);
        let mut config = serde_json::Map::new();
        config.insert("pretty".to_string(), json!(true));
        structure.format_config = Some(config);

        let mut writer = Box::new(JsonWriter::new(&structure));
        writer.write_entry(Entry::value(json!([1]))).unwrap();

        let encoded = String::from_utf8(writer.finish().unwrap()).unwrap();
        assert!(encoded.contains('\n'));
    }

    #[test]
    fn write_keyed_body() {
        let mut structure = Structure::new(BodyFormat::Json);
        structure.schema = Some(json!({"type": "object"}));

        let mut writer = Box::new(JsonWriter::new(&structure));
        writer.write_entry(Entry::keyed("row1", json!(1))).unwrap();

        let encoded = writer.finish().unwrap();
        assert_eq!(br#"{"row1":1}"#.to_vec(), encoded);
    }
}
