use serde_cbor::Value as CborValue;
use serde_json::{Map, Value};

use crate::body::{check_entry_shape, Entry, EntryReader, EntryWriter};
use crate::dataset::Structure;
use crate::error::{Result, TabulaError};

enum CborEntries {
    Array(std::vec::IntoIter<CborValue>),
    Object(std::collections::btree_map::IntoIter<CborValue, CborValue>),
}

/// Streams entries out of a CBOR body
pub struct CborReader {
    entries: CborEntries,
}

impl CborReader {
    pub fn new(_structure: &Structure, data: &[u8]) -> Result<Self> {
        let body: CborValue = serde_cbor::from_slice(data)?;

        let entries = match body {
            CborValue::Array(values) => CborEntries::Array(values.into_iter()),
            CborValue::Map(map) => CborEntries::Object(map.into_iter()),
            _ => {
                return Err(TabulaError::IllegalArgument(
                    "CBOR bodies must be arrays or maps".to_string(),
                ))
            }
        };

        Ok(Self { entries })
    }
}

impl EntryReader for CborReader {
    fn read_entry(&mut self) -> Result<Option<Entry>> {
        match &mut self.entries {
            CborEntries::Array(iter) => match iter.next() {
                Some(value) => Ok(Some(Entry::value(cbor_to_json(value)?))),
                None => Ok(None),
            },
            CborEntries::Object(iter) => match iter.next() {
                Some((key, value)) => {
                    let key = match key {
                        CborValue::Text(text) => text,
                        other => {
                            return Err(TabulaError::IllegalArgument(format!(
                                "CBOR map keys must be text, got: {:?}",
                                other
                            )))
                        }
                    };
                    Ok(Some(Entry::keyed(&key, cbor_to_json(value)?)))
                }
                None => Ok(None),
            },
        }
    }
}

enum CborCollector {
    Array(Vec<CborValue>),
    Object(std::collections::BTreeMap<CborValue, CborValue>),
}

/// Streams entries into a CBOR body
pub struct CborWriter {
    collector: CborCollector,
}

impl CborWriter {
    pub fn new(structure: &Structure) -> Self {
        let collector = if structure.is_keyed() {
            CborCollector::Object(std::collections::BTreeMap::new())
        } else {
            CborCollector::Array(Vec::new())
        };

        Self { collector }
    }
}

impl EntryWriter for CborWriter {
    fn write_entry(&mut self, entry: Entry) -> Result<()> {
        match &mut self.collector {
            CborCollector::Array(values) => {
                check_entry_shape(false, &entry)?;
                values.push(json_to_cbor(entry.value));
            }
            CborCollector::Object(map) => {
                check_entry_shape(true, &entry)?;
                map.insert(
                    CborValue::Text(entry.key.unwrap()),
                    json_to_cbor(entry.value),
                );
            }
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>> {
        let body = match self.collector {
            CborCollector::Array(values) => CborValue::Array(values),
            CborCollector::Object(map) => CborValue::Map(map),
        };

        Ok(serde_cbor::to_vec(&body)?)
    }
}

fn json_to_cbor(value: Value) -> CborValue {
    match value {
        Value::Null => CborValue::Null,
        Value::Bool(b) => CborValue::Bool(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                CborValue::Integer(i as i128)
            } else {
                CborValue::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => CborValue::Text(s),
        Value::Array(values) => CborValue::Array(values.into_iter().map(json_to_cbor).collect()),
        Value::Object(map) => CborValue::Map(
            map.into_iter()
                .map(|(key, value)| (CborValue::Text(key), json_to_cbor(value)))
                .collect(),
        ),
    }
}

fn cbor_to_json(value: CborValue) -> Result<Value> {
    Ok(match value {
        CborValue::Null => Value::Null,
        CborValue::Bool(b) => Value::Bool(b),
        CborValue::Integer(i) => Value::from(i64::try_from(i).map_err(|_| {
            TabulaError::IllegalArgument("CBOR integer exceeds 64 bits".to_string())
        })?),
        CborValue::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        CborValue::Text(text) => Value::String(text),
        CborValue::Bytes(bytes) => Value::String(hex::encode(bytes)),
        CborValue::Array(values) => Value::Array(
            values
                .into_iter()
                .map(cbor_to_json)
                .collect::<Result<Vec<Value>>>()?,
        ),
        CborValue::Map(map) => {
            let mut object = Map::new();
            for (key, value) in map {
                let key = match key {
                    CborValue::Text(text) => text,
                    other => format!("{:?}", other),
                };
                object.insert(key, cbor_to_json(value)?);
            }
            Value::Object(object)
        }
        _ => {
            return Err(TabulaError::IllegalArgument(
                "Unsupported CBOR value in body".to_string(),
            ))
        }
    })
}
