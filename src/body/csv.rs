use std::io::Cursor;

use serde_json::Value;

use crate::body::{check_entry_shape, Entry, EntryReader, EntryWriter};
use crate::dataset::Structure;
use crate::error::{Result, TabulaError};

/// Streams rows out of a CSV body. Each entry value is an array of cells,
/// coerced to the column types the schema declares.
pub struct CsvReader {
    records: csv::StringRecordsIntoIter<Cursor<Vec<u8>>>,
    column_types: Vec<Option<String>>,
}

impl CsvReader {
    pub fn new(structure: &Structure, data: Vec<u8>) -> Result<Self> {
        let reader = csv::ReaderBuilder::new()
            .has_headers(structure.header_row())
            .flexible(true)
            .from_reader(Cursor::new(data));

        Ok(Self {
            records: reader.into_records(),
            column_types: column_types(structure),
        })
    }
}

impl EntryReader for CsvReader {
    fn read_entry(&mut self) -> Result<Option<Entry>> {
        match self.records.next() {
            Some(record) => {
                let record = record?;
                let mut cells = Vec::with_capacity(record.len());

                for (index, field) in record.iter().enumerate() {
                    let declared = self.column_types.get(index).and_then(|t| t.as_deref());
                    cells.push(coerce_field(field, declared));
                }

                Ok(Some(Entry::value(Value::Array(cells))))
            }
            None => Ok(None),
        }
    }
}

/// Streams rows into a CSV body. The header row is emitted from schema
/// column titles when the format config asks for one.
pub struct CsvWriter {
    writer: csv::Writer<Vec<u8>>,
    header: Option<Vec<String>>,
    wrote_header: bool,
}

impl CsvWriter {
    pub fn new(structure: &Structure) -> Self {
        let header = if structure.header_row() {
            column_titles(structure)
        } else {
            None
        };

        Self {
            writer: csv::Writer::from_writer(Vec::new()),
            header,
            wrote_header: false,
        }
    }

    fn write_header_if_needed(&mut self) -> Result<()> {
        if !self.wrote_header {
            self.wrote_header = true;
            if let Some(header) = self.header.take() {
                self.writer.write_record(&header)?;
            }
        }
        Ok(())
    }
}

impl EntryWriter for CsvWriter {
    fn write_entry(&mut self, entry: Entry) -> Result<()> {
        check_entry_shape(false, &entry)?;
        self.write_header_if_needed()?;

        let row = match entry.value {
            Value::Array(cells) => cells,
            other => {
                return Err(TabulaError::IllegalArgument(format!(
                    "CSV entries must be arrays, got: {}",
                    other
                )))
            }
        };

        let mut record = csv::StringRecord::new();
        for cell in row {
            record.push_field(&render_cell(&cell)?);
        }

        self.writer.write_record(&record)?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<Vec<u8>> {
        self.write_header_if_needed()?;
        self.writer.flush()?;
        self.writer
            .into_inner()
            .map_err(|e| TabulaError::General(format!("Failed to finalize CSV body: {}", e)))
    }
}

/// Renders one JSON value as a CSV cell. Nested structures are not
/// representable in CSV.
fn render_cell(value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(s.clone()),
        Value::Array(_) | Value::Object(_) => Err(TabulaError::IllegalArgument(
            "CSV cells cannot hold nested values".to_string(),
        )),
    }
}

/// Coerces a CSV field to the declared column type, or sniffs bool/number
/// when the schema does not declare one
fn coerce_field(field: &str, declared: Option<&str>) -> Value {
    match declared {
        Some("integer") => field
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(field.to_string())),
        Some("number") => field
            .parse::<f64>()
            .ok()
            .and_then(|f| serde_json::Number::from_f64(f).map(Value::Number))
            .unwrap_or_else(|| Value::String(field.to_string())),
        Some("boolean") => match field {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(field.to_string()),
        },
        Some("null") => Value::Null,
        Some(_) => Value::String(field.to_string()),
        None => sniff_field(field),
    }
}

fn sniff_field(field: &str) -> Value {
    match field {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "" => return Value::Null,
        _ => (),
    }

    if let Ok(i) = field.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = field.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }

    Value::String(field.to_string())
}

/// Per-column type names from a tabular schema:
/// `{"type":"array","items":{"items":[{"title":…,"type":…},…]}}`
fn column_types(structure: &Structure) -> Vec<Option<String>> {
    columns(structure)
        .map(|cols| {
            cols.iter()
                .map(|col| {
                    col.get("type")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn column_titles(structure: &Structure) -> Option<Vec<String>> {
    let titles: Vec<String> = columns(structure)?
        .iter()
        .enumerate()
        .map(|(index, col)| {
            col.get("title")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("field_{}", index + 1))
        })
        .collect();

    if titles.is_empty() {
        None
    } else {
        Some(titles)
    }
}

fn columns(structure: &Structure) -> Option<&Vec<Value>> {
    structure
        .schema
        .as_ref()?
        .get("items")?
        .get("items")?
        .as_array()
}
