use std::io::Cursor;

use calamine::{DataType, Reader, Xlsx};
use serde_json::Value;

use crate::body::{check_entry_shape, Entry, EntryReader, EntryWriter};
use crate::dataset::Structure;
use crate::error::{Result, TabulaError};

/// Streams rows out of the first sheet of an XLSX body
pub struct XlsxReader {
    rows: std::vec::IntoIter<Vec<Value>>,
}

impl XlsxReader {
    pub fn new(structure: &Structure, data: Vec<u8>) -> Result<Self> {
        let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(data))
            .map_err(|e| TabulaError::General(format!("Failed to open XLSX body: {}", e)))?;

        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| TabulaError::IllegalArgument("XLSX body has no sheets".to_string()))?
            .map_err(|e| TabulaError::General(format!("Failed to read XLSX sheet: {}", e)))?;

        let skip = usize::from(structure.header_row());
        let rows: Vec<Vec<Value>> = range
            .rows()
            .skip(skip)
            .map(|row| row.iter().map(cell_to_json).collect())
            .collect();

        Ok(Self {
            rows: rows.into_iter(),
        })
    }
}

impl EntryReader for XlsxReader {
    fn read_entry(&mut self) -> Result<Option<Entry>> {
        Ok(self.rows.next().map(|row| Entry::value(Value::Array(row))))
    }
}

/// Streams rows into an XLSX body. The workbook format cannot be emitted
/// incrementally, so rows buffer in the worksheet and the file is produced
/// when the writer finalizes on close.
pub struct XlsxWriter {
    worksheet: rust_xlsxwriter::Worksheet,
    next_row: u32,
}

impl XlsxWriter {
    pub fn new(_structure: &Structure) -> Self {
        Self {
            worksheet: rust_xlsxwriter::Worksheet::new(),
            next_row: 0,
        }
    }
}

impl EntryWriter for XlsxWriter {
    fn write_entry(&mut self, entry: Entry) -> Result<()> {
        check_entry_shape(false, &entry)?;

        let row = match entry.value {
            Value::Array(cells) => cells,
            other => {
                return Err(TabulaError::IllegalArgument(format!(
                    "XLSX entries must be arrays, got: {}",
                    other
                )))
            }
        };

        for (col, cell) in row.into_iter().enumerate() {
            let col = col as u16;
            let result = match cell {
                Value::Null => Ok(&mut self.worksheet),
                Value::Bool(b) => self.worksheet.write_boolean(self.next_row, col, b),
                Value::Number(n) => {
                    self.worksheet
                        .write_number(self.next_row, col, n.as_f64().unwrap_or(0.0))
                }
                Value::String(s) => self.worksheet.write_string(self.next_row, col, &s),
                Value::Array(_) | Value::Object(_) => {
                    return Err(TabulaError::IllegalArgument(
                        "XLSX cells cannot hold nested values".to_string(),
                    ))
                }
            };

            result.map_err(|e| TabulaError::General(format!("Failed to write XLSX cell: {}", e)))?;
        }

        self.next_row += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>> {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        workbook.push_worksheet(self.worksheet);

        workbook
            .save_to_buffer()
            .map_err(|e| TabulaError::General(format!("Failed to finalize XLSX body: {}", e)))
    }
}

fn cell_to_json(cell: &DataType) -> Value {
    match cell {
        DataType::Empty => Value::Null,
        DataType::String(s) => Value::String(s.clone()),
        DataType::Int(i) => Value::from(*i),
        DataType::Float(f) => {
            // Excel stores every number as a float; render whole values as
            // integers so round-trips stay stable
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                Value::from(*f as i64)
            } else {
                serde_json::Number::from_f64(*f)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        DataType::Bool(b) => Value::Bool(*b),
        DataType::DateTime(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        DataType::Error(e) => Value::String(format!("{:?}", e)),
        _ => Value::Null,
    }
}
