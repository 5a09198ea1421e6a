//! Delimited text files following the LazySimpleSerDe conventions.
//!
//! Delimiters occurring inside values are written as-is; a value containing the
//! field or line delimiter cannot be read back.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{NaiveDate, NaiveDateTime, Timelike as _};
use std::collections::BTreeMap;

use crate::coercion::{char_value_on_read, truncate_to_millis};
use crate::error::{Error, Result};
use crate::format::FormatWriter;
use crate::storage::{Decimal, LogicalType, StorageValue, TableDescriptor};

pub const FIELD_DELIM: &str = "field.delim";
pub const LINE_DELIM: &str = "line.delim";
pub const SERIALIZATION_FORMAT: &str = "serialization.format";
pub const NULL_FORMAT: &str = "serialization.null.format";

const DEFAULT_FIELD_DELIM: u8 = 0x01;
const DEFAULT_LINE_DELIM: u8 = b'\n';
const DEFAULT_NULL_FORMAT: &str = "\\N";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Row serialization settings resolved from the table's SerDe properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerdeProperties {
    pub field_delim: u8,
    pub line_delim: u8,
    pub null_format: String,
}

impl Default for SerdeProperties {
    fn default() -> Self {
        Self {
            field_delim: DEFAULT_FIELD_DELIM,
            line_delim: DEFAULT_LINE_DELIM,
            null_format: DEFAULT_NULL_FORMAT.to_string(),
        }
    }
}

impl SerdeProperties {
    /// `field.delim` wins over `serialization.format`, which wins over the `\x01` default.
    pub fn from_properties(properties: &BTreeMap<String, String>) -> Result<Self> {
        let lookup = |key: &str| {
            properties
                .get(key)
                .map(String::as_str)
                .filter(|value| !value.is_empty())
        };

        let field_delim = match lookup(FIELD_DELIM).or_else(|| lookup(SERIALIZATION_FORMAT)) {
            Some(value) => delimiter_byte(value)?,
            None => DEFAULT_FIELD_DELIM,
        };
        let line_delim = match lookup(LINE_DELIM) {
            Some(value) => delimiter_byte(value)?,
            None => DEFAULT_LINE_DELIM,
        };
        if field_delim == line_delim {
            return Err(Error::InvalidTable(
                "field and line delimiters must differ".to_string(),
            ));
        }

        let null_format = properties
            .get(NULL_FORMAT)
            .cloned()
            .unwrap_or_else(|| DEFAULT_NULL_FORMAT.to_string());

        Ok(Self {
            field_delim,
            line_delim,
            null_format,
        })
    }
}

/// A number denotes the byte itself, anything else contributes its first byte.
fn delimiter_byte(value: &str) -> Result<u8> {
    let byte = match value.parse::<u8>() {
        Ok(byte) => byte,
        Err(_) => value.as_bytes()[0],
    };
    if !byte.is_ascii() {
        return Err(Error::InvalidTable(format!(
            "Delimiter must be an ASCII character: {value:?}"
        )));
    }
    Ok(byte)
}

pub struct TextWriter {
    properties: SerdeProperties,
    buffer: Vec<u8>,
}

impl TextWriter {
    pub fn try_new(table: &TableDescriptor) -> Result<Self> {
        Ok(Self {
            properties: SerdeProperties::from_properties(&table.serde_properties)?,
            buffer: Vec::new(),
        })
    }
}

impl FormatWriter for TextWriter {
    fn append(&mut self, row: &[StorageValue]) -> Result<()> {
        for (index, value) in row.iter().enumerate() {
            if index > 0 {
                self.buffer.push(self.properties.field_delim);
            }
            match value {
                StorageValue::Null => self
                    .buffer
                    .extend_from_slice(self.properties.null_format.as_bytes()),
                value => self.buffer.extend_from_slice(encode_value(value).as_bytes()),
            }
        }
        self.buffer.push(self.properties.line_delim);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>> {
        Ok(self.buffer)
    }
}

/// Text form of a non-null value.
pub fn encode_value(value: &StorageValue) -> String {
    match value {
        StorageValue::Null => DEFAULT_NULL_FORMAT.to_string(),
        StorageValue::Boolean(flag) => flag.to_string(),
        StorageValue::TinyInt(number) => number.to_string(),
        StorageValue::SmallInt(number) => number.to_string(),
        StorageValue::Int(number) => number.to_string(),
        StorageValue::BigInt(number) => number.to_string(),
        StorageValue::Real(number) => encode_float(f64::from(*number), number.to_string()),
        StorageValue::Double(number) => encode_float(*number, number.to_string()),
        StorageValue::Decimal(decimal) => decimal.to_string(),
        StorageValue::Timestamp(timestamp) => encode_timestamp(timestamp),
        StorageValue::Date(date) => date.format(DATE_FORMAT).to_string(),
        StorageValue::Varchar(text) | StorageValue::Char(text) => text.clone(),
        StorageValue::Binary(bytes) => BASE64.encode(bytes),
    }
}

fn encode_float(number: f64, shortest: String) -> String {
    if number.is_nan() {
        "NaN".to_string()
    } else if number == f64::INFINITY {
        "Infinity".to_string()
    } else if number == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        shortest
    }
}

/// `yyyy-MM-dd HH:mm:ss[.fff]`, trailing fractional zeros trimmed.
fn encode_timestamp(timestamp: &NaiveDateTime) -> String {
    let base = timestamp.format(TIMESTAMP_FORMAT).to_string();
    let millis = timestamp.nanosecond() / 1_000_000;
    if millis == 0 {
        return base;
    }
    let fraction = format!("{millis:03}");
    format!("{base}.{}", fraction.trim_end_matches('0'))
}

/// Parses the text form of a value of `logical_type`.
pub fn decode_value(text: &str, logical_type: &LogicalType) -> Result<StorageValue> {
    let invalid = || Error::CouldNotReadData(format!("Invalid {logical_type} value: {text:?}"));

    let value = match logical_type {
        LogicalType::TinyInt => StorageValue::TinyInt(text.parse().map_err(|_| invalid())?),
        LogicalType::SmallInt => StorageValue::SmallInt(text.parse().map_err(|_| invalid())?),
        LogicalType::Int => StorageValue::Int(text.parse().map_err(|_| invalid())?),
        LogicalType::BigInt => StorageValue::BigInt(text.parse().map_err(|_| invalid())?),
        LogicalType::Real => StorageValue::Real(text.parse().map_err(|_| invalid())?),
        LogicalType::Double => StorageValue::Double(text.parse().map_err(|_| invalid())?),
        LogicalType::Decimal { scale, .. } => {
            let decimal: Decimal = text.parse().map_err(|_| invalid())?;
            StorageValue::Decimal(decimal.rescale(*scale).ok_or_else(invalid)?)
        }
        LogicalType::Timestamp => {
            let timestamp = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
                .map_err(|_| invalid())?;
            StorageValue::Timestamp(truncate_to_millis(timestamp).ok_or_else(invalid)?)
        }
        LogicalType::Date => {
            StorageValue::Date(NaiveDate::parse_from_str(text, DATE_FORMAT).map_err(|_| invalid())?)
        }
        LogicalType::Varchar(_) => StorageValue::Varchar(text.to_string()),
        LogicalType::Char(length) => StorageValue::Char(char_value_on_read(text, *length)),
        LogicalType::Boolean => {
            if text.eq_ignore_ascii_case("true") {
                StorageValue::Boolean(true)
            } else if text.eq_ignore_ascii_case("false") {
                StorageValue::Boolean(false)
            } else {
                return Err(invalid());
            }
        }
        LogicalType::Varbinary => StorageValue::Binary(BASE64.decode(text).map_err(|_| invalid())?),
    };
    Ok(value)
}

/// Splits a text file into rows of data column values.
///
/// Returns: rows or CouldNotReadData when a line does not have one field per column
pub fn decode(table: &TableDescriptor, bytes: &[u8]) -> Result<Vec<Vec<StorageValue>>> {
    let properties = SerdeProperties::from_properties(&table.serde_properties)?;

    let mut lines: Vec<&[u8]> = bytes
        .split(|byte| *byte == properties.line_delim)
        .collect();
    // every row is terminated, so the last piece is always empty
    if lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }

    let mut rows = Vec::with_capacity(lines.len());
    for (line_number, line) in lines.into_iter().enumerate() {
        let fields: Vec<&[u8]> = line
            .split(|byte| *byte == properties.field_delim)
            .collect();
        if fields.len() != table.columns.len() {
            return Err(Error::CouldNotReadData(format!(
                "line {}: expected {} fields, found {}",
                line_number + 1,
                table.columns.len(),
                fields.len()
            )));
        }

        let mut row = Vec::with_capacity(fields.len());
        for (field, column) in fields.into_iter().zip(&table.columns) {
            let text = std::str::from_utf8(field).map_err(|_| {
                Error::CouldNotReadData(format!("line {}: invalid UTF-8", line_number + 1))
            })?;
            if text == properties.null_format {
                row.push(StorageValue::Null);
            } else {
                row.push(decode_value(text, &column.logical_type)?);
            }
        }
        rows.push(row);
    }

    Ok(rows)
}
