//! Self-describing columnar segments.
//!
//! Layout: `HWCOLB | version u16 | header length u32 | rmp header | column blocks | crc32`.
//! The checksum covers every byte after the magic. Each column block is a validity
//! bitmap followed by one slot per row, compressed as a unit.

use chrono::{DateTime, Datelike as _, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::coercion::char_value_on_read;
use crate::error::{Error, Result};
use crate::format::FormatWriter;
use crate::storage::compression::{CompressionType, compress_bytes, decompress_bytes};
use crate::storage::{ColumnDescriptor, Decimal, LogicalType, StorageValue, TableDescriptor};

const MAGIC_BYTES: &[u8] = b"HWCOLB".as_slice();
const VERSION: u16 = 1;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct SegmentHeader {
    row_count: u64,
    columns: Vec<SegmentColumn>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct SegmentColumn {
    name: String,
    logical_type: LogicalType,
    compression: CompressionType,
    compressed_len: u64,
    raw_len: u64,
}

/// Column-oriented buffer of one data column.
struct ColumnBuffer {
    column: ColumnDescriptor,
    validity: Vec<bool>,
    slots: Vec<u8>,
}

impl ColumnBuffer {
    fn new(column: ColumnDescriptor) -> Self {
        Self {
            column,
            validity: Vec::new(),
            slots: Vec::new(),
        }
    }

    fn push(&mut self, value: &StorageValue) -> Result<()> {
        let logical_type = self.column.logical_type;
        match (&logical_type, value) {
            (_, StorageValue::Null) => {
                self.validity.push(false);
                let width = logical_type.fixed_width().unwrap_or(4);
                self.slots.extend(std::iter::repeat_n(0u8, width));
                return Ok(());
            }
            (LogicalType::TinyInt, StorageValue::TinyInt(v)) => self.slots.extend(v.to_le_bytes()),
            (LogicalType::SmallInt, StorageValue::SmallInt(v)) => {
                self.slots.extend(v.to_le_bytes())
            }
            (LogicalType::Int, StorageValue::Int(v)) => self.slots.extend(v.to_le_bytes()),
            (LogicalType::BigInt, StorageValue::BigInt(v)) => self.slots.extend(v.to_le_bytes()),
            (LogicalType::Real, StorageValue::Real(v)) => self.slots.extend(v.to_le_bytes()),
            (LogicalType::Double, StorageValue::Double(v)) => self.slots.extend(v.to_le_bytes()),
            (LogicalType::Decimal { .. }, StorageValue::Decimal(v)) => {
                self.slots.extend(v.unscaled().to_le_bytes())
            }
            (LogicalType::Date, StorageValue::Date(v)) => {
                self.slots.extend(v.num_days_from_ce().to_le_bytes())
            }
            (LogicalType::Timestamp, StorageValue::Timestamp(v)) => {
                self.slots.extend(v.and_utc().timestamp_millis().to_le_bytes())
            }
            (LogicalType::Boolean, StorageValue::Boolean(v)) => self.slots.push(u8::from(*v)),
            (LogicalType::Varchar(_), StorageValue::Varchar(v))
            | (LogicalType::Char(_), StorageValue::Char(v)) => self.push_variable(v.as_bytes())?,
            (LogicalType::Varbinary, StorageValue::Binary(v)) => self.push_variable(v)?,
            (logical_type, value) => {
                return Err(Error::Serialization(format!(
                    "value {value:?} does not match column {} of type {logical_type}",
                    self.column.name
                )));
            }
        }
        self.validity.push(true);
        Ok(())
    }

    fn push_variable(&mut self, bytes: &[u8]) -> Result<()> {
        let length = u32::try_from(bytes.len()).map_err(|_| {
            Error::Serialization(format!("value too large for column {}", self.column.name))
        })?;
        self.slots.extend(length.to_le_bytes());
        self.slots.extend_from_slice(bytes);
        Ok(())
    }

    fn encode(&self) -> Vec<u8> {
        let mut block = vec![0u8; self.validity.len().div_ceil(8)];
        for (row, present) in self.validity.iter().enumerate() {
            if *present {
                block[row / 8] |= 1 << (row % 8);
            }
        }
        block.extend_from_slice(&self.slots);
        block
    }
}

pub struct ColumnarWriter {
    buffers: Vec<ColumnBuffer>,
    row_count: u64,
}

impl ColumnarWriter {
    pub fn new(table: &TableDescriptor) -> Self {
        Self {
            buffers: table.columns.iter().cloned().map(ColumnBuffer::new).collect(),
            row_count: 0,
        }
    }
}

impl FormatWriter for ColumnarWriter {
    fn append(&mut self, row: &[StorageValue]) -> Result<()> {
        for (buffer, value) in self.buffers.iter_mut().zip(row) {
            buffer.push(value)?;
        }
        self.row_count += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>> {
        let mut blocks = Vec::new();
        let mut columns = Vec::with_capacity(self.buffers.len());
        for buffer in &self.buffers {
            let raw = buffer.encode();
            let compression = buffer.column.logical_type.get_optimal_compression();
            let compressed = compress_bytes(&raw, compression)?;
            columns.push(SegmentColumn {
                name: buffer.column.name.clone(),
                logical_type: buffer.column.logical_type,
                compression,
                compressed_len: compressed.len() as u64,
                raw_len: raw.len() as u64,
            });
            blocks.extend(compressed);
        }

        let header = SegmentHeader {
            row_count: self.row_count,
            columns,
        };
        let header_bytes = rmp_serde::to_vec(&header)
            .map_err(|e| Error::Serialization(format!("Failed to encode segment header: {e}")))?;
        let header_len = u32::try_from(header_bytes.len())
            .map_err(|_| Error::Serialization("Segment header too large".to_string()))?;

        let mut bytes = Vec::from(MAGIC_BYTES);
        bytes.extend(VERSION.to_le_bytes());
        bytes.extend(header_len.to_le_bytes());
        bytes.extend(header_bytes);
        bytes.extend(blocks);

        let crc = crc32fast::hash(&bytes[MAGIC_BYTES.len()..]);
        bytes.extend(crc.to_le_bytes());
        Ok(bytes)
    }
}

/// Sequential reader over a byte slice.
struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(length)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| Error::CouldNotReadData("Segment truncated".to_string()))?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self.take(N)?;
        <[u8; N]>::try_from(slice)
            .map_err(|_| Error::CouldNotReadData("Segment truncated".to_string()))
    }
}

/// Decodes a segment, checking that its embedded schema matches `columns`.
///
/// Returns: rows of data column values or CouldNotReadData on corruption or schema mismatch
pub fn decode(columns: &[ColumnDescriptor], bytes: &[u8]) -> Result<Vec<Vec<StorageValue>>> {
    if bytes.len() < MAGIC_BYTES.len() + 2 + 4 + 4 || &bytes[..MAGIC_BYTES.len()] != MAGIC_BYTES {
        return Err(Error::CouldNotReadData(
            "Invalid magic bytes in segment".to_string(),
        ));
    }

    let body = &bytes[MAGIC_BYTES.len()..bytes.len() - 4];
    let mut crc_cursor = Cursor::new(&bytes[bytes.len() - 4..]);
    if u32::from_le_bytes(crc_cursor.take_array()?) != crc32fast::hash(body) {
        return Err(Error::CouldNotReadData("CRC mismatch in segment".to_string()));
    }

    let mut cursor = Cursor::new(body);
    let version = u16::from_le_bytes(cursor.take_array()?);
    if version > VERSION {
        return Err(Error::CouldNotReadData(format!(
            "Unsupported segment version: {version}"
        )));
    }
    let header_len = u32::from_le_bytes(cursor.take_array()?) as usize;
    let header: SegmentHeader = rmp_serde::from_slice(cursor.take(header_len)?)
        .map_err(|e| Error::CouldNotReadData(format!("Failed to decode segment header: {e}")))?;

    let schema_matches = header.columns.len() == columns.len()
        && header
            .columns
            .iter()
            .zip(columns)
            .all(|(stored, column)| {
                stored.name == column.name && stored.logical_type == column.logical_type
            });
    if !schema_matches {
        return Err(Error::CouldNotReadData(
            "Segment schema does not match table".to_string(),
        ));
    }

    let row_count = usize::try_from(header.row_count)
        .map_err(|_| Error::CouldNotReadData("Segment too large".to_string()))?;
    let mut rows: Vec<Vec<StorageValue>> = (0..row_count)
        .map(|_| Vec::with_capacity(columns.len()))
        .collect();

    for stored in &header.columns {
        let compressed = cursor.take(stored.compressed_len as usize)?;
        let raw = decompress_bytes(compressed, stored.compression)?;
        if raw.len() as u64 != stored.raw_len {
            return Err(Error::CouldNotReadData(format!(
                "Column {} has unexpected length",
                stored.name
            )));
        }

        let values = decode_column(&raw, &stored.logical_type, row_count)?;
        for (row, value) in rows.iter_mut().zip(values) {
            row.push(value);
        }
    }

    Ok(rows)
}

fn decode_column(
    raw: &[u8],
    logical_type: &LogicalType,
    row_count: usize,
) -> Result<Vec<StorageValue>> {
    let mut cursor = Cursor::new(raw);
    let validity = cursor.take(row_count.div_ceil(8))?;
    let invalid = |what: &str| Error::CouldNotReadData(format!("Invalid {logical_type} {what}"));

    let mut values = Vec::with_capacity(row_count);
    for row in 0..row_count {
        let present = validity[row / 8] & (1 << (row % 8)) != 0;
        let value = match logical_type {
            LogicalType::TinyInt => StorageValue::TinyInt(i8::from_le_bytes(cursor.take_array()?)),
            LogicalType::SmallInt => {
                StorageValue::SmallInt(i16::from_le_bytes(cursor.take_array()?))
            }
            LogicalType::Int => StorageValue::Int(i32::from_le_bytes(cursor.take_array()?)),
            LogicalType::BigInt => StorageValue::BigInt(i64::from_le_bytes(cursor.take_array()?)),
            LogicalType::Real => StorageValue::Real(f32::from_le_bytes(cursor.take_array()?)),
            LogicalType::Double => StorageValue::Double(f64::from_le_bytes(cursor.take_array()?)),
            LogicalType::Decimal { scale, .. } => StorageValue::Decimal(Decimal::new(
                i128::from_le_bytes(cursor.take_array()?),
                *scale,
            )),
            LogicalType::Date => {
                let days = i32::from_le_bytes(cursor.take_array()?);
                if !present {
                    StorageValue::Null
                } else {
                    NaiveDate::from_num_days_from_ce_opt(days)
                        .map(StorageValue::Date)
                        .ok_or_else(|| invalid("date"))?
                }
            }
            LogicalType::Timestamp => {
                let millis = i64::from_le_bytes(cursor.take_array()?);
                if !present {
                    StorageValue::Null
                } else {
                    DateTime::from_timestamp_millis(millis)
                        .map(|timestamp| StorageValue::Timestamp(timestamp.naive_utc()))
                        .ok_or_else(|| invalid("timestamp"))?
                }
            }
            LogicalType::Boolean => StorageValue::Boolean(cursor.take_array::<1>()?[0] != 0),
            LogicalType::Varchar(_) => {
                let bytes = take_variable(&mut cursor)?;
                StorageValue::Varchar(
                    String::from_utf8(bytes.to_vec()).map_err(|_| invalid("string"))?,
                )
            }
            LogicalType::Char(length) => {
                let bytes = take_variable(&mut cursor)?;
                let text = std::str::from_utf8(bytes).map_err(|_| invalid("string"))?;
                StorageValue::Char(char_value_on_read(text, *length))
            }
            LogicalType::Varbinary => StorageValue::Binary(take_variable(&mut cursor)?.to_vec()),
        };
        values.push(if present { value } else { StorageValue::Null });
    }

    Ok(values)
}

fn take_variable<'a>(cursor: &mut Cursor<'a>) -> Result<&'a [u8]> {
    let length = u32::from_le_bytes(cursor.take_array()?) as usize;
    cursor.take(length)
}
