pub mod compression;
pub mod types;
pub mod value;

use derive_more::Display;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
pub use crate::storage::types::LogicalType;
pub use crate::storage::value::{Decimal, EngineValue, StorageValue};

pub const DEFAULT_DATABASE: &str = "default";

/// Fully qualified table identity.
#[derive(Debug, Display, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("{database}.{table}")]
pub struct TableName {
    pub database: String,
    pub table: String,
}

impl TableName {
    pub fn new(database: &str, table: &str) -> Self {
        Self {
            database: database.to_string(),
            table: table.to_string(),
        }
    }

    /// Path of the table directory relative to the warehouse root.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(&self.database).join(&self.table)
    }
}

impl TryFrom<&str> for TableName {
    type Error = Error;

    /// Accepts `database.table` or a bare `table` in the default database.
    fn try_from(value: &str) -> Result<Self> {
        let parts: Vec<&str> = value.split('.').collect();
        let (database, table) = match parts.as_slice() {
            [table] => (DEFAULT_DATABASE, *table),
            [database, table] => (*database, *table),
            _ => return Err(Error::InvalidTable(format!("Invalid table name: {value}"))),
        };
        if !validate_name(database) || !validate_name(table) {
            return Err(Error::InvalidTable(format!("Invalid table name: {value}")));
        }
        Ok(Self::new(&database.to_lowercase(), &table.to_lowercase()))
    }
}

/// Validate the name of tables, databases, columns.
/// Returns true if `name` consists of english alphabet, numbers and underscore
/// Otherwise returns false
pub fn validate_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct ColumnDescriptor {
    pub name: String,
    pub logical_type: LogicalType,
}

impl ColumnDescriptor {
    pub fn new(name: &str, logical_type: LogicalType) -> Self {
        Self {
            name: name.to_lowercase(),
            logical_type,
        }
    }
}

#[derive(Debug, Display, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageFormat {
    #[display("TEXTFILE")]
    Text,
    #[display("COLUMNAR")]
    ColumnarBinary,
}

/// Read-only description of a Hive table as stored in the catalog.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TableDescriptor {
    pub name: TableName,
    pub columns: Vec<ColumnDescriptor>,
    pub partition_columns: Vec<ColumnDescriptor>,
    pub format: StorageFormat,
    pub serde_properties: BTreeMap<String, String>,
    pub transactional: bool,
    pub location: PathBuf,
}

impl TableDescriptor {
    /// Starts an unpartitioned, non-transactional text table without columns.
    pub fn new(name: TableName) -> Self {
        Self {
            name,
            columns: Vec::new(),
            partition_columns: Vec::new(),
            format: StorageFormat::Text,
            serde_properties: BTreeMap::new(),
            transactional: false,
            location: PathBuf::new(),
        }
    }

    pub fn with_column(mut self, name: &str, logical_type: LogicalType) -> Self {
        self.columns.push(ColumnDescriptor::new(name, logical_type));
        self
    }

    pub fn with_partition_column(mut self, name: &str, logical_type: LogicalType) -> Self {
        self.partition_columns
            .push(ColumnDescriptor::new(name, logical_type));
        self
    }

    pub fn with_format(mut self, format: StorageFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_serde_property(mut self, key: &str, value: &str) -> Self {
        self.serde_properties
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    pub fn is_partitioned(&self) -> bool {
        !self.partition_columns.is_empty()
    }

    /// Number of values a source row must carry: data columns, then partition columns.
    pub fn row_width(&self) -> usize {
        self.columns.len() + self.partition_columns.len()
    }

    /// Data column types followed by partition column types.
    pub fn all_column_types(&self) -> Vec<LogicalType> {
        self.columns
            .iter()
            .chain(self.partition_columns.iter())
            .map(|column| column.logical_type)
            .collect()
    }

    /// Checks descriptor invariants.
    ///
    /// Returns: Ok or InvalidTable describing the first violated rule
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(Error::InvalidTable(format!(
                "{}: no data columns specified",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for column in self.columns.iter().chain(self.partition_columns.iter()) {
            if !validate_name(&column.name) {
                return Err(Error::InvalidTable(format!(
                    "{}: invalid column name {}",
                    self.name, column.name
                )));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(Error::InvalidTable(format!(
                    "{}: duplicate column {}",
                    self.name, column.name
                )));
            }
            column.logical_type.validate()?;
        }

        Ok(())
    }
}

/// Writes `value` as `magic | rmp body | crc32` to a temporary sibling and renames it over `path`.
///
/// Returns: Ok or Serialization on encoding/I/O failure
pub fn write_file_with_crc<T: Serialize>(value: &T, path: &Path, magic: &[u8]) -> Result<()> {
    let body = rmp_serde::to_vec(value)
        .map_err(|e| Error::Serialization(format!("Failed to encode {}: {e}", path.display())))?;
    let crc = crc32fast::hash(&body);

    let mut bytes = Vec::with_capacity(magic.len() + body.len() + 4);
    bytes.extend_from_slice(magic);
    bytes.extend(body);
    bytes.extend(crc.to_le_bytes());

    let tmp_path = temporary_sibling(path);
    std::fs::write(&tmp_path, bytes)
        .map_err(|e| Error::Serialization(format!("Failed to write {}: {e}", tmp_path.display())))?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        Error::Serialization(format!("Failed to move {}: {e}", path.display()))
    })
}

/// Reads a file written by `write_file_with_crc`, validating magic bytes and checksum.
///
/// Returns: decoded value, `CouldNotReadData` on corruption or missing file
pub fn read_file_with_crc<T: DeserializeOwned>(path: &Path, magic: &[u8]) -> Result<T> {
    let file_bytes = std::fs::read(path).map_err(|error| match error.kind() {
        ErrorKind::NotFound => Error::CouldNotReadData(format!("{} not found", path.display())),
        _ => Error::CouldNotReadData(format!("Failed to read {}: {error}", path.display())),
    })?;

    if file_bytes.len() < magic.len() + 4 || &file_bytes[..magic.len()] != magic {
        return Err(Error::CouldNotReadData(format!(
            "Invalid magic bytes in {}",
            path.display()
        )));
    }

    let body = &file_bytes[magic.len()..file_bytes.len() - 4];
    let crc = u32::from_le_bytes([
        file_bytes[file_bytes.len() - 4],
        file_bytes[file_bytes.len() - 3],
        file_bytes[file_bytes.len() - 2],
        file_bytes[file_bytes.len() - 1],
    ]);
    if crc != crc32fast::hash(body) {
        return Err(Error::CouldNotReadData(format!(
            "CRC mismatch in {}",
            path.display()
        )));
    }

    rmp_serde::from_slice(body)
        .map_err(|e| Error::CouldNotReadData(format!("Failed to decode {}: {e}", path.display())))
}

/// Hidden name used while a file is being written; readers skip dot-files.
pub fn temporary_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}
