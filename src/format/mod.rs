//! Serialization of coerced rows into data files of the table's storage format.

pub mod columnar;
pub mod text;

use log::debug;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::partition::{Partition, PartitionKey};
use crate::storage::{StorageFormat, StorageValue, TableDescriptor};
use crate::store::{self, FileStore};

/// Interface for every storage format to follow.
pub trait FormatWriter: Send {
    /// Buffers one row; values are in data column order.
    fn append(&mut self, row: &[StorageValue]) -> Result<()>;

    /// Consumes the writer and returns the complete file contents.
    fn finish(self: Box<Self>) -> Result<Vec<u8>>;
}

/// Returns writer implementation for the given table's storage format.
pub fn get_writer(table: &TableDescriptor) -> Result<Box<dyn FormatWriter>> {
    match table.format {
        StorageFormat::Text => Ok(Box::new(text::TextWriter::try_new(table)?)),
        StorageFormat::ColumnarBinary => Ok(Box::new(columnar::ColumnarWriter::new(table))),
    }
}

/// Decodes a data file written for `table` back into rows of data column values.
pub fn decode_file(table: &TableDescriptor, bytes: &[u8]) -> Result<Vec<Vec<StorageValue>>> {
    match table.format {
        StorageFormat::Text => text::decode(table, bytes),
        StorageFormat::ColumnarBinary => columnar::decode(&table.columns, bytes),
    }
}

fn file_extension(format: StorageFormat) -> &'static str {
    match format {
        StorageFormat::Text => "",
        StorageFormat::ColumnarBinary => ".hwc",
    }
}

/// A finished data file, ready to be registered with the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFile {
    pub path: PathBuf,
    pub partition: PartitionKey,
    pub row_count: u64,
    pub size_bytes: u64,
}

/// In-flight rows of one (partition, file) pair. Owned by a single writer.
pub struct WriteBatch {
    partition: Partition,
    path: PathBuf,
    columns: usize,
    row_count: u64,
    writer: Box<dyn FormatWriter>,
}

impl WriteBatch {
    /// Opens a batch for a new, uniquely named file inside `partition`.
    pub fn open(table: &TableDescriptor, partition: &Partition) -> Result<Self> {
        let name = format!("{}{}", Uuid::now_v7(), file_extension(table.format));
        Ok(Self {
            partition: partition.clone(),
            path: partition.location.join(name),
            columns: table.columns.len(),
            row_count: 0,
            writer: get_writer(table)?,
        })
    }

    pub fn append(&mut self, row: &[StorageValue]) -> Result<()> {
        if row.len() != self.columns {
            return Err(Error::Serialization(format!(
                "expected {} values per row, got {}",
                self.columns,
                row.len()
            )));
        }
        self.writer.append(row)?;
        self.row_count += 1;
        Ok(())
    }

    /// Serializes the batch and writes it to the file store.
    ///
    /// Returns: DataFile or Serialization when the file could not be written
    pub fn finish(self, store: &dyn FileStore, attempts: u32) -> Result<DataFile> {
        let bytes = self.writer.finish()?;
        store::write_with_retry(store, &self.path, &bytes, attempts)?;
        debug!(
            "Wrote {} rows ({} bytes) to {}",
            self.row_count,
            bytes.len(),
            self.path.display()
        );

        Ok(DataFile {
            path: self.path,
            partition: self.partition.key,
            row_count: self.row_count,
            size_bytes: bytes.len() as u64,
        })
    }
}
