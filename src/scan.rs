use log::debug;

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::format::{self, DataFile};
use crate::insert::{Row, RowSource};
use crate::partition::parse_partition_value;
use crate::storage::{EngineValue, LogicalType, TableDescriptor, TableName};
use crate::store::FileStore;

/// Reads the committed contents of a table back as engine rows.
///
/// Only files registered with the catalog are read, one at a time, in commit order.
/// Each row carries data column values followed by its partition values.
pub struct TableScan<'a> {
    store: &'a dyn FileStore,
    table: TableDescriptor,
    files: std::vec::IntoIter<DataFile>,
    rows: std::vec::IntoIter<Row>,
}

impl<'a> TableScan<'a> {
    pub fn open(catalog: &dyn Catalog, store: &'a dyn FileStore, name: &TableName) -> Result<Self> {
        let table = catalog.get_table(name)?;
        let files = catalog.list_files(&table)?;
        debug!("Scanning {} files of {}", files.len(), table.name);

        Ok(Self {
            store,
            table,
            files: files.into_iter(),
            rows: Vec::new().into_iter(),
        })
    }

    /// Reads every remaining row.
    pub fn collect_rows(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row() {
            rows.push(row?);
        }
        Ok(rows)
    }

    fn load(&self, file: &DataFile) -> Result<Vec<Row>> {
        let bytes = self.store.read(&file.path).map_err(|e| {
            Error::CouldNotReadData(format!("Failed to read {}: {e}", file.path.display()))
        })?;

        let mut partition_values = Vec::with_capacity(self.table.partition_columns.len());
        for ((_, value), column) in file
            .partition
            .pairs()
            .iter()
            .zip(&self.table.partition_columns)
        {
            partition_values.push(EngineValue::from(parse_partition_value(
                value,
                &column.logical_type,
            )?));
        }

        let rows = format::decode_file(&self.table, &bytes)?
            .into_iter()
            .map(|values| {
                values
                    .into_iter()
                    .map(EngineValue::from)
                    .chain(partition_values.iter().cloned())
                    .collect()
            })
            .collect();
        Ok(rows)
    }
}

impl RowSource for TableScan<'_> {
    fn schema(&self) -> Option<Vec<LogicalType>> {
        Some(self.table.all_column_types())
    }

    fn next_row(&mut self) -> Option<Result<Row>> {
        loop {
            if let Some(row) = self.rows.next() {
                return Some(Ok(row));
            }
            let file = self.files.next()?;
            match self.load(&file) {
                Ok(rows) => self.rows = rows.into_iter(),
                Err(error) => return Some(Err(error)),
            }
        }
    }
}
