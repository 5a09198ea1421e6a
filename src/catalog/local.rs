use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::format::DataFile;
use crate::partition::{Partition, PartitionKey, PartitionState};
use crate::storage::{
    TableDescriptor, TableName, read_file_with_crc, validate_name, write_file_with_crc,
};

pub const TABLE_METADATA_FILENAME: &str = ".metadata";
pub const TABLE_METADATA_MAGIC_BYTES: &[u8] = b"HWMETA".as_slice();
const VERSION: u16 = 1;

/// Persisted state of one table: its descriptor and everything committed into it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
struct TableMetadata {
    version: u16,
    created_at: i64,
    row_count: u64,
    descriptor: TableDescriptor,
    partitions: Vec<Partition>,
    files: Vec<DataFile>,
}

impl TableMetadata {
    fn path(&self) -> PathBuf {
        self.descriptor.location.join(TABLE_METADATA_FILENAME)
    }

    fn write(&self) -> Result<()> {
        write_file_with_crc(self, &self.path(), TABLE_METADATA_MAGIC_BYTES)
    }
}

/// File-backed metastore rooted at a warehouse directory.
///
/// Tables live at `<warehouse>/<database>/<table>`; each keeps its metadata in a
/// checksummed `.metadata` file. All state is owned by this handle.
#[derive(Debug)]
pub struct LocalCatalog {
    warehouse_dir: PathBuf,
    tables: DashMap<TableName, TableMetadata>,
}

impl LocalCatalog {
    /// Opens the warehouse, loading every table found in it.
    ///
    /// Leftover temporary files of interrupted writes are removed.
    ///
    /// Returns: LocalCatalog or CouldNotReadData when the directory cannot be scanned
    pub fn open(warehouse_dir: &Path) -> Result<Self> {
        info!("Loading tables from warehouse: {}", warehouse_dir.display());
        std::fs::create_dir_all(warehouse_dir).map_err(|e| {
            Error::CouldNotReadData(format!(
                "Failed to create warehouse directory {}: {e}",
                warehouse_dir.display()
            ))
        })?;

        let catalog = Self {
            warehouse_dir: warehouse_dir.to_path_buf(),
            tables: DashMap::new(),
        };

        for database_path in subdirectories(warehouse_dir)? {
            for table_path in subdirectories(&database_path)? {
                let metadata_path = table_path.join(TABLE_METADATA_FILENAME);
                if !metadata_path.exists() {
                    continue;
                }
                match read_file_with_crc::<TableMetadata>(&metadata_path, TABLE_METADATA_MAGIC_BYTES)
                {
                    Ok(metadata) => {
                        remove_temporary_files(&table_path);
                        info!("Loaded table {}", metadata.descriptor.name);
                        catalog
                            .tables
                            .insert(metadata.descriptor.name.clone(), metadata);
                    }
                    Err(error) => {
                        warn!(
                            "Failed to load table at {}: {error}",
                            table_path.display()
                        );
                    }
                }
            }
        }

        info!("Finished loading {} tables", catalog.tables.len());
        Ok(catalog)
    }

    /// Registers a new empty table. Its location is assigned inside the warehouse.
    ///
    /// Returns: the stored descriptor, TableAlreadyExists or InvalidTable
    pub fn create_table(&self, mut descriptor: TableDescriptor) -> Result<TableDescriptor> {
        if !validate_name(&descriptor.name.database) || !validate_name(&descriptor.name.table) {
            return Err(Error::InvalidTable(format!(
                "Invalid table name: {}",
                descriptor.name
            )));
        }
        descriptor.validate()?;
        descriptor.location = self.warehouse_dir.join(descriptor.name.relative_path());

        match self.tables.entry(descriptor.name.clone()) {
            Entry::Occupied(_) => Err(Error::TableAlreadyExists(descriptor.name.to_string())),
            Entry::Vacant(vacant) => {
                std::fs::create_dir_all(&descriptor.location).map_err(|e| {
                    Error::InvalidTable(format!(
                        "Failed to create table directory {}: {e}",
                        descriptor.location.display()
                    ))
                })?;

                let metadata = TableMetadata {
                    version: VERSION,
                    created_at: chrono::Utc::now().timestamp_millis(),
                    row_count: 0,
                    descriptor: descriptor.clone(),
                    partitions: Vec::new(),
                    files: Vec::new(),
                };
                metadata.write()?;
                vacant.insert(metadata);

                info!("Created table {}", descriptor.name);
                Ok(descriptor)
            }
        }
    }

    /// Removes a table and all of its data.
    pub fn drop_table(&self, name: &TableName) -> Result<()> {
        let Some((_, metadata)) = self.tables.remove(name) else {
            return Err(Error::TableNotFound(name.to_string()));
        };
        if let Err(error) = std::fs::remove_dir_all(&metadata.descriptor.location) {
            warn!(
                "Couldn't remove ({}). Remove directory manually: {}",
                metadata.descriptor.location.display(),
                error
            );
        }
        info!("Dropped table {name}");
        Ok(())
    }

    /// Committed partitions of a table, in commit order.
    pub fn list_partitions(&self, name: &TableName) -> Result<Vec<Partition>> {
        self.tables
            .get(name)
            .map(|metadata| metadata.partitions.clone())
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    /// Total committed rows of a table.
    pub fn row_count(&self, name: &TableName) -> Result<u64> {
        self.tables
            .get(name)
            .map(|metadata| metadata.row_count)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }
}

impl Catalog for LocalCatalog {
    fn get_table(&self, name: &TableName) -> Result<TableDescriptor> {
        self.tables
            .get(name)
            .map(|metadata| metadata.descriptor.clone())
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    fn find_partition(
        &self,
        table: &TableDescriptor,
        key: &PartitionKey,
    ) -> Result<Option<Partition>> {
        let metadata = self
            .tables
            .get(&table.name)
            .ok_or_else(|| Error::TableNotFound(table.name.to_string()))?;
        Ok(metadata
            .partitions
            .iter()
            .find(|partition| &partition.key == key)
            .cloned())
    }

    /// Holds the table entry exclusively for the whole registration.
    ///
    /// A new partition already committed by a concurrent insert is reused when its
    /// location matches and rejected otherwise. In-memory state is restored if the
    /// metadata file cannot be written.
    fn commit(
        &self,
        table: &TableDescriptor,
        files: &[DataFile],
        new_partitions: &[Partition],
    ) -> Result<()> {
        let Some(mut metadata) = self.tables.get_mut(&table.name) else {
            return Err(Error::MetastoreCommit(format!(
                "table {} no longer exists",
                table.name
            )));
        };

        let mut added = Vec::new();
        for partition in new_partitions {
            match metadata
                .partitions
                .iter()
                .find(|existing| existing.key == partition.key)
            {
                Some(existing) if existing.location != partition.location => {
                    return Err(Error::MetastoreCommit(format!(
                        "partition {} of {} already exists at {}",
                        partition.key,
                        table.name,
                        existing.location.display()
                    )));
                }
                Some(_) => {}
                None => added.push(Partition {
                    state: PartitionState::Committed,
                    ..partition.clone()
                }),
            }
        }

        for file in files {
            let known = file.partition.is_empty()
                || added.iter().any(|partition| partition.key == file.partition)
                || metadata
                    .partitions
                    .iter()
                    .any(|partition| partition.key == file.partition);
            if !known {
                return Err(Error::MetastoreCommit(format!(
                    "file {} belongs to unknown partition {}",
                    file.path.display(),
                    file.partition
                )));
            }
        }

        let partition_count = metadata.partitions.len();
        let file_count = metadata.files.len();
        let row_count = metadata.row_count;

        metadata.partitions.extend(added);
        metadata.files.extend(files.iter().cloned());
        metadata.row_count += files.iter().map(|file| file.row_count).sum::<u64>();

        if let Err(error) = metadata.write() {
            metadata.partitions.truncate(partition_count);
            metadata.files.truncate(file_count);
            metadata.row_count = row_count;
            return Err(Error::MetastoreCommit(error.to_string()));
        }

        info!(
            "Committed {} files and {} partitions to {}",
            files.len(),
            metadata.partitions.len() - partition_count,
            table.name
        );
        Ok(())
    }

    fn list_files(&self, table: &TableDescriptor) -> Result<Vec<DataFile>> {
        self.tables
            .get(&table.name)
            .map(|metadata| metadata.files.clone())
            .ok_or_else(|| Error::TableNotFound(table.name.to_string()))
    }
}

fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        Error::CouldNotReadData(format!("Failed to read directory {}: {e}", dir.display()))
    })?;

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            Error::CouldNotReadData(format!("Failed to read entry of {}: {e}", dir.display()))
        })?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if path.is_dir() && !hidden {
            dirs.push(path);
        }
    }
    Ok(dirs)
}

fn remove_temporary_files(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if path.is_dir() {
            remove_temporary_files(&path);
        } else if name.starts_with('.') && name.ends_with(".tmp") {
            match std::fs::remove_file(&path) {
                Ok(()) => info!("Removed temporary file {}", path.display()),
                Err(error) => warn!(
                    "Failed to remove temporary file {}: {}",
                    path.display(),
                    error
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LogicalType;
    use tempfile::TempDir;

    fn descriptor(table: &str) -> TableDescriptor {
        TableDescriptor::new(TableName::new("default", table))
            .with_column("id", LogicalType::Int)
            .with_partition_column("dt", LogicalType::Varchar(None))
    }

    fn pending(table: &TableDescriptor, value: &str, location: Option<&Path>) -> Partition {
        let key = PartitionKey::new(vec![("dt".to_string(), value.to_string())]);
        Partition {
            location: location
                .map(Path::to_path_buf)
                .unwrap_or_else(|| table.location.join(format!("dt={value}"))),
            key,
            state: PartitionState::Pending,
        }
    }

    fn data_file(partition: &Partition, rows: u64) -> DataFile {
        DataFile {
            path: partition.location.join("file"),
            partition: partition.key.clone(),
            row_count: rows,
            size_bytes: 1,
        }
    }

    #[test]
    fn test_create_assigns_location_and_rejects_duplicates() {
        let dir = TempDir::new().unwrap();
        let catalog = LocalCatalog::open(dir.path()).unwrap();

        let table = catalog.create_table(descriptor("events")).unwrap();
        assert_eq!(table.location, dir.path().join("default").join("events"));
        assert!(table.location.join(TABLE_METADATA_FILENAME).exists());

        assert!(matches!(
            catalog.create_table(descriptor("events")),
            Err(Error::TableAlreadyExists(_))
        ));
    }

    #[test]
    fn test_commit_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let table = {
            let catalog = LocalCatalog::open(dir.path()).unwrap();
            let table = catalog.create_table(descriptor("events")).unwrap();
            let partition = pending(&table, "2018-01-01", None);
            catalog
                .commit(&table, &[data_file(&partition, 3)], &[partition])
                .unwrap();
            table
        };

        let catalog = LocalCatalog::open(dir.path()).unwrap();
        assert_eq!(catalog.get_table(&table.name).unwrap(), table);
        assert_eq!(catalog.row_count(&table.name).unwrap(), 3);

        let partitions = catalog.list_partitions(&table.name).unwrap();
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].state, PartitionState::Committed);
        assert!(
            catalog
                .find_partition(&table, &partitions[0].key)
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_same_partition_committed_twice_is_not_duplicated() {
        let dir = TempDir::new().unwrap();
        let catalog = LocalCatalog::open(dir.path()).unwrap();
        let table = catalog.create_table(descriptor("events")).unwrap();

        let first = pending(&table, "2018-01-01", None);
        let second = pending(&table, "2018-01-01", None);
        catalog
            .commit(&table, &[data_file(&first, 1)], &[first])
            .unwrap();
        catalog
            .commit(&table, &[data_file(&second, 1)], &[second])
            .unwrap();

        assert_eq!(catalog.list_partitions(&table.name).unwrap().len(), 1);
        assert_eq!(catalog.list_files(&table).unwrap().len(), 2);
    }

    #[test]
    fn test_divergent_partition_location_is_rejected() {
        let dir = TempDir::new().unwrap();
        let catalog = LocalCatalog::open(dir.path()).unwrap();
        let table = catalog.create_table(descriptor("events")).unwrap();

        let first = pending(&table, "2018-01-01", None);
        catalog
            .commit(&table, &[data_file(&first, 1)], &[first])
            .unwrap();

        let elsewhere = dir.path().join("elsewhere");
        let divergent = pending(&table, "2018-01-01", Some(elsewhere.as_path()));
        let result = catalog.commit(&table, &[data_file(&divergent, 1)], &[divergent]);

        assert!(matches!(result, Err(Error::MetastoreCommit(_))));
        assert_eq!(catalog.list_files(&table).unwrap().len(), 1);
        assert_eq!(catalog.row_count(&table.name).unwrap(), 1);
    }

    #[test]
    fn test_file_of_unknown_partition_is_rejected() {
        let dir = TempDir::new().unwrap();
        let catalog = LocalCatalog::open(dir.path()).unwrap();
        let table = catalog.create_table(descriptor("events")).unwrap();

        let orphan = pending(&table, "2018-01-02", None);
        let result = catalog.commit(&table, &[data_file(&orphan, 1)], &[]);
        assert!(matches!(result, Err(Error::MetastoreCommit(_))));
        assert!(catalog.list_files(&table).unwrap().is_empty());
    }

    #[test]
    fn test_open_removes_temporary_files() {
        let dir = TempDir::new().unwrap();
        let table = {
            let catalog = LocalCatalog::open(dir.path()).unwrap();
            catalog.create_table(descriptor("events")).unwrap()
        };
        let partition_dir = table.location.join("dt=x");
        std::fs::create_dir_all(&partition_dir).unwrap();
        let leftover = partition_dir.join(".0190-file.tmp");
        std::fs::write(&leftover, b"partial").unwrap();

        LocalCatalog::open(dir.path()).unwrap();
        assert!(!leftover.exists());
    }

    #[test]
    fn test_drop_table() {
        let dir = TempDir::new().unwrap();
        let catalog = LocalCatalog::open(dir.path()).unwrap();
        let table = catalog.create_table(descriptor("events")).unwrap();

        catalog.drop_table(&table.name).unwrap();
        assert!(!table.location.exists());
        assert!(matches!(
            catalog.get_table(&table.name),
            Err(Error::TableNotFound(_))
        ));
    }
}
