mod local;

pub use local::LocalCatalog;

use crate::error::Result;
use crate::format::DataFile;
use crate::partition::{Partition, PartitionKey};
use crate::storage::{TableDescriptor, TableName};

/// Metastore operations the write path depends on.
///
/// `commit` is the single registration point: files and partitions passed to it become
/// visible together or not at all. The catalog is the arbiter of partition-key uniqueness
/// across concurrent inserts.
pub trait Catalog: Send + Sync {
    fn get_table(&self, name: &TableName) -> Result<TableDescriptor>;

    /// Looks up a committed partition of `table`.
    fn find_partition(
        &self,
        table: &TableDescriptor,
        key: &PartitionKey,
    ) -> Result<Option<Partition>>;

    /// Registers finished files and newly created partitions as one unit.
    ///
    /// Returns: Ok or MetastoreCommit, in which case nothing was registered
    fn commit(
        &self,
        table: &TableDescriptor,
        files: &[DataFile],
        new_partitions: &[Partition],
    ) -> Result<()>;

    /// Committed data files of `table`, in commit order.
    fn list_files(&self, table: &TableDescriptor) -> Result<Vec<DataFile>>;
}
