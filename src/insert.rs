use derive_more::Display;
use log::{debug, error, info};
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::catalog::Catalog;
use crate::coercion::{coerce_row, is_assignable};
use crate::error::{Error, Result};
use crate::format::{DataFile, WriteBatch};
use crate::guard;
use crate::partition::{Partition, PartitionKey, PartitionResolver, partition_value_string};
use crate::storage::{EngineValue, LogicalType, TableDescriptor, TableName};
use crate::store::{self, FileStore};

/// Engine values of one source row: data columns, then partition columns.
pub type Row = Vec<EngineValue>;

/// Lazy, finite, non-restartable sequence of rows.
pub trait RowSource {
    /// Column types of the produced rows, when known up front.
    fn schema(&self) -> Option<Vec<LogicalType>> {
        None
    }

    fn next_row(&mut self) -> Option<Result<Row>>;
}

/// Literal rows, as in `INSERT INTO t VALUES (...)`.
#[derive(Debug, Default)]
pub struct Values {
    schema: Option<Vec<LogicalType>>,
    rows: std::vec::IntoIter<Row>,
}

impl Values {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            schema: None,
            rows: rows.into_iter(),
        }
    }

    pub fn with_schema(mut self, schema: Vec<LogicalType>) -> Self {
        self.schema = Some(schema);
        self
    }
}

impl RowSource for Values {
    fn schema(&self) -> Option<Vec<LogicalType>> {
        self.schema.clone()
    }

    fn next_row(&mut self) -> Option<Result<Row>> {
        self.rows.next().map(Ok)
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum InsertState {
    #[display("VALIDATING")]
    Validating,
    #[display("GUARDING")]
    Guarding,
    #[display("RESOLVING")]
    Resolving,
    #[display("WRITING")]
    Writing,
    #[display("COMMITTING")]
    Committing,
    #[display("DONE")]
    Done,
    #[display("FAILED")]
    Failed,
}

/// Cancels an insert that has not reached COMMITTING yet.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Collaborators shared by every insert: catalog, file store and writer pool.
pub struct InsertContext {
    catalog: Arc<dyn Catalog>,
    store: Arc<dyn FileStore>,
    pool: Arc<rayon::ThreadPool>,
    file_write_attempts: u32,
}

impl InsertContext {
    /// Returns: InsertContext or InvalidConfig when the writer pool cannot be built
    pub fn new(
        catalog: Arc<dyn Catalog>,
        store: Arc<dyn FileStore>,
        writer_threads: usize,
        file_write_attempts: u32,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(writer_threads)
            .thread_name(|index| format!("hivewrite-writer-{index}"))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("Failed to build writer pool: {e}")))?;

        Ok(Self {
            catalog,
            store,
            pool: Arc::new(pool),
            file_write_attempts,
        })
    }

    /// Inserts every row of `source` into `table`.
    ///
    /// Returns: number of rows written, or the error that aborted the whole insert
    pub fn insert_into(&self, table: &TableName, source: &mut dyn RowSource) -> Result<u64> {
        self.insert_into_cancellable(table, source, &CancelToken::default())
    }

    pub fn insert_into_cancellable(
        &self,
        table: &TableName,
        source: &mut dyn RowSource,
        cancel: &CancelToken,
    ) -> Result<u64> {
        InsertCoordinator::new(self, table, cancel).run(source)
    }
}

/// Rows of one partition, in source order.
struct PartitionGroup {
    partition: Partition,
    rows: Vec<Row>,
}

/// One insert invocation. Owns its pending partitions and uncommitted files.
struct InsertCoordinator<'a> {
    context: &'a InsertContext,
    table_name: &'a TableName,
    cancel: &'a CancelToken,
    state: InsertState,
    uncommitted: Vec<PathBuf>,
    pending_dirs: Vec<PathBuf>,
}

impl<'a> InsertCoordinator<'a> {
    fn new(context: &'a InsertContext, table_name: &'a TableName, cancel: &'a CancelToken) -> Self {
        Self {
            context,
            table_name,
            cancel,
            state: InsertState::Validating,
            uncommitted: Vec::new(),
            pending_dirs: Vec::new(),
        }
    }

    fn run(mut self, source: &mut dyn RowSource) -> Result<u64> {
        debug!("Insert into {}: {}", self.table_name, self.state);
        match self.execute(source) {
            Ok(rows) => {
                self.transition(InsertState::Done);
                Ok(rows)
            }
            Err(error) => {
                error!("Insert into {} failed in {}: {error}", self.table_name, self.state);
                self.transition(InsertState::Failed);
                if !self.uncommitted.is_empty() {
                    info!(
                        "Discarding {} uncommitted files of {}",
                        self.uncommitted.len(),
                        self.table_name
                    );
                    store::discard_files(
                        self.context.store.as_ref(),
                        self.uncommitted.iter().map(PathBuf::as_path),
                    );
                }
                store::discard_directories(
                    self.context.store.as_ref(),
                    self.pending_dirs.iter().map(PathBuf::as_path),
                );
                Err(error)
            }
        }
    }

    fn transition(&mut self, next: InsertState) {
        debug!("Insert into {}: {} -> {}", self.table_name, self.state, next);
        self.state = next;
    }

    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn execute(&mut self, source: &mut dyn RowSource) -> Result<u64> {
        let catalog = Arc::clone(&self.context.catalog);
        let table = catalog.get_table(self.table_name)?;
        validate_source(&table, source.schema())?;

        self.transition(InsertState::Guarding);
        guard::check(&table)?;
        self.checkpoint()?;

        self.transition(InsertState::Resolving);
        let mut resolver = PartitionResolver::new(catalog.as_ref());
        let groups = self.group_rows(&table, &mut resolver, source)?;
        if groups.is_empty() {
            info!("Nothing to insert into {}", table.name);
            return Ok(0);
        }

        self.transition(InsertState::Writing);
        self.pending_dirs = pending_directories(&table.location, &resolver.pending_partitions());
        let files = self.write_groups(&table, groups)?;
        self.checkpoint()?;

        self.transition(InsertState::Committing);
        let new_partitions = resolver.pending_partitions();
        catalog.commit(&table, &files, &new_partitions)?;
        self.uncommitted.clear();

        let rows = files.iter().map(|file| file.row_count).sum();
        info!(
            "Inserted {rows} rows into {} ({} files, {} new partitions)",
            table.name,
            files.len(),
            new_partitions.len()
        );
        Ok(rows)
    }

    /// Drains the source, grouping rows by the partition their partition values resolve to.
    fn group_rows(
        &self,
        table: &TableDescriptor,
        resolver: &mut PartitionResolver,
        source: &mut dyn RowSource,
    ) -> Result<Vec<PartitionGroup>> {
        let mut groups: Vec<PartitionGroup> = Vec::new();
        let mut index: HashMap<PartitionKey, usize> = HashMap::new();

        while let Some(row) = source.next_row() {
            self.checkpoint()?;
            let mut row = row?;
            if row.len() != table.row_width() {
                return Err(Error::SchemaMismatch(format!(
                    "table {} has {} columns but row has {}",
                    table.name,
                    table.row_width(),
                    row.len()
                )));
            }

            let partition_values = row.split_off(table.columns.len());
            let pairs: Vec<(String, String)> =
                coerce_row(partition_values, &table.partition_columns)?
                    .iter()
                    .zip(&table.partition_columns)
                    .map(|(value, column)| (column.name.clone(), partition_value_string(value)))
                    .collect();
            let partition = resolver.resolve(table, &pairs)?;

            match index.get(&partition.key) {
                Some(position) => groups[*position].rows.push(row),
                None => {
                    index.insert(partition.key.clone(), groups.len());
                    groups.push(PartitionGroup {
                        partition,
                        rows: vec![row],
                    });
                }
            }
        }

        Ok(groups)
    }

    /// Writes one file per group on the writer pool, then joins.
    ///
    /// Files of groups that succeeded are tracked as uncommitted even when another group fails.
    fn write_groups(
        &mut self,
        table: &TableDescriptor,
        groups: Vec<PartitionGroup>,
    ) -> Result<Vec<DataFile>> {
        let store = self.context.store.as_ref();
        let attempts = self.context.file_write_attempts;
        let cancel = self.cancel;

        let results: Vec<Result<DataFile>> = self.context.pool.install(|| {
            groups
                .into_par_iter()
                .map(|group| write_group(table, group, store, attempts, cancel))
                .collect()
        });

        let mut files = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(file) => {
                    self.uncommitted.push(file.path.clone());
                    files.push(file);
                }
                Err(error) => {
                    first_error.get_or_insert(error);
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(files),
        }
    }
}

fn write_group(
    table: &TableDescriptor,
    group: PartitionGroup,
    store: &dyn FileStore,
    attempts: u32,
    cancel: &CancelToken,
) -> Result<DataFile> {
    let mut batch = WriteBatch::open(table, &group.partition)?;
    for row in group.rows {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let values = coerce_row(row, &table.columns)?;
        batch.append(&values)?;
    }
    batch.finish(store, attempts)
}

/// Directories below the table location that only pending partitions need, deepest first.
fn pending_directories(table_location: &Path, pending: &[Partition]) -> Vec<PathBuf> {
    let mut dirs = BTreeSet::new();
    for partition in pending {
        for dir in partition.location.ancestors() {
            if dir == table_location || !dir.starts_with(table_location) {
                break;
            }
            dirs.insert(dir.to_path_buf());
        }
    }

    let mut dirs: Vec<PathBuf> = dirs.into_iter().collect();
    dirs.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
    dirs
}

/// Checks the declared source column types against every table column.
fn validate_source(table: &TableDescriptor, schema: Option<Vec<LogicalType>>) -> Result<()> {
    let Some(schema) = schema else {
        return Ok(());
    };

    let targets = table.all_column_types();
    if schema.len() != targets.len() {
        return Err(Error::SchemaMismatch(format!(
            "table {} has {} columns but query has {}",
            table.name,
            targets.len(),
            schema.len()
        )));
    }

    let names = table.columns.iter().chain(&table.partition_columns);
    for ((source, target), column) in schema.iter().zip(&targets).zip(names) {
        if !is_assignable(source, target) {
            return Err(Error::SchemaMismatch(format!(
                "column {} is of type {target} but expression is of type {source}",
                column.name
            )));
        }
    }
    Ok(())
}
