use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::format::text;
use crate::storage::{LogicalType, StorageValue, TableDescriptor};

/// Directory value Hive uses for a NULL partition value.
pub const HIVE_DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// Ordered `(column, value)` pairs identifying a partition. Empty for the default partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey(Vec<(String, String)>);

impl PartitionKey {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Path segments, one `col=value` per partition column, innermost last.
    pub fn path_segments(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|(name, value)| format!("{}={}", escape_path_name(name), escape_path_name(value)))
            .collect()
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path_segments().join("/"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionState {
    /// Allocated by an insert that has not committed yet.
    Pending,
    Committed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub key: PartitionKey,
    pub location: PathBuf,
    pub state: PartitionState,
}

impl Partition {
    /// The single implicit partition of an unpartitioned table.
    pub fn default_for(table: &TableDescriptor) -> Self {
        Self {
            key: PartitionKey::default(),
            location: table.location.clone(),
            state: PartitionState::Committed,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == PartitionState::Pending
    }
}

/// Resolves partition values to partitions for the duration of one insert.
///
/// Allocation is idempotent per key: every row with the same key receives the same partition.
pub struct PartitionResolver<'a> {
    catalog: &'a dyn Catalog,
    resolved: HashMap<PartitionKey, Partition>,
}

impl<'a> PartitionResolver<'a> {
    pub fn new(catalog: &'a dyn Catalog) -> Self {
        Self {
            catalog,
            resolved: HashMap::new(),
        }
    }

    /// Returns the partition for `values`, reusing a committed one or allocating a pending one.
    ///
    /// Returns: Partition or PartitionResolution on malformed values
    pub fn resolve(
        &mut self,
        table: &TableDescriptor,
        values: &[(String, String)],
    ) -> Result<Partition> {
        if !table.is_partitioned() {
            if !values.is_empty() {
                return Err(Error::PartitionResolution(format!(
                    "table {} is not partitioned",
                    table.name
                )));
            }
            return Ok(Partition::default_for(table));
        }

        let key = build_key(table, values)?;
        if let Some(partition) = self.resolved.get(&key) {
            return Ok(partition.clone());
        }

        let partition = match self.catalog.find_partition(table, &key)? {
            Some(existing) => {
                debug!("Reusing partition {} of table {}", key, table.name);
                existing
            }
            None => {
                let mut location = table.location.clone();
                location.extend(key.path_segments());
                info!("Allocated new partition {} of table {}", key, table.name);
                Partition {
                    key: key.clone(),
                    location,
                    state: PartitionState::Pending,
                }
            }
        };

        self.resolved.insert(key, partition.clone());
        Ok(partition)
    }

    /// Partitions allocated by this resolver that are not committed yet, ordered by key.
    pub fn pending_partitions(&self) -> Vec<Partition> {
        let mut pending: Vec<Partition> = self
            .resolved
            .values()
            .filter(|partition| partition.is_pending())
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.key.cmp(&b.key));
        pending
    }
}

fn build_key(table: &TableDescriptor, values: &[(String, String)]) -> Result<PartitionKey> {
    if values.len() != table.partition_columns.len() {
        return Err(Error::PartitionResolution(format!(
            "table {} expects {} partition values, got {}",
            table.name,
            table.partition_columns.len(),
            values.len()
        )));
    }

    let mut pairs = Vec::with_capacity(values.len());
    for (column, (name, value)) in table.partition_columns.iter().zip(values) {
        if !column.name.eq_ignore_ascii_case(name) {
            return Err(Error::PartitionResolution(format!(
                "expected partition column {}, got {name}",
                column.name
            )));
        }
        if value.is_empty() {
            return Err(Error::PartitionResolution(format!(
                "Hive partition keys can not be empty: {name}"
            )));
        }
        if !value.bytes().all(|byte| (0x20..=0x7E).contains(&byte)) {
            return Err(Error::PartitionResolution(format!(
                "Hive partition keys can only contain printable ASCII characters (0x20 - 0x7E). Invalid value: {value}"
            )));
        }
        pairs.push((column.name.clone(), value.clone()));
    }

    Ok(PartitionKey::new(pairs))
}

/// Canonical string of a coerced partition column value.
pub fn partition_value_string(value: &StorageValue) -> String {
    match value {
        StorageValue::Null => HIVE_DEFAULT_PARTITION.to_string(),
        value => text::encode_value(value),
    }
}

/// Parses a partition value string back into a value of `logical_type`.
pub fn parse_partition_value(value: &str, logical_type: &LogicalType) -> Result<StorageValue> {
    if value == HIVE_DEFAULT_PARTITION {
        return Ok(StorageValue::Null);
    }
    text::decode_value(value, logical_type)
}

/// Escapes characters that are unsafe in a partition directory name as `%XX`.
pub fn escape_path_name(name: &str) -> String {
    const SPECIAL: &[char] = &[
        '"', '#', '%', '\'', '*', '/', ':', '=', '?', '\\', '\x7F', '{', '[', ']', '^',
    ];

    let mut escaped = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_control() || SPECIAL.contains(&ch) {
            escaped.push_str(&format!("%{:02X}", ch as u32));
        } else {
            escaped.push(ch);
        }
    }
    escaped
}
