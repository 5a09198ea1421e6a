use derive_more::Display;
use serde::Serialize;

pub type Result<T> = std::result::Result<T, Error>;

/// Universal error.
///
/// Every failure of an insert surfaces as exactly one of these variants.
#[derive(Serialize, Debug, Display, Clone, PartialEq, Eq)]
pub enum Error {
    // mod guard
    #[display("Inserting into Hive transactional tables is not supported: {_0}")]
    UnsupportedTable(String),

    // mod coercion
    #[display("Cannot coerce {value} to {target}: {reason}")]
    TypeCoercion {
        value: String,
        target: String,
        reason: String,
    },

    // mod partition
    #[display("Could not resolve partition: {_0}")]
    PartitionResolution(String),

    // mod format, mod store
    #[display("Could not write data: {_0}")]
    Serialization(String),
    #[display("Could not read data: {_0}")]
    CouldNotReadData(String),

    // mod catalog
    #[display("Metastore commit failed: {_0}")]
    MetastoreCommit(String),
    #[display("Table not found: {_0}")]
    TableNotFound(String),
    #[display("Table already exists: {_0}")]
    TableAlreadyExists(String),
    #[display("Invalid table: {_0}")]
    InvalidTable(String),

    // mod insert
    #[display("Insert query has mismatched column types: {_0}")]
    SchemaMismatch(String),
    #[display("Insert was cancelled")]
    Cancelled,

    // mod config
    #[display("Invalid configuration: {_0}")]
    InvalidConfig(String),

    // mod main
    SendResponse, // does not need display
}

impl std::error::Error for Error {}

impl Error {
    /// Builds a `TypeCoercion` error for a value rejected by `target`.
    pub fn coercion(value: impl std::fmt::Debug, target: impl ToString, reason: &str) -> Self {
        Self::TypeCoercion {
            value: format!("{value:?}"),
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }
}
