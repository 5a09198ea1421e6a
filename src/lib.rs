//! Insert write path for Hive-compatible warehouse tables.
//!
//! Rows from a query engine are coerced to the table's storage types, routed to
//! partitions, serialized in the table's format and committed to the catalog as
//! one unit.

pub mod catalog;
pub mod coercion;
pub mod config;
pub mod error;
pub mod format;
pub mod guard;
pub mod insert;
pub mod partition;
pub mod protocol;
pub mod scan;
pub mod storage;
pub mod store;
