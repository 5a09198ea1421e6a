use log::warn;

use crate::error::{Error, Result};
use crate::storage::TableDescriptor;

/// Rejects tables the write path cannot safely modify.
///
/// Runs before any partition is resolved or file is written, so a transactional
/// table is refused even when no rows would be inserted.
pub fn check(table: &TableDescriptor) -> Result<()> {
    if table.transactional {
        warn!("Refusing insert into transactional table {}", table.name);
        return Err(Error::UnsupportedTable(table.name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LogicalType, StorageFormat, TableName};

    #[test]
    fn test_transactional_table_is_rejected_for_any_format() {
        for format in [StorageFormat::Text, StorageFormat::ColumnarBinary] {
            let table = TableDescriptor::new(TableName::new(
                "default",
                "test_insert_into_transactional_table",
            ))
            .with_column("a", LogicalType::BigInt)
            .with_format(format)
            .with_transactional(true);

            let error = check(&table).unwrap_err();
            assert_eq!(
                error.to_string(),
                "Inserting into Hive transactional tables is not supported: default.test_insert_into_transactional_table"
            );
        }
    }

    #[test]
    fn test_plain_table_is_approved() {
        let table = TableDescriptor::new(TableName::new("default", "t"))
            .with_column("a", LogicalType::BigInt);
        assert!(check(&table).is_ok());
    }
}
