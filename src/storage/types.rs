use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::storage::value::Decimal;

/// Column type as declared in the table schema.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Hash, PartialEq, Eq)]
pub enum LogicalType {
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Real,
    Double,
    Decimal { precision: u8, scale: u8 },
    Timestamp,
    Date,
    /// `None` is an unbounded `string`.
    Varchar(Option<u32>),
    Char(u32),
    Boolean,
    Varbinary,
}

impl LogicalType {
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Decimal { precision, scale } => {
                if precision == 0 || precision > Decimal::MAX_PRECISION || scale > precision {
                    return Err(Error::InvalidTable(format!("Invalid type: {self}")));
                }
            }
            Self::Char(0) | Self::Varchar(Some(0)) => {
                return Err(Error::InvalidTable(format!("Invalid type: {self}")));
            }
            _ => {}
        }
        Ok(())
    }

    /// Width in bytes of a fixed-width slot, `None` for variable-width types.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            Self::TinyInt | Self::Boolean => Some(1),
            Self::SmallInt => Some(2),
            Self::Int | Self::Real | Self::Date => Some(4),
            Self::BigInt | Self::Double | Self::Timestamp => Some(8),
            Self::Decimal { .. } => Some(16),
            Self::Varchar(_) | Self::Char(_) | Self::Varbinary => None,
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TinyInt => write!(f, "tinyint"),
            Self::SmallInt => write!(f, "smallint"),
            Self::Int => write!(f, "int"),
            Self::BigInt => write!(f, "bigint"),
            Self::Real => write!(f, "float"),
            Self::Double => write!(f, "double"),
            Self::Decimal { precision, scale } => write!(f, "decimal({precision},{scale})"),
            Self::Timestamp => write!(f, "timestamp"),
            Self::Date => write!(f, "date"),
            Self::Varchar(None) => write!(f, "string"),
            Self::Varchar(Some(length)) => write!(f, "varchar({length})"),
            Self::Char(length) => write!(f, "char({length})"),
            Self::Boolean => write!(f, "boolean"),
            Self::Varbinary => write!(f, "binary"),
        }
    }
}

impl TryFrom<&str> for LogicalType {
    type Error = Error;

    /// Parses a Hive type name such as `decimal(10,5)` or `varchar(20)`.
    fn try_from(value: &str) -> Result<Self> {
        let normalized: String = value
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        let unsupported = || Error::InvalidTable(format!("Unsupported column type: {value}"));

        let (name, args) = match normalized.split_once('(') {
            Some((name, rest)) => {
                let args = rest.strip_suffix(')').ok_or_else(unsupported)?;
                let args = args
                    .split(',')
                    .map(|arg| arg.parse::<u32>().map_err(|_| unsupported()))
                    .collect::<Result<Vec<u32>>>()?;
                (name.to_string(), args)
            }
            None => (normalized, Vec::new()),
        };

        let logical_type = match (name.as_str(), args.as_slice()) {
            ("tinyint", []) => Self::TinyInt,
            ("smallint", []) => Self::SmallInt,
            ("int" | "integer", []) => Self::Int,
            ("bigint", []) => Self::BigInt,
            ("float" | "real", []) => Self::Real,
            ("double", []) => Self::Double,
            ("decimal", []) => Self::Decimal {
                precision: 10,
                scale: 0,
            },
            ("decimal", [precision]) => Self::Decimal {
                precision: u8::try_from(*precision).map_err(|_| unsupported())?,
                scale: 0,
            },
            ("decimal", [precision, scale]) => Self::Decimal {
                precision: u8::try_from(*precision).map_err(|_| unsupported())?,
                scale: u8::try_from(*scale).map_err(|_| unsupported())?,
            },
            ("timestamp", []) => Self::Timestamp,
            ("date", []) => Self::Date,
            ("string" | "varchar", []) => Self::Varchar(None),
            ("varchar", [length]) => Self::Varchar(Some(*length)),
            ("char", [length]) => Self::Char(*length),
            ("boolean", []) => Self::Boolean,
            ("binary" | "varbinary", []) => Self::Varbinary,
            _ => return Err(unsupported()),
        };

        logical_type.validate()?;
        Ok(logical_type)
    }
}
