//! Conversion of engine values into the representation a column type stores.

use chrono::{NaiveDateTime, Timelike as _};

use crate::error::{Error, Result};
use crate::storage::{ColumnDescriptor, Decimal, EngineValue, LogicalType, StorageValue};

/// Coerces one engine value into the storage value for `target`.
///
/// Nulls pass through for every type; the formats decide how nulls are written.
///
/// Returns: StorageValue or TypeCoercion on type mismatch, overflow or length violation
pub fn coerce(value: EngineValue, target: &LogicalType) -> Result<StorageValue> {
    if value == EngineValue::Null {
        return Ok(StorageValue::Null);
    }

    match target {
        LogicalType::TinyInt => {
            let number = integral(&value, target)?;
            i8::try_from(number)
                .map(StorageValue::TinyInt)
                .map_err(|_| Error::coercion(&value, target, "value out of range"))
        }
        LogicalType::SmallInt => {
            let number = integral(&value, target)?;
            i16::try_from(number)
                .map(StorageValue::SmallInt)
                .map_err(|_| Error::coercion(&value, target, "value out of range"))
        }
        LogicalType::Int => {
            let number = integral(&value, target)?;
            i32::try_from(number)
                .map(StorageValue::Int)
                .map_err(|_| Error::coercion(&value, target, "value out of range"))
        }
        LogicalType::BigInt => integral(&value, target).map(StorageValue::BigInt),
        LogicalType::Real => match value {
            EngineValue::Real(number) => Ok(StorageValue::Real(number)),
            EngineValue::Double(_) => Err(Error::coercion(
                &value,
                target,
                "no implicit narrowing from double",
            )),
            _ => integral(&value, target).map(|number| StorageValue::Real(number as f32)),
        },
        LogicalType::Double => match value {
            EngineValue::Double(number) => Ok(StorageValue::Double(number)),
            EngineValue::Real(number) => Ok(StorageValue::Double(f64::from(number))),
            _ => integral(&value, target).map(|number| StorageValue::Double(number as f64)),
        },
        LogicalType::Decimal { precision, scale } => {
            let decimal = match value {
                EngineValue::Decimal(decimal) => decimal,
                _ => Decimal::new(i128::from(integral(&value, target)?), 0),
            };
            let rescaled = decimal
                .rescale(*scale)
                .ok_or_else(|| Error::coercion(&value, target, "value out of range"))?;
            if rescaled.digits() > *precision {
                return Err(Error::coercion(&value, target, "value exceeds precision"));
            }
            Ok(StorageValue::Decimal(rescaled))
        }
        LogicalType::Timestamp => match value {
            EngineValue::Timestamp(timestamp) => truncate_to_millis(timestamp)
                .map(StorageValue::Timestamp)
                .ok_or_else(|| Error::coercion(&value, target, "invalid timestamp")),
            _ => Err(Error::coercion(&value, target, "incompatible types")),
        },
        LogicalType::Date => match value {
            EngineValue::Date(date) => Ok(StorageValue::Date(date)),
            _ => Err(Error::coercion(&value, target, "incompatible types")),
        },
        LogicalType::Varchar(max_length) => match value {
            EngineValue::Varchar(text) | EngineValue::Char(text) => {
                if let Some(max_length) = max_length
                    && text.chars().count() > *max_length as usize
                {
                    return Err(Error::coercion(&text, target, "value too long"));
                }
                Ok(StorageValue::Varchar(text))
            }
            _ => Err(Error::coercion(&value, target, "incompatible types")),
        },
        LogicalType::Char(length) => match value {
            EngineValue::Varchar(text) | EngineValue::Char(text) => pad_char(&text, *length)
                .map(StorageValue::Char)
                .ok_or_else(|| Error::coercion(&text, target, "value too long")),
            _ => Err(Error::coercion(&value, target, "incompatible types")),
        },
        LogicalType::Boolean => match value {
            EngineValue::Boolean(flag) => Ok(StorageValue::Boolean(flag)),
            _ => Err(Error::coercion(&value, target, "incompatible types")),
        },
        LogicalType::Varbinary => match value {
            EngineValue::Varbinary(bytes) => Ok(StorageValue::Binary(bytes)),
            _ => Err(Error::coercion(&value, target, "incompatible types")),
        },
    }
}

/// Coerces a row of data values against the table's data columns, in order.
pub fn coerce_row(
    values: Vec<EngineValue>,
    columns: &[ColumnDescriptor],
) -> Result<Vec<StorageValue>> {
    if values.len() != columns.len() {
        return Err(Error::SchemaMismatch(format!(
            "expected {} values, got {}",
            columns.len(),
            values.len()
        )));
    }

    values
        .into_iter()
        .zip(columns)
        .map(|(value, column)| {
            coerce(value, &column.logical_type).map_err(|error| match error {
                Error::TypeCoercion {
                    value,
                    target,
                    reason,
                } => Error::TypeCoercion {
                    value,
                    target,
                    reason: format!("{reason} (column {})", column.name),
                },
                other => other,
            })
        })
        .collect()
}

/// Whether a source column of type `source` may be inserted into a `target` column.
///
/// Narrowing between integral widths is allowed here and checked per value.
pub fn is_assignable(source: &LogicalType, target: &LogicalType) -> bool {
    use LogicalType as T;

    let is_integral = matches!(source, T::TinyInt | T::SmallInt | T::Int | T::BigInt);
    match target {
        T::TinyInt | T::SmallInt | T::Int | T::BigInt => is_integral,
        T::Real => is_integral || *source == T::Real,
        T::Double => is_integral || matches!(source, T::Real | T::Double),
        T::Decimal { .. } => is_integral || matches!(source, T::Decimal { .. }),
        T::Timestamp => *source == T::Timestamp,
        T::Date => *source == T::Date,
        T::Varchar(_) | T::Char(_) => matches!(source, T::Varchar(_) | T::Char(_)),
        T::Boolean => *source == T::Boolean,
        T::Varbinary => *source == T::Varbinary,
    }
}

/// Right-pads `text` with spaces to exactly `length` characters.
///
/// Excess characters are accepted only when they are all trailing spaces.
pub fn pad_char(text: &str, length: u32) -> Option<String> {
    let length = length as usize;
    let count = text.chars().count();
    if count <= length {
        let mut padded = String::with_capacity(text.len() + length - count);
        padded.push_str(text);
        padded.extend(std::iter::repeat_n(' ', length - count));
        return Some(padded);
    }

    let cut = text
        .char_indices()
        .nth(length)
        .map_or(text.len(), |(index, _)| index);
    text[cut..]
        .chars()
        .all(|ch| ch == ' ')
        .then(|| text[..cut].to_string())
}

/// CHAR value as seen by a reader: stored padding trimmed, then re-padded to `length`.
pub fn char_value_on_read(stored: &str, length: u32) -> String {
    let trimmed = stored.trim_end_matches(' ');
    pad_char(trimmed, length).unwrap_or_else(|| trimmed.to_string())
}

/// Drops sub-millisecond precision without rounding.
pub fn truncate_to_millis(timestamp: NaiveDateTime) -> Option<NaiveDateTime> {
    let nanos = timestamp.nanosecond();
    timestamp.with_nanosecond(nanos - nanos % 1_000_000)
}

fn integral(value: &EngineValue, target: &LogicalType) -> Result<i64> {
    match value {
        EngineValue::TinyInt(number) => Ok(i64::from(*number)),
        EngineValue::SmallInt(number) => Ok(i64::from(*number)),
        EngineValue::Integer(number) => Ok(i64::from(*number)),
        EngineValue::BigInt(number) => Ok(*number),
        _ => Err(Error::coercion(value, target, "incompatible types")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn timestamp(millis: u32, nanos: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2015, 5, 10)
            .unwrap()
            .and_hms_nano_opt(12, 15, 35, millis * 1_000_000 + nanos)
            .unwrap()
    }

    #[test]
    fn test_integral_limits() {
        assert_eq!(
            coerce(EngineValue::Integer(127), &LogicalType::TinyInt).unwrap(),
            StorageValue::TinyInt(127)
        );
        assert_eq!(
            coerce(EngineValue::BigInt(i64::MAX), &LogicalType::BigInt).unwrap(),
            StorageValue::BigInt(i64::MAX)
        );
        assert_eq!(
            coerce(EngineValue::TinyInt(-5), &LogicalType::Int).unwrap(),
            StorageValue::Int(-5)
        );

        let overflow = coerce(EngineValue::Integer(128), &LogicalType::TinyInt);
        assert!(matches!(overflow, Err(Error::TypeCoercion { .. })));
        let overflow = coerce(EngineValue::BigInt(2_147_483_648), &LogicalType::Int);
        assert!(matches!(overflow, Err(Error::TypeCoercion { .. })));
        let overflow = coerce(EngineValue::Integer(-32_769), &LogicalType::SmallInt);
        assert!(matches!(overflow, Err(Error::TypeCoercion { .. })));
    }

    #[test]
    fn test_floating_widths() {
        assert_eq!(
            coerce(EngineValue::Real(123.345), &LogicalType::Real).unwrap(),
            StorageValue::Real(123.345)
        );
        assert_eq!(
            coerce(EngineValue::Real(1.5), &LogicalType::Double).unwrap(),
            StorageValue::Double(1.5)
        );
        assert!(coerce(EngineValue::Double(234.567), &LogicalType::Real).is_err());
    }

    #[test]
    fn test_decimal_scale_and_precision() {
        let target = LogicalType::Decimal {
            precision: 10,
            scale: 5,
        };
        let stored = coerce(EngineValue::decimal("345.678").unwrap(), &target).unwrap();
        assert_eq!(stored, StorageValue::Decimal(Decimal::new(34_567_800, 5)));

        let whole = LogicalType::Decimal {
            precision: 10,
            scale: 0,
        };
        assert_eq!(
            coerce(EngineValue::Integer(346), &whole).unwrap(),
            StorageValue::Decimal(Decimal::new(346, 0))
        );

        let narrow = LogicalType::Decimal {
            precision: 4,
            scale: 2,
        };
        let result = coerce(EngineValue::decimal("123.4").unwrap(), &narrow);
        assert!(matches!(result, Err(Error::TypeCoercion { .. })));
    }

    #[test]
    fn test_timestamp_truncates_below_millis() {
        let stored = coerce(
            EngineValue::Timestamp(timestamp(123, 999_999)),
            &LogicalType::Timestamp,
        )
        .unwrap();
        assert_eq!(stored, StorageValue::Timestamp(timestamp(123, 0)));
    }

    #[test]
    fn test_char_padding() {
        assert_eq!(
            coerce(EngineValue::varchar("ala ma"), &LogicalType::Char(10)).unwrap(),
            StorageValue::Char("ala ma    ".to_string())
        );
        assert_eq!(
            coerce(EngineValue::varchar("ab   "), &LogicalType::Char(3)).unwrap(),
            StorageValue::Char("ab ".to_string())
        );
        assert!(coerce(EngineValue::varchar("abcd"), &LogicalType::Char(3)).is_err());
        assert_eq!(char_value_on_read("ala ma", 10), "ala ma    ");
        assert_eq!(char_value_on_read("ala ma    ", 10), "ala ma    ");
    }

    #[test]
    fn test_varchar_is_not_truncated() {
        assert_eq!(
            coerce(EngineValue::varchar("ala ma kota"), &LogicalType::Varchar(None)).unwrap(),
            StorageValue::Varchar("ala ma kota".to_string())
        );
        assert!(coerce(EngineValue::varchar("ala ma kota"), &LogicalType::Varchar(Some(3))).is_err());
    }

    #[test]
    fn test_null_passes_through_every_type() {
        for target in [
            LogicalType::Boolean,
            LogicalType::Char(4),
            LogicalType::Varbinary,
            LogicalType::Decimal {
                precision: 1,
                scale: 0,
            },
        ] {
            assert_eq!(coerce(EngineValue::Null, &target).unwrap(), StorageValue::Null);
        }
    }

    #[test]
    fn test_boolean_is_not_inferred() {
        assert!(coerce(EngineValue::Integer(0), &LogicalType::Boolean).is_err());
        assert!(coerce(EngineValue::varchar("true"), &LogicalType::Boolean).is_err());
    }

    #[test]
    fn test_coerce_row_names_column() {
        let columns = vec![ColumnDescriptor::new("a", LogicalType::TinyInt)];
        let error = coerce_row(vec![EngineValue::Integer(1000)], &columns).unwrap_err();
        assert!(error.to_string().contains("column a"));
    }

    #[test]
    fn test_assignability() {
        assert!(is_assignable(&LogicalType::TinyInt, &LogicalType::BigInt));
        assert!(is_assignable(&LogicalType::Real, &LogicalType::Double));
        assert!(!is_assignable(&LogicalType::Double, &LogicalType::Real));
        assert!(is_assignable(&LogicalType::Char(3), &LogicalType::Varchar(None)));
        assert!(!is_assignable(&LogicalType::Date, &LogicalType::Timestamp));
    }
}
