//! Property tests: coerced rows read back unchanged from every storage format.

use chrono::{DateTime, NaiveDate};
use proptest::collection::vec;
use proptest::prelude::*;

use hivewrite::coercion::coerce;
use hivewrite::format::{decode_file, get_writer};
use hivewrite::storage::{
    Decimal, EngineValue, LogicalType, StorageFormat, StorageValue, TableDescriptor, TableName,
};

/// Engine value to insert, and the storage value it must read back as.
type Case = (EngineValue, StorageValue);

/// Characters that never collide with the text delimiters or the `\N` null marker.
const TEXT_CHARS: &str = "[a-zA-Z0-9 ,.:äßø€]";

fn logical_type() -> impl Strategy<Value = LogicalType> {
    prop_oneof![
        Just(LogicalType::Boolean),
        Just(LogicalType::TinyInt),
        Just(LogicalType::SmallInt),
        Just(LogicalType::Int),
        Just(LogicalType::BigInt),
        Just(LogicalType::Real),
        Just(LogicalType::Double),
        (1u8..=38)
            .prop_flat_map(|precision| (Just(precision), 0..=precision))
            .prop_map(|(precision, scale)| LogicalType::Decimal { precision, scale }),
        Just(LogicalType::Timestamp),
        Just(LogicalType::Date),
        Just(LogicalType::Varchar(None)),
        (1u32..=12).prop_map(|length| LogicalType::Varchar(Some(length))),
        (1u32..=12).prop_map(LogicalType::Char),
        Just(LogicalType::Varbinary),
    ]
}

fn text(max_chars: u32) -> BoxedStrategy<String> {
    prop::string::string_regex(&format!("{TEXT_CHARS}{{0,{max_chars}}}"))
        .expect("valid regex")
        .boxed()
}

fn non_null_case(logical_type: LogicalType) -> BoxedStrategy<Case> {
    use proptest::num::{f32 as f32s, f64 as f64s};

    match logical_type {
        LogicalType::Boolean => any::<bool>()
            .prop_map(|v| (EngineValue::Boolean(v), StorageValue::Boolean(v)))
            .boxed(),
        LogicalType::TinyInt => any::<i8>()
            .prop_map(|v| (EngineValue::TinyInt(v), StorageValue::TinyInt(v)))
            .boxed(),
        LogicalType::SmallInt => any::<i16>()
            .prop_map(|v| (EngineValue::SmallInt(v), StorageValue::SmallInt(v)))
            .boxed(),
        LogicalType::Int => any::<i32>()
            .prop_map(|v| (EngineValue::Integer(v), StorageValue::Int(v)))
            .boxed(),
        LogicalType::BigInt => any::<i64>()
            .prop_map(|v| (EngineValue::BigInt(v), StorageValue::BigInt(v)))
            .boxed(),
        LogicalType::Real => (f32s::POSITIVE
            | f32s::NEGATIVE
            | f32s::NORMAL
            | f32s::SUBNORMAL
            | f32s::ZERO
            | f32s::INFINITE)
            .prop_map(|v| (EngineValue::Real(v), StorageValue::Real(v)))
            .boxed(),
        LogicalType::Double => (f64s::POSITIVE
            | f64s::NEGATIVE
            | f64s::NORMAL
            | f64s::SUBNORMAL
            | f64s::ZERO
            | f64s::INFINITE)
            .prop_map(|v| (EngineValue::Double(v), StorageValue::Double(v)))
            .boxed(),
        LogicalType::Decimal { precision, scale } => (0..=scale)
            .prop_flat_map(move |missing_zeros| {
                let bound = 10i128.pow(u32::from(precision - missing_zeros)) - 1;
                (Just(missing_zeros), -bound..=bound)
            })
            .prop_map(move |(missing_zeros, unscaled)| {
                // The source carries fewer fractional digits than the column declares.
                let source = Decimal::new(unscaled, scale - missing_zeros);
                let stored =
                    Decimal::new(unscaled * 10i128.pow(u32::from(missing_zeros)), scale);
                (EngineValue::Decimal(source), StorageValue::Decimal(stored))
            })
            .boxed(),
        LogicalType::Timestamp => (0i64..7_258_118_400, 0u32..1_000_000_000)
            .prop_map(|(seconds, nanos)| {
                let at = |nanos| {
                    DateTime::from_timestamp(seconds, nanos)
                        .expect("timestamp in range")
                        .naive_utc()
                };
                (
                    EngineValue::Timestamp(at(nanos)),
                    StorageValue::Timestamp(at(nanos - nanos % 1_000_000)),
                )
            })
            .boxed(),
        LogicalType::Date => (1i32..=3_000_000)
            .prop_map(|days| {
                let date = NaiveDate::from_num_days_from_ce_opt(days).expect("date in range");
                (EngineValue::Date(date), StorageValue::Date(date))
            })
            .boxed(),
        LogicalType::Varchar(length) => text(length.unwrap_or(40))
            .prop_map(|v| (EngineValue::Varchar(v.clone()), StorageValue::Varchar(v)))
            .boxed(),
        LogicalType::Char(length) => text(length)
            .prop_map(move |v| {
                let padded = format!("{v:<width$}", width = length as usize);
                (EngineValue::Varchar(v), StorageValue::Char(padded))
            })
            .boxed(),
        LogicalType::Varbinary => vec(any::<u8>(), 0..32)
            .prop_map(|v| (EngineValue::Varbinary(v.clone()), StorageValue::Binary(v)))
            .boxed(),
    }
}

fn case(logical_type: LogicalType) -> BoxedStrategy<Case> {
    prop_oneof![
        1 => Just((EngineValue::Null, StorageValue::Null)),
        9 => non_null_case(logical_type),
    ]
    .boxed()
}

fn table_and_rows() -> impl Strategy<Value = (Vec<LogicalType>, Vec<Vec<Case>>)> {
    vec(logical_type(), 1..8).prop_flat_map(|types| {
        let row: Vec<BoxedStrategy<Case>> = types.iter().copied().map(case).collect();
        (Just(types), vec(row, 0..20))
    })
}

fn table(types: &[LogicalType], format: StorageFormat) -> TableDescriptor {
    types
        .iter()
        .enumerate()
        .fold(
            TableDescriptor::new(TableName::new("default", "round_trip")).with_format(format),
            |table, (index, logical_type)| table.with_column(&format!("c{index}"), *logical_type),
        )
}

/// Equality that tells `0.0` from `-0.0` and compares the exact float bits.
fn same_value(left: &StorageValue, right: &StorageValue) -> bool {
    match (left, right) {
        (StorageValue::Real(a), StorageValue::Real(b)) => a.to_bits() == b.to_bits(),
        (StorageValue::Double(a), StorageValue::Double(b)) => a.to_bits() == b.to_bits(),
        _ => left == right,
    }
}

fn assert_round_trip(
    format: StorageFormat,
    types: &[LogicalType],
    rows: Vec<Vec<Case>>,
) -> Result<(), TestCaseError> {
    let table = table(types, format);
    let mut writer = get_writer(&table).expect("writer");
    let mut expected = Vec::with_capacity(rows.len());

    for row in rows {
        let mut values = Vec::with_capacity(row.len());
        let mut stored = Vec::with_capacity(row.len());
        for ((value, expected_value), column) in row.into_iter().zip(&table.columns) {
            let coerced = coerce(value, &column.logical_type).expect("coercible value");
            prop_assert!(
                same_value(&coerced, &expected_value),
                "{} coerced to {:?}, expected {:?}",
                column.logical_type,
                coerced,
                expected_value
            );
            values.push(coerced);
            stored.push(expected_value);
        }
        writer.append(&values).expect("append");
        expected.push(stored);
    }

    let bytes = writer.finish().expect("finish");
    let decoded = decode_file(&table, &bytes).expect("decode");
    prop_assert_eq!(decoded.len(), expected.len());
    for (read, written) in decoded.iter().zip(&expected) {
        prop_assert_eq!(read.len(), written.len());
        for (a, b) in read.iter().zip(written) {
            prop_assert!(same_value(a, b), "read {:?}, wrote {:?}", a, b);
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn test_text_round_trip((types, rows) in table_and_rows()) {
        assert_round_trip(StorageFormat::Text, &types, rows)?;
    }

    #[test]
    fn test_columnar_round_trip((types, rows) in table_and_rows()) {
        assert_round_trip(StorageFormat::ColumnarBinary, &types, rows)?;
    }
}

#[test]
fn test_decimal_scale_and_char_padding_survive_text() {
    let types = [
        LogicalType::Decimal {
            precision: 10,
            scale: 5,
        },
        LogicalType::Char(6),
    ];
    let rows = vec![vec![
        (
            EngineValue::Decimal(Decimal::new(345_678, 3)),
            StorageValue::Decimal(Decimal::new(34_567_800, 5)),
        ),
        (
            EngineValue::varchar("ab"),
            StorageValue::Char("ab    ".to_string()),
        ),
    ]];
    assert_round_trip(StorageFormat::Text, &types, rows).unwrap();
}
