use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Fixed-point decimal: `unscaled * 10^-scale`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Decimal {
    unscaled: i128,
    scale: u8,
}

impl Decimal {
    pub const MAX_PRECISION: u8 = 38;

    pub const fn new(unscaled: i128, scale: u8) -> Self {
        Self { unscaled, scale }
    }

    pub const fn unscaled(&self) -> i128 {
        self.unscaled
    }

    pub const fn scale(&self) -> u8 {
        self.scale
    }

    /// Number of significant digits of the unscaled value (zero has one).
    pub fn digits(&self) -> u8 {
        let mut remaining = self.unscaled.unsigned_abs();
        let mut digits = 1;
        while remaining >= 10 {
            remaining /= 10;
            digits += 1;
        }
        digits
    }

    /// Changes the scale, rounding half away from zero when digits are dropped.
    ///
    /// Returns `None` if the rescaled value does not fit into 128 bits.
    pub fn rescale(&self, scale: u8) -> Option<Self> {
        if scale >= self.scale {
            let factor = 10i128.checked_pow(u32::from(scale - self.scale))?;
            let unscaled = self.unscaled.checked_mul(factor)?;
            return Some(Self { unscaled, scale });
        }

        let shift = u32::from(self.scale - scale);
        // Every i128 is below half of 10^39 in magnitude.
        if shift > 38 {
            return Some(Self { unscaled: 0, scale });
        }
        let factor = 10i128.checked_pow(shift)?;
        let quotient = self.unscaled / factor;
        let remainder = self.unscaled % factor;
        let rounded = if remainder.unsigned_abs() * 2 >= factor.unsigned_abs() {
            quotient + self.unscaled.signum()
        } else {
            quotient
        };
        Some(Self {
            unscaled: rounded,
            scale,
        })
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.unscaled < 0 { "-" } else { "" };
        let digits = self.unscaled.unsigned_abs().to_string();
        let scale = usize::from(self.scale);
        if scale == 0 {
            return write!(f, "{sign}{digits}");
        }

        let digits = format!("{digits:0>width$}", width = scale + 1);
        let (integer, fraction) = digits.split_at(digits.len() - scale);
        write!(f, "{sign}{integer}.{fraction}")
    }
}

impl FromStr for Decimal {
    type Err = Error;

    /// Parses plain decimal notation; the scale is the number of fractional digits written.
    fn from_str(value: &str) -> Result<Self> {
        let invalid = || Error::CouldNotReadData(format!("Invalid decimal: {value}"));
        let trimmed = value.trim();
        let (negative, unsigned) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let (integer, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));

        if integer.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        if !integer.chars().chain(fraction.chars()).all(|ch| ch.is_ascii_digit()) {
            return Err(invalid());
        }

        let scale = u8::try_from(fraction.len()).map_err(|_| invalid())?;
        let mut unscaled: i128 = 0;
        for digit in integer.bytes().chain(fraction.bytes()) {
            unscaled = unscaled
                .checked_mul(10)
                .and_then(|v| v.checked_add(i128::from(digit - b'0')))
                .ok_or_else(invalid)?;
        }
        if negative {
            unscaled = -unscaled;
        }
        Ok(Self { unscaled, scale })
    }
}

/// Value produced by the query engine, one case per engine type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EngineValue {
    Null,
    Boolean(bool),
    TinyInt(i8),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    Decimal(Decimal),
    Varchar(String),
    Char(String),
    Varbinary(Vec<u8>),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl EngineValue {
    pub fn decimal(value: &str) -> Result<Self> {
        Ok(Self::Decimal(value.parse()?))
    }

    pub fn varchar(value: &str) -> Self {
        Self::Varchar(value.to_string())
    }
}

/// Value in the representation a storage format writes, one case per logical type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StorageValue {
    Null,
    Boolean(bool),
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    Decimal(Decimal),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
    Varchar(String),
    /// Always padded to the declared length.
    Char(String),
    Binary(Vec<u8>),
}

impl From<StorageValue> for EngineValue {
    /// Value read back from storage, as it re-enters the engine (INSERT ... SELECT).
    fn from(value: StorageValue) -> Self {
        match value {
            StorageValue::Null => Self::Null,
            StorageValue::Boolean(v) => Self::Boolean(v),
            StorageValue::TinyInt(v) => Self::TinyInt(v),
            StorageValue::SmallInt(v) => Self::SmallInt(v),
            StorageValue::Int(v) => Self::Integer(v),
            StorageValue::BigInt(v) => Self::BigInt(v),
            StorageValue::Real(v) => Self::Real(v),
            StorageValue::Double(v) => Self::Double(v),
            StorageValue::Decimal(v) => Self::Decimal(v),
            StorageValue::Timestamp(v) => Self::Timestamp(v),
            StorageValue::Date(v) => Self::Date(v),
            StorageValue::Varchar(v) => Self::Varchar(v),
            StorageValue::Char(v) => Self::Char(v),
            StorageValue::Binary(v) => Self::Varbinary(v),
        }
    }
}
