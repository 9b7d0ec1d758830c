use std::{collections::HashMap, fmt, hash::Hash, str::FromStr};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use rust_decimal::Decimal;

use crate::{decimal::BigDecimal, TrinoError};

/// A decoded result cell.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    TinyInt(i8),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    Decimal(BigDecimal),
    Char(String),
    Varchar(String),
    Date(NaiveDate),
    Time(NaiveTime),
    /// Kept as the server's text, e.g. `01:02:03.456 +05:00`.
    TimeWithTimeZone(String),
    Timestamp(NaiveDateTime),
    TimestampWithTimeZone(DateTime<FixedOffset>),
    IntervalYearToMonth(IntervalYearToMonth),
    IntervalDayToSecond(TimeDelta),
    Varbinary(Vec<u8>),
    Uuid(uuid::Uuid),
    Array(Vec<Value>),
    Map(Vec<(Value, Value)>),
    /// Types without a dedicated representation (`json`, `ipaddress`, `row`, ...).
    Other(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrowed text of character-like values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Char(value)
            | Value::Varchar(value)
            | Value::TimeWithTimeZone(value)
            | Value::Other(value) => Some(value),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::TinyInt(_) => "tinyint",
            Value::SmallInt(_) => "smallint",
            Value::Integer(_) => "integer",
            Value::BigInt(_) => "bigint",
            Value::Real(_) => "real",
            Value::Double(_) => "double",
            Value::Decimal(_) => "decimal",
            Value::Char(_) => "char",
            Value::Varchar(_) => "varchar",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::TimeWithTimeZone(_) => "time with time zone",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampWithTimeZone(_) => "timestamp with time zone",
            Value::IntervalYearToMonth(_) => "interval year to month",
            Value::IntervalDayToSecond(_) => "interval day to second",
            Value::Varbinary(_) => "varbinary",
            Value::Uuid(_) => "uuid",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Other(_) => "other",
        }
    }
}

/// `interval year to month` value, kept as a signed month count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntervalYearToMonth {
    total_months: i32,
}

impl IntervalYearToMonth {
    /// Returns `None` if the month count does not fit in an `i32`.
    pub fn new(years: i32, months: i32) -> Option<Self> {
        years
            .checked_mul(12)
            .and_then(|total| total.checked_add(months))
            .map(Self::from_months)
    }

    pub fn from_months(total_months: i32) -> Self {
        Self { total_months }
    }

    pub fn years(&self) -> i32 {
        self.total_months / 12
    }

    pub fn months(&self) -> i32 {
        self.total_months % 12
    }

    pub fn total_months(&self) -> i32 {
        self.total_months
    }
}

impl FromStr for IntervalYearToMonth {
    type Err = TrinoError;

    /// Parses the `Y-M` literal, e.g. `3-2` or `-1-6`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || TrinoError::Conversion(format!("invalid year-month interval '{value}'"));
        let trimmed = value.trim();
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (years, months) = body.split_once('-').ok_or_else(invalid)?;
        let years: i32 = years.parse().map_err(|_| invalid())?;
        let months: i32 = months.parse().map_err(|_| invalid())?;
        if !(0..12).contains(&months) {
            return Err(invalid());
        }
        let total = years
            .checked_mul(12)
            .and_then(|total| total.checked_add(months))
            .ok_or_else(invalid)?;
        Ok(Self::from_months(if negative { -total } else { total }))
    }
}

impl fmt::Display for IntervalYearToMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.total_months < 0 { "-" } else { "" };
        let total = self.total_months.unsigned_abs();
        write!(f, "{sign}{}-{}", total / 12, total % 12)
    }
}

/// Conversion of a decoded cell into a Rust type.
///
/// Nulls are handled separately through [`FromValue::from_null`]: only
/// `Option<T>` accepts them.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, TrinoError>;

    /// Value to produce for a SQL `NULL`, if this type can represent one.
    fn from_null() -> Option<Self> {
        None
    }
}

fn mismatch<T>(value: &Value, target: &str) -> Result<T, TrinoError> {
    Err(TrinoError::Conversion(format!(
        "cannot convert {} value to {target}",
        value.kind()
    )))
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, TrinoError> {
        if value.is_null() {
            return Ok(None);
        }
        T::from_value(value).map(Some)
    }

    fn from_null() -> Option<Self> {
        Some(None)
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, TrinoError> {
        Ok(value)
    }

    fn from_null() -> Option<Self> {
        Some(Value::Null)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, TrinoError> {
        match value {
            Value::Boolean(value) => Ok(value),
            other => mismatch(&other, "bool"),
        }
    }
}

macro_rules! impl_from_value_int {
    ($target:ty, [$($variant:ident),+]) => {
        impl FromValue for $target {
            fn from_value(value: Value) -> Result<Self, TrinoError> {
                match value {
                    $(Value::$variant(value) => Ok(<$target>::from(value)),)+
                    other => mismatch(&other, stringify!($target)),
                }
            }
        }
    };
}

impl_from_value_int!(i8, [TinyInt]);
impl_from_value_int!(i16, [TinyInt, SmallInt]);
impl_from_value_int!(i32, [TinyInt, SmallInt, Integer]);
impl_from_value_int!(i64, [TinyInt, SmallInt, Integer, BigInt]);

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self, TrinoError> {
        match value {
            Value::Real(value) => Ok(value),
            other => mismatch(&other, "f32"),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, TrinoError> {
        match value {
            Value::Real(value) => Ok(f64::from(value)),
            Value::Double(value) => Ok(value),
            other => mismatch(&other, "f64"),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, TrinoError> {
        match value {
            Value::Char(value)
            | Value::Varchar(value)
            | Value::TimeWithTimeZone(value)
            | Value::Other(value) => Ok(value),
            Value::Decimal(value) => Ok(value.to_string()),
            Value::Uuid(value) => Ok(value.to_string()),
            other => mismatch(&other, "String"),
        }
    }
}

impl FromValue for BigDecimal {
    fn from_value(value: Value) -> Result<Self, TrinoError> {
        match value {
            Value::Decimal(value) => Ok(value),
            other => mismatch(&other, "BigDecimal"),
        }
    }
}

impl FromValue for Decimal {
    fn from_value(value: Value) -> Result<Self, TrinoError> {
        match value {
            Value::Decimal(value) => value.to_decimal(),
            Value::TinyInt(value) => Ok(Decimal::from(value)),
            Value::SmallInt(value) => Ok(Decimal::from(value)),
            Value::Integer(value) => Ok(Decimal::from(value)),
            Value::BigInt(value) => Ok(Decimal::from(value)),
            other => mismatch(&other, "Decimal"),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: Value) -> Result<Self, TrinoError> {
        match value {
            Value::Date(value) => Ok(value),
            other => mismatch(&other, "NaiveDate"),
        }
    }
}

impl FromValue for NaiveTime {
    fn from_value(value: Value) -> Result<Self, TrinoError> {
        match value {
            Value::Time(value) => Ok(value),
            other => mismatch(&other, "NaiveTime"),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: Value) -> Result<Self, TrinoError> {
        match value {
            Value::Timestamp(value) => Ok(value),
            other => mismatch(&other, "NaiveDateTime"),
        }
    }
}

impl FromValue for DateTime<FixedOffset> {
    fn from_value(value: Value) -> Result<Self, TrinoError> {
        match value {
            Value::TimestampWithTimeZone(value) => Ok(value),
            other => mismatch(&other, "DateTime<FixedOffset>"),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Result<Self, TrinoError> {
        match value {
            Value::TimestampWithTimeZone(value) => Ok(value.with_timezone(&Utc)),
            other => mismatch(&other, "DateTime<Utc>"),
        }
    }
}

impl FromValue for IntervalYearToMonth {
    fn from_value(value: Value) -> Result<Self, TrinoError> {
        match value {
            Value::IntervalYearToMonth(value) => Ok(value),
            other => mismatch(&other, "IntervalYearToMonth"),
        }
    }
}

impl FromValue for TimeDelta {
    fn from_value(value: Value) -> Result<Self, TrinoError> {
        match value {
            Value::IntervalDayToSecond(value) => Ok(value),
            other => mismatch(&other, "TimeDelta"),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self, TrinoError> {
        match value {
            Value::Varbinary(value) => Ok(value),
            other => mismatch(&other, "Vec<u8>"),
        }
    }
}

impl FromValue for uuid::Uuid {
    fn from_value(value: Value) -> Result<Self, TrinoError> {
        match value {
            Value::Uuid(value) => Ok(value),
            other => mismatch(&other, "Uuid"),
        }
    }
}

impl FromValue for Vec<Value> {
    fn from_value(value: Value) -> Result<Self, TrinoError> {
        match value {
            Value::Array(values) => Ok(values),
            other => mismatch(&other, "Vec<Value>"),
        }
    }
}

impl<K, V> FromValue for HashMap<K, V>
where
    K: FromValue + Eq + Hash,
    V: FromValue,
{
    fn from_value(value: Value) -> Result<Self, TrinoError> {
        match value {
            Value::Map(entries) => entries
                .into_iter()
                .map(|(key, value)| {
                    let key = K::from_value(key)?;
                    let value = match value {
                        Value::Null => V::from_null().ok_or_else(|| {
                            TrinoError::Conversion("map value is null".to_owned())
                        })?,
                        value => V::from_value(value)?,
                    };
                    Ok((key, value))
                })
                .collect(),
            other => mismatch(&other, "HashMap"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::{DateTime, FixedOffset, Utc};
    use rust_decimal::Decimal;

    use crate::{value::IntervalYearToMonth, FromValue, TrinoError, Value};

    #[test]
    fn integers_widen_but_never_narrow() {
        assert_eq!(i64::from_value(Value::TinyInt(-3)).expect("widens"), -3);
        assert_eq!(i32::from_value(Value::SmallInt(300)).expect("widens"), 300);
        assert!(matches!(
            i16::from_value(Value::Integer(1)),
            Err(TrinoError::Conversion(_))
        ));
    }

    #[test]
    fn option_accepts_null() {
        assert_eq!(Option::<i32>::from_value(Value::Null).expect("null"), None);
        assert_eq!(Option::<i32>::from_null(), Some(None));
        assert_eq!(i32::from_null(), None);
        assert!(String::from_value(Value::Null).is_err());
    }

    #[test]
    fn decimal_converts_to_fixed_width() {
        let value = Value::Decimal("12.50".parse().expect("valid"));
        assert_eq!(
            Decimal::from_value(value.clone()).expect("fits"),
            Decimal::new(1250, 2)
        );
        assert_eq!(String::from_value(value).expect("text"), "12.50");
    }

    #[test]
    fn timestamp_with_time_zone_converts_to_utc() {
        let offset = FixedOffset::east_opt(5 * 3600).expect("valid offset");
        let local = DateTime::parse_from_rfc3339("2023-04-04T01:02:03+05:00")
            .expect("valid")
            .with_timezone(&offset);
        let utc = DateTime::<Utc>::from_value(Value::TimestampWithTimeZone(local)).expect("utc");
        assert_eq!(utc.to_rfc3339(), "2023-04-03T20:02:03+00:00");
    }

    #[test]
    fn map_collects_entries() {
        let value = Value::Map(vec![
            (Value::Varchar("a".to_owned()), Value::Integer(1)),
            (Value::Varchar("b".to_owned()), Value::Null),
        ]);
        let map = HashMap::<String, Option<i32>>::from_value(value).expect("map");
        assert_eq!(map.get("a"), Some(&Some(1)));
        assert_eq!(map.get("b"), Some(&None));
    }

    #[test]
    fn year_month_interval_parses_and_prints() {
        let interval: IntervalYearToMonth = "3-2".parse().expect("valid");
        assert_eq!((interval.years(), interval.months()), (3, 2));
        assert_eq!(interval.total_months(), 38);

        let negative: IntervalYearToMonth = "-1-6".parse().expect("valid");
        assert_eq!(negative.total_months(), -18);
        assert_eq!(negative.to_string(), "-1-6");

        assert!("1-12".parse::<IntervalYearToMonth>().is_err());
        assert!("12".parse::<IntervalYearToMonth>().is_err());
        assert!("3000000000-0".parse::<IntervalYearToMonth>().is_err());
        assert!("200000000-0".parse::<IntervalYearToMonth>().is_err());
        assert_eq!(IntervalYearToMonth::new(i32::MAX, 1), None);
        assert_eq!(IntervalYearToMonth::new(-1, -6).map(|i| i.total_months()), Some(-18));
    }
}
