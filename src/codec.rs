//! Decoding of JSON cells according to their wire-type string.
//!
//! Type strings look like `basetype` or `basetype(params)`, optionally with a
//! trailing qualifier: `decimal(8,5)`, `array(varchar)`,
//! `timestamp(6) with time zone`.

use std::sync::OnceLock;

use base64::Engine;
use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use regex::Regex;
use serde_json::Value as Json;

use crate::{decimal::BigDecimal, value::IntervalYearToMonth, TrinoError, Value};

/// Fractional second digits a timestamp with time zone may carry.
pub const MAX_ZONED_FRACTION_DIGITS: usize = 7;

/// Splits a wire type into its base name and parameter text.
///
/// The base is everything before the first `(` joined with everything after
/// the last `)`. The parameters are everything in between, so nested
/// parameter lists are returned flattened as a single string.
pub fn split_type(wire_type: &str) -> (String, Option<&str>) {
    let wire_type = wire_type.trim();
    match (wire_type.find('('), wire_type.rfind(')')) {
        (Some(open), Some(close)) if open < close => {
            let base = format!("{}{}", &wire_type[..open], &wire_type[close + 1..]);
            (base.trim().to_ascii_lowercase(), Some(&wire_type[open + 1..close]))
        }
        _ => (wire_type.to_ascii_lowercase(), None),
    }
}

/// Converts one JSON cell of wire type `wire_type` into a [`Value`].
pub fn convert(cell: &Json, wire_type: &str) -> Result<Value, TrinoError> {
    if cell.is_null() {
        return Ok(Value::Null);
    }

    let (base, params) = split_type(wire_type);
    match base.as_str() {
        "boolean" => match cell {
            Json::Bool(value) => Ok(Value::Boolean(*value)),
            Json::String(text) if text.eq_ignore_ascii_case("true") => Ok(Value::Boolean(true)),
            Json::String(text) if text.eq_ignore_ascii_case("false") => Ok(Value::Boolean(false)),
            _ => Err(invalid(cell, wire_type)),
        },
        "tinyint" => narrow(cell, wire_type).map(Value::TinyInt),
        "smallint" => narrow(cell, wire_type).map(Value::SmallInt),
        "integer" => narrow(cell, wire_type).map(Value::Integer),
        "bigint" => narrow(cell, wire_type).map(Value::BigInt),
        "real" => float(cell, wire_type).map(|value| Value::Real(value as f32)),
        "double" => float(cell, wire_type).map(Value::Double),
        "decimal" => {
            let literal = match cell {
                Json::String(text) => text.clone(),
                Json::Number(number) => number.to_string(),
                _ => return Err(invalid(cell, wire_type)),
            };
            literal.parse::<BigDecimal>().map(Value::Decimal)
        }
        "char" => text(cell, wire_type).map(|value| Value::Char(value.to_owned())),
        "varchar" => text(cell, wire_type).map(|value| Value::Varchar(value.to_owned())),
        "date" => {
            let literal = text(cell, wire_type)?;
            NaiveDate::parse_from_str(literal, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|err| conversion(literal, wire_type, err))
        }
        "time" => {
            let literal = text(cell, wire_type)?;
            check_fraction(literal, 9, wire_type)?;
            NaiveTime::parse_from_str(literal, "%H:%M:%S%.f")
                .map(Value::Time)
                .map_err(|err| conversion(literal, wire_type, err))
        }
        "time with time zone" => {
            text(cell, wire_type).map(|value| Value::TimeWithTimeZone(value.to_owned()))
        }
        "timestamp" => {
            let literal = text(cell, wire_type)?;
            parse_timestamp(literal, wire_type).map(Value::Timestamp)
        }
        "timestamp with time zone" => {
            let literal = text(cell, wire_type)?;
            parse_timestamp_with_time_zone(literal).map(Value::TimestampWithTimeZone)
        }
        "interval year to month" => text(cell, wire_type)?
            .parse::<IntervalYearToMonth>()
            .map(Value::IntervalYearToMonth),
        "interval day to second" => {
            parse_day_to_second(text(cell, wire_type)?).map(Value::IntervalDayToSecond)
        }
        "varbinary" => {
            let literal = text(cell, wire_type)?;
            base64::engine::general_purpose::STANDARD
                .decode(literal)
                .map(Value::Varbinary)
                .map_err(|err| conversion(literal, wire_type, err))
        }
        "uuid" => {
            let literal = text(cell, wire_type)?;
            uuid::Uuid::parse_str(literal)
                .map(Value::Uuid)
                .map_err(|err| conversion(literal, wire_type, err))
        }
        "array" => {
            let element_type = params.ok_or_else(|| missing_params(wire_type))?;
            match structured(cell, wire_type)? {
                Json::Array(elements) => elements
                    .iter()
                    .map(|element| convert(element, element_type))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                _ => Err(invalid(cell, wire_type)),
            }
        }
        "map" => {
            let params = params.ok_or_else(|| missing_params(wire_type))?;
            let (key_type, value_type) =
                split_map_params(params).ok_or_else(|| missing_params(wire_type))?;
            match structured(cell, wire_type)? {
                Json::Object(entries) => entries
                    .iter()
                    .map(|(key, value)| {
                        Ok((
                            convert(&Json::String(key.clone()), key_type)?,
                            convert(value, value_type)?,
                        ))
                    })
                    .collect::<Result<Vec<_>, TrinoError>>()
                    .map(Value::Map),
                _ => Err(invalid(cell, wire_type)),
            }
        }
        _ => Ok(Value::Other(match cell {
            Json::String(text) => text.clone(),
            other => other.to_string(),
        })),
    }
}

/// Parses `yyyy-MM-dd HH:mm:ss[.fffffff][ ]{+HH:MM|-HH:MM|UTC}`.
pub fn parse_timestamp_with_time_zone(
    literal: &str,
) -> Result<chrono::DateTime<FixedOffset>, TrinoError> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| {
            Regex::new(
                r"^(\d{4})-(\d{2})-(\d{2}) (\d{2}):(\d{2}):(\d{2})(?:\.(\d+))? ?([+-]\d{2}:\d{2}|UTC)$",
            )
            .ok()
        })
        .as_ref()
        .ok_or_else(|| TrinoError::Conversion("timestamp pattern failed to compile".to_owned()))?;

    let wire_type = "timestamp with time zone";
    let captures = pattern
        .captures(literal.trim())
        .ok_or_else(|| TrinoError::Conversion(format!("invalid {wire_type} literal '{literal}'")))?;
    let field = |index: usize| -> Result<u32, TrinoError> {
        captures
            .get(index)
            .map(|m| m.as_str())
            .unwrap_or_default()
            .parse()
            .map_err(|_| TrinoError::Conversion(format!("invalid {wire_type} literal '{literal}'")))
    };

    let fraction = captures.get(7).map(|m| m.as_str()).unwrap_or_default();
    if fraction.len() > MAX_ZONED_FRACTION_DIGITS {
        return Err(TrinoError::UnsupportedPrecision(format!(
            "'{literal}' has {} fractional digits, at most {MAX_ZONED_FRACTION_DIGITS} are supported",
            fraction.len()
        )));
    }
    let nanos = fraction_nanos(fraction)?;

    let year = i32::try_from(field(1)?)
        .map_err(|_| TrinoError::Conversion(format!("invalid {wire_type} literal '{literal}'")))?;
    let timestamp = NaiveDate::from_ymd_opt(year, field(2)?, field(3)?)
        .and_then(|date| date.and_hms_nano_opt(field(4).ok()?, field(5).ok()?, field(6).ok()?, nanos))
        .ok_or_else(|| TrinoError::Conversion(format!("invalid {wire_type} literal '{literal}'")))?;

    let offset = match captures.get(8).map(|m| m.as_str()) {
        Some("UTC") | None => FixedOffset::east_opt(0),
        Some(offset) => parse_offset(offset),
    }
    .ok_or_else(|| TrinoError::Conversion(format!("invalid offset in '{literal}'")))?;

    timestamp
        .and_local_timezone(offset)
        .single()
        .ok_or_else(|| TrinoError::Conversion(format!("invalid {wire_type} literal '{literal}'")))
}

fn parse_offset(offset: &str) -> Option<FixedOffset> {
    let (sign, rest) = offset.split_at(1);
    let (hours, minutes) = rest.split_once(':')?;
    let seconds = hours.parse::<i32>().ok()? * 3600 + minutes.parse::<i32>().ok()? * 60;
    FixedOffset::east_opt(if sign == "-" { -seconds } else { seconds })
}

fn parse_timestamp(literal: &str, wire_type: &str) -> Result<NaiveDateTime, TrinoError> {
    check_fraction(literal, 9, wire_type)?;
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(literal, format).ok())
        .ok_or_else(|| TrinoError::Conversion(format!("invalid {wire_type} literal '{literal}'")))
}

/// Parses `[-]D HH:MM:SS[.fff]`.
fn parse_day_to_second(literal: &str) -> Result<TimeDelta, TrinoError> {
    let invalid = || TrinoError::Conversion(format!("invalid day-second interval '{literal}'"));
    let trimmed = literal.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let (days, clock) = body.split_once(' ').ok_or_else(invalid)?;
    let (clock, fraction) = match clock.split_once('.') {
        Some((clock, fraction)) => (clock, fraction),
        None => (clock, ""),
    };
    let mut parts = clock.split(':').map(str::parse::<i64>);
    let (Some(Ok(hours)), Some(Ok(minutes)), Some(Ok(seconds)), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };
    let days: i64 = days.parse().map_err(|_| invalid())?;
    if fraction.len() > 9 {
        return Err(TrinoError::UnsupportedPrecision(format!(
            "'{literal}' has more than 9 fractional digits"
        )));
    }

    let seconds = days
        .checked_mul(86_400)
        .zip(hours.checked_mul(3_600))
        .zip(minutes.checked_mul(60))
        .and_then(|((days, hours), minutes)| {
            days.checked_add(hours)?.checked_add(minutes)?.checked_add(seconds)
        })
        .ok_or_else(invalid)?;
    let delta = TimeDelta::new(seconds, fraction_nanos(fraction)?).ok_or_else(invalid)?;
    Ok(if negative { -delta } else { delta })
}

fn fraction_nanos(fraction: &str) -> Result<u32, TrinoError> {
    if fraction.is_empty() {
        return Ok(0);
    }
    format!("{fraction:0<9}")[..9]
        .parse()
        .map_err(|_| TrinoError::Conversion(format!("invalid fractional seconds '{fraction}'")))
}

fn check_fraction(literal: &str, max_digits: usize, wire_type: &str) -> Result<(), TrinoError> {
    let digits = literal
        .split_once('.')
        .map(|(_, rest)| rest.bytes().take_while(u8::is_ascii_digit).count())
        .unwrap_or(0);
    if digits > max_digits {
        return Err(TrinoError::UnsupportedPrecision(format!(
            "{wire_type} literal '{literal}' has {digits} fractional digits, at most {max_digits} are supported"
        )));
    }
    Ok(())
}

/// Splits `K, V` at the first comma outside any parentheses.
fn split_map_params(params: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (index, ch) in params.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                return Some((params[..index].trim(), params[index + 1..].trim()));
            }
            _ => {}
        }
    }
    None
}

fn narrow<T: TryFrom<i64>>(cell: &Json, wire_type: &str) -> Result<T, TrinoError> {
    let wide = match cell {
        Json::Number(number) => number.as_i64(),
        Json::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| invalid(cell, wire_type))?;
    T::try_from(wide).map_err(|_| {
        TrinoError::Overflow(format!("{wide} is out of range for {wire_type}"))
    })
}

fn float(cell: &Json, wire_type: &str) -> Result<f64, TrinoError> {
    match cell {
        Json::Number(number) => number.as_f64(),
        Json::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| invalid(cell, wire_type))
}

fn text<'a>(cell: &'a Json, wire_type: &str) -> Result<&'a str, TrinoError> {
    cell.as_str().ok_or_else(|| invalid(cell, wire_type))
}

/// Containers arrive either as JSON or as a JSON document inside a string.
fn structured(cell: &Json, wire_type: &str) -> Result<Json, TrinoError> {
    match cell {
        Json::String(document) => serde_json::from_str(document)
            .map_err(|err| conversion(document, wire_type, err)),
        other => Ok(other.clone()),
    }
}

fn invalid(cell: &Json, wire_type: &str) -> TrinoError {
    TrinoError::Conversion(format!("cannot decode {cell} as {wire_type}"))
}

fn conversion(literal: &str, wire_type: &str, err: impl std::fmt::Display) -> TrinoError {
    TrinoError::Conversion(format!("invalid {wire_type} literal '{literal}': {err}"))
}

fn missing_params(wire_type: &str) -> TrinoError {
    TrinoError::Conversion(format!("type '{wire_type}' is missing its parameters"))
}
