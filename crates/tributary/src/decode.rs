//! Value decoder
//!
//! Converts one source-encoded value into a destination literal. The
//! producer emits numerics as base64 big-endian two's-complement, temporal
//! values as integers in a unit carried by the field schema, and binary
//! values as base64. Everything else passes through as text.
//!
//! With `quote_for_sql` the result is a quoted SQL literal; without it the
//! same text is returned bare for the tuple path, where the destination's
//! input routines do the parsing.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::DateTime;

use crate::common::{EngineError, Result};
use crate::destination::{typeoid, Oid};

/// Base unit of a numeric-encoded temporal value, taken from the event's
/// field schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeRep {
    #[default]
    Undef,
    /// Days since epoch
    Date,
    /// Milliseconds since midnight
    Time,
    /// Microseconds since midnight
    MicroTime,
    /// Nanoseconds since midnight
    NanoTime,
    /// Milliseconds since epoch
    Timestamp,
    /// Microseconds since epoch
    MicroTimestamp,
    /// Nanoseconds since epoch
    NanoTimestamp,
    /// Already a string with zone offset; passes through
    ZonedTimestamp,
}

impl TimeRep {
    /// Map a field schema's semantic type name.
    pub fn from_semantic(name: &str) -> TimeRep {
        match name {
            "io.debezium.time.Date" | "org.apache.kafka.connect.data.Date" => TimeRep::Date,
            "io.debezium.time.Time" | "org.apache.kafka.connect.data.Time" => TimeRep::Time,
            "io.debezium.time.MicroTime" => TimeRep::MicroTime,
            "io.debezium.time.NanoTime" => TimeRep::NanoTime,
            "io.debezium.time.Timestamp" | "org.apache.kafka.connect.data.Timestamp" => {
                TimeRep::Timestamp
            }
            "io.debezium.time.MicroTimestamp" => TimeRep::MicroTimestamp,
            "io.debezium.time.NanoTimestamp" => TimeRep::NanoTimestamp,
            "io.debezium.time.ZonedTimestamp" | "io.debezium.time.ZonedTime" => {
                TimeRep::ZonedTimestamp
            }
            _ => TimeRep::Undef,
        }
    }
}

/// Quote a string as a SQL literal, doubling embedded quotes.
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Decode one value. `Ok(None)` is SQL NULL.
pub fn decode_value(
    dest_oid: Oid,
    typemod: i32,
    scale: Option<i32>,
    time_rep: TimeRep,
    raw: &str,
    quote_for_sql: bool,
) -> Result<Option<String>> {
    if raw.eq_ignore_ascii_case("null") {
        return Ok(None);
    }

    let text = match dest_oid {
        typeoid::INT2 | typeoid::INT4 | typeoid::INT8 | typeoid::FLOAT4 | typeoid::FLOAT8 => {
            raw.to_string()
        }
        typeoid::NUMERIC => decode_numeric(raw, scale.unwrap_or(0))?,
        typeoid::MONEY => decode_numeric(raw, scale.unwrap_or(4))?,
        typeoid::BIT | typeoid::VARBIT => {
            let bits = decode_bits(raw, typemod)?;
            if quote_for_sql {
                return Ok(Some(format!("b'{bits}'")));
            }
            bits
        }
        typeoid::BYTEA => {
            let hex = decode_bytea(raw)?;
            if quote_for_sql {
                return Ok(Some(format!("'{hex}'")));
            }
            hex
        }
        typeoid::DATE => decode_date(raw, time_rep)?,
        typeoid::TIME => decode_time(raw, time_rep, typemod)?,
        typeoid::TIMESTAMP | typeoid::TIMESTAMPTZ => {
            if time_rep == TimeRep::ZonedTimestamp {
                raw.to_string()
            } else {
                decode_timestamp(raw, time_rep, typemod)?
            }
        }
        // char, varchar, text, uuid, json, jsonb, xml, and anything unknown
        _ => raw.to_string(),
    };

    if quote_for_sql && needs_quoting(dest_oid, time_rep) {
        Ok(Some(quote_literal(&text)))
    } else {
        Ok(Some(text))
    }
}

fn needs_quoting(dest_oid: Oid, time_rep: TimeRep) -> bool {
    match dest_oid {
        typeoid::INT2
        | typeoid::INT4
        | typeoid::INT8
        | typeoid::FLOAT4
        | typeoid::FLOAT8
        | typeoid::NUMERIC => false,
        typeoid::MONEY => false,
        typeoid::BOOL => false,
        typeoid::TIMESTAMPTZ if time_rep == TimeRep::ZonedTimestamp => true,
        _ => true,
    }
}

/// Base64 big-endian two's-complement integer of 1..=16 bytes, with the
/// decimal point placed `scale` digits from the right.
fn decode_numeric(raw: &str, scale: i32) -> Result<String> {
    // values that already look numeric pass through (snapshots may emit
    // plain lexemes when decimal handling is set to string or double)
    if raw.parse::<f64>().is_ok() && !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Ok(raw.to_string());
    }
    let bytes = BASE64
        .decode(raw)
        .map_err(|e| EngineError::decode(format!("corrupt base64 numeric '{raw}': {e}")))?;
    if bytes.is_empty() || bytes.len() > 16 {
        return Err(EngineError::decode(format!(
            "numeric payload of {} bytes out of range",
            bytes.len()
        )));
    }

    let mut acc: i128 = if bytes[0] & 0x80 != 0 { -1 } else { 0 };
    for b in &bytes {
        acc = (acc << 8) | i128::from(*b);
    }

    Ok(place_decimal_point(acc, scale))
}

fn place_decimal_point(value: i128, scale: i32) -> String {
    if scale <= 0 {
        return value.to_string();
    }
    let negative = value < 0;
    let mut digits = value.unsigned_abs().to_string();
    let scale = scale as usize;
    if digits.len() <= scale {
        // shorter than the scale: fill with leading zeroes
        digits = format!("{}{}", "0".repeat(scale - digits.len() + 1), digits);
    }
    let split = digits.len() - scale;
    let mut out = String::with_capacity(digits.len() + 2);
    if negative {
        out.push('-');
    }
    out.push_str(&digits[..split]);
    out.push('.');
    out.push_str(&digits[split..]);
    out
}

/// Base64 bytes in little-endian bit order → binary digit string padded to
/// at least `typemod` digits.
fn decode_bits(raw: &str, typemod: i32) -> Result<String> {
    let mut bytes = BASE64
        .decode(raw)
        .map_err(|e| EngineError::decode(format!("corrupt base64 bit string '{raw}': {e}")))?;
    bytes.reverse();

    let mut bits = String::with_capacity(bytes.len() * 8);
    for b in &bytes {
        bits.push_str(&format!("{b:08b}"));
    }
    let trimmed = bits.trim_start_matches('0');
    let trimmed = if trimmed.is_empty() { "0" } else { trimmed };

    let width = typemod.max(1) as usize;
    if trimmed.len() >= width {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{}{}", "0".repeat(width - trimmed.len()), trimmed))
    }
}

/// Base64 → uppercase hex-escaped form (`\xAABBCC`).
fn decode_bytea(raw: &str) -> Result<String> {
    let bytes = BASE64
        .decode(raw)
        .map_err(|e| EngineError::decode(format!("corrupt base64 binary '{raw}': {e}")))?;
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in &bytes {
        out.push_str(&format!("{b:02X}"));
    }
    Ok(out)
}

fn parse_temporal_int(raw: &str) -> Result<i64> {
    raw.parse::<i64>()
        .map_err(|_| EngineError::decode(format!("temporal value '{raw}' is not an integer")))
}

fn decode_date(raw: &str, rep: TimeRep) -> Result<String> {
    let v = parse_temporal_int(raw)?;
    let days = match rep {
        TimeRep::Date => v,
        TimeRep::Timestamp => v.div_euclid(86_400_000),
        TimeRep::MicroTimestamp => v.div_euclid(86_400_000_000),
        TimeRep::NanoTimestamp => v.div_euclid(86_400_000_000_000),
        TimeRep::Undef => {
            return Err(EngineError::decode(
                "undefined time representation for date value",
            ))
        }
        other => {
            return Err(EngineError::decode(format!(
                "time representation {other:?} cannot produce a date"
            )))
        }
    };
    let dt = DateTime::from_timestamp(days * 86_400, 0)
        .ok_or_else(|| EngineError::decode(format!("date value {v} out of range")))?;
    Ok(dt.format("%Y-%m-%d").to_string())
}

fn decode_time(raw: &str, rep: TimeRep, typemod: i32) -> Result<String> {
    let v = parse_temporal_int(raw)?;
    let micros = match rep {
        TimeRep::Time => v.checked_mul(1_000),
        TimeRep::MicroTime => Some(v),
        TimeRep::NanoTime => Some(v.div_euclid(1_000)),
        TimeRep::Undef => {
            return Err(EngineError::decode(
                "undefined time representation for time value",
            ))
        }
        other => {
            return Err(EngineError::decode(format!(
                "time representation {other:?} cannot produce a time of day"
            )))
        }
    }
    .ok_or_else(|| EngineError::decode(format!("time value {v} out of range")))?;

    let secs = micros.div_euclid(1_000_000);
    let frac = micros.rem_euclid(1_000_000);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if typemod > 0 {
        Ok(format!("{h:02}:{m:02}:{s:02}.{frac:06}"))
    } else {
        Ok(format!("{h:02}:{m:02}:{s:02}"))
    }
}

fn decode_timestamp(raw: &str, rep: TimeRep, typemod: i32) -> Result<String> {
    let v = parse_temporal_int(raw)?;
    let (secs, micros) = match rep {
        TimeRep::Timestamp => (v.div_euclid(1_000), v.rem_euclid(1_000) * 1_000),
        TimeRep::MicroTimestamp => (v.div_euclid(1_000_000), v.rem_euclid(1_000_000)),
        TimeRep::NanoTimestamp => (
            v.div_euclid(1_000_000_000),
            v.rem_euclid(1_000_000_000) / 1_000,
        ),
        TimeRep::Undef => {
            return Err(EngineError::decode(
                "undefined time representation for timestamp value",
            ))
        }
        other => {
            return Err(EngineError::decode(format!(
                "time representation {other:?} cannot produce a timestamp"
            )))
        }
    };
    let dt = DateTime::from_timestamp(secs, (micros * 1_000) as u32)
        .ok_or_else(|| EngineError::decode(format!("timestamp value {v} out of range")))?;
    if typemod > 0 {
        Ok(dt.format("%Y-%m-%dT%H:%M:%S%.6f").to_string())
    } else {
        Ok(dt.format("%Y-%m-%dT%H:%M:%S").to_string())
    }
}
