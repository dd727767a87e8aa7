//! Normalizers for single wire-text values.

use crate::domain::ResultValue;

use super::NormalizeError;

pub fn text(value: &str) -> Result<ResultValue, NormalizeError> {
    Ok(ResultValue::Text(value.to_string()))
}

pub fn boolean(value: &str) -> Result<ResultValue, NormalizeError> {
    match value {
        "t" | "true" | "TRUE" => Ok(ResultValue::Bool(true)),
        "f" | "false" | "FALSE" => Ok(ResultValue::Bool(false)),
        _ => Err(NormalizeError::invalid("bool", value)),
    }
}

pub fn integer(value: &str) -> Result<ResultValue, NormalizeError> {
    value
        .trim()
        .parse::<i64>()
        .map(ResultValue::Int)
        .map_err(|_| NormalizeError::invalid("integer", value))
}

/// Non-finite values stay textual so they survive JSON serialization.
pub fn float(value: &str) -> Result<ResultValue, NormalizeError> {
    match value {
        "NaN" | "Infinity" | "-Infinity" => Ok(ResultValue::Text(value.to_string())),
        _ => value
            .trim()
            .parse::<f64>()
            .map(ResultValue::Float)
            .map_err(|_| NormalizeError::invalid("float", value)),
    }
}

/// NUMERIC stays a decimal string to avoid rounding.
pub fn numeric(value: &str) -> Result<ResultValue, NormalizeError> {
    text(value)
}

/// DATE is already `YYYY-MM-DD`.
pub fn date(value: &str) -> Result<ResultValue, NormalizeError> {
    text(value)
}

pub fn time(value: &str) -> Result<ResultValue, NormalizeError> {
    text(value)
}

/// TIMETZ drops its zone offset; UTC is assumed.
pub fn time_tz(value: &str) -> Result<ResultValue, NormalizeError> {
    Ok(ResultValue::Text(strip_utc_offset(value).to_string()))
}

pub fn timestamp(value: &str) -> Result<ResultValue, NormalizeError> {
    text(value)
}

/// TIMESTAMPTZ drops its zone offset; UTC is assumed.
pub fn timestamp_tz(value: &str) -> Result<ResultValue, NormalizeError> {
    Ok(ResultValue::Text(strip_utc_offset(value).to_string()))
}

pub fn bit(value: &str) -> Result<ResultValue, NormalizeError> {
    text(value)
}

/// Cuts a trailing `+HH[:MM]` or `-HH[:MM]` offset from a time or timestamp.
///
/// Only the time portion is searched, so date separators are never taken
/// for a negative offset. A leading sign (`-infinity`) is kept.
pub fn strip_utc_offset(value: &str) -> &str {
    let time_start = value.find(['T', ' ']).map_or(1, |idx| idx + 1);
    match value.get(time_start..).and_then(|time| time.find(['+', '-'])) {
        Some(idx) => &value[..time_start + idx],
        None => value,
    }
}

/// JSON payloads are parsed; the literal `null` becomes [`ResultValue::JsonNull`]
/// so it stays distinct from SQL `NULL`.
pub fn json(value: &str) -> Result<ResultValue, NormalizeError> {
    if value == "null" {
        return Ok(ResultValue::JsonNull);
    }
    serde_json::from_str(value)
        .map(ResultValue::Json)
        .map_err(|err| NormalizeError::Json(err.to_string()))
}

pub fn bytea(value: &str) -> Result<ResultValue, NormalizeError> {
    decode_bytea(value).map(ResultValue::Bytes)
}

/// Decodes the `\x` hex or the legacy escape output of BYTEA.
pub fn decode_bytea(value: &str) -> Result<Vec<u8>, NormalizeError> {
    match value.strip_prefix("\\x") {
        Some(hex) => decode_hex(hex).ok_or_else(|| NormalizeError::invalid("bytea", value)),
        None => decode_bytea_escape(value).ok_or_else(|| NormalizeError::invalid("bytea", value)),
    }
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| {
            let high = (pair[0] as char).to_digit(16)?;
            let low = (pair[1] as char).to_digit(16)?;
            Some((high * 16 + low) as u8)
        })
        .collect()
}

fn decode_bytea_escape(value: &str) -> Option<Vec<u8>> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] != b'\\' {
            out.push(bytes[idx]);
            idx += 1;
            continue;
        }
        if bytes.get(idx + 1) == Some(&b'\\') {
            out.push(b'\\');
            idx += 2;
            continue;
        }
        let octal = bytes.get(idx + 1..idx + 4)?;
        let mut byte: u32 = 0;
        for digit in octal {
            if !(b'0'..=b'7').contains(digit) {
                return None;
            }
            byte = byte * 8 + u32::from(digit - b'0');
        }
        out.push(u8::try_from(byte).ok()?);
        idx += 4;
    }
    Some(out)
}

pub fn money(value: &str) -> Result<ResultValue, NormalizeError> {
    Ok(ResultValue::Text(normalize_money(value)))
}

/// Canonicalizes a locale-formatted MONEY value to `[-]digits[.digits]`.
///
/// Currency symbols, spaces and grouping separators are dropped. With both
/// `,` and `.` present, the last one is the decimal separator. A lone
/// separator followed by exactly three digits, after one or two leading
/// digits, is treated as grouping (`1,234` is `1234`, `123.456` stays
/// decimal). Parentheses mark a negative amount.
pub fn normalize_money(value: &str) -> String {
    let trimmed = value.trim();
    let (negative, body) = match trimmed
        .strip_prefix('(')
        .and_then(|inner| inner.strip_suffix(')'))
    {
        Some(inner) => (true, inner),
        None => (trimmed.contains('-'), trimmed),
    };

    let kept: String = body
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    if !kept.chars().any(|c| c.is_ascii_digit()) {
        return "0".to_string();
    }

    let split_at = decimal_separator(&kept).and_then(|separator| kept.rfind(separator));
    let (integer_part, fraction_part) = match split_at {
        Some(idx) => (&kept[..idx], Some(&kept[idx + 1..])),
        None => (kept.as_str(), None),
    };

    let integer_digits: String = integer_part.chars().filter(char::is_ascii_digit).collect();
    let integer_digits = integer_digits.trim_start_matches('0');
    let integer_digits = if integer_digits.is_empty() {
        "0"
    } else {
        integer_digits
    };
    let fraction_digits: Option<String> =
        fraction_part.map(|fraction| fraction.chars().filter(char::is_ascii_digit).collect());

    let is_zero = integer_digits == "0"
        && fraction_digits
            .as_deref()
            .is_none_or(|fraction| fraction.chars().all(|c| c == '0'));

    let mut out = String::with_capacity(kept.len() + 1);
    if negative && !is_zero {
        out.push('-');
    }
    out.push_str(integer_digits);
    if let Some(fraction) = fraction_digits.filter(|fraction| !fraction.is_empty()) {
        out.push('.');
        out.push_str(&fraction);
    }
    out
}

fn decimal_separator(kept: &str) -> Option<char> {
    let last_comma = kept.rfind(',');
    let last_dot = kept.rfind('.');
    match (last_comma, last_dot) {
        (Some(comma), Some(dot)) => Some(if comma > dot { ',' } else { '.' }),
        (Some(_), None) => lone_separator(kept, ','),
        (None, Some(_)) => lone_separator(kept, '.'),
        (None, None) => None,
    }
}

fn lone_separator(kept: &str, separator: char) -> Option<char> {
    if kept.matches(separator).count() > 1 {
        return None;
    }
    let (before, after) = kept.split_once(separator)?;
    let grouping = after.len() == 3 && (1..=2).contains(&before.len()) && !before.starts_with('0');
    if grouping { None } else { Some(separator) }
}
