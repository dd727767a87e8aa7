//! Renders binary-format wire values to the Postgres text output form.
//!
//! sqlx fetches results in the binary format. Rendering them back to the
//! text the server would have sent lets one normalizer registry serve both
//! the socket client and the HTTP client.

use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

use crate::app::oid;
use crate::domain::{DriverError, Oid, SYSTEM_CATALOG_CEILING};

/// Highest array dimensionality the server allows.
const MAX_DIMENSIONS: usize = 6;
/// Leading byte of ltree, lquery and ltxtquery binary values.
const TEXT_FORMAT_VERSION: u8 = 1;

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Renders one non-null value of type `oid`.
///
/// Custom types are rendered as arrays when the bytes carry an array
/// header, and as text otherwise. Other types without a dedicated decoder
/// come back as UTF-8 text, or as `\x` hex when the bytes are not valid
/// UTF-8.
pub fn render(type_oid: Oid, bytes: &[u8]) -> Result<String, DriverError> {
    let mut reader = Reader::new(type_oid, bytes);
    let text = match type_oid {
        oid::BOOL => match reader.u8()? {
            0 => "f".to_string(),
            _ => "t".to_string(),
        },
        oid::INT2 => reader.i16()?.to_string(),
        oid::INT4 => reader.i32()?.to_string(),
        oid::OID => reader.u32()?.to_string(),
        oid::INT8 => reader.i64()?.to_string(),
        oid::FLOAT4 => render_float(f64::from(f32::from_bits(reader.u32()?))),
        oid::FLOAT8 => render_float(f64::from_bits(reader.u64()?)),
        oid::NUMERIC => render_numeric(&mut reader)?,
        oid::MONEY => render_money(reader.i64()?),
        oid::BYTEA => hex(bytes),
        oid::UUID => uuid::Uuid::from_slice(bytes)
            .map_err(|err| decode_error(type_oid, err))?
            .hyphenated()
            .to_string(),
        oid::JSONB => match bytes.split_first() {
            Some((1, json)) => utf8(type_oid, json)?,
            _ => return Err(decode_error(type_oid, "unsupported jsonb version")),
        },
        oid::DATE => render_date(reader.i32()?)?,
        oid::TIME => render_time(reader.i64()?)?,
        oid::TIMETZ => {
            let time = render_time(reader.i64()?)?;
            let offset = render_offset(-reader.i32()?);
            format!("{time}{offset}")
        }
        oid::TIMESTAMP => render_timestamp(reader.i64()?)?,
        oid::TIMESTAMPTZ => {
            let micros = reader.i64()?;
            match micros {
                i64::MAX | i64::MIN => render_timestamp(micros)?,
                _ => format!("{}+00", render_timestamp(micros)?),
            }
        }
        oid::BIT | oid::VARBIT => render_bits(&mut reader)?,
        oid::INET | oid::CIDR => render_inet(&mut reader)?,
        array_oid if oid::array_element(array_oid).is_some() => render_array(&mut reader)?,
        custom if custom > SYSTEM_CATALOG_CEILING => render_custom(custom, bytes),
        _ => match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(_) => hex(bytes),
        },
    };
    Ok(text)
}

fn render_custom(type_oid: Oid, bytes: &[u8]) -> String {
    let mut reader = Reader::new(type_oid, bytes);
    if let Ok(text) = render_array(&mut reader) {
        if reader.bytes.is_empty() {
            return text;
        }
    }
    let text = match bytes.split_first() {
        Some((&TEXT_FORMAT_VERSION, rest)) => rest,
        _ => bytes,
    };
    match std::str::from_utf8(text) {
        Ok(text) => text.to_string(),
        Err(_) => hex(bytes),
    }
}

fn decode_error(type_oid: Oid, err: impl std::fmt::Display) -> DriverError {
    DriverError::Decode(format!("binary value of type {type_oid}: {err}"))
}

fn utf8(type_oid: Oid, bytes: &[u8]) -> Result<String, DriverError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|err| decode_error(type_oid, err))
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

struct Reader<'a> {
    type_oid: Oid,
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(type_oid: Oid, bytes: &'a [u8]) -> Self {
        Self { type_oid, bytes }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DriverError> {
        if self.bytes.len() < len {
            return Err(decode_error(self.type_oid, "unexpected end of value"));
        }
        let (head, rest) = self.bytes.split_at(len);
        self.bytes = rest;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DriverError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DriverError> {
        Ok(self.array::<1>()?[0])
    }

    fn i16(&mut self) -> Result<i16, DriverError> {
        Ok(i16::from_be_bytes(self.array()?))
    }

    fn u16(&mut self) -> Result<u16, DriverError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, DriverError> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, DriverError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64, DriverError> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, DriverError> {
        Ok(u64::from_be_bytes(self.array()?))
    }
}

fn render_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        let text = if value > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else {
        value.to_string()
    }
}

/// Base-10000 digits with a weight and display scale.
fn render_numeric(reader: &mut Reader<'_>) -> Result<String, DriverError> {
    let ndigits = reader.i16()?;
    let weight = i32::from(reader.i16()?);
    let sign = reader.u16()?;
    let dscale = usize::from(reader.u16()?);

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let mut digits = Vec::with_capacity(usize::try_from(ndigits).unwrap_or(0));
    for _ in 0..ndigits {
        digits.push(reader.i16()?);
    }
    let digit_at = |idx: i32| -> i16 {
        usize::try_from(idx)
            .ok()
            .and_then(|idx| digits.get(idx).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        let _ = write!(out, "{}", digit_at(0));
        for idx in 1..=weight {
            let _ = write!(out, "{:04}", digit_at(idx));
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut idx = weight + 1;
        while fraction.len() < dscale {
            let _ = write!(fraction, "{:04}", digit_at(idx));
            idx += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }
    Ok(out)
}

/// MONEY travels as a count of cents.
fn render_money(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    format!("{sign}{}.{:02}", cents / 100, cents % 100)
}

fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2000, 1, 1)
        .unwrap_or_default()
        .and_time(NaiveTime::MIN)
}

fn render_date(days: i32) -> Result<String, DriverError> {
    match days {
        i32::MAX => return Ok("infinity".to_string()),
        i32::MIN => return Ok("-infinity".to_string()),
        _ => {}
    }
    TimeDelta::try_days(i64::from(days))
        .and_then(|delta| epoch().date().checked_add_signed(delta))
        .map(|date| date.format("%Y-%m-%d").to_string())
        .ok_or_else(|| decode_error(oid::DATE, "date out of range"))
}

fn push_fraction(out: &mut String, micros: u32) {
    if micros == 0 {
        return;
    }
    let digits = format!("{micros:06}");
    out.push('.');
    out.push_str(digits.trim_end_matches('0'));
}

fn render_time(micros: i64) -> Result<String, DriverError> {
    // 24:00:00 is a valid TIME value
    if micros == 86_400_000_000 {
        return Ok("24:00:00".to_string());
    }
    let secs = u32::try_from(micros.div_euclid(1_000_000))
        .map_err(|_| decode_error(oid::TIME, "time out of range"))?;
    let sub_micros = micros.rem_euclid(1_000_000) as u32;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, 0)
        .ok_or_else(|| decode_error(oid::TIME, "time out of range"))?;

    let mut out = time.format("%H:%M:%S").to_string();
    push_fraction(&mut out, sub_micros);
    Ok(out)
}

/// Formats a zone offset given in seconds east of UTC.
fn render_offset(east_secs: i32) -> String {
    let sign = if east_secs < 0 { '-' } else { '+' };
    let secs = east_secs.unsigned_abs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    match (minutes, seconds) {
        (0, 0) => format!("{sign}{hours:02}"),
        (_, 0) => format!("{sign}{hours:02}:{minutes:02}"),
        _ => format!("{sign}{hours:02}:{minutes:02}:{seconds:02}"),
    }
}

fn render_timestamp(micros: i64) -> Result<String, DriverError> {
    match micros {
        i64::MAX => return Ok("infinity".to_string()),
        i64::MIN => return Ok("-infinity".to_string()),
        _ => {}
    }
    let timestamp = epoch()
        .checked_add_signed(TimeDelta::microseconds(micros))
        .ok_or_else(|| decode_error(oid::TIMESTAMP, "timestamp out of range"))?;

    let mut out = timestamp.format("%Y-%m-%d %H:%M:%S").to_string();
    push_fraction(&mut out, (micros.rem_euclid(1_000_000)) as u32);
    Ok(out)
}

fn render_bits(reader: &mut Reader<'_>) -> Result<String, DriverError> {
    let len = usize::try_from(reader.i32()?)
        .map_err(|_| decode_error(oid::VARBIT, "negative bit length"))?;
    let bytes = reader.take(len.div_ceil(8))?;
    Ok((0..len)
        .map(|bit| {
            if bytes[bit / 8] & (0x80 >> (bit % 8)) != 0 { '1' } else { '0' }
        })
        .collect())
}

fn render_inet(reader: &mut Reader<'_>) -> Result<String, DriverError> {
    let family = reader.u8()?;
    let bits = reader.u8()?;
    let is_cidr = reader.u8()? != 0;
    let len = usize::from(reader.u8()?);
    let address = reader.take(len)?;

    let (ip, max_bits) = match (family, address.len()) {
        (2, 4) => {
            let octets: [u8; 4] = address
                .try_into()
                .map_err(|_| decode_error(oid::INET, "bad address"))?;
            (IpAddr::V4(Ipv4Addr::from(octets)), 32)
        }
        (3, 16) => {
            let octets: [u8; 16] = address
                .try_into()
                .map_err(|_| decode_error(oid::INET, "bad address"))?;
            (IpAddr::V6(Ipv6Addr::from(octets)), 128)
        }
        _ => return Err(decode_error(oid::INET, "unknown address family")),
    };

    Ok(if is_cidr || bits != max_bits {
        format!("{ip}/{bits}")
    } else {
        ip.to_string()
    })
}

fn render_array(reader: &mut Reader<'_>) -> Result<String, DriverError> {
    let type_oid = reader.type_oid;
    let ndim = usize::try_from(reader.i32()?)
        .ok()
        .filter(|ndim| *ndim <= MAX_DIMENSIONS)
        .ok_or_else(|| decode_error(type_oid, "bad array dimensions"))?;
    if !matches!(reader.i32()?, 0 | 1) {
        return Err(decode_error(type_oid, "bad array null flag"));
    }
    let element_oid = reader.u32()?;
    if element_oid == 0 {
        return Err(decode_error(type_oid, "missing array element type"));
    }

    if ndim == 0 {
        return Ok("{}".to_string());
    }

    let mut dims = Vec::with_capacity(ndim);
    for _ in 0..ndim {
        let len = usize::try_from(reader.i32()?)
            .ok()
            .filter(|len| *len > 0)
            .ok_or_else(|| decode_error(type_oid, "bad array length"))?;
        let lower = reader.i32()?;
        dims.push((len, lower));
    }
    // every element carries at least its 4-byte length
    let elements = dims
        .iter()
        .try_fold(1usize, |total, (len, _)| total.checked_mul(*len));
    if elements.is_none_or(|count| count > reader.bytes.len() / 4) {
        return Err(decode_error(type_oid, "array shorter than its dimensions"));
    }

    let mut out = String::new();
    if dims.iter().any(|(_, lower)| *lower != 1) {
        for (len, lower) in &dims {
            let upper = i64::from(*lower) + *len as i64 - 1;
            let _ = write!(out, "[{lower}:{upper}]");
        }
        out.push('=');
    }
    let lens: Vec<usize> = dims.iter().map(|(len, _)| *len).collect();
    render_dimension(reader, element_oid, &lens, &mut out)?;
    Ok(out)
}

fn render_dimension(
    reader: &mut Reader<'_>,
    element_oid: Oid,
    lens: &[usize],
    out: &mut String,
) -> Result<(), DriverError> {
    let Some((len, inner)) = lens.split_first() else {
        return Ok(());
    };
    out.push('{');
    for idx in 0..*len {
        if idx > 0 {
            out.push(',');
        }
        if inner.is_empty() {
            let size = reader.i32()?;
            if size < 0 {
                out.push_str("NULL");
            } else {
                let bytes = reader.take(size as usize)?;
                push_element(out, &render(element_oid, bytes)?);
            }
        } else {
            render_dimension(reader, element_oid, inner, out)?;
        }
    }
    out.push('}');
    Ok(())
}

fn push_element(out: &mut String, text: &str) {
    let needs_quotes = text.is_empty()
        || text.eq_ignore_ascii_case("NULL")
        || text
            .chars()
            .any(|c| matches!(c, '{' | '}' | ',' | '"' | '\\') || c.is_ascii_whitespace());
    if !needs_quotes {
        out.push_str(text);
        return;
    }
    out.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}
