//! Binds JSON query arguments as typed sqlx parameters.
//!
//! Statements are prepared before they run, so every argument is encoded
//! in the binary format of the parameter type the server inferred. The
//! type hint and the JSON value shape only decide when that type is not
//! known.

use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::types::{Oid as PgOid, PgMoney, PgTimeTz};
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgTypeInfo, Postgres};
use sqlx::types::Json;
use sqlx::{Arguments, Encode, Type};
use uuid::Uuid;

use crate::app::normalize::normalize_money;
use crate::app::oid;
use crate::domain::{ColumnType, DriverError, Oid, Query, SYSTEM_CATALOG_CEILING};

type BindResult = Result<(), String>;
type Convert<T> = fn(&Value) -> Result<T, String>;

/// Extension types whose binary form is a version byte followed by text.
const VERSIONED_TEXT_TYPES: [&str; 3] = ["ltree", "lquery", "ltxtquery"];
const TEXT_FORMAT_VERSION: u8 = 1;

/// A statement parameter type as the server inferred it when preparing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamType {
    pub oid: Oid,
    pub name: String,
    /// Element type of an array parameter.
    pub element: Option<Box<ParamType>>,
}

impl ParamType {
    pub fn new(oid: Oid, name: impl Into<String>) -> Self {
        Self {
            oid,
            name: name.into(),
            element: None,
        }
    }

    #[must_use]
    pub fn with_element(mut self, element: ParamType) -> Self {
        self.element = Some(Box::new(element));
        self
    }

    fn is_versioned_text(&self) -> bool {
        VERSIONED_TEXT_TYPES
            .iter()
            .any(|name| name.eq_ignore_ascii_case(&self.name))
    }
}

/// Builds the parameter list of `query`, one parameter per argument.
///
/// `params` are the prepared parameter types; arguments beyond them are
/// bound by their type hint, or by the shape of the JSON value without one.
pub fn build_arguments(query: &Query, params: &[ParamType]) -> Result<PgArguments, DriverError> {
    let mut arguments = PgArguments::default();
    for (index, value) in query.args.iter().enumerate() {
        let bound = match (params.get(index), query.arg_type(index)) {
            (Some(param), _) => bind_param(&mut arguments, value, param),
            (None, Some(ty)) if ty.is_array() => bind_array(&mut arguments, value, ty),
            (None, Some(ty)) => bind_scalar(&mut arguments, value, ty),
            (None, None) => bind_untyped(&mut arguments, value),
        };
        bound.map_err(|message| {
            DriverError::Decode(format!("argument ${}: {message}", index + 1))
        })?;
    }
    Ok(arguments)
}

fn add<'q, T>(arguments: &mut PgArguments, value: T) -> BindResult
where
    T: 'q + Encode<'q, Postgres> + Type<Postgres>,
{
    Arguments::add(arguments, value).map_err(|err| err.to_string())
}

fn nullable<T>(value: &Value, convert: Convert<T>) -> Result<Option<T>, String> {
    match value {
        Value::Null => Ok(None),
        other => convert(other).map(Some),
    }
}

fn items<T>(value: &Value, convert: Convert<T>) -> Result<Option<Vec<Option<T>>>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Array(items) => items
            .iter()
            .map(|item| nullable(item, convert))
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        other => Err(format!("expected an array, got {other}")),
    }
}

/// Pre-encoded binary value declared with an explicit type OID.
#[derive(Debug)]
struct RawParam {
    oid: Oid,
    bytes: Option<Vec<u8>>,
}

impl Type<Postgres> for RawParam {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(PgOid(oid::UNKNOWN))
    }
}

impl Encode<'_, Postgres> for RawParam {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        match &self.bytes {
            Some(bytes) => {
                buf.extend_from_slice(bytes);
                Ok(IsNull::No)
            }
            None => Ok(IsNull::Yes),
        }
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(PgTypeInfo::with_oid(PgOid(self.oid)))
    }
}

fn bind_param(arguments: &mut PgArguments, value: &Value, param: &ParamType) -> BindResult {
    if param.oid > SYSTEM_CATALOG_CEILING {
        return bind_custom(arguments, value, param);
    }
    match oid::array_element(param.oid) {
        Some(element) => bind_array_of(arguments, value, param.oid, element),
        None => bind_scalar_of(arguments, value, param),
    }
}

fn bind_scalar_of(arguments: &mut PgArguments, value: &Value, param: &ParamType) -> BindResult {
    match param.oid {
        oid::BOOL => add(arguments, nullable(value, to_bool)?),
        oid::CHAR => add(arguments, nullable(value, to_char)?),
        oid::INT2 => add(arguments, nullable(value, to_i16)?),
        oid::INT4 => add(arguments, nullable(value, to_i32)?),
        oid::INT8 => add(arguments, nullable(value, to_i64)?),
        oid::OID => add(arguments, nullable(value, to_oid)?),
        oid::FLOAT4 => add(arguments, nullable(value, to_f32)?),
        oid::FLOAT8 => add(arguments, nullable(value, to_f64)?),
        oid::NUMERIC => add(arguments, nullable(value, to_decimal)?),
        oid::MONEY => add(arguments, nullable(value, to_money)?),
        oid::DATE => add(arguments, nullable(value, to_date)?),
        oid::TIME => add(arguments, nullable(value, to_time)?),
        oid::TIMETZ => add(arguments, nullable(value, to_time_tz)?),
        oid::TIMESTAMP => add(arguments, nullable(value, to_naive_datetime)?),
        oid::TIMESTAMPTZ => add(arguments, nullable(value, to_datetime)?),
        oid::JSON | oid::JSONB => add(arguments, nullable(value, to_json)?),
        oid::BYTEA => add(arguments, nullable(value, to_bytes)?),
        oid::UUID => add(arguments, nullable(value, to_uuid)?),
        oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::NAME | oid::XML | oid::UNKNOWN => {
            add(arguments, nullable(value, to_text)?)
        }
        _ => Err(format!("parameters of type {} cannot be bound", param.name)),
    }
}

fn bind_array_of(
    arguments: &mut PgArguments,
    value: &Value,
    array_oid: Oid,
    element: Oid,
) -> BindResult {
    match element {
        oid::BOOL => add(arguments, items(value, to_bool)?),
        oid::CHAR => add(arguments, items(value, to_char)?),
        oid::INT2 => add(arguments, items(value, to_i16)?),
        oid::INT4 => add(arguments, items(value, to_i32)?),
        oid::INT8 => add(arguments, items(value, to_i64)?),
        oid::OID => add(arguments, items(value, to_oid)?),
        oid::FLOAT4 => add(arguments, items(value, to_f32)?),
        oid::FLOAT8 => add(arguments, items(value, to_f64)?),
        oid::NUMERIC => add(arguments, items(value, to_decimal)?),
        oid::MONEY => add(arguments, items(value, to_money)?),
        oid::DATE => add(arguments, items(value, to_date)?),
        oid::TIME => add(arguments, items(value, to_time)?),
        oid::TIMETZ => add(arguments, items(value, to_time_tz)?),
        oid::TIMESTAMP => add(arguments, items(value, to_naive_datetime)?),
        oid::TIMESTAMPTZ => add(arguments, items(value, to_datetime)?),
        oid::BYTEA => add(arguments, items(value, to_bytes)?),
        oid::UUID => add(arguments, items(value, to_uuid)?),
        oid::JSONB => add_raw_array(arguments, value, array_oid, element, |item| {
            let mut bytes = vec![TEXT_FORMAT_VERSION];
            bytes.extend_from_slice(to_json(item)?.0.to_string().as_bytes());
            Ok(bytes)
        }),
        oid::JSON => add_raw_array(arguments, value, array_oid, element, |item| {
            Ok(to_json(item)?.0.to_string().into_bytes())
        }),
        oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::NAME | oid::XML => {
            add_raw_array(arguments, value, array_oid, element, |item| {
                to_text(item).map(String::into_bytes)
            })
        }
        _ => Err(format!("arrays of type {element} cannot be bound")),
    }
}

/// Custom types travel as their text form, arrays of them as a
/// one-dimensional array of text forms.
fn bind_custom(arguments: &mut PgArguments, value: &Value, param: &ParamType) -> BindResult {
    match &param.element {
        Some(element) => {
            let versioned = element.is_versioned_text();
            add_raw_array(arguments, value, param.oid, element.oid, |item| {
                to_custom_text(item, versioned)
            })
        }
        None => {
            let bytes = match value {
                Value::Null => None,
                other => Some(to_custom_text(other, param.is_versioned_text())?),
            };
            add(arguments, RawParam {
                oid: param.oid,
                bytes,
            })
        }
    }
}

fn to_custom_text(value: &Value, versioned: bool) -> Result<Vec<u8>, String> {
    let text = to_text(value)?;
    let mut bytes = Vec::with_capacity(text.len() + 1);
    if versioned {
        bytes.push(TEXT_FORMAT_VERSION);
    }
    bytes.extend_from_slice(text.as_bytes());
    Ok(bytes)
}

fn add_raw_array(
    arguments: &mut PgArguments,
    value: &Value,
    array_oid: Oid,
    element_oid: Oid,
    encode: impl Fn(&Value) -> Result<Vec<u8>, String>,
) -> BindResult {
    let bytes = match value {
        Value::Null => None,
        Value::Array(values) => {
            let encoded = values
                .iter()
                .map(|item| match item {
                    Value::Null => Ok(None),
                    other => encode(other).map(Some),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Some(encode_array(element_oid, &encoded)?)
        }
        other => return Err(format!("expected an array, got {other}")),
    };
    add(arguments, RawParam {
        oid: array_oid,
        bytes,
    })
}

/// One-dimensional array in the binary wire format.
fn encode_array(element_oid: Oid, elements: &[Option<Vec<u8>>]) -> Result<Vec<u8>, String> {
    let len = |n: usize| i32::try_from(n).map_err(|_| "array too large".to_string());

    let mut out = Vec::new();
    out.extend_from_slice(&i32::from(!elements.is_empty()).to_be_bytes());
    out.extend_from_slice(&i32::from(elements.iter().any(Option::is_none)).to_be_bytes());
    out.extend_from_slice(&element_oid.to_be_bytes());
    if !elements.is_empty() {
        out.extend_from_slice(&len(elements.len())?.to_be_bytes());
        out.extend_from_slice(&1i32.to_be_bytes());
    }
    for element in elements {
        match element {
            Some(bytes) => {
                out.extend_from_slice(&len(bytes.len())?.to_be_bytes());
                out.extend_from_slice(bytes);
            }
            None => out.extend_from_slice(&(-1i32).to_be_bytes()),
        }
    }
    Ok(out)
}

fn bind_scalar(arguments: &mut PgArguments, value: &Value, ty: ColumnType) -> BindResult {
    match ty {
        ColumnType::Int32 => add(arguments, nullable(value, to_i32)?),
        ColumnType::Int64 => add(arguments, nullable(value, to_i64)?),
        ColumnType::Float => add(arguments, nullable(value, to_f32)?),
        ColumnType::Double => add(arguments, nullable(value, to_f64)?),
        ColumnType::Numeric => add(arguments, nullable(value, to_decimal)?),
        ColumnType::Boolean => add(arguments, nullable(value, to_bool)?),
        ColumnType::Date => add(arguments, nullable(value, to_date)?),
        ColumnType::Time => add(arguments, nullable(value, to_time)?),
        ColumnType::DateTime => add(arguments, nullable(value, to_datetime)?),
        ColumnType::Json => add(arguments, nullable(value, to_json)?),
        ColumnType::Bytes => add(arguments, nullable(value, to_bytes)?),
        ColumnType::Uuid => add(arguments, nullable(value, to_uuid)?),
        _ => add(arguments, nullable(value, to_text)?),
    }
}

fn bind_array(arguments: &mut PgArguments, value: &Value, ty: ColumnType) -> BindResult {
    match ty.element().unwrap_or(ColumnType::Text) {
        ColumnType::Int32 => add(arguments, items(value, to_i32)?),
        ColumnType::Int64 => add(arguments, items(value, to_i64)?),
        ColumnType::Float => add(arguments, items(value, to_f32)?),
        ColumnType::Double => add(arguments, items(value, to_f64)?),
        ColumnType::Numeric => add(arguments, items(value, to_decimal)?),
        ColumnType::Boolean => add(arguments, items(value, to_bool)?),
        ColumnType::Date => add(arguments, items(value, to_date)?),
        ColumnType::Time => add(arguments, items(value, to_time)?),
        ColumnType::DateTime => add(arguments, items(value, to_datetime)?),
        ColumnType::Json => add(arguments, items(value, to_json)?),
        ColumnType::Bytes => add(arguments, items(value, to_bytes)?),
        ColumnType::Uuid => add(arguments, items(value, to_uuid)?),
        _ => add(arguments, items(value, to_text)?),
    }
}

fn bind_untyped(arguments: &mut PgArguments, value: &Value) -> BindResult {
    match value {
        Value::Null => add(arguments, None::<String>),
        Value::Bool(flag) => add(arguments, *flag),
        Value::Number(number) => match number.as_i64() {
            Some(int) => add(arguments, int),
            None => add(arguments, to_f64(value)?),
        },
        Value::String(text) => add(arguments, text.clone()),
        Value::Array(values) => {
            let non_null = || values.iter().filter(|item| !item.is_null());
            if non_null().all(Value::is_string) {
                add(arguments, items(value, to_text)?)
            } else if non_null().all(Value::is_i64) {
                add(arguments, items(value, to_i64)?)
            } else if non_null().all(Value::is_number) {
                add(arguments, items(value, to_f64)?)
            } else if non_null().all(Value::is_boolean) {
                add(arguments, items(value, to_bool)?)
            } else {
                add(arguments, Json(value.clone()))
            }
        }
        Value::Object(_) => add(arguments, Json(value.clone())),
    }
}

fn to_i64(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .ok_or_else(|| format!("{number} is not an integer")),
        Value::String(text) => text
            .trim()
            .parse()
            .map_err(|_| format!("{text:?} is not an integer")),
        other => Err(format!("expected an integer, got {other}")),
    }
}

fn to_i32(value: &Value) -> Result<i32, String> {
    let wide = to_i64(value)?;
    i32::try_from(wide).map_err(|_| format!("{wide} does not fit in int4"))
}

fn to_i16(value: &Value) -> Result<i16, String> {
    let wide = to_i64(value)?;
    i16::try_from(wide).map_err(|_| format!("{wide} does not fit in int2"))
}

fn to_oid(value: &Value) -> Result<PgOid, String> {
    let wide = to_i64(value)?;
    u32::try_from(wide)
        .map(PgOid)
        .map_err(|_| format!("{wide} is not an oid"))
}

/// The single-byte `"char"` type takes the first byte of a string.
fn to_char(value: &Value) -> Result<i8, String> {
    match value {
        Value::String(text) => Ok(text.bytes().next().map_or(0, |byte| byte as i8)),
        other => {
            let wide = to_i64(other)?;
            i8::try_from(wide).map_err(|_| format!("{wide} does not fit in char"))
        }
    }
}

fn to_f64(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| format!("{number} is not a float")),
        Value::String(text) => text
            .trim()
            .parse()
            .map_err(|_| format!("{text:?} is not a float")),
        other => Err(format!("expected a float, got {other}")),
    }
}

fn to_f32(value: &Value) -> Result<f32, String> {
    to_f64(value).map(|wide| wide as f32)
}

fn to_decimal(value: &Value) -> Result<Decimal, String> {
    let text = match value {
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.trim().to_string(),
        other => return Err(format!("expected a decimal, got {other}")),
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| format!("{text:?} is not a decimal"))
}

/// Accepts the formatted text money columns are read back as.
fn to_money(value: &Value) -> Result<PgMoney, String> {
    let amount = match value {
        Value::String(text) => Value::String(normalize_money(text)),
        other => other.clone(),
    };
    to_decimal(&amount).map(|decimal| PgMoney::from_decimal(decimal, 2))
}

fn to_bool(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::String(text) => match text.as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(format!("{text:?} is not a boolean")),
        },
        Value::Number(number) => match number.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(format!("{number} is not a boolean")),
        },
        other => Err(format!("expected a boolean, got {other}")),
    }
}

fn to_text(value: &Value) -> Result<String, String> {
    Ok(match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    })
}

fn as_str(value: &Value) -> Result<&str, String> {
    value
        .as_str()
        .map(str::trim)
        .ok_or_else(|| format!("expected a string, got {value}"))
}

fn to_date(value: &Value) -> Result<NaiveDate, String> {
    let text = as_str(value)?;
    let date = text.get(..10).unwrap_or(text);
    NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|err| format!("{text:?}: {err}"))
}

fn to_time(value: &Value) -> Result<NaiveTime, String> {
    let text = as_str(value)?;
    NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
        .or_else(|_| parse_datetime(text).map(|datetime| datetime.time()))
        .map_err(|err| format!("{text:?}: {err}"))
}

/// Time with an optional `Z` or numeric offset, UTC when absent.
fn to_time_tz(value: &Value) -> Result<PgTimeTz<NaiveTime, FixedOffset>, String> {
    let text = as_str(value)?;
    let clock = text.rfind([' ', 'T']).map_or(0, |at| at + 1);
    let (time, offset) = match text[clock..].rfind(['+', '-']) {
        Some(at) => text.split_at(clock + at),
        None => (text.trim_end_matches('Z'), "+00"),
    };
    let time = to_time(&Value::String(time.to_string()))?;
    let offset = parse_offset(offset).ok_or_else(|| format!("{text:?} has an invalid offset"))?;
    Ok(PgTimeTz { time, offset })
}

fn parse_offset(text: &str) -> Option<FixedOffset> {
    let (sign, digits) = match text.split_at_checked(1)? {
        ("+", rest) => (1, rest),
        ("-", rest) => (-1, rest),
        _ => return None,
    };
    let mut parts = digits.split(':');
    let hours: i32 = parts.next()?.parse().ok()?;
    let minutes: i32 = parts.next().map_or(Some(0), |part| part.parse().ok())?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn to_naive_datetime(value: &Value) -> Result<NaiveDateTime, String> {
    to_datetime(value).map(|datetime| datetime.naive_utc())
}

fn to_datetime(value: &Value) -> Result<DateTime<Utc>, String> {
    let text = as_str(value)?;
    parse_datetime(text).map_err(|err| format!("{text:?}: {err}"))
}

/// Accepts RFC 3339 and the space-separated form, assuming UTC when no
/// offset is given.
fn parse_datetime(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text)
        .map(|datetime| datetime.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
                .map(|naive| naive.and_utc())
        })
}

/// JSON arguments usually arrive serialized; text that is not valid JSON
/// is sent as a JSON string.
pub(crate) fn to_json(value: &Value) -> Result<Json<Value>, String> {
    Ok(Json(match value {
        Value::String(text) => serde_json::from_str(text).unwrap_or_else(|_| value.clone()),
        other => other.clone(),
    }))
}

pub(crate) fn to_bytes(value: &Value) -> Result<Vec<u8>, String> {
    match value {
        Value::String(text) => BASE64.decode(text).map_err(|err| format!("invalid base64: {err}")),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|byte| u8::try_from(byte).ok())
                    .ok_or_else(|| format!("{item} is not a byte"))
            })
            .collect(),
        other => Err(format!("expected bytes, got {other}")),
    }
}

fn to_uuid(value: &Value) -> Result<Uuid, String> {
    let text = as_str(value)?;
    Uuid::parse_str(text).map_err(|err| format!("{text:?}: {err}"))
}
