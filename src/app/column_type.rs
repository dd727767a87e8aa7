//! Mapping from Postgres types to logical column types.

use crate::domain::{ColumnType, ErrorKind, PgType};

use super::oid;

/// Extension types whose values behave like plain text.
const TEXT_COMPATIBLE_EXTENSIONS: [&str; 4] = ["citext", "ltree", "lquery", "ltxtquery"];

/// Maps a resolved Postgres type to its logical column type.
///
/// Custom types (above the system-catalog ceiling) map to `Text` when they
/// are text-compatible extensions and to `Enum` otherwise, since enums are
/// not distinguishable from other custom types without a second catalog
/// query. Arrays of custom types follow their element.
pub fn map_to_column_type(pg_type: &PgType) -> Result<ColumnType, ErrorKind> {
    if let Some(column_type) = builtin_column_type(pg_type.id) {
        return Ok(column_type);
    }

    if pg_type.is_custom() {
        return Ok(match &pg_type.element {
            Some(element) => custom_column_type(Some(element)).array_of(),
            None => custom_column_type(pg_type.name.as_deref()),
        });
    }

    Err(unsupported(pg_type))
}

fn custom_column_type(name: Option<&str>) -> ColumnType {
    let text_compatible = name.is_some_and(|name| {
        TEXT_COMPATIBLE_EXTENSIONS
            .iter()
            .any(|ext| ext.eq_ignore_ascii_case(name))
    });
    if text_compatible {
        ColumnType::Text
    } else {
        ColumnType::Enum
    }
}

fn builtin_column_type(id: u32) -> Option<ColumnType> {
    let column_type = match id {
        oid::INT2 | oid::INT4 => ColumnType::Int32,
        oid::INT8 | oid::OID => ColumnType::Int64,
        oid::FLOAT4 => ColumnType::Float,
        oid::FLOAT8 => ColumnType::Double,
        oid::BOOL => ColumnType::Boolean,
        oid::DATE => ColumnType::Date,
        oid::TIME | oid::TIMETZ => ColumnType::Time,
        oid::TIMESTAMP | oid::TIMESTAMPTZ => ColumnType::DateTime,
        oid::NUMERIC | oid::MONEY => ColumnType::Numeric,
        oid::JSON | oid::JSONB => ColumnType::Json,
        oid::UUID => ColumnType::Uuid,
        oid::CHAR => ColumnType::Character,
        oid::BPCHAR
        | oid::TEXT
        | oid::VARCHAR
        | oid::NAME
        | oid::BIT
        | oid::VARBIT
        | oid::INET
        | oid::CIDR
        | oid::XML => ColumnType::Text,
        oid::BYTEA => ColumnType::Bytes,

        oid::INT2_ARRAY | oid::INT4_ARRAY => ColumnType::Int32Array,
        oid::INT8_ARRAY | oid::OID_ARRAY => ColumnType::Int64Array,
        oid::FLOAT4_ARRAY => ColumnType::FloatArray,
        oid::FLOAT8_ARRAY => ColumnType::DoubleArray,
        oid::NUMERIC_ARRAY | oid::MONEY_ARRAY => ColumnType::NumericArray,
        oid::BOOL_ARRAY => ColumnType::BooleanArray,
        oid::CHAR_ARRAY => ColumnType::CharacterArray,
        oid::BPCHAR_ARRAY
        | oid::TEXT_ARRAY
        | oid::VARCHAR_ARRAY
        | oid::NAME_ARRAY
        | oid::VARBIT_ARRAY
        | oid::BIT_ARRAY
        | oid::INET_ARRAY
        | oid::CIDR_ARRAY
        | oid::XML_ARRAY => ColumnType::TextArray,
        oid::DATE_ARRAY => ColumnType::DateArray,
        oid::TIME_ARRAY | oid::TIMETZ_ARRAY => ColumnType::TimeArray,
        oid::TIMESTAMP_ARRAY | oid::TIMESTAMPTZ_ARRAY => ColumnType::DateTimeArray,
        oid::JSON_ARRAY | oid::JSONB_ARRAY => ColumnType::JsonArray,
        oid::BYTEA_ARRAY => ColumnType::BytesArray,
        oid::UUID_ARRAY => ColumnType::UuidArray,
        _ => return None,
    };
    Some(column_type)
}

fn unsupported(pg_type: &PgType) -> ErrorKind {
    let type_name = pg_type
        .name
        .clone()
        .or_else(|| oid::type_name(pg_type.id).map(str::to_string))
        .unwrap_or_else(|| "Unknown".to_string());
    ErrorKind::UnsupportedNativeDataType {
        type_name,
        oid: pg_type.id,
    }
}
