use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

/// Postgres object identifier of a data type.
pub type Oid = u32;

/// Highest OID reserved for built-in catalog types.
///
/// Types above this value are user or extension types whose names must be
/// looked up in `pg_catalog.pg_type` at runtime.
pub const SYSTEM_CATALOG_CEILING: Oid = 9999;

/// A column type as reported by the server.
///
/// `name` is only populated for OIDs above [`SYSTEM_CATALOG_CEILING`];
/// built-in names come from the static table when needed for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PgType {
    pub id: Oid,
    pub name: Option<String>,
    /// Element type name when `id` is an array of a custom type.
    #[serde(default)]
    pub element: Option<String>,
}

impl PgType {
    pub fn builtin(id: Oid) -> Self {
        Self {
            id,
            name: None,
            element: None,
        }
    }

    pub fn named(id: Oid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: Some(name.into()),
            element: None,
        }
    }

    pub fn array_of(id: Oid, name: impl Into<String>, element: impl Into<String>) -> Self {
        Self {
            id,
            name: Some(name.into()),
            element: Some(element.into()),
        }
    }

    pub fn is_custom(&self) -> bool {
        self.id > SYSTEM_CATALOG_CEILING
    }
}

/// Logical column type handed to callers.
///
/// Serialized as a stable integer code: scalars use `0..=15`, and every
/// array variant is `64 +` its scalar code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Int32,
    Int64,
    Float,
    Double,
    Numeric,
    Boolean,
    Character,
    Text,
    Date,
    Time,
    DateTime,
    Json,
    Enum,
    Bytes,
    Uuid,
    Int32Array,
    Int64Array,
    FloatArray,
    DoubleArray,
    NumericArray,
    BooleanArray,
    CharacterArray,
    TextArray,
    DateArray,
    TimeArray,
    DateTimeArray,
    JsonArray,
    EnumArray,
    BytesArray,
    UuidArray,
}

const ARRAY_OFFSET: u8 = 64;

impl ColumnType {
    const SCALARS: [ColumnType; 15] = [
        ColumnType::Int32,
        ColumnType::Int64,
        ColumnType::Float,
        ColumnType::Double,
        ColumnType::Numeric,
        ColumnType::Boolean,
        ColumnType::Character,
        ColumnType::Text,
        ColumnType::Date,
        ColumnType::Time,
        ColumnType::DateTime,
        ColumnType::Json,
        ColumnType::Enum,
        ColumnType::Bytes,
        ColumnType::Uuid,
    ];

    /// Stable integer code used on the wire.
    pub fn code(self) -> u8 {
        match self {
            ColumnType::Int32 => 0,
            ColumnType::Int64 => 1,
            ColumnType::Float => 2,
            ColumnType::Double => 3,
            ColumnType::Numeric => 4,
            ColumnType::Boolean => 5,
            ColumnType::Character => 6,
            ColumnType::Text => 7,
            ColumnType::Date => 8,
            ColumnType::Time => 9,
            ColumnType::DateTime => 10,
            ColumnType::Json => 11,
            ColumnType::Enum => 12,
            ColumnType::Bytes => 13,
            // 14 is reserved for a set type this adapter never produces
            ColumnType::Uuid => 15,
            array => ARRAY_OFFSET + array.element().map_or(0, ColumnType::code),
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        if code >= ARRAY_OFFSET {
            return Self::from_code(code - ARRAY_OFFSET)
                .filter(|scalar| !scalar.is_array())
                .map(ColumnType::array_of);
        }
        Self::SCALARS.into_iter().find(|ty| ty.code() == code)
    }

    pub fn is_array(self) -> bool {
        self.element().is_some()
    }

    /// Element type of an array variant, `None` for scalars.
    pub fn element(self) -> Option<ColumnType> {
        let element = match self {
            ColumnType::Int32Array => ColumnType::Int32,
            ColumnType::Int64Array => ColumnType::Int64,
            ColumnType::FloatArray => ColumnType::Float,
            ColumnType::DoubleArray => ColumnType::Double,
            ColumnType::NumericArray => ColumnType::Numeric,
            ColumnType::BooleanArray => ColumnType::Boolean,
            ColumnType::CharacterArray => ColumnType::Character,
            ColumnType::TextArray => ColumnType::Text,
            ColumnType::DateArray => ColumnType::Date,
            ColumnType::TimeArray => ColumnType::Time,
            ColumnType::DateTimeArray => ColumnType::DateTime,
            ColumnType::JsonArray => ColumnType::Json,
            ColumnType::EnumArray => ColumnType::Enum,
            ColumnType::BytesArray => ColumnType::Bytes,
            ColumnType::UuidArray => ColumnType::Uuid,
            _ => return None,
        };
        Some(element)
    }

    /// Array variant of a scalar; arrays map to themselves.
    pub fn array_of(self) -> ColumnType {
        match self {
            ColumnType::Int32 => ColumnType::Int32Array,
            ColumnType::Int64 => ColumnType::Int64Array,
            ColumnType::Float => ColumnType::FloatArray,
            ColumnType::Double => ColumnType::DoubleArray,
            ColumnType::Numeric => ColumnType::NumericArray,
            ColumnType::Boolean => ColumnType::BooleanArray,
            ColumnType::Character => ColumnType::CharacterArray,
            ColumnType::Text => ColumnType::TextArray,
            ColumnType::Date => ColumnType::DateArray,
            ColumnType::Time => ColumnType::TimeArray,
            ColumnType::DateTime => ColumnType::DateTimeArray,
            ColumnType::Json => ColumnType::JsonArray,
            ColumnType::Enum => ColumnType::EnumArray,
            ColumnType::Bytes => ColumnType::BytesArray,
            ColumnType::Uuid => ColumnType::UuidArray,
            array => array,
        }
    }
}

impl Serialize for ColumnType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        ColumnType::from_code(code)
            .ok_or_else(|| de::Error::custom(format!("unknown column type code {code}")))
    }
}

/// A query as handed over by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub sql: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    #[serde(default)]
    pub arg_types: Vec<Option<ColumnType>>,
}

impl Query {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            args: Vec::new(),
            arg_types: Vec::new(),
        }
    }

    /// Appends an argument without a type hint.
    pub fn bind(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.args.push(value.into());
        self.arg_types.push(None);
        self
    }

    /// Appends an argument with an explicit type hint.
    pub fn bind_typed(mut self, value: impl Into<serde_json::Value>, ty: ColumnType) -> Self {
        self.args.push(value.into());
        self.arg_types.push(Some(ty));
        self
    }

    /// Type hint for the argument at `index`, if any.
    pub fn arg_type(&self, index: usize) -> Option<ColumnType> {
        self.arg_types.get(index).copied().flatten()
    }
}

/// A normalized cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultValue {
    /// SQL `NULL`: the column has no value.
    Null,
    /// A JSON column whose payload is the JSON literal `null`.
    JsonNull,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Array(Vec<ResultValue>),
}

impl ResultValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ResultValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ResultValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<&str> for ResultValue {
    fn from(value: &str) -> Self {
        ResultValue::Text(value.to_string())
    }
}

impl From<String> for ResultValue {
    fn from(value: String) -> Self {
        ResultValue::Text(value)
    }
}

impl From<i64> for ResultValue {
    fn from(value: i64) -> Self {
        ResultValue::Int(value)
    }
}

impl Serialize for ResultValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ResultValue::Null => serializer.serialize_none(),
            ResultValue::JsonNull => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$type", "JsonNull")?;
                map.end()
            }
            ResultValue::Bool(value) => serializer.serialize_bool(*value),
            ResultValue::Int(value) => serializer.serialize_i64(*value),
            ResultValue::Float(value) => serializer.serialize_f64(*value),
            ResultValue::Text(value) => serializer.serialize_str(value),
            ResultValue::Bytes(bytes) => serializer.collect_seq(bytes),
            ResultValue::Json(value) => value.serialize(serializer),
            ResultValue::Array(values) => serializer.collect_seq(values),
        }
    }
}

/// Column metadata as reported by the underlying client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescription {
    pub name: String,
    #[serde(rename = "dataTypeID")]
    pub type_oid: Oid,
}

impl FieldDescription {
    pub fn new(name: impl Into<String>, type_oid: Oid) -> Self {
        Self {
            name: name.into(),
            type_oid,
        }
    }
}

/// What an underlying client returns for one statement, rows already normalized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    pub fields: Vec<FieldDescription>,
    pub rows: Vec<Vec<ResultValue>>,
    /// Affected-row count; `None` for statements without one (e.g. `BEGIN`).
    pub row_count: Option<u64>,
}

/// Result of `query_raw`.
///
/// `column_names`, `column_types` and every row have the same length.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSet {
    pub column_names: Vec<String>,
    pub column_types: Vec<ColumnType>,
    pub rows: Vec<Vec<ResultValue>>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the column named `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_names.iter().position(|column| column == name)
    }
}

/// Connection details surfaced to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub schema_name: Option<String>,
    pub supports_relation_joins: bool,
}

/// Transaction isolation levels supported by Postgres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_column_type_codes_are_stable() {
        assert_eq!(ColumnType::Int32.code(), 0);
        assert_eq!(ColumnType::Bytes.code(), 13);
        assert_eq!(ColumnType::Uuid.code(), 15);
        assert_eq!(ColumnType::Int32Array.code(), 64);
        assert_eq!(ColumnType::UuidArray.code(), 79);
    }

    #[test]
    fn test_column_type_from_code() {
        for ty in ColumnType::SCALARS {
            assert_eq!(ColumnType::from_code(ty.code()), Some(ty));
            assert_eq!(ColumnType::from_code(ty.array_of().code()), Some(ty.array_of()));
        }
        assert_eq!(ColumnType::from_code(14), None);
        assert_eq!(ColumnType::from_code(78), None);
        assert_eq!(ColumnType::from_code(200), None);
    }

    #[test]
    fn test_column_type_serde() {
        let encoded =
            serde_json::to_string(&vec![ColumnType::Text, ColumnType::JsonArray]).unwrap();
        assert_eq!(encoded, "[7,75]");

        let decoded: Vec<ColumnType> = serde_json::from_str("[1,72]").unwrap();
        assert_eq!(decoded, vec![ColumnType::Int64, ColumnType::DateArray]);

        assert!(serde_json::from_str::<ColumnType>("14").is_err());
    }

    #[test]
    fn test_json_null_is_distinct_from_sql_null() {
        assert_eq!(serde_json::to_value(ResultValue::Null).unwrap(), json!(null));
        assert_eq!(
            serde_json::to_value(ResultValue::JsonNull).unwrap(),
            json!({"$type": "JsonNull"})
        );
    }

    #[test]
    fn test_bytes_serialize_as_integer_sequence() {
        let value = ResultValue::Bytes(vec![0, 127, 255]);
        assert_eq!(serde_json::to_value(value).unwrap(), json!([0, 127, 255]));
    }

    #[test]
    fn test_query_builder_keeps_hints_aligned() {
        let query = Query::new("SELECT $1, $2")
            .bind(1)
            .bind_typed("2024-01-01", ColumnType::Date);

        assert_eq!(query.args.len(), 2);
        assert_eq!(query.arg_type(0), None);
        assert_eq!(query.arg_type(1), Some(ColumnType::Date));
        assert_eq!(query.arg_type(2), None);
    }

    #[test]
    fn test_query_deserializes_from_wire_shape() {
        let query: Query = serde_json::from_value(json!({
            "sql": "SELECT $1",
            "args": [42],
            "argTypes": [0]
        }))
        .unwrap();

        assert_eq!(query.arg_type(0), Some(ColumnType::Int32));
    }

    #[test]
    fn test_result_set_serializes_camel_case() {
        let result = ResultSet {
            column_names: vec!["id".to_string()],
            column_types: vec![ColumnType::Int32],
            rows: vec![vec![ResultValue::Int(1)]],
        };

        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"columnNames": ["id"], "columnTypes": [0], "rows": [[1]]})
        );
        assert_eq!(result.column_index("id"), Some(0));
    }

    #[test]
    fn test_isolation_level_sql() {
        assert_eq!(IsolationLevel::RepeatableRead.to_string(), "REPEATABLE READ");
        assert_eq!(IsolationLevel::Serializable.as_sql(), "SERIALIZABLE");
    }

    #[test]
    fn test_pg_type_custom_boundary() {
        assert!(!PgType::builtin(SYSTEM_CATALOG_CEILING).is_custom());
        assert!(PgType::named(SYSTEM_CATALOG_CEILING + 1, "mood").is_custom());
    }
}
