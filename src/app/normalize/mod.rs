//! Per-OID conversion of wire text into [`ResultValue`]s.
//!
//! A [`TypeNormalizerRegistry`] is handed to an underlying client when it is
//! built, so that every row it returns is already normalized.

pub mod array;
pub mod scalar;

use std::collections::HashMap;

use thiserror::Error;

use crate::domain::{DriverError, Oid, ResultValue};

use super::oid;

pub use array::{parse_array, to_array_literal};
pub use scalar::normalize_money;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("malformed array literal: {0}")]
    Array(String),
    #[error("invalid {kind} value: {value}")]
    Invalid { kind: &'static str, value: String },
    #[error("invalid JSON: {0}")]
    Json(String),
}

impl NormalizeError {
    pub(crate) fn invalid(kind: &'static str, value: &str) -> Self {
        NormalizeError::Invalid {
            kind,
            value: value.to_string(),
        }
    }
}

impl From<NormalizeError> for DriverError {
    fn from(err: NormalizeError) -> Self {
        DriverError::Decode(err.to_string())
    }
}

/// Converts the wire text of one non-null value.
pub type ScalarNormalizer = fn(&str) -> Result<ResultValue, NormalizeError>;

#[derive(Clone, Copy)]
pub enum Normalizer {
    Scalar(ScalarNormalizer),
    /// An array literal whose elements use the given normalizer.
    Array(ScalarNormalizer),
}

impl Normalizer {
    pub fn apply(&self, text: &str) -> Result<ResultValue, NormalizeError> {
        match self {
            Normalizer::Scalar(normalize) => normalize(text),
            Normalizer::Array(element) => parse_array(text, *element),
        }
    }
}

impl std::fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Normalizer::Scalar(_) => f.write_str("Normalizer::Scalar"),
            Normalizer::Array(_) => f.write_str("Normalizer::Array"),
        }
    }
}

const SCALARS: [(Oid, ScalarNormalizer); 20] = [
    (oid::BOOL, scalar::boolean),
    (oid::INT2, scalar::integer),
    (oid::INT4, scalar::integer),
    (oid::INT8, scalar::integer),
    (oid::OID, scalar::integer),
    (oid::FLOAT4, scalar::float),
    (oid::FLOAT8, scalar::float),
    (oid::NUMERIC, scalar::numeric),
    (oid::MONEY, scalar::money),
    (oid::DATE, scalar::date),
    (oid::TIME, scalar::time),
    (oid::TIMETZ, scalar::time_tz),
    (oid::TIMESTAMP, scalar::timestamp),
    (oid::TIMESTAMPTZ, scalar::timestamp_tz),
    (oid::JSON, scalar::json),
    (oid::JSONB, scalar::json),
    (oid::BYTEA, scalar::bytea),
    (oid::BIT, scalar::bit),
    (oid::VARBIT, scalar::bit),
    (oid::UUID, scalar::text),
];

const ARRAYS: [Oid; 28] = [
    oid::XML_ARRAY,
    oid::JSON_ARRAY,
    oid::CIDR_ARRAY,
    oid::MONEY_ARRAY,
    oid::BOOL_ARRAY,
    oid::BYTEA_ARRAY,
    oid::CHAR_ARRAY,
    oid::NAME_ARRAY,
    oid::INT2_ARRAY,
    oid::INT4_ARRAY,
    oid::TEXT_ARRAY,
    oid::BPCHAR_ARRAY,
    oid::VARCHAR_ARRAY,
    oid::INT8_ARRAY,
    oid::FLOAT4_ARRAY,
    oid::FLOAT8_ARRAY,
    oid::OID_ARRAY,
    oid::INET_ARRAY,
    oid::TIMESTAMP_ARRAY,
    oid::DATE_ARRAY,
    oid::TIME_ARRAY,
    oid::TIMESTAMPTZ_ARRAY,
    oid::NUMERIC_ARRAY,
    oid::TIMETZ_ARRAY,
    oid::BIT_ARRAY,
    oid::VARBIT_ARRAY,
    oid::UUID_ARRAY,
    oid::JSONB_ARRAY,
];

/// Per-OID normalizers. OIDs without an entry are returned as text.
#[derive(Debug, Clone, Default)]
pub struct TypeNormalizerRegistry {
    normalizers: HashMap<Oid, Normalizer>,
}

impl TypeNormalizerRegistry {
    /// A registry with no entries; every value comes back as text.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The standard Postgres normalizers, arrays included.
    pub fn postgres() -> Self {
        let mut normalizers: HashMap<Oid, Normalizer> = SCALARS
            .iter()
            .map(|(oid, normalize)| (*oid, Normalizer::Scalar(*normalize)))
            .collect();

        for array_oid in ARRAYS {
            let element = oid::array_element(array_oid)
                .and_then(|element| normalizers.get(&element))
                .and_then(|normalizer| match normalizer {
                    Normalizer::Scalar(normalize) => Some(*normalize),
                    Normalizer::Array(_) => None,
                })
                .unwrap_or(scalar::text as ScalarNormalizer);
            normalizers.insert(array_oid, Normalizer::Array(element));
        }

        Self { normalizers }
    }

    /// Overrides or adds the normalizer for `oid`.
    pub fn with(mut self, oid: Oid, normalizer: Normalizer) -> Self {
        self.normalizers.insert(oid, normalizer);
        self
    }

    pub fn get(&self, oid: Oid) -> Option<Normalizer> {
        self.normalizers.get(&oid).copied()
    }

    /// Normalizes one cell. `None` is SQL `NULL`.
    pub fn normalize(&self, oid: Oid, raw: Option<&str>) -> Result<ResultValue, NormalizeError> {
        let Some(text) = raw else {
            return Ok(ResultValue::Null);
        };
        match self.normalizers.get(&oid) {
            Some(normalizer) => normalizer.apply(text),
            None => scalar::text(text),
        }
    }

    /// Normalizes a row of wire-text cells against their column OIDs.
    pub fn normalize_row(
        &self,
        oids: &[Oid],
        cells: &[Option<&str>],
    ) -> Result<Vec<ResultValue>, NormalizeError> {
        oids.iter()
            .zip(cells)
            .map(|(oid, cell)| self.normalize(*oid, *cell))
            .collect()
    }
}
