//! Shared `query_raw`/`execute_raw` logic over any underlying client.

use std::sync::Arc;

use futures_util::future::try_join_all;
use metrics::counter;
use tracing::debug;

use crate::domain::{
    AdapterError, DriverError, ErrorKind, FieldDescription, Oid, PgType, Query, RawQuery,
    RawResult, ResultSet, ResultValue,
};

use super::column_type::map_to_column_type;
use super::normalize::{parse_array, scalar};
use super::resolver::PgTypeResolver;

/// Classifies a raw client failure.
///
/// A server error exposing `code`, `severity` and `message` becomes
/// [`ErrorKind::Postgres`]; anything else stays an unclassified driver failure.
pub fn classify(err: DriverError) -> AdapterError {
    let server_error = match &err {
        DriverError::Database(raw) => raw.to_postgres_error(),
        _ => None,
    };
    match server_error {
        Some(pg) => ErrorKind::Postgres(pg).into(),
        None => AdapterError::Driver(err.to_string()),
    }
}

/// Runs queries through one I/O seam and assembles typed result sets.
///
/// `IO` is the pool, a single checked-out connection, or an HTTP client.
pub struct QueryExecutor<IO: ?Sized> {
    io: Arc<IO>,
    resolver: Arc<PgTypeResolver>,
}

impl<IO: RawQuery + ?Sized> QueryExecutor<IO> {
    pub fn new(io: Arc<IO>, resolver: Arc<PgTypeResolver>) -> Self {
        Self { io, resolver }
    }

    pub fn io(&self) -> &Arc<IO> {
        &self.io
    }

    pub fn resolver(&self) -> &Arc<PgTypeResolver> {
        &self.resolver
    }

    /// Runs a statement and classifies any failure. The only place where
    /// client errors are inspected.
    pub async fn perform_io(
        &self,
        query: &Query,
        kind: &'static str,
    ) -> Result<RawResult, AdapterError> {
        counter!("pg_adapter_queries_total", "kind" => kind).increment(1);
        self.io.query(query).await.map_err(|err| {
            counter!("pg_adapter_query_errors_total", "kind" => kind).increment(1);
            debug!(error = %err, "[{kind}] statement failed");
            classify(err)
        })
    }

    pub async fn query_raw(&self, query: &Query) -> Result<ResultSet, AdapterError> {
        self.query_with_oids(query).await.map(|(result, _)| result)
    }

    /// Like [`Self::query_raw`], also returning each column's type OID.
    pub async fn query_with_oids(
        &self,
        query: &Query,
    ) -> Result<(ResultSet, Vec<Oid>), AdapterError> {
        debug!(sql = %query.sql, args = query.args.len(), "[query_raw]");
        let raw = self.perform_io(query, "query").await?;
        let pg_types = self.resolve_fields(&raw.fields).await?;
        let column_types = pg_types
            .iter()
            .map(|pg_type| map_to_column_type(pg_type).map_err(AdapterError::from))
            .collect::<Result<Vec<_>, _>>()?;
        let rows = parse_custom_arrays(&pg_types, raw.rows)?;
        let oids = raw.fields.iter().map(|field| field.type_oid).collect();

        let result = ResultSet {
            column_names: raw.fields.into_iter().map(|field| field.name).collect(),
            column_types,
            rows,
        };
        Ok((result, oids))
    }

    pub async fn execute_raw(&self, query: &Query) -> Result<u64, AdapterError> {
        debug!(sql = %query.sql, args = query.args.len(), "[execute_raw]");
        let raw = self.perform_io(query, "execute").await?;
        Ok(raw.row_count.unwrap_or(0))
    }

    /// Runs a `;`-separated script statement by statement, stopping at the
    /// first failure. Empty statements are skipped.
    pub async fn execute_script(&self, script: &str) -> Result<(), AdapterError> {
        let statements = script
            .split(';')
            .map(str::trim)
            .filter(|statement| !statement.is_empty());

        for statement in statements {
            self.perform_io(&Query::new(statement), "script").await?;
        }
        Ok(())
    }

    /// Resolves every field before mapping, so a single unsupported column
    /// fails the whole result.
    async fn resolve_fields(
        &self,
        fields: &[FieldDescription],
    ) -> Result<Vec<PgType>, AdapterError> {
        let lookups = fields
            .iter()
            .map(|field| self.resolver.resolve(field.type_oid));
        Ok(try_join_all(lookups).await?)
    }
}

/// Arrays of custom types have no registered normalizer, so their cells
/// still hold array literals.
fn parse_custom_arrays(
    pg_types: &[PgType],
    mut rows: Vec<Vec<ResultValue>>,
) -> Result<Vec<Vec<ResultValue>>, AdapterError> {
    let columns: Vec<usize> = pg_types
        .iter()
        .enumerate()
        .filter(|(_, pg_type)| pg_type.is_custom() && pg_type.element.is_some())
        .map(|(index, _)| index)
        .collect();

    for row in &mut rows {
        for &index in &columns {
            let Some(ResultValue::Text(literal)) = row.get(index) else {
                continue;
            };
            let parsed = parse_array(literal, scalar::text)
                .map_err(|err| classify(DriverError::from(err)))?;
            row[index] = parsed;
        }
    }
    Ok(rows)
}
