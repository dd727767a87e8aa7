//! Adapter over a stateless SQL-over-HTTP client.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use tracing::instrument;

use crate::domain::{
    AdapterError, ConnectionInfo, DriverAdapter, DriverError, ErrorKind, FieldDescription,
    IsolationLevel, Oid, Query, RawQuery, RawResult, ResultSet, SqlQueryable, Transaction,
};

use super::executor::QueryExecutor;
use super::normalize::TypeNormalizerRegistry;
use super::resolver::PgTypeResolver;

const ADAPTER_NAME: &str = "pg-driver-adapter-http";

/// One statement's result as returned over HTTP: column metadata plus
/// rows of raw wire text, `None` for SQL `NULL`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpQueryResult {
    pub fields: Vec<FieldDescription>,
    #[serde(default)]
    pub rows: Vec<Vec<Option<String>>>,
    #[serde(default)]
    pub row_count: Option<u64>,
}

/// Client libraries exposing a `query` method.
#[async_trait]
pub trait HttpQueryClient: Send + Sync {
    async fn query(&self, query: &Query) -> Result<HttpQueryResult, DriverError>;
}

/// Client libraries that are themselves callable.
pub type HttpQueryFn =
    Arc<dyn Fn(Query) -> BoxFuture<'static, Result<HttpQueryResult, DriverError>> + Send + Sync>;

/// The two call conventions an HTTP client may come in.
#[derive(Clone)]
pub enum HttpClient {
    Callable(HttpQueryFn),
    Method(Arc<dyn HttpQueryClient>),
}

impl HttpClient {
    /// Binds to the client's call convention once.
    fn into_call(self) -> HttpQueryFn {
        match self {
            HttpClient::Callable(call) => call,
            HttpClient::Method(client) => Arc::new(move |query: Query| {
                let client = Arc::clone(&client);
                async move { client.query(&query).await }.boxed()
            }),
        }
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpClient::Callable(_) => f.write_str("HttpClient::Callable"),
            HttpClient::Method(_) => f.write_str("HttpClient::Method"),
        }
    }
}

/// HTTP call plus normalization, usable both as the executor's I/O and as
/// the type resolver's catalog.
struct HttpIo {
    call: HttpQueryFn,
    normalizers: Arc<TypeNormalizerRegistry>,
}

#[async_trait]
impl RawQuery for HttpIo {
    async fn query(&self, query: &Query) -> Result<RawResult, DriverError> {
        let result = (self.call)(query.clone()).await?;
        let oids: Vec<Oid> = result.fields.iter().map(|field| field.type_oid).collect();

        let rows = result
            .rows
            .iter()
            .map(|row| {
                let cells: Vec<Option<&str>> = row.iter().map(Option::as_deref).collect();
                self.normalizers.normalize_row(&oids, &cells)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RawResult {
            fields: result.fields,
            rows,
            row_count: result.row_count,
        })
    }
}

/// Adapter over an HTTP client. Every statement is independent, so
/// transactions are not available.
pub struct HttpQueryable {
    executor: QueryExecutor<HttpIo>,
    schema: Option<String>,
}

impl HttpQueryable {
    pub fn new(client: HttpClient) -> Self {
        Self::with_normalizers(client, Arc::new(TypeNormalizerRegistry::postgres()))
    }

    pub fn with_normalizers(client: HttpClient, normalizers: Arc<TypeNormalizerRegistry>) -> Self {
        let io = Arc::new(HttpIo {
            call: client.into_call(),
            normalizers,
        });
        let resolver = Arc::new(PgTypeResolver::new(io.clone()));
        Self {
            executor: QueryExecutor::new(io, resolver),
            schema: None,
        }
    }

    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }
}

#[async_trait]
impl SqlQueryable for HttpQueryable {
    fn adapter_name(&self) -> &'static str {
        ADAPTER_NAME
    }

    #[instrument(skip_all)]
    async fn query_raw(&self, query: Query) -> Result<ResultSet, AdapterError> {
        self.executor.query_raw(&query).await
    }

    #[instrument(skip_all)]
    async fn execute_raw(&self, query: Query) -> Result<u64, AdapterError> {
        self.executor.execute_raw(&query).await
    }
}

#[async_trait]
impl DriverAdapter for HttpQueryable {
    async fn start_transaction(
        &self,
        _isolation_level: Option<IsolationLevel>,
    ) -> Result<Box<dyn Transaction>, AdapterError> {
        Err(ErrorKind::TransactionsNotSupported.into())
    }

    #[instrument(skip_all)]
    async fn execute_script(&self, script: &str) -> Result<(), AdapterError> {
        self.executor.execute_script(script).await
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            schema_name: self.schema.clone(),
            supports_relation_joins: true,
        }
    }

    async fn close(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}
