//! sqlx-backed pool and connection implementing the driver seams.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{
    PgConnectOptions, PgDatabaseError, PgPool, PgPoolOptions, PgRow, PgSeverity, PgTypeInfo,
    PgTypeKind, PgValueFormat,
};
use sqlx::{Column, Connection, Either, Executor, Postgres, Row, Statement, TypeInfo, ValueRef};
use tracing::{info, instrument, warn};

use crate::app::TypeNormalizerRegistry;
use crate::domain::{
    DriverError, ErrorListener, ErrorListeners, FieldDescription, ListenerId, Oid, PgConnection,
    PgDriver, Query, RawQuery, RawResult, RawServerError, ResultValue,
};
use crate::infra::config::{ConnectionConfig, PoolConfig};

use super::binary;
use super::bind::{ParamType, build_arguments};

/// A sqlx connection pool exposed as a [`PgDriver`].
pub struct SqlxDriver {
    pool: PgPool,
    normalizers: Arc<TypeNormalizerRegistry>,
    listeners: Arc<ErrorListeners>,
}

impl SqlxDriver {
    /// Connect a pool using the default Postgres normalizers.
    pub async fn connect(
        connection: &ConnectionConfig,
        pool: &PoolConfig,
    ) -> Result<Self, DriverError> {
        Self::connect_with(
            connection.to_connect_options(),
            pool,
            Arc::new(TypeNormalizerRegistry::postgres()),
        )
        .await
    }

    pub async fn connect_with(
        options: PgConnectOptions,
        config: &PoolConfig,
        normalizers: Arc<TypeNormalizerRegistry>,
    ) -> Result<Self, DriverError> {
        info!("Connecting to PostgreSQL...");
        let listeners = Arc::new(ErrorListeners::new());
        let ping_listeners = Arc::clone(&listeners);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .before_acquire(move |conn, _meta| {
                let listeners = Arc::clone(&ping_listeners);
                Box::pin(async move {
                    match conn.ping().await {
                        Ok(()) => Ok(true),
                        Err(err) => {
                            // Idle connection died: report it and let the pool replace it.
                            listeners.emit(&to_driver_error(err));
                            Ok(false)
                        }
                    }
                })
            })
            .connect_with(options)
            .await
            .map_err(to_driver_error)?;
        info!("Connected to PostgreSQL");

        Ok(Self {
            pool,
            normalizers,
            listeners,
        })
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RawQuery for SqlxDriver {
    async fn query(&self, query: &Query) -> Result<RawResult, DriverError> {
        let mut conn = self.pool.acquire().await.map_err(to_driver_error)?;
        run(&mut conn, query, &self.normalizers).await
    }
}

#[async_trait]
impl PgDriver for SqlxDriver {
    async fn connect(&self) -> Result<Box<dyn PgConnection>, DriverError> {
        let conn = self.pool.acquire().await.map_err(to_driver_error)?;
        Ok(Box::new(SqlxConnection {
            conn,
            normalizers: Arc::clone(&self.normalizers),
            listeners: ErrorListeners::new(),
        }))
    }

    #[instrument(skip(self))]
    async fn end(&self) -> Result<(), DriverError> {
        self.pool.close().await;
        info!("PostgreSQL pool closed");
        Ok(())
    }

    fn on_error(&self, listener: ErrorListener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_error_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}

/// One connection checked out of a [`SqlxDriver`] pool.
pub struct SqlxConnection {
    conn: PoolConnection<Postgres>,
    normalizers: Arc<TypeNormalizerRegistry>,
    listeners: ErrorListeners,
}

#[async_trait]
impl PgConnection for SqlxConnection {
    async fn query(&mut self, query: &Query) -> Result<RawResult, DriverError> {
        let result = run(&mut self.conn, query, &self.normalizers).await;
        if let Err(err) = &result {
            if breaks_connection(err) {
                self.listeners.emit(err);
            }
        }
        result
    }

    fn on_error(&mut self, listener: ErrorListener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_error_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    async fn release(self: Box<Self>) {
        drop(self.conn);
    }

    fn discard(self: Box<Self>) {
        warn!("Discarding connection instead of returning it to the pool");
        drop(self.conn.detach());
    }
}

/// Failures after which the connection is no longer usable.
fn breaks_connection(err: &DriverError) -> bool {
    match err {
        DriverError::Io(_) => true,
        DriverError::Database(raw) => {
            matches!(raw.severity.as_deref(), Some("FATAL") | Some("PANIC"))
        }
        DriverError::Decode(_) => false,
    }
}

async fn run(
    conn: &mut sqlx::PgConnection,
    query: &Query,
    normalizers: &TypeNormalizerRegistry,
) -> Result<RawResult, DriverError> {
    let statement = (&mut *conn)
        .prepare(query.sql.as_str())
        .await
        .map_err(to_driver_error)?;
    let fields: Vec<FieldDescription> = statement
        .columns()
        .iter()
        .map(|column| {
            let oid = column.type_info().oid().map(|oid| oid.0).unwrap_or(0);
            FieldDescription::new(column.name(), oid)
        })
        .collect();

    let params: Vec<ParamType> = match statement.parameters() {
        Some(Either::Left(types)) => types.iter().map(param_type).collect(),
        _ => Vec::new(),
    };
    let arguments = build_arguments(query, &params)?;
    let sql = sqlx::query_with(query.sql.as_str(), arguments);

    if fields.is_empty() {
        let done = sql.execute(&mut *conn).await.map_err(to_driver_error)?;
        return Ok(RawResult {
            fields,
            rows: Vec::new(),
            row_count: Some(done.rows_affected()),
        });
    }

    let rows = sql.fetch_all(&mut *conn).await.map_err(to_driver_error)?;
    let oids: Vec<Oid> = fields.iter().map(|field| field.type_oid).collect();
    let normalized = rows
        .iter()
        .map(|row| normalize_row(row, &oids, normalizers))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RawResult {
        row_count: Some(normalized.len() as u64),
        fields,
        rows: normalized,
    })
}

fn param_type(info: &PgTypeInfo) -> ParamType {
    let param = ParamType::new(info.oid().map_or(0, |oid| oid.0), info.name());
    match info.kind() {
        PgTypeKind::Array(element) => param.with_element(param_type(element)),
        _ => param,
    }
}

fn normalize_row(
    row: &PgRow,
    oids: &[Oid],
    normalizers: &TypeNormalizerRegistry,
) -> Result<Vec<ResultValue>, DriverError> {
    oids.iter()
        .enumerate()
        .map(|(index, &type_oid)| {
            let value = row.try_get_raw(index).map_err(to_driver_error)?;
            if value.is_null() {
                return Ok(ResultValue::Null);
            }
            let decode = |e: sqlx::error::BoxDynError| {
                DriverError::Decode(format!(
                    "column {index} ({}): {e}",
                    value.type_info().name()
                ))
            };
            let text = match value.format() {
                PgValueFormat::Text => value.as_str().map_err(decode)?.to_string(),
                PgValueFormat::Binary => {
                    binary::render(type_oid, value.as_bytes().map_err(decode)?)?
                }
            };
            Ok(normalizers.normalize(type_oid, Some(&text))?)
        })
        .collect()
}

/// Translates a sqlx failure into the loosely-typed driver error.
pub fn to_driver_error(err: sqlx::Error) -> DriverError {
    match err {
        sqlx::Error::Database(db) => match db.try_downcast_ref::<PgDatabaseError>() {
            Some(pg) => DriverError::Database(RawServerError {
                code: Some(pg.code().to_string()),
                severity: Some(severity_name(pg.severity()).to_string()),
                message: Some(pg.message().to_string()),
                detail: pg.detail().map(str::to_string),
                column: pg.column().map(str::to_string),
                hint: pg.hint().map(str::to_string),
            }),
            None => DriverError::Database(RawServerError {
                code: db.code().map(|code| code.into_owned()),
                message: Some(db.message().to_string()),
                ..RawServerError::default()
            }),
        },
        sqlx::Error::Decode(e) => DriverError::Decode(e.to_string()),
        err @ sqlx::Error::ColumnDecode { .. } => DriverError::Decode(err.to_string()),
        other => DriverError::Io(other.to_string()),
    }
}

fn severity_name(severity: PgSeverity) -> &'static str {
    match severity {
        PgSeverity::Panic => "PANIC",
        PgSeverity::Fatal => "FATAL",
        PgSeverity::Error => "ERROR",
        PgSeverity::Warning => "WARNING",
        PgSeverity::Notice => "NOTICE",
        PgSeverity::Debug => "DEBUG",
        PgSeverity::Info => "INFO",
        PgSeverity::Log => "LOG",
    }
}
