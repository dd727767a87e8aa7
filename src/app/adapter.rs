//! Pool-backed adapter and its transaction handles.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{
    AdapterError, ConnectionInfo, DriverAdapter, DriverError, ErrorListener, IsolationLevel,
    ListenerId, Oid, PgConnection, PgDriver, Query, RawQuery, RawResult, ResultSet,
    ResultValue, SYSTEM_CATALOG_CEILING, SqlQueryable, Transaction,
};

use super::executor::{QueryExecutor, classify};
use super::normalize::TypeNormalizerRegistry;
use super::resolver::PgTypeResolver;

const ADAPTER_NAME: &str = "pg-driver-adapter";

/// Decodes values of user-defined types that have no registered normalizer.
///
/// Gets the column's type OID, the cell as read, and the queryable that
/// produced the result, which may be used for follow-up catalog queries.
#[async_trait]
pub trait UserDefinedTypeParser: Send + Sync {
    async fn parse(
        &self,
        oid: Oid,
        value: ResultValue,
        queryable: &dyn SqlQueryable,
    ) -> Result<ResultValue, AdapterError>;
}

/// Caller-supplied options for [`PgAdapter`].
#[derive(Clone, Default)]
pub struct PgAdapterOptions {
    /// Schema reported through [`DriverAdapter::connection_info`].
    pub schema: Option<String>,
    /// Called when the pool loses an idle connection.
    pub on_pool_error: Option<ErrorListener>,
    /// Called when a connection held by a transaction fails.
    pub on_connection_error: Option<ErrorListener>,
    /// Leave the pool running on `close`; only the error listener is detached.
    pub keep_pool_open: bool,
    /// Applied to non-null cells of custom-type columns after each query.
    pub user_defined_type_parser: Option<Arc<dyn UserDefinedTypeParser>>,
    /// Normalizers the driver decodes with. Custom OIDs registered here
    /// skip the user-defined type parser.
    pub normalizers: Option<Arc<TypeNormalizerRegistry>>,
}

impl PgAdapterOptions {
    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    #[must_use]
    pub fn on_pool_error(mut self, listener: ErrorListener) -> Self {
        self.on_pool_error = Some(listener);
        self
    }

    #[must_use]
    pub fn on_connection_error(mut self, listener: ErrorListener) -> Self {
        self.on_connection_error = Some(listener);
        self
    }

    #[must_use]
    pub fn with_user_defined_type_parser(
        mut self,
        parser: Arc<dyn UserDefinedTypeParser>,
    ) -> Self {
        self.user_defined_type_parser = Some(parser);
        self
    }

    #[must_use]
    pub fn with_normalizers(mut self, normalizers: Arc<TypeNormalizerRegistry>) -> Self {
        self.normalizers = Some(normalizers);
        self
    }

    fn parses_with_user_parser(&self, oid: Oid) -> bool {
        oid > SYSTEM_CATALOG_CEILING
            && self
                .normalizers
                .as_ref()
                .is_none_or(|registry| registry.get(oid).is_none())
    }

    /// Runs the user-defined type parser over every eligible cell.
    async fn parse_user_defined_types(
        &self,
        queryable: &dyn SqlQueryable,
        oids: &[Oid],
        mut result: ResultSet,
    ) -> Result<ResultSet, AdapterError> {
        let Some(parser) = &self.user_defined_type_parser else {
            return Ok(result);
        };
        let columns: Vec<(usize, Oid)> = oids
            .iter()
            .copied()
            .enumerate()
            .filter(|&(_, oid)| self.parses_with_user_parser(oid))
            .collect();
        if columns.is_empty() {
            return Ok(result);
        }

        for row in &mut result.rows {
            for &(index, oid) in &columns {
                let Some(cell) = row.get_mut(index) else {
                    continue;
                };
                if cell.is_null() {
                    continue;
                }
                let value = std::mem::replace(cell, ResultValue::Null);
                *cell = parser.parse(oid, value, queryable).await?;
            }
        }
        Ok(result)
    }
}

impl std::fmt::Debug for PgAdapterOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgAdapterOptions")
            .field("schema", &self.schema)
            .field("on_pool_error", &self.on_pool_error.is_some())
            .field("on_connection_error", &self.on_connection_error.is_some())
            .field("keep_pool_open", &self.keep_pool_open)
            .field(
                "user_defined_type_parser",
                &self.user_defined_type_parser.is_some(),
            )
            .field("normalizers", &self.normalizers.is_some())
            .finish()
    }
}

enum PoolState {
    Open { listener: ListenerId },
    Closed,
}

/// Adapter over a connection pool.
///
/// Queries run on any pooled connection; transactions check one out and
/// own it until they finish.
///
/// # Example
///
/// ```ignore
/// let driver = Arc::new(SqlxDriver::connect(&config.connection, &config.pool).await?);
/// let adapter = PgAdapter::new(driver, PgAdapterOptions::default().with_schema("public"));
///
/// let result = adapter.query_raw(Query::new("SELECT 1 AS one")).await?;
/// adapter.close().await?;
/// ```
pub struct PgAdapter {
    driver: Arc<dyn PgDriver>,
    executor: QueryExecutor<dyn PgDriver>,
    options: PgAdapterOptions,
    connection_listener: ErrorListener,
    state: Mutex<PoolState>,
}

impl PgAdapter {
    /// Wraps a pool, attaching its error listener.
    pub fn new<D: PgDriver + 'static>(driver: Arc<D>, options: PgAdapterOptions) -> Self {
        let resolver = Arc::new(PgTypeResolver::new(driver.clone()));
        let driver: Arc<dyn PgDriver> = driver;

        let on_pool_error = options.on_pool_error.clone();
        let listener = driver.on_error(Arc::new(move |err: &DriverError| {
            error!(error = %err, "Error from idle pool connection");
            counter!("pg_adapter_pool_errors_total").increment(1);
            if let Some(callback) = &on_pool_error {
                callback(err);
            }
        }));

        let on_connection_error = options.on_connection_error.clone();
        let connection_listener: ErrorListener = Arc::new(move |err: &DriverError| {
            warn!(error = %err, "Error from pool connection");
            if let Some(callback) = &on_connection_error {
                callback(err);
            }
        });

        Self {
            executor: QueryExecutor::new(Arc::clone(&driver), resolver),
            driver,
            options,
            connection_listener,
            state: Mutex::new(PoolState::Open { listener }),
        }
    }

    /// `false` once [`DriverAdapter::close`] has run.
    pub async fn is_running(&self) -> bool {
        matches!(*self.state.lock().await, PoolState::Open { .. })
    }

    pub fn resolver(&self) -> &Arc<PgTypeResolver> {
        self.executor.resolver()
    }

    async fn begin(
        conn: &mut dyn PgConnection,
        isolation_level: Option<IsolationLevel>,
    ) -> Result<(), DriverError> {
        conn.query(&Query::new("BEGIN")).await?;
        if let Some(level) = isolation_level {
            conn.query(&Query::new(format!("SET TRANSACTION ISOLATION LEVEL {level}")))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SqlQueryable for PgAdapter {
    fn adapter_name(&self) -> &'static str {
        ADAPTER_NAME
    }

    #[instrument(skip_all)]
    async fn query_raw(&self, query: Query) -> Result<ResultSet, AdapterError> {
        let (result, oids) = self.executor.query_with_oids(&query).await?;
        self.options
            .parse_user_defined_types(self, &oids, result)
            .await
    }

    #[instrument(skip_all)]
    async fn execute_raw(&self, query: Query) -> Result<u64, AdapterError> {
        self.executor.execute_raw(&query).await
    }
}

#[async_trait]
impl DriverAdapter for PgAdapter {
    #[instrument(skip(self))]
    async fn start_transaction(
        &self,
        isolation_level: Option<IsolationLevel>,
    ) -> Result<Box<dyn Transaction>, AdapterError> {
        debug!(isolation_level = ?isolation_level, "[start_transaction]");

        let mut conn = self.driver.connect().await.map_err(classify)?;
        let listener = conn.on_error(Arc::clone(&self.connection_listener));

        if let Err(err) = Self::begin(conn.as_mut(), isolation_level).await {
            conn.remove_error_listener(listener);
            conn.release().await;
            counter!("pg_adapter_transactions_total", "outcome" => "begin_failed").increment(1);
            return Err(classify(err));
        }

        counter!("pg_adapter_transactions_total", "outcome" => "started").increment(1);
        let io = Arc::new(TransactionIo {
            checkout: Mutex::new(Some(Checkout { conn, listener })),
        });
        Ok(Box::new(PgTransaction {
            executor: QueryExecutor::new(io, Arc::clone(self.executor.resolver())),
            options: self.options.clone(),
        }))
    }

    /// Runs each `;`-separated statement in order, stopping at the first failure.
    #[instrument(skip_all)]
    async fn execute_script(&self, script: &str) -> Result<(), AdapterError> {
        self.executor.execute_script(script).await
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            schema_name: self.options.schema.clone(),
            supports_relation_joins: true,
        }
    }

    async fn close(&self) -> Result<(), AdapterError> {
        let mut state = self.state.lock().await;
        let PoolState::Open { listener } = *state else {
            return Ok(());
        };
        *state = PoolState::Closed;

        self.driver.remove_error_listener(listener);
        if !self.options.keep_pool_open {
            self.driver.end().await.map_err(classify)?;
        }
        info!("Connection pool closed");
        Ok(())
    }
}

struct Checkout {
    conn: Box<dyn PgConnection>,
    listener: ListenerId,
}

impl Checkout {
    async fn finish(mut self) {
        self.conn.remove_error_listener(self.listener);
        self.conn.release().await;
    }
}

/// The checked-out connection of one transaction.
///
/// The async mutex queues statements in issuance order.
struct TransactionIo {
    checkout: Mutex<Option<Checkout>>,
}

#[async_trait]
impl RawQuery for TransactionIo {
    async fn query(&self, query: &Query) -> Result<RawResult, DriverError> {
        let mut checkout = self.checkout.lock().await;
        match checkout.as_mut() {
            Some(checkout) => checkout.conn.query(query).await,
            None => Err(DriverError::Io("transaction already finished".to_string())),
        }
    }
}

/// A transaction holding one pooled connection until commit or rollback.
pub struct PgTransaction {
    executor: QueryExecutor<TransactionIo>,
    options: PgAdapterOptions,
}

impl PgTransaction {
    async fn finish(self: Box<Self>, statement: &'static str) -> Result<(), AdapterError> {
        let Some(mut checkout) = self.executor.io().checkout.lock().await.take() else {
            return Ok(());
        };

        let result = checkout.conn.query(&Query::new(statement)).await;
        checkout.finish().await;

        let outcome = match (statement, result.is_ok()) {
            ("COMMIT", true) => "committed",
            ("ROLLBACK", true) => "rolled_back",
            _ => "failed",
        };
        counter!("pg_adapter_transactions_total", "outcome" => outcome).increment(1);
        result.map(|_| ()).map_err(classify)
    }
}

#[async_trait]
impl SqlQueryable for PgTransaction {
    fn adapter_name(&self) -> &'static str {
        ADAPTER_NAME
    }

    #[instrument(skip_all)]
    async fn query_raw(&self, query: Query) -> Result<ResultSet, AdapterError> {
        let (result, oids) = self.executor.query_with_oids(&query).await?;
        self.options
            .parse_user_defined_types(self, &oids, result)
            .await
    }

    #[instrument(skip_all)]
    async fn execute_raw(&self, query: Query) -> Result<u64, AdapterError> {
        self.executor.execute_raw(&query).await
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(self: Box<Self>) -> Result<(), AdapterError> {
        debug!("[commit]");
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<(), AdapterError> {
        debug!("[rollback]");
        self.finish("ROLLBACK").await
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        let Ok(mut guard) = self.executor.io().checkout.try_lock() else {
            return;
        };
        if let Some(mut checkout) = guard.take() {
            warn!("Transaction dropped without commit or rollback; discarding its connection");
            checkout.conn.remove_error_listener(checkout.listener);
            checkout.conn.discard();
            counter!("pg_adapter_transactions_total", "outcome" => "abandoned").increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::normalize::{Normalizer, scalar};
    use crate::domain::{ErrorKind, FieldDescription};
    use crate::test_utils::mocks::{MockConfig, MockDriver};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn adapter(driver: &Arc<MockDriver>) -> PgAdapter {
        PgAdapter::new(Arc::clone(driver), PgAdapterOptions::default())
    }

    #[tokio::test]
    async fn test_commit_releases_and_detaches_once() {
        let driver = Arc::new(MockDriver::new());
        let adapter = adapter(&driver);

        let tx = adapter.start_transaction(None).await.unwrap();
        assert_eq!(driver.connection_listener_count(0), 1);

        tx.commit().await.unwrap();
        assert_eq!(driver.connection_listener_count(0), 0);
        assert_eq!(driver.release_count(), 1);
        assert_eq!(driver.discard_count(), 0);
        assert_eq!(driver.statements(), vec!["BEGIN", "COMMIT"]);
    }

    #[tokio::test]
    async fn test_rollback_releases_even_when_statement_fails() {
        let driver = Arc::new(
            MockDriver::new().with_error("ROLLBACK", DriverError::Io("socket closed".to_string())),
        );
        let adapter = adapter(&driver);

        let tx = adapter.start_transaction(None).await.unwrap();
        let err = tx.rollback().await.unwrap_err();

        assert!(matches!(err, AdapterError::Driver(_)));
        assert_eq!(driver.release_count(), 1);
        assert_eq!(driver.connection_listener_count(0), 0);
    }

    #[tokio::test]
    async fn test_isolation_level_follows_begin() {
        let driver = Arc::new(MockDriver::new());
        let adapter = adapter(&driver);

        let tx = adapter
            .start_transaction(Some(IsolationLevel::Serializable))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(
            driver.statements(),
            vec!["BEGIN", "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE", "ROLLBACK"]
        );
    }

    #[tokio::test]
    async fn test_failed_begin_cleans_up() {
        let driver = Arc::new(
            MockDriver::new().with_error("BEGIN", DriverError::server("08006", "FATAL", "gone")),
        );
        let adapter = adapter(&driver);

        let err = adapter.start_transaction(None).await.err().unwrap();
        assert!(matches!(err.kind(), Some(ErrorKind::Postgres(pg)) if pg.code == "08006"));
        assert_eq!(driver.release_count(), 1);
        assert_eq!(driver.connection_listener_count(0), 0);
    }

    #[tokio::test]
    async fn test_failed_checkout_is_unclassified() {
        let driver = Arc::new(MockDriver::new());
        driver.set_connect_failing(true);

        let err = adapter(&driver).start_transaction(None).await.err().unwrap();
        assert!(matches!(err, AdapterError::Driver(_)));
        assert_eq!(driver.release_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_connection() {
        let driver = Arc::new(MockDriver::new());
        let adapter = adapter(&driver);

        let tx = adapter.start_transaction(None).await.unwrap();
        drop(tx);

        assert_eq!(driver.discard_count(), 1);
        assert_eq!(driver.release_count(), 0);
        assert_eq!(driver.connection_listener_count(0), 0);
    }

    #[tokio::test]
    async fn test_transaction_statements_run_on_its_connection() {
        let driver = Arc::new(MockDriver::new());
        let adapter = adapter(&driver);

        let tx = adapter.start_transaction(None).await.unwrap();
        adapter.execute_raw(Query::new("SELECT 1")).await.unwrap();
        tx.execute_raw(Query::new("DELETE FROM posts")).await.unwrap();
        tx.commit().await.unwrap();

        let log = driver.log();
        assert_eq!(log[1].connection, None);
        assert_eq!(log[2].sql, "DELETE FROM posts");
        assert_eq!(log[2].connection, Some(0));
    }

    #[tokio::test]
    async fn test_connection_errors_reach_callback() {
        let driver = Arc::new(MockDriver::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let options = PgAdapterOptions::default().on_connection_error(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let adapter = PgAdapter::new(Arc::clone(&driver), options);

        let tx = adapter.start_transaction(None).await.unwrap();
        driver.emit_connection_error(0, &DriverError::Io("reset".to_string()));
        tx.commit().await.unwrap();
        driver.emit_connection_error(0, &DriverError::Io("reset".to_string()));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pool_errors_reach_callback_without_failing_calls() {
        let driver = Arc::new(MockDriver::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let options = PgAdapterOptions::default().on_pool_error(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let adapter = PgAdapter::new(Arc::clone(&driver), options);

        driver.emit_pool_error(&DriverError::server("57P01", "FATAL", "terminating connection"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(adapter.execute_raw(Query::new("SELECT 1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let driver = Arc::new(MockDriver::new());
        let adapter = adapter(&driver);
        assert_eq!(driver.pool_listener_count(), 1);

        adapter.close().await.unwrap();
        adapter.close().await.unwrap();

        assert_eq!(driver.end_count(), 1);
        assert_eq!(driver.pool_listener_count(), 0);
        assert!(!adapter.is_running().await);
    }

    #[tokio::test]
    async fn test_close_keeps_external_pool_open() {
        let driver = Arc::new(MockDriver::new());
        let options = PgAdapterOptions {
            keep_pool_open: true,
            ..PgAdapterOptions::default()
        };
        let adapter = PgAdapter::new(Arc::clone(&driver), options);

        adapter.close().await.unwrap();
        assert_eq!(driver.end_count(), 0);
        assert_eq!(driver.pool_listener_count(), 0);
    }

    #[tokio::test]
    async fn test_execute_script_runs_statements_in_order() {
        let driver = Arc::new(MockDriver::new());
        let adapter = adapter(&driver);

        adapter
            .execute_script("CREATE TABLE a (id int);\n ; INSERT INTO a VALUES (1);  ")
            .await
            .unwrap();

        assert_eq!(
            driver.statements(),
            vec!["CREATE TABLE a (id int)", "INSERT INTO a VALUES (1)"]
        );
    }

    #[tokio::test]
    async fn test_execute_script_stops_at_first_failure() {
        let driver = Arc::new(MockDriver::new().with_error(
            "DROP TABLE missing",
            DriverError::server("42P01", "ERROR", "table \"missing\" does not exist"),
        ));
        let adapter = adapter(&driver);

        let err = adapter
            .execute_script("DROP TABLE missing; SELECT 1")
            .await
            .unwrap_err();
        assert!(err.is_data_error());
        assert_eq!(driver.statements(), vec!["DROP TABLE missing"]);
    }

    #[tokio::test]
    async fn test_connection_info() {
        let driver = Arc::new(MockDriver::with_config(MockConfig::success()));
        let adapter = PgAdapter::new(driver, PgAdapterOptions::default().with_schema("tenant_1"));

        let info = adapter.connection_info();
        assert_eq!(info.schema_name.as_deref(), Some("tenant_1"));
        assert!(info.supports_relation_joins);
        assert_eq!(adapter.provider(), "postgres");
    }

    struct ShoutingParser {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl UserDefinedTypeParser for ShoutingParser {
        async fn parse(
            &self,
            oid: Oid,
            value: ResultValue,
            queryable: &dyn SqlQueryable,
        ) -> Result<ResultValue, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            queryable.execute_raw(Query::new(format!("SELECT {oid}"))).await?;
            Ok(match value {
                ResultValue::Text(text) => ResultValue::Text(text.to_uppercase()),
                other => other,
            })
        }
    }

    fn labelled_moods() -> MockDriver {
        MockDriver::new()
            .with_type(16_385, "mood")
            .with_type(16_386, "label")
            .with_result(
                "SELECT * FROM moods",
                RawResult {
                    fields: vec![
                        FieldDescription::new("id", 20),
                        FieldDescription::new("mood", 16_385),
                        FieldDescription::new("label", 16_386),
                    ],
                    rows: vec![
                        vec![ResultValue::Int(1), "happy".into(), "x".into()],
                        vec![ResultValue::Int(2), ResultValue::Null, "y".into()],
                    ],
                    row_count: Some(2),
                },
            )
    }

    fn parsing_options(parser: &Arc<ShoutingParser>) -> PgAdapterOptions {
        let normalizers =
            TypeNormalizerRegistry::postgres().with(16_386, Normalizer::Scalar(scalar::text));
        PgAdapterOptions::default()
            .with_user_defined_type_parser(parser.clone())
            .with_normalizers(Arc::new(normalizers))
    }

    #[tokio::test]
    async fn test_user_defined_types_go_through_the_parser() {
        let driver = Arc::new(labelled_moods());
        let parser = Arc::new(ShoutingParser {
            calls: AtomicUsize::new(0),
        });
        let adapter = PgAdapter::new(Arc::clone(&driver), parsing_options(&parser));

        let result = adapter.query_raw(Query::new("SELECT * FROM moods")).await.unwrap();

        assert_eq!(result.rows[0][1], ResultValue::Text("HAPPY".to_string()));
        assert_eq!(result.rows[1][1], ResultValue::Null);
        assert_eq!(result.rows[0][2], ResultValue::Text("x".to_string()));
        assert_eq!(parser.calls.load(Ordering::SeqCst), 1);
        assert!(driver.statements().contains(&"SELECT 16385".to_string()));
    }

    #[tokio::test]
    async fn test_transaction_hands_itself_to_the_parser() {
        let driver = Arc::new(labelled_moods());
        let parser = Arc::new(ShoutingParser {
            calls: AtomicUsize::new(0),
        });
        let adapter = PgAdapter::new(Arc::clone(&driver), parsing_options(&parser));

        let tx = adapter.start_transaction(None).await.unwrap();
        let result = tx.query_raw(Query::new("SELECT * FROM moods")).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(result.rows[0][1], ResultValue::Text("HAPPY".to_string()));
        let on_connection: Vec<String> = driver
            .log()
            .into_iter()
            .filter(|entry| entry.connection == Some(0))
            .map(|entry| entry.sql)
            .collect();
        assert_eq!(
            on_connection,
            vec!["BEGIN", "SELECT * FROM moods", "SELECT 16385", "COMMIT"]
        );
    }

    #[tokio::test]
    async fn test_without_a_parser_custom_values_pass_through() {
        let driver = Arc::new(labelled_moods());
        let adapter = adapter(&driver);

        let result = adapter.query_raw(Query::new("SELECT * FROM moods")).await.unwrap();
        assert_eq!(result.rows[0][1], ResultValue::Text("happy".to_string()));
    }
}
