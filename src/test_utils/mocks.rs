//! Mock implementations for testing.
//!
//! These mocks provide in-memory implementations of the driver seams
//! that can be configured to simulate success, failure, latency and
//! out-of-band connection errors. Every statement is recorded in a shared
//! log so tests can assert on issuance order.

use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::app::http::{HttpQueryClient, HttpQueryFn, HttpQueryResult};
use crate::app::oid;
use crate::app::resolver::TYPE_NAME_QUERY;
use crate::domain::{
    DriverError, ErrorListener, ErrorListeners, FieldDescription, ListenerId, PgConnection,
    PgDriver, Query, RawQuery, RawResult, ResultValue,
};

/// Configuration for mock behavior.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// If true, operations will fail.
    pub should_fail: bool,
    /// Error returned on failure; an I/O error when unset.
    pub error: Option<DriverError>,
    /// Simulated latency in milliseconds.
    pub latency_ms: Option<u64>,
}

impl MockConfig {
    /// Creates a config that always succeeds.
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    /// Creates a config that always fails with an unclassified I/O error.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error: Some(DriverError::Io(message.into())),
            latency_ms: None,
        }
    }

    /// Creates a config that always fails with a server error.
    #[must_use]
    pub fn server_error(code: &str, severity: &str, message: &str) -> Self {
        Self {
            should_fail: true,
            error: Some(DriverError::server(code, severity, message)),
            latency_ms: None,
        }
    }

    /// Adds simulated latency.
    #[must_use]
    pub fn with_latency(mut self, ms: u64) -> Self {
        self.latency_ms = Some(ms);
        self
    }

    fn error(&self) -> DriverError {
        self.error
            .clone()
            .unwrap_or_else(|| DriverError::Io("Mock driver error".to_string()))
    }
}

/// A logged statement and the connection that ran it (`None` for the pool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedStatement {
    pub connection: Option<u64>,
    pub sql: String,
}

/// A registered custom type: its name and, for arrays, the element name.
type CatalogEntry = (String, Option<String>);

fn catalog_fields() -> Vec<FieldDescription> {
    vec![
        FieldDescription::new("typname", oid::NAME),
        FieldDescription::new("elemname", oid::NAME),
    ]
}

/// State shared between a [`MockDriver`] and the connections it hands out.
#[derive(Default)]
struct MockState {
    failing: AtomicBool,
    error: Mutex<Option<DriverError>>,
    latency_ms: Option<u64>,
    results: Mutex<HashMap<String, Result<RawResult, DriverError>>>,
    types: Mutex<HashMap<i64, CatalogEntry>>,
    log: Mutex<Vec<LoggedStatement>>,
    query_count: AtomicU64,
    connect_count: AtomicU64,
    release_count: AtomicU64,
    discard_count: AtomicU64,
    end_count: AtomicU64,
    connection_listeners: Mutex<Vec<Arc<ErrorListeners>>>,
}

impl MockState {
    async fn run(&self, connection: Option<u64>, query: &Query) -> Result<RawResult, DriverError> {
        self.query_count.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(LoggedStatement {
            connection,
            sql: query.sql.clone(),
        });

        if let Some(ms) = self.latency_ms {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            let error = self.error.lock().clone();
            return Err(error.unwrap_or_else(|| DriverError::Io("Mock driver error".to_string())));
        }

        if query.sql == TYPE_NAME_QUERY {
            return Ok(self.catalog_row(query));
        }

        match self.results.lock().get(&query.sql) {
            Some(result) => result.clone(),
            None => Ok(RawResult::default()),
        }
    }

    fn catalog_row(&self, query: &Query) -> RawResult {
        let entry = query
            .args
            .first()
            .and_then(serde_json::Value::as_i64)
            .and_then(|oid| self.types.lock().get(&oid).cloned());
        let rows: Vec<Vec<ResultValue>> = entry
            .map(|(name, element)| {
                vec![vec![
                    ResultValue::Text(name),
                    element.map_or(ResultValue::Null, ResultValue::Text),
                ]]
            })
            .unwrap_or_default();
        RawResult {
            fields: catalog_fields(),
            row_count: Some(rows.len() as u64),
            rows,
        }
    }
}

/// Mock connection pool.
///
/// Queries are answered from scripted results keyed by SQL text; unknown
/// statements succeed with an empty result and no row count. The type
/// catalog query is answered from the types registered with
/// [`MockDriver::with_type`].
///
/// # Example
///
/// ```
/// use pg_driver_adapter::test_utils::{MockDriver, mocks::MockConfig};
///
/// // Create a mock that succeeds
/// let mock = MockDriver::new().with_type(16_385, "mood");
///
/// // Create a mock that fails
/// let failing_mock = MockDriver::with_config(MockConfig::failure("connection reset"));
/// ```
pub struct MockDriver {
    state: Arc<MockState>,
    pool_listeners: ErrorListeners,
    fail_connect: AtomicBool,
}

impl MockDriver {
    /// Creates a new mock with default (success) configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    /// Creates a new mock with the given configuration.
    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        let state = MockState {
            failing: AtomicBool::new(config.should_fail),
            error: Mutex::new(config.should_fail.then(|| config.error())),
            latency_ms: config.latency_ms,
            ..MockState::default()
        };
        Self {
            state: Arc::new(state),
            pool_listeners: ErrorListeners::new(),
            fail_connect: AtomicBool::new(false),
        }
    }

    /// Creates a mock whose every statement fails.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    /// Registers a custom type for the catalog lookup.
    #[must_use]
    pub fn with_type(self, oid: u32, name: &str) -> Self {
        self.add_type(oid, name);
        self
    }

    /// Registers an array of a custom type for the catalog lookup.
    #[must_use]
    pub fn with_array_type(self, oid: u32, name: &str, element: &str) -> Self {
        self.state
            .types
            .lock()
            .insert(i64::from(oid), (name.to_string(), Some(element.to_string())));
        self
    }

    /// Scripts the result of a statement.
    #[must_use]
    pub fn with_result(self, sql: &str, result: RawResult) -> Self {
        self.state.results.lock().insert(sql.to_string(), Ok(result));
        self
    }

    /// Scripts a failure for a statement.
    #[must_use]
    pub fn with_error(self, sql: &str, error: DriverError) -> Self {
        self.state.results.lock().insert(sql.to_string(), Err(error));
        self
    }

    pub fn add_type(&self, oid: u32, name: &str) {
        self.state
            .types
            .lock()
            .insert(i64::from(oid), (name.to_string(), None));
    }

    /// Toggles failure of every statement.
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Makes `connect` fail.
    pub fn set_connect_failing(&self, failing: bool) {
        self.fail_connect.store(failing, Ordering::SeqCst);
    }

    /// Number of statements run through the pool or any connection.
    pub fn query_count(&self) -> u64 {
        self.state.query_count.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> u64 {
        self.state.connect_count.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> u64 {
        self.state.release_count.load(Ordering::SeqCst)
    }

    pub fn discard_count(&self) -> u64 {
        self.state.discard_count.load(Ordering::SeqCst)
    }

    pub fn end_count(&self) -> u64 {
        self.state.end_count.load(Ordering::SeqCst)
    }

    /// SQL of every statement, in issuance order.
    pub fn statements(&self) -> Vec<String> {
        self.state.log.lock().iter().map(|s| s.sql.clone()).collect()
    }

    /// Every statement together with the connection that ran it.
    pub fn log(&self) -> Vec<LoggedStatement> {
        self.state.log.lock().clone()
    }

    pub fn pool_listener_count(&self) -> usize {
        self.pool_listeners.len()
    }

    /// Listener count of the `index`-th checked-out connection.
    pub fn connection_listener_count(&self, index: usize) -> usize {
        self.state
            .connection_listeners
            .lock()
            .get(index)
            .map_or(0, |listeners| listeners.len())
    }

    /// Simulates an idle-connection failure detected by the pool.
    pub fn emit_pool_error(&self, error: &DriverError) {
        self.pool_listeners.emit(error);
    }

    /// Simulates a failure of the `index`-th checked-out connection.
    pub fn emit_connection_error(&self, index: usize, error: &DriverError) {
        let listeners = self.state.connection_listeners.lock().get(index).cloned();
        if let Some(listeners) = listeners {
            listeners.emit(error);
        }
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RawQuery for MockDriver {
    async fn query(&self, query: &Query) -> Result<RawResult, DriverError> {
        self.state.run(None, query).await
    }
}

#[async_trait]
impl PgDriver for MockDriver {
    async fn connect(&self) -> Result<Box<dyn PgConnection>, DriverError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(DriverError::Io("Mock pool exhausted".to_string()));
        }
        let id = self.state.connect_count.fetch_add(1, Ordering::SeqCst);
        let listeners = Arc::new(ErrorListeners::new());
        self.state
            .connection_listeners
            .lock()
            .push(Arc::clone(&listeners));
        Ok(Box::new(MockConnection {
            id,
            state: Arc::clone(&self.state),
            listeners,
        }))
    }

    async fn end(&self) -> Result<(), DriverError> {
        self.state.end_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_error(&self, listener: ErrorListener) -> ListenerId {
        self.pool_listeners.add(listener)
    }

    fn remove_error_listener(&self, id: ListenerId) -> bool {
        self.pool_listeners.remove(id)
    }
}

/// A connection handed out by [`MockDriver::connect`].
pub struct MockConnection {
    id: u64,
    state: Arc<MockState>,
    listeners: Arc<ErrorListeners>,
}

#[async_trait]
impl PgConnection for MockConnection {
    async fn query(&mut self, query: &Query) -> Result<RawResult, DriverError> {
        self.state.run(Some(self.id), query).await
    }

    fn on_error(&mut self, listener: ErrorListener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_error_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    async fn release(self: Box<Self>) {
        self.state.release_count.fetch_add(1, Ordering::SeqCst);
    }

    fn discard(self: Box<Self>) {
        self.state.discard_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Mock SQL-over-HTTP client returning wire text.
pub struct MockHttpClient {
    config: MockConfig,
    results: Mutex<HashMap<String, HttpQueryResult>>,
    types: Mutex<HashMap<String, CatalogEntry>>,
    requests: Mutex<Vec<Query>>,
}

impl MockHttpClient {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            config,
            results: Mutex::new(HashMap::new()),
            types: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Scripts the wire result of a statement.
    #[must_use]
    pub fn with_result(self, sql: &str, result: HttpQueryResult) -> Self {
        self.results.lock().insert(sql.to_string(), result);
        self
    }

    /// Registers a custom type for the catalog lookup.
    #[must_use]
    pub fn with_type(self, oid: u32, name: &str) -> Self {
        self.types
            .lock()
            .insert(oid.to_string(), (name.to_string(), None));
        self
    }

    /// Registers an array of a custom type for the catalog lookup.
    #[must_use]
    pub fn with_array_type(self, oid: u32, name: &str, element: &str) -> Self {
        self.types
            .lock()
            .insert(oid.to_string(), (name.to_string(), Some(element.to_string())));
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<Query> {
        self.requests.lock().clone()
    }

    /// Wraps this client as a directly-callable function.
    pub fn into_callable(self: Arc<Self>) -> HttpQueryFn {
        Arc::new(move |query: Query| {
            let client = Arc::clone(&self);
            async move { client.query(&query).await }.boxed()
        })
    }

    fn catalog_row(&self, query: &Query) -> HttpQueryResult {
        let entry = query.args.first().and_then(|oid| {
            let key = match oid {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            self.types.lock().get(&key).cloned()
        });
        let rows: Vec<Vec<Option<String>>> = entry
            .map(|(name, element)| vec![vec![Some(name), element]])
            .unwrap_or_default();
        HttpQueryResult {
            fields: catalog_fields(),
            row_count: Some(rows.len() as u64),
            rows,
        }
    }
}

impl Default for MockHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpQueryClient for MockHttpClient {
    async fn query(&self, query: &Query) -> Result<HttpQueryResult, DriverError> {
        self.requests.lock().push(query.clone());

        if let Some(ms) = self.config.latency_ms {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if self.config.should_fail {
            return Err(self.config.error());
        }
        if query.sql == TYPE_NAME_QUERY {
            return Ok(self.catalog_row(query));
        }
        Ok(self
            .results
            .lock()
            .get(&query.sql)
            .cloned()
            .unwrap_or_default())
    }
}
