//! Domain traits defining contracts for callers and underlying clients.

use async_trait::async_trait;

use super::error::{AdapterError, DriverError};
use super::listeners::{ErrorListener, ListenerId};
use super::types::{ConnectionInfo, IsolationLevel, Query, RawResult, ResultSet};

/// The uniform query contract exposed to callers.
#[async_trait]
pub trait SqlQueryable: Send + Sync {
    fn provider(&self) -> &'static str {
        "postgres"
    }

    fn adapter_name(&self) -> &'static str;

    /// Execute a query, returning its rows with one logical type per column.
    async fn query_raw(&self, query: Query) -> Result<ResultSet, AdapterError>;

    /// Execute a statement, returning the number of affected rows.
    async fn execute_raw(&self, query: Query) -> Result<u64, AdapterError>;
}

/// A transaction bound to one checked-out connection.
///
/// `commit` and `rollback` send `COMMIT` and `ROLLBACK` themselves, so
/// callers must not issue those statements through `execute_raw` as well.
/// Both consume the handle: the connection is released and its error
/// listener detached exactly once, even when the statement fails.
#[async_trait]
pub trait Transaction: SqlQueryable {
    async fn commit(self: Box<Self>) -> Result<(), AdapterError>;

    async fn rollback(self: Box<Self>) -> Result<(), AdapterError>;
}

/// The long-lived object a caller holds.
#[async_trait]
pub trait DriverAdapter: SqlQueryable {
    async fn start_transaction(
        &self,
        isolation_level: Option<IsolationLevel>,
    ) -> Result<Box<dyn Transaction>, AdapterError>;

    /// Run a `;`-separated script statement by statement.
    async fn execute_script(&self, script: &str) -> Result<(), AdapterError>;

    fn connection_info(&self) -> ConnectionInfo;

    /// Release the underlying resources. Idempotent.
    async fn close(&self) -> Result<(), AdapterError>;
}

/// Raw statement execution against an underlying client.
#[async_trait]
pub trait RawQuery: Send + Sync {
    async fn query(&self, query: &Query) -> Result<RawResult, DriverError>;
}

/// A connection pool provided by a wire-protocol client library.
#[async_trait]
pub trait PgDriver: RawQuery {
    /// Check out one connection for exclusive use.
    async fn connect(&self) -> Result<Box<dyn PgConnection>, DriverError>;

    /// Close every pooled connection.
    async fn end(&self) -> Result<(), DriverError>;

    /// Attach a listener for failures of idle pooled connections.
    fn on_error(&self, listener: ErrorListener) -> ListenerId;

    fn remove_error_listener(&self, id: ListenerId) -> bool;
}

/// A connection checked out of a [`PgDriver`].
#[async_trait]
pub trait PgConnection: Send + Sync {
    async fn query(&mut self, query: &Query) -> Result<RawResult, DriverError>;

    /// Attach a listener for failures of this connection.
    fn on_error(&mut self, listener: ErrorListener) -> ListenerId;

    fn remove_error_listener(&mut self, id: ListenerId) -> bool;

    /// Return the connection to its pool.
    async fn release(self: Box<Self>);

    /// Drop the connection without returning it to the pool.
    fn discard(self: Box<Self>);
}
