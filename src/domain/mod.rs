//! Domain layer containing core types, traits, and error definitions.

pub mod error;
pub mod listeners;
pub mod traits;
pub mod types;

pub use error::{AdapterError, ConfigError, DriverError, ErrorKind, PostgresError, RawServerError};
pub use listeners::{ErrorListener, ErrorListeners, ListenerId};
pub use traits::{DriverAdapter, PgConnection, PgDriver, RawQuery, SqlQueryable, Transaction};
pub use types::{
    ColumnType, ConnectionInfo, FieldDescription, IsolationLevel, Oid, PgType, Query, RawResult,
    ResultSet, ResultValue, SYSTEM_CATALOG_CEILING,
};
