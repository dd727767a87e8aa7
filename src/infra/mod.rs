//! Infrastructure layer implementations.

pub mod config;
pub mod database;
pub mod http;
pub mod observability;

pub use config::{AdapterConfig, ConnectionConfig, PoolConfig};
pub use database::{SqlxConnection, SqlxDriver};
pub use http::{HttpClientConfig, SqlOverHttpClient};
pub use observability::{init_metrics, init_tracing};
