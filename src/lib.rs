//! Postgres driver adapter
//!
//! Sits between a query engine and a Postgres client library: runs raw SQL
//! through a pooled socket client or a SQL-over-HTTP client, maps every
//! result column's type OID to a logical column type, and normalizes the
//! wire text of each cell into a typed value.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               Application Layer              │
//! │  PgAdapter, HttpQueryable, QueryExecutor,    │
//! │  type resolver, column typing, normalizers   │
//! ├─────────────────────────────────────────────┤
//! │                 Domain Layer                 │
//! │   Traits, types, errors (no dependencies)    │
//! ├─────────────────────────────────────────────┤
//! │             Infrastructure Layer             │
//! │  sqlx pool, reqwest HTTP client, config,     │
//! │  tracing and metrics setup                   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Underlying clients plug in through the [`domain::RawQuery`],
//! [`domain::PgDriver`] and [`domain::PgConnection`] traits, so the
//! adapters are tested against the scripted mocks in `test_utils`.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pg_driver_adapter::app::{PgAdapter, PgAdapterOptions};
//! use pg_driver_adapter::domain::{DriverAdapter, Query, SqlQueryable};
//! use pg_driver_adapter::infra::{AdapterConfig, SqlxDriver};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AdapterConfig::from_env()?;
//!     let driver = Arc::new(SqlxDriver::connect(&config.connection, &config.pool).await?);
//!     let adapter = PgAdapter::new(driver, PgAdapterOptions::default());
//!
//!     let rows = adapter
//!         .query_raw(Query::new("SELECT id, tags FROM posts WHERE id = $1").bind(1))
//!         .await?;
//!     println!("{}", serde_json::to_string(&rows)?);
//!
//!     adapter.close().await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod domain;
pub mod infra;

// Test utilities are available in tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
