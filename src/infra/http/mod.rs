//! SQL-over-HTTP client for the stateless adapter.

pub mod client;

pub use client::{HttpClientConfig, SqlOverHttpClient};
