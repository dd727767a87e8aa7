//! `pg-adapter`: runs one SQL statement through the adapter and prints the
//! normalized result as JSON.
//!
//! ```text
//! pg-adapter [--metrics] "<sql>" [arg...]
//! ```
//!
//! Arguments are bound positionally; each is parsed as JSON when possible
//! and passed as text otherwise. With `PG_HTTP_ENDPOINT` set the statement
//! goes over HTTP, otherwise through a connection pool.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use pg_driver_adapter::app::{HttpClient, HttpQueryable, PgAdapter, PgAdapterOptions};
use pg_driver_adapter::domain::{DriverAdapter, Query, SqlQueryable};
use pg_driver_adapter::infra::{
    AdapterConfig, SqlOverHttpClient, SqlxDriver, init_metrics, init_tracing,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let print_metrics = args.first().is_some_and(|arg| arg == "--metrics");
    if print_metrics {
        args.remove(0);
    }
    let Some((sql, params)) = args.split_first() else {
        bail!("usage: pg-adapter [--metrics] \"<sql>\" [arg...]");
    };

    let metrics = init_metrics().context("failed to install metrics recorder")?;
    let config = AdapterConfig::from_env().context("invalid configuration")?;
    let query = params.iter().fold(Query::new(sql.as_str()), |query, param| {
        let value = serde_json::from_str::<serde_json::Value>(param)
            .unwrap_or_else(|_| param.clone().into());
        query.bind(value)
    });

    let adapter: Box<dyn DriverAdapter> = match &config.http_endpoint {
        Some(endpoint) => {
            info!("Using SQL-over-HTTP");
            let client = SqlOverHttpClient::with_defaults(endpoint)?;
            let queryable = HttpQueryable::new(HttpClient::Method(Arc::new(client)));
            Box::new(match &config.connection.schema {
                Some(schema) => queryable.with_schema(schema.clone()),
                None => queryable,
            })
        }
        None => {
            let driver = SqlxDriver::connect(&config.connection, &config.pool).await?;
            let options = PgAdapterOptions::default();
            let options = match &config.connection.schema {
                Some(schema) => options.with_schema(schema.clone()),
                None => options,
            };
            Box::new(PgAdapter::new(Arc::new(driver), options))
        }
    };

    let result = adapter.query_raw(query).await;
    adapter.close().await?;

    println!("{}", serde_json::to_string_pretty(&result?)?);
    if print_metrics {
        eprintln!("{}", metrics.render());
    }
    Ok(())
}
