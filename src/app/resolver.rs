//! Runtime resolution of custom type OIDs through the system catalog.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use metrics::counter;
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::domain::{
    ColumnType, ErrorKind, Oid, PgType, Query, RawQuery, ResultValue, SYSTEM_CATALOG_CEILING,
};

/// Catalog lookup issued for every OID above [`SYSTEM_CATALOG_CEILING`].
///
/// Returns the type name and, for array types, the element type name.
pub const TYPE_NAME_QUERY: &str = "SELECT t.typname, e.typname AS elemname \
     FROM pg_catalog.pg_type t \
     LEFT JOIN pg_catalog.pg_type e ON t.typcategory = 'A' AND e.oid = t.typelem \
     WHERE t.oid = $1::oid";

type Lookup = Shared<BoxFuture<'static, Result<PgType, ErrorKind>>>;

/// Resolves type OIDs, caching catalog lookups per OID.
///
/// The cache stores the in-flight lookup itself, inserted before the first
/// await, so concurrent callers asking for the same unseen OID share a
/// single catalog query. Failed lookups are evicted so the next call retries.
pub struct PgTypeResolver {
    catalog: Arc<dyn RawQuery>,
    cache: Mutex<HashMap<Oid, Lookup>>,
}

impl PgTypeResolver {
    pub fn new(catalog: Arc<dyn RawQuery>) -> Self {
        Self {
            catalog,
            cache: Mutex::new(HashMap::new()),
        }
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn resolve(&self, oid: Oid) -> Result<PgType, ErrorKind> {
        if oid <= SYSTEM_CATALOG_CEILING {
            return Ok(PgType::builtin(oid));
        }

        let lookup = {
            let mut cache = self.cache.lock();
            cache
                .entry(oid)
                .or_insert_with(|| {
                    counter!("pg_adapter_type_cache_misses_total").increment(1);
                    lookup_type_name(Arc::clone(&self.catalog), oid)
                        .boxed()
                        .shared()
                })
                .clone()
        };

        let result = lookup.clone().await;
        if result.is_err() {
            let mut cache = self.cache.lock();
            // a retry may already have replaced the failed entry
            if cache.get(&oid).is_some_and(|current| current.ptr_eq(&lookup)) {
                cache.remove(&oid);
            }
        }
        result
    }

    /// Number of OIDs with a cached or in-flight lookup.
    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }
}

impl std::fmt::Debug for PgTypeResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTypeResolver")
            .field("cached", &self.cached())
            .finish()
    }
}

async fn lookup_type_name(catalog: Arc<dyn RawQuery>, oid: Oid) -> Result<PgType, ErrorKind> {
    let query = Query::new(TYPE_NAME_QUERY).bind_typed(i64::from(oid), ColumnType::Int64);
    let result = catalog.query(&query).await.map_err(|err| {
        warn!(oid, error = %err, "type catalog lookup failed");
        ErrorKind::InvalidTypeId { oid }
    })?;

    let Some(row) = result.rows.first() else {
        return Err(ErrorKind::InvalidTypeId { oid });
    };
    match (row.first(), row.get(1)) {
        (Some(ResultValue::Text(name)), Some(ResultValue::Text(element))) => {
            debug!(oid, name = %name, element = %element, "resolved custom array type");
            Ok(PgType::array_of(oid, name.clone(), element.clone()))
        }
        (Some(ResultValue::Text(name)), _) => {
            debug!(oid, name = %name, "resolved custom type");
            Ok(PgType::named(oid, name.clone()))
        }
        _ => Err(ErrorKind::InvalidTypeId { oid }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::mocks::{MockConfig, MockDriver};

    #[tokio::test]
    async fn test_builtin_oids_need_no_io() {
        let driver = Arc::new(MockDriver::new());
        let resolver = PgTypeResolver::new(driver.clone());

        let resolved = resolver.resolve(23).await.unwrap();
        assert_eq!(resolved, PgType::builtin(23));
        assert_eq!(resolver.resolve(SYSTEM_CATALOG_CEILING).await.unwrap().name, None);
        assert_eq!(driver.query_count(), 0);
    }

    #[tokio::test]
    async fn test_custom_oid_is_looked_up_once() {
        let driver = Arc::new(MockDriver::new().with_type(16_385, "mood"));
        let resolver = PgTypeResolver::new(driver.clone());

        assert_eq!(resolver.resolve(16_385).await.unwrap(), PgType::named(16_385, "mood"));
        assert_eq!(resolver.resolve(16_385).await.unwrap(), PgType::named(16_385, "mood"));
        assert_eq!(driver.query_count(), 1);
        assert_eq!(driver.statements(), vec![TYPE_NAME_QUERY.to_string()]);
    }

    #[tokio::test]
    async fn test_custom_array_carries_its_element_name() {
        let driver = Arc::new(MockDriver::new().with_array_type(16_386, "_mood", "mood"));
        let resolver = PgTypeResolver::new(driver.clone());

        assert_eq!(
            resolver.resolve(16_386).await.unwrap(),
            PgType::array_of(16_386, "_mood", "mood")
        );
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_one_query() {
        let driver = Arc::new(
            MockDriver::with_config(MockConfig::success().with_latency(20))
                .with_type(16_390, "mood"),
        );
        let resolver = PgTypeResolver::new(driver.clone());

        let (first, second) = tokio::join!(resolver.resolve(16_390), resolver.resolve(16_390));
        assert_eq!(first.unwrap(), PgType::named(16_390, "mood"));
        assert_eq!(second.unwrap(), PgType::named(16_390, "mood"));
        assert_eq!(driver.query_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_oid_is_evicted_and_retried() {
        let driver = Arc::new(MockDriver::new());
        let resolver = PgTypeResolver::new(driver.clone());

        let err = resolver.resolve(20_000).await.unwrap_err();
        assert_eq!(err, ErrorKind::InvalidTypeId { oid: 20_000 });
        assert_eq!(resolver.cached(), 0);

        assert!(resolver.resolve(20_000).await.is_err());
        assert_eq!(driver.query_count(), 2);
    }

    #[tokio::test]
    async fn test_io_failure_is_evicted_and_retried() {
        let driver = Arc::new(MockDriver::failing("connection reset"));
        let resolver = PgTypeResolver::new(driver.clone());

        let err = resolver.resolve(16_400).await.unwrap_err();
        assert_eq!(err, ErrorKind::InvalidTypeId { oid: 16_400 });
        assert_eq!(resolver.cached(), 0);

        driver.set_failing(false);
        driver.add_type(16_400, "citext");
        assert_eq!(resolver.resolve(16_400).await.unwrap(), PgType::named(16_400, "citext"));
        assert_eq!(driver.query_count(), 2);
        assert_eq!(resolver.cached(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_failure_reaches_every_waiter() {
        let driver = Arc::new(MockDriver::with_config(
            MockConfig::failure("boom").with_latency(20),
        ));
        let resolver = PgTypeResolver::new(driver.clone());

        let (first, second) = tokio::join!(resolver.resolve(16_500), resolver.resolve(16_500));
        assert!(first.is_err());
        assert!(second.is_err());
        assert_eq!(driver.query_count(), 1);
        assert_eq!(resolver.cached(), 0);
    }
}
