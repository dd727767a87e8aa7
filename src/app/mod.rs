//! Application layer: type resolution, normalization and the adapters.

pub mod adapter;
pub mod column_type;
pub mod executor;
pub mod http;
pub mod normalize;
pub mod oid;
pub mod resolver;

pub use adapter::{PgAdapter, PgAdapterOptions, PgTransaction, UserDefinedTypeParser};
pub use column_type::map_to_column_type;
pub use executor::{QueryExecutor, classify};
pub use http::{HttpClient, HttpQueryClient, HttpQueryFn, HttpQueryResult, HttpQueryable};
pub use normalize::{NormalizeError, Normalizer, ScalarNormalizer, TypeNormalizerRegistry};
pub use resolver::{PgTypeResolver, TYPE_NAME_QUERY};
