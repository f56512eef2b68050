//! # A semantic cache for [InfluxQL] query results
//!
//! Queries are reduced to what they select rather than how they are written: the measurement,
//! fields and aggregation, tag and field predicates, the time window and the `GROUP BY`
//! dimensions. Results are cached under a [`SemanticKey`] derived from those parts and the
//! shape of the result, encoded with a compact binary [`Codec`], and merged with results of
//! neighbouring time windows so that a query over a wider window only asks the engine for the
//! part that is not cached.
//!
//! [InfluxQL]: https://docs.influxdata.com/influxdb/v1.8/query_language

pub mod cache;
pub mod catalog;
pub mod codec;
pub mod decompose;
pub mod key;
pub mod merge;
pub mod model;
pub mod parser;
pub mod time;

pub use cache::{
    CacheConfig, CacheMetadata, CacheStore, CachedValue, EngineError, Error, InMemoryCacheStore,
    QueryEngine, Result, SemanticCache, StoreError,
};
pub use catalog::Catalog;
pub use codec::{Codec, CodecError, StringEncoding};
pub use decompose::{DecomposeError, Decomposition, Predicate, QueryContext, decompose};
pub use key::{KeyError, SemanticKey, build_key, build_table_keys};
pub use merge::{Fragment, MergeError, Tolerance, merge_fragments, merge_result_tables, merge_results};
pub use model::{DataType, QueryResult, Table, Value};
pub use time::{Precision, TimeRange};
