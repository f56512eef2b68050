//! Serve queries from a semantic cache in front of a query engine.
//!
//! [`SemanticCache`] decomposes each query, looks up a cached result for the same query over an
//! overlapping time window, asks the [`QueryEngine`] only for the parts of the window the cache
//! does not cover, and merges the fragments back into one result which is stored for the next
//! caller.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::codec::{Codec, CodecError, StringEncoding};
use crate::decompose::{DecomposeError, Decomposition, QueryContext, decompose};
use crate::key::{DEFAULT_MAX_KEY_LENGTH, KeyError, build_key, build_table_keys};
use crate::merge::{Fragment, MergeError, Tolerance, merge_fragments};
use crate::model::QueryResult;
use crate::time::Precision;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("query engine failed: {message}")]
    Query { message: String },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("cache miss")]
    CacheMiss,

    #[error("key of {len} bytes exceeds the maximum of {max}")]
    KeyTooLong { len: usize, max: usize },

    #[error("cache store failed: {0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Decompose(#[from] DecomposeError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("query is not cacheable: {query}")]
    NotCacheable { query: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Executes InfluxQL against a database.
///
/// Returned results must carry nanosecond epoch or RFC3339 timestamps.
#[async_trait]
pub trait QueryEngine: Debug + Send + Sync + 'static {
    async fn execute(
        &self,
        query: &str,
        database: &str,
        precision: Precision,
    ) -> Result<QueryResult, EngineError>;
}

/// What the store records next to a cached payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetadata {
    /// Inclusive start of the cached time window, in nanoseconds.
    pub start: i64,
    /// Inclusive end of the cached time window, in nanoseconds.
    pub end: i64,
    pub num_tables: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedValue {
    pub value: Bytes,
    pub metadata: CacheMetadata,
}

/// A key-value store holding encoded results with their time window.
#[async_trait]
pub trait CacheStore: Debug + Send + Sync + 'static {
    async fn set(
        &self,
        key: &str,
        value: Bytes,
        start: i64,
        end: i64,
        num_tables: usize,
    ) -> Result<(), StoreError>;

    /// Fetch the value under `key` if its window overlaps `[start, end]`, otherwise
    /// [`StoreError::CacheMiss`].
    async fn get(&self, key: &str, start: i64, end: i64) -> Result<CachedValue, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// A [`CacheStore`] held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<String, CachedValue>>,
    max_key_length: Option<usize>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject keys longer than `max` bytes.
    pub fn with_max_key_length(mut self, max: usize) -> Self {
        self.max_key_length = Some(max);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.entries.read().keys().cloned().collect();
        keys.sort_unstable();
        keys
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn set(
        &self,
        key: &str,
        value: Bytes,
        start: i64,
        end: i64,
        num_tables: usize,
    ) -> Result<(), StoreError> {
        if let Some(max) = self.max_key_length {
            if key.len() > max {
                return Err(StoreError::KeyTooLong {
                    len: key.len(),
                    max,
                });
            }
        }

        let metadata = CacheMetadata {
            start,
            end,
            num_tables,
        };
        self.entries
            .write()
            .insert(key.to_string(), CachedValue { value, metadata });
        Ok(())
    }

    async fn get(&self, key: &str, start: i64, end: i64) -> Result<CachedValue, StoreError> {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(v) if v.metadata.start <= end && start <= v.metadata.end => Ok(v.clone()),
            _ => Err(StoreError::CacheMiss),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// Settings of a [`SemanticCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// The database queries run against.
    pub database: String,
    /// Results whose windows are at most this far apart are merged.
    pub merge_precision: Precision,
    /// The longest key the store accepts.
    pub max_key_length: usize,
    pub string_encoding: StringEncoding,
    /// The epoch precision requested from the engine.
    pub query_precision: Precision,
}

impl CacheConfig {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Default::default()
        }
    }

    pub fn merge_tolerance(&self) -> Tolerance {
        self.merge_precision.into()
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            database: String::new(),
            merge_precision: Precision::Second,
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
            string_encoding: StringEncoding::default(),
            query_precision: Precision::Nanosecond,
        }
    }
}

/// A semantic cache in front of a [`QueryEngine`].
#[derive(Debug)]
pub struct SemanticCache<E, S> {
    engine: Arc<E>,
    store: Arc<S>,
    context: QueryContext,
    config: CacheConfig,
    codec: Codec,
    /// Semantic key of the latest stored result, by query signature.
    keys: RwLock<HashMap<String, String>>,
}

impl<E, S> SemanticCache<E, S>
where
    E: QueryEngine,
    S: CacheStore,
{
    pub fn new(engine: Arc<E>, store: Arc<S>, context: QueryContext, config: CacheConfig) -> Self {
        Self {
            codec: Codec::new(config.string_encoding),
            engine,
            store,
            context,
            config,
            keys: Default::default(),
        }
    }

    /// Build a cache whose catalog is loaded from the configured database.
    pub async fn connect(engine: Arc<E>, store: Arc<S>, config: CacheConfig) -> Result<Self> {
        let catalog = Catalog::fetch(engine.as_ref(), &config.database).await?;
        let context = QueryContext::new(Arc::new(catalog));
        Ok(Self::new(engine, store, context, config))
    }

    pub fn context(&self) -> &QueryContext {
        &self.context
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The key of the cached result for `query`, if one has been stored.
    pub fn cached_key(&self, query: &str) -> Option<String> {
        let decomposition = decompose(query, &self.context).ok()?;
        self.keys.read().get(&decomposition.signature()).cloned()
    }

    async fn execute(&self, query: &str) -> Result<QueryResult> {
        Ok(self
            .engine
            .execute(query, &self.config.database, self.config.query_precision)
            .await?)
    }

    /// Cache `result` as the answer to `query`.
    ///
    /// Results carrying an engine error are not stored.
    pub async fn store_result(&self, query: &str, result: &QueryResult) -> Result<()> {
        let decomposition = decompose(query, &self.context)?;
        let (true, Some((start, end))) = (
            decomposition.is_cacheable(),
            decomposition.time_range.bounds(),
        ) else {
            return Err(Error::NotCacheable {
                query: query.to_string(),
            });
        };
        if let Some(error) = &result.error {
            debug!(%error, "not caching failed query");
            return Ok(());
        }
        self.store(&decomposition, result, start, end).await
    }

    async fn store(
        &self,
        decomposition: &Decomposition,
        result: &QueryResult,
        start: i64,
        end: i64,
    ) -> Result<()> {
        let key = build_key(decomposition, result, &self.context)
            .render_checked(self.config.max_key_length)
            .inspect_err(|e| warn!(error = %e, "not caching result"))?;
        let payload = self
            .codec
            .encode(result, &build_table_keys(decomposition, result, &self.context))?;

        self.store
            .set(&key, payload, start, end, result.num_tables())
            .await?;
        debug!(%key, start, end, tables = result.num_tables(), "stored result");

        let previous = self
            .keys
            .write()
            .insert(decomposition.signature(), key.clone());
        if let Some(previous) = previous.filter(|p| *p != key) {
            self.forget(&previous).await;
        }
        Ok(())
    }

    async fn forget(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            warn!(%key, error = %e, "failed to delete cache entry");
        }
    }

    /// Fetch and decode the cached result for the query `signature`. Undecodable entries are
    /// deleted and, like store failures, reported as a miss.
    async fn lookup(
        &self,
        signature: &str,
        start: i64,
        end: i64,
    ) -> Option<(QueryResult, CacheMetadata)> {
        let key = self.keys.read().get(signature).cloned()?;

        let cached = match self.store.get(&key, start, end).await {
            Ok(cached) => cached,
            Err(StoreError::CacheMiss) => {
                debug!(%key, start, end, "cache miss");
                return None;
            }
            Err(e) => {
                warn!(%key, error = %e, "cache lookup failed");
                return None;
            }
        };

        match self.codec.decode(&cached.value) {
            Ok(result) => {
                debug!(%key, start = cached.metadata.start, end = cached.metadata.end, "cache hit");
                Some((result, cached.metadata))
            }
            Err(e) => {
                warn!(%key, error = %e, "dropping corrupted cache entry");
                self.keys.write().remove(signature);
                self.forget(&key).await;
                None
            }
        }
    }

    async fn execute_and_store(
        &self,
        decomposition: &Decomposition,
        query: &str,
        start: i64,
        end: i64,
    ) -> Result<QueryResult> {
        let result = self.execute(query).await?;
        if result.error.is_none() {
            if let Err(e) = self.store(decomposition, &result, start, end).await {
                warn!(error = %e, "failed to cache result");
            }
        }
        Ok(result)
    }

    /// Answer `query`, from the cache where possible.
    ///
    /// Queries that cannot be decomposed or cached are passed to the engine unchanged.
    pub async fn query(&self, query: &str) -> Result<QueryResult> {
        let decomposition = match decompose(query, &self.context) {
            Ok(d) => d,
            Err(e) => {
                debug!(error = %e, "bypassing cache");
                return self.execute(query).await;
            }
        };
        let (true, Some((start, end))) = (
            decomposition.is_cacheable(),
            decomposition.time_range.bounds(),
        ) else {
            debug!("bypassing cache for query that is not cacheable");
            return self.execute(query).await;
        };

        let signature = decomposition.signature();
        let Some((cached, metadata)) = self.lookup(&signature, start, end).await else {
            return self.execute_and_store(&decomposition, query, start, end).await;
        };
        let cached = cached.restrict_tags(&decomposition.group_by_tags);

        let mut remainders = Vec::with_capacity(2);
        if start < metadata.start {
            remainders.push((start, metadata.start - 1));
        }
        if end > metadata.end {
            remainders.push((metadata.end + 1, end));
        }
        if remainders.is_empty() {
            return Ok(cached.slice_time(start, end));
        }

        let mut fragments = vec![Fragment::new(metadata.start, metadata.end, cached)];
        for (from, to) in remainders {
            let fresh = self
                .execute(&decomposition.rewrite_time_range(from, to))
                .await?;
            if fresh.error.is_some() {
                debug!(from, to, "remainder query failed, running full query");
                return self.execute(query).await;
            }
            debug!(from, to, tables = fresh.num_tables(), "fetched remainder");
            fragments.push(Fragment::new(from, to, fresh));
        }

        let mut merged = merge_fragments(fragments, self.config.merge_tolerance());
        if merged.len() > 1 {
            debug!(
                fragments = merged.len(),
                "cached and fresh results do not merge, running full query"
            );
            return self.execute_and_store(&decomposition, query, start, end).await;
        }
        let merged = merged.pop().unwrap_or_default();

        let (union_start, union_end) = (start.min(metadata.start), end.max(metadata.end));
        if let Err(e) = self
            .store(&decomposition, &merged, union_start, union_end)
            .await
        {
            warn!(error = %e, "failed to cache merged result");
        }
        Ok(merged.slice_time(start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryCacheStore::new().with_max_key_length(8);
        assert!(store.is_empty());

        store
            .set("k", Bytes::from_static(b"v"), 10, 20, 1)
            .await
            .unwrap();
        assert_eq!(store.len(), 1);

        let v = store.get("k", 0, 10).await.unwrap();
        assert_eq!(v.value.as_ref(), b"v");
        assert_eq!(
            v.metadata,
            CacheMetadata {
                start: 10,
                end: 20,
                num_tables: 1
            }
        );
        assert!(store.get("k", 15, 100).await.is_ok());
        assert_eq!(store.get("k", 21, 30).await, Err(StoreError::CacheMiss));
        assert_eq!(store.get("k", 0, 9).await, Err(StoreError::CacheMiss));
        assert_eq!(store.get("other", 0, 30).await, Err(StoreError::CacheMiss));

        assert_matches!(
            store.set("too long key", Bytes::new(), 0, 0, 0).await,
            Err(StoreError::KeyTooLong { len: 12, max: 8 })
        );

        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_config_defaults() {
        let config = CacheConfig::new("noaa");
        assert_eq!(config.database, "noaa");
        assert_eq!(config.max_key_length, 450);
        assert_eq!(config.merge_tolerance().as_nanos(), 1_000_000_000);
        assert_eq!(config.string_encoding, StringEncoding::FixedWidth);
        assert_eq!(config.query_precision, Precision::Nanosecond);
    }
}
