//! Building blocks for [`clap`]-driven semantic cache configs.
//!
//! They can easily be re-used using `#[clap(flatten)]`.

use influxql_semantic_cache::{CacheConfig, Precision, StringEncoding};

/// How strings are laid out in cached payloads.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StringEncodingArg {
    /// Zero-padded to 25 bytes; longer strings are truncated.
    #[default]
    Fixed,

    /// Prefixed with their length.
    LengthPrefixed,
}

impl From<StringEncodingArg> for StringEncoding {
    fn from(arg: StringEncodingArg) -> Self {
        match arg {
            StringEncodingArg::Fixed => Self::FixedWidth,
            StringEncodingArg::LengthPrefixed => Self::LengthPrefixed,
        }
    }
}

/// CLI config for the semantic cache.
#[derive(Debug, Clone, clap::Parser)]
pub struct SemanticCacheConfig {
    /// The database queries are executed against.
    #[clap(long = "semcache-database", env = "INFLUXDB_SEMCACHE_DATABASE", action)]
    pub database: String,

    /// Results whose time windows are at most one unit of this precision apart are merged.
    ///
    /// One of `ns`, `us`, `ms`, `s`, `m` or `h`.
    #[clap(
        long = "semcache-merge-precision",
        env = "INFLUXDB_SEMCACHE_MERGE_PRECISION",
        default_value = "s",
        action
    )]
    pub merge_precision: Precision,

    /// The longest key, in bytes, the cache store accepts.
    #[clap(
        long = "semcache-max-key-length",
        env = "INFLUXDB_SEMCACHE_MAX_KEY_LENGTH",
        default_value = "450",
        action
    )]
    pub max_key_length: usize,

    /// Layout of string values in cached payloads.
    #[clap(
        long = "semcache-string-encoding",
        env = "INFLUXDB_SEMCACHE_STRING_ENCODING",
        default_value_t = StringEncodingArg::default(),
        value_enum,
        action
    )]
    pub string_encoding: StringEncodingArg,

    /// Epoch precision of the timestamps requested from the query engine.
    #[clap(
        long = "semcache-query-precision",
        env = "INFLUXDB_SEMCACHE_QUERY_PRECISION",
        default_value = "ns",
        action
    )]
    pub query_precision: Precision,
}

impl SemanticCacheConfig {
    /// Build the [`CacheConfig`] of the semantic cache.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            database: self.database.clone(),
            merge_precision: self.merge_precision,
            max_key_length: self.max_key_length,
            string_encoding: self.string_encoding.into(),
            query_precision: self.query_precision,
        }
    }
}

impl From<SemanticCacheConfig> for CacheConfig {
    fn from(config: SemanticCacheConfig) -> Self {
        config.cache_config()
    }
}
