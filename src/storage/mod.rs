//! # Storage Sinks
//!
//! Pluggable destinations for benchmark records. Every command funnels its
//! results through a [`StorageClient`] obtained from a [`StorageRegistry`]:
//!
//! 1. The registry is built once at startup with [`StorageRegistry::with_default_sinks`].
//! 2. The requested kind is checked with [`StorageRegistry::validate_kind`]
//!    before any expensive work, so a bad `--storage` value fails fast.
//! 3. The client is created with [`StorageRegistry::new_client`], used for
//!    one or more [`StorageClient::dump`] calls and closed exactly once.
//!
//! ## Built-in sinks
//!
//! | Kind | Aliases | Destination |
//! |------|---------|-------------|
//! | `pushgateway` | `prom` | Prometheus push-gateway, summary metrics |
//! | `influxdb` | `timeseries-db` | InfluxDB 1.x HTTP write API |
//! | `file` | `stdout` | not implemented yet |
//!
//! Sinks are configured from environment variables, see each sink module.

use crate::record::{BenchmarkRecord, TagSet};
use async_trait::async_trait;
use std::collections::BTreeMap;

pub mod file;
pub mod influxdb;
pub mod pushgateway;

pub use file::FileClient;
pub use influxdb::{InfluxClient, InfluxConfig};
pub use pushgateway::{PushGatewayClient, PushGatewayConfig};

/// Metric key for seconds per operation
pub const PER_OP_SECONDS: &str = "per_op_seconds";
/// Metric key for bytes allocated per operation
pub const PER_OP_ALLOC_BYTES: &str = "per_op_alloc_bytes";
/// Metric key for allocations per operation
pub const PER_OP_ALLOCS: &str = "per_op_allocs";

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the registry and the sinks
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage kind {kind} is not supported (supported: {supported})")]
    UnsupportedStorageKind { kind: String, supported: String },

    #[error("cannot create {kind} storage client: {reason}")]
    ClientConstruction { kind: &'static str, reason: String },

    #[error("cannot dump batch points to {kind}: {source}")]
    Dump {
        kind: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("{0}: not implemented")]
    NotImplemented(&'static str),

    #[error("{0} storage client is closed")]
    Closed(&'static str),
}

impl StorageError {
    pub(crate) fn dump(kind: &'static str, source: impl Into<BoxError>) -> Self {
        StorageError::Dump {
            kind,
            source: source.into(),
        }
    }
}

/// A destination for benchmark records.
///
/// A client goes through `Created -> dump* -> closed`. `close` may be called
/// more than once; `dump` after `close` fails with [`StorageError::Closed`].
#[async_trait]
pub trait StorageClient: Send {
    /// Kind this client was registered under
    fn kind(&self) -> &'static str;

    /// Publish every record with `tags` plus a `name` tag holding the record
    /// name. If any record cannot be encoded nothing is sent.
    async fn dump(&mut self, tags: &TagSet, records: &[BenchmarkRecord]) -> Result<(), StorageError>;

    /// Release whatever the client holds.
    async fn close(&mut self) -> Result<(), StorageError>;
}

/// Snapshot of key/value configuration, normally the process environment.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            values: std::env::vars().collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Value for `key`; empty values count as unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Value for `key`, or a construction error naming the missing variable.
    pub fn require(&self, kind: &'static str, key: &str) -> Result<String, StorageError> {
        self.get(key)
            .map(str::to_string)
            .ok_or_else(|| StorageError::ClientConstruction {
                kind,
                reason: format!("required environment variable {} is not set", key),
            })
    }
}

/// Builds a storage client from configuration.
pub type Constructor = fn(&Settings) -> Result<Box<dyn StorageClient>, StorageError>;

/// Mapping from storage kind to client constructor.
#[derive(Clone, Default)]
pub struct StorageRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl StorageRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in sink and its aliases
    pub fn with_default_sinks() -> Self {
        let mut registry = Self::new();
        pushgateway::register(&mut registry);
        influxdb::register(&mut registry);
        file::register(&mut registry);
        registry
    }

    /// Register `constructor` under `kind`. A later registration of the same
    /// kind replaces the earlier one.
    pub fn register(&mut self, kind: impl Into<String>, constructor: Constructor) {
        self.constructors.insert(kind.into(), constructor);
    }

    /// Look up the constructor for `kind` without building anything.
    pub fn validate_kind(&self, kind: &str) -> Result<Constructor, StorageError> {
        self.constructors
            .get(kind)
            .copied()
            .ok_or_else(|| StorageError::UnsupportedStorageKind {
                kind: kind.to_string(),
                supported: self.kinds().join(", "),
            })
    }

    /// Validate `kind` and build a client for it.
    pub fn new_client(
        &self,
        kind: &str,
        settings: &Settings,
    ) -> Result<Box<dyn StorageClient>, StorageError> {
        let constructor = self.validate_kind(kind)?;
        constructor(settings)
    }

    /// Registered kinds in sorted order
    pub fn kinds(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for StorageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
