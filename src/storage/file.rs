//! Flat-file / stdout sink.
//!
//! Registered so the kind is accepted on the command line, but neither
//! operation is implemented yet: both fail with
//! [`StorageError::NotImplemented`].

use super::{Settings, StorageClient, StorageError, StorageRegistry};
use crate::record::{BenchmarkRecord, TagSet};
use async_trait::async_trait;

/// Kind the sink is registered under
pub const KIND: &str = "file";
/// Alias for writing to standard output
pub const ALIAS: &str = "stdout";

pub(crate) fn register(registry: &mut StorageRegistry) {
    registry.register(KIND, construct);
    registry.register(ALIAS, construct);
}

fn construct(_settings: &Settings) -> Result<Box<dyn StorageClient>, StorageError> {
    Ok(Box::new(FileClient::new()))
}

#[derive(Debug, Default)]
pub struct FileClient;

impl FileClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StorageClient for FileClient {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn dump(&mut self, _tags: &TagSet, _records: &[BenchmarkRecord]) -> Result<(), StorageError> {
        Err(StorageError::NotImplemented("file storage dump"))
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        Err(StorageError::NotImplemented("file storage close"))
    }
}
