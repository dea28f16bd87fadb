//! # Parser Performance Suite Library
//!
//! Tools for measuring how fast language parsers turn source files into
//! syntax trees, and for shipping the measurements to a metrics backend.
//!
//! ## Pipeline Levels
//!
//! Measurements are taken at one of several levels of the parsing pipeline
//! and tagged accordingly:
//!
//! - **bblfshd**: end-to-end requests against the parsing daemon
//! - **driver**: requests against a language driver container
//! - **driver-native**: the native parser executable alone
//! - **transforms**: Go benchmarks of the tree transformations
//!
//! ## Architecture Overview
//!
//! - `benchfmt`: reads `go test -bench` output into raw samples
//! - `runner`: times parse requests and scales iteration counts
//! - `record`: normalizes raw samples into named benchmark records
//! - `storage`: registry of metric sinks (InfluxDB, Prometheus push-gateway)
//! - `commands`: the subcommands of the `parser-perf` binary
//! - `utils`: fixture discovery and formatting helpers
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use parser_perf::record::{pipeline_tags, Level};
//! use parser_perf::storage::{Settings, StorageRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let log = "BenchmarkParse/bench_ifelse.go-8  1000  1500000 ns/op  2048 B/op  12 allocs/op\n";
//!     let records: Vec<_> = parser_perf::benchfmt::parse_set(log.as_bytes())?
//!         .into_iter()
//!         .map(|sample| sample.into_record(&["BenchmarkParse", "bench_"]))
//!         .collect();
//!
//!     let registry = StorageRegistry::with_default_sinks();
//!     let mut client = registry.new_client("influxdb", &Settings::from_env())?;
//!     client
//!         .dump(&pipeline_tags("go", "3d9682b", Level::Transforms), &records)
//!         .await?;
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

/// Allocation counters fed by an optional global allocator
pub mod alloc;

/// Go benchmark output parsing
pub mod benchfmt;

/// Command-line interface definitions
///
/// Clap derive structures for the `parser-perf` binary, including
/// human-readable duration parsing for `--bench-time`.
pub mod cli;

/// Subcommand implementations
///
/// Each command validates the storage kind before doing any expensive work
/// and always closes the storage client it opened.
pub mod commands;

pub mod logging;

/// Benchmark records, name normalization and tags
pub mod record;

/// Timing of parse requests against drivers
///
/// Implements Go-style iteration scaling so results are comparable with
/// the `transforms` level measured by `go test -bench`.
pub mod runner;

/// Metric sinks and the registry that builds them
pub mod storage;

pub mod utils;

pub use cli::Args;
pub use record::{BenchmarkRecord, Level, RawSample, TagSet};
pub use runner::{BenchmarkRunner, CommandEndpoint, ParseEndpoint, RunnerConfig, RunnerError};
pub use storage::{Settings, StorageClient, StorageError, StorageRegistry};

/// The current version of the parser performance suite
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Fixture files to benchmark start with this prefix
    ///
    /// The prefix is also trimmed from benchmark names, so
    /// `bench_ifelse.go` is reported as `ifelse`.
    pub const FILE_FILTER_PREFIX: &str = "bench_";

    /// Fixture companions that are not source files
    pub const EXCLUDE_SUFFIXES: [&str; 3] = [".legacy", ".native", ".uast"];

    /// Minimum measured time per fixture, as `go test -benchtime`
    pub const BENCH_TIME: Duration = Duration::from_secs(1);

    /// Storage kind used when `--storage` is not given
    pub const STORAGE: &str = "pushgateway";

    pub fn exclude_suffixes() -> Vec<String> {
        EXCLUDE_SUFFIXES.iter().map(|s| s.to_string()).collect()
    }
}
