//! # Benchmark Records
//!
//! Canonical representation of a single benchmark measurement and the
//! normalization that turns raw sample names into comparable identifiers.
//!
//! Raw names come in two shapes:
//!
//! - Go benchmark ids such as `BenchmarkGoDriver/transform/accumulator_factory-4`,
//!   where the path segments group sub-benchmarks and `-4` is the GOMAXPROCS
//!   suffix.
//! - Fixture file paths such as `/fixtures/bench_foo.py`, where the filter
//!   prefix and the extension carry no information.
//!
//! Both collapse to the same canonical form (`accumulator_factory`, `foo`) so
//! results taken at different pipeline levels line up in the metric sinks.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tags attached to every record of a batch.
///
/// A `BTreeMap` keeps keys unique and iterates them in lexicographic order,
/// which sinks with positional label arrays rely on.
pub type TagSet = BTreeMap<String, String>;

/// Tag added by every sink to identify the individual benchmark.
pub const NAME_TAG: &str = "name";
/// Tag carrying the language under test.
pub const LANGUAGE_TAG: &str = "language";
/// Tag carrying the commit id under test.
pub const COMMIT_TAG: &str = "commit";
/// Tag carrying the pipeline level, see [`Level`].
pub const LEVEL_TAG: &str = "level";

/// Layer of the parsing pipeline a benchmark was taken at
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Level {
    /// Full end-to-end requests through the parser daemon
    #[clap(name = "bblfshd")]
    Bblfshd,

    /// Requests against a containerized language driver
    #[clap(name = "driver")]
    Driver,

    /// Requests against the native driver process
    #[clap(name = "driver-native")]
    DriverNative,

    /// The transformation layer, replayed from Go benchmark logs
    #[clap(name = "transforms")]
    Transforms,
}

impl Level {
    /// Tag value used in metric sinks
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Bblfshd => "bblfshd",
            Level::Driver => "driver",
            Level::DriverNative => "driver-native",
            Level::Transforms => "transforms",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the mandatory `{language, commit, level}` tag set for a batch.
pub fn pipeline_tags(language: &str, commit: &str, level: Level) -> TagSet {
    let mut tags = TagSet::new();
    tags.insert(LANGUAGE_TAG.to_string(), language.to_string());
    tags.insert(COMMIT_TAG.to_string(), commit.to_string());
    tags.insert(LEVEL_TAG.to_string(), level.as_str().to_string());
    tags
}

/// A measurement as produced by the runner or read from a benchmark log,
/// before its name is cleaned.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub name: String,
    pub iterations: u64,
    pub ns_per_op: f64,
    pub alloc_bytes_per_op: u64,
    pub allocs_per_op: u64,
}

impl RawSample {
    /// Normalize this sample into a [`BenchmarkRecord`].
    pub fn into_record<S: AsRef<str>>(self, trim_prefixes: &[S]) -> BenchmarkRecord {
        normalize(
            &self.name,
            trim_prefixes,
            self.iterations,
            self.ns_per_op,
            self.alloc_bytes_per_op,
            self.allocs_per_op,
        )
    }
}

/// Canonical benchmark record handed to the storage sinks.
///
/// Fields are private; a record never changes after construction. Time is
/// kept in nanoseconds here and converted to seconds only by the sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    name: String,
    iterations: u64,
    ns_per_op: f64,
    alloc_bytes_per_op: u64,
    allocs_per_op: u64,
}

impl BenchmarkRecord {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of iterations the per-op figures were averaged over
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn ns_per_op(&self) -> f64 {
        self.ns_per_op
    }

    pub fn alloc_bytes_per_op(&self) -> u64 {
        self.alloc_bytes_per_op
    }

    pub fn allocs_per_op(&self) -> u64 {
        self.allocs_per_op
    }

    /// Time per operation in seconds, as reported to the sinks
    pub fn seconds_per_op(&self) -> f64 {
        self.ns_per_op / 1e9
    }
}

/// Build a [`BenchmarkRecord`] from raw measurement values.
///
/// The name goes through [`canonical_name`]; numeric values are kept as is.
pub fn normalize<S: AsRef<str>>(
    raw_name: &str,
    trim_prefixes: &[S],
    iterations: u64,
    ns_per_op: f64,
    alloc_bytes_per_op: u64,
    allocs_per_op: u64,
) -> BenchmarkRecord {
    BenchmarkRecord {
        name: canonical_name(raw_name, trim_prefixes),
        iterations,
        ns_per_op,
        alloc_bytes_per_op,
        allocs_per_op,
    }
}

/// Clean a raw benchmark name.
///
/// 1. Each trim prefix is stripped from the start, in order.
/// 2. Everything up to and including the last `/` is dropped.
/// 3. The rest is cut at the first `-` or `.`.
///
/// Example: `BenchmarkGoDriver/transform/accumulator_factory-4` becomes
/// `accumulator_factory`.
pub fn canonical_name<S: AsRef<str>>(raw_name: &str, trim_prefixes: &[S]) -> String {
    let mut name = raw_name;
    for prefix in trim_prefixes {
        name = name.strip_prefix(prefix.as_ref()).unwrap_or(name);
    }
    if let Some(i) = name.rfind('/') {
        name = &name[i + 1..];
    }
    if let Some(i) = name.find(['-', '.']) {
        name = &name[..i];
    }
    name.to_string()
}
