//! # Benchmark Runner
//!
//! Times parse requests against a [`ParseEndpoint`] and turns each fixture
//! file into a [`BenchmarkRecord`].
//!
//! ## Measurement
//!
//! [`BenchmarkRunner::bench`] scales the iteration count the way Go's
//! `testing.Benchmark` does:
//!
//! 1. Run the request once.
//! 2. Predict how many iterations fill the configured bench time from the
//!    last run, add 20%, grow at most 100x and at least by one.
//! 3. Repeat until a run lasts at least the bench time or hits 1e9
//!    iterations.
//!
//! Time and allocation figures of the final run are divided by its
//! iteration count. Allocations are read from [`crate::alloc`] and stay zero
//! unless the binary installs the counting allocator.
//!
//! ## Fixture loop
//!
//! [`BenchmarkRunner::run_fixtures`] warms the endpoint up with the first
//! file, then benchmarks every file in order. The cancellation token is
//! checked before the warm-up and before each file; a request in flight is
//! never interrupted.

use crate::alloc::AllocSnapshot;
use crate::record::{BenchmarkRecord, RawSample};
use crate::storage::BoxError;
use crate::utils::{format_bytes, format_duration, format_ns_per_op};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Upper bound on iterations of a single measured run
pub const MAX_ITERATIONS: u64 = 1_000_000_000;

/// Something that parses source content, e.g. a driver process or a daemon.
#[async_trait]
pub trait ParseEndpoint: Send + Sync {
    /// Name used in log output
    fn name(&self) -> &str;

    /// Parse `content`, failing if the endpoint reports an error.
    async fn parse(&self, content: &[u8]) -> Result<()>;
}

/// Runs a native driver executable once per request, feeding the content
/// on stdin. A non-zero exit status is a parse failure.
#[derive(Debug, Clone)]
pub struct CommandEndpoint {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandEndpoint {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl ParseEndpoint for CommandEndpoint {
    fn name(&self) -> &str {
        self.program.to_str().unwrap_or("driver")
    }

    async fn parse(&self, content: &[u8]) -> Result<()> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("cannot start driver {}", self.program.display()))?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(content).await {
                // The driver may exit without reading everything; its exit
                // status decides the outcome.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                other => other?,
            }
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            bail!(
                "driver {} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// Errors of the fixture loop
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("no files detected")]
    NoFiles,

    #[error("warmup for file {file} has failed: {source}")]
    WarmUp {
        file: String,
        #[source]
        source: BoxError,
    },

    #[error("cannot perform benchmark over the file {file}: {source}")]
    Benchmark {
        file: String,
        #[source]
        source: BoxError,
    },

    #[error("benchmark run was cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Minimum duration of the measured run per fixture
    pub bench_time: Duration,
    /// Prefixes stripped from fixture file names, usually the filter prefix
    pub trim_prefixes: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            bench_time: crate::defaults::BENCH_TIME,
            trim_prefixes: vec![crate::defaults::FILE_FILTER_PREFIX.to_string()],
        }
    }
}

pub struct BenchmarkRunner {
    config: RunnerConfig,
}

impl BenchmarkRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Time a single request.
    pub async fn warm_up<E: ParseEndpoint + ?Sized>(&self, endpoint: &E, content: &[u8]) -> Result<Duration> {
        let start = Instant::now();
        endpoint.parse(content).await?;
        Ok(start.elapsed())
    }

    /// Measure `content` against `endpoint` and report the result as a raw
    /// sample called `name`.
    pub async fn bench<E: ParseEndpoint + ?Sized>(
        &self,
        endpoint: &E,
        name: &str,
        content: &[u8],
    ) -> Result<RawSample> {
        let goal = self.config.bench_time;

        let mut n = 1;
        let (mut elapsed, mut allocs) = run_n(endpoint, content, n).await?;
        while elapsed < goal && n < MAX_ITERATIONS {
            n = predict_iterations(goal, n, elapsed);
            debug!("running {} iterations of {}", n, name);
            (elapsed, allocs) = run_n(endpoint, content, n).await?;
        }

        Ok(RawSample {
            name: name.to_string(),
            iterations: n,
            ns_per_op: elapsed.as_nanos() as f64 / n as f64,
            alloc_bytes_per_op: allocs.bytes / n,
            allocs_per_op: allocs.count / n,
        })
    }

    /// Warm up with the first file, then benchmark every file in order.
    pub async fn run_fixtures<E: ParseEndpoint + ?Sized>(
        &self,
        endpoint: &E,
        files: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Result<Vec<BenchmarkRecord>, RunnerError> {
        let warm_up_file = files.first().ok_or(RunnerError::NoFiles)?;
        if cancel.is_cancelled() {
            return Err(RunnerError::Cancelled);
        }

        info!(
            "warming up {} using file {}",
            endpoint.name(),
            warm_up_file.display()
        );
        let warm_up_time = async {
            let content = read_fixture(warm_up_file).await?;
            self.warm_up(endpoint, &content).await
        }
        .await
        .map_err(|e| RunnerError::WarmUp {
            file: warm_up_file.display().to_string(),
            source: e.into(),
        })?;
        debug!(
            "warm up done for file {} in {}",
            warm_up_file.display(),
            format_duration(warm_up_time)
        );

        let mut records = Vec::with_capacity(files.len());
        for file in files {
            if cancel.is_cancelled() {
                return Err(RunnerError::Cancelled);
            }

            info!("benching file: {}", file.display());
            let sample = async {
                let content = read_fixture(file).await?;
                self.bench(endpoint, &fixture_name(file), &content).await
            }
            .await
            .map_err(|e| RunnerError::Benchmark {
                file: file.display().to_string(),
                source: e.into(),
            })?;

            let record = sample.into_record(&self.config.trim_prefixes);
            info!(
                "{}: {} iterations, {}/op, {}/op, {} allocs/op",
                record.name(),
                record.iterations(),
                format_ns_per_op(record.ns_per_op()),
                format_bytes(record.alloc_bytes_per_op()),
                record.allocs_per_op()
            );
            records.push(record);
        }

        Ok(records)
    }
}

/// Next iteration count given the previous run of `last` iterations.
pub fn predict_iterations(goal: Duration, last: u64, last_elapsed: Duration) -> u64 {
    let goal_ns = goal.as_nanos();
    let prev_ns = last_elapsed.as_nanos().max(1);

    let mut n = goal_ns * last as u128 / prev_ns;
    n += n / 5;
    n = n.min(100 * last as u128);
    n = n.max(last as u128 + 1);
    n.min(MAX_ITERATIONS as u128) as u64
}

async fn run_n<E: ParseEndpoint + ?Sized>(
    endpoint: &E,
    content: &[u8],
    n: u64,
) -> Result<(Duration, AllocSnapshot)> {
    let before = AllocSnapshot::now();
    let start = Instant::now();
    for _ in 0..n {
        endpoint.parse(content).await?;
    }
    let elapsed = start.elapsed();
    Ok((elapsed, before.delta(&AllocSnapshot::now())))
}

async fn read_fixture(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("cannot read fixture {}", path.display()))
}

fn fixture_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
