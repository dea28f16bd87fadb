//! # Subcommands
//!
//! Every command follows the same shape:
//!
//! 1. Check that the requested storage kind is registered, so a typo fails
//!    before any benchmark runs.
//! 2. Produce records (parse logs, run the driver, or read a results file).
//! 3. Open one storage client, dump the records tagged with language,
//!    commit and pipeline level, and close the client. The client is closed
//!    even when a dump fails; the dump error wins over a close error.
//!
//! Storage clients read their settings from the environment snapshot passed
//! in by `main`, see [`Settings::from_env`].

use crate::benchfmt;
use crate::cli::{Command, DriverNativeArgs, ParseAndStoreArgs, StorageArgs, StoreResultsArgs};
use crate::record::{pipeline_tags, BenchmarkRecord, Level, TagSet};
use crate::runner::{BenchmarkRunner, CommandEndpoint, RunnerConfig, RunnerError};
use crate::storage::{Settings, StorageClient, StorageRegistry};
use crate::utils::get_files;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared state handed to every command
pub struct CommandContext<'a> {
    pub registry: &'a StorageRegistry,
    pub settings: &'a Settings,
    pub cancel: CancellationToken,
}

/// Dispatch a parsed subcommand.
pub async fn run(command: Command, ctx: &CommandContext<'_>) -> Result<()> {
    match command {
        Command::ParseAndStore(args) => parse_and_store(&args, ctx).await,
        Command::DriverNative(args) => driver_native(&args, ctx).await,
        Command::StoreResults(args) => store_results(&args, ctx).await,
    }
}

/// Parse `go test -bench` logs and store them with level `transforms`.
///
/// Each log file is dumped as its own batch, so a failing file leaves the
/// batches of earlier files stored.
pub async fn parse_and_store(args: &ParseAndStoreArgs, ctx: &CommandContext<'_>) -> Result<()> {
    ctx.registry.validate_kind(&args.storage.storage)?;

    let tags = tags_for(&args.storage, Level::Transforms);
    let mut client = ctx.registry.new_client(&args.storage.storage, ctx.settings)?;

    let result = dump_logs(client.as_mut(), &tags, &args.files).await;
    finish(client, result).await
}

async fn dump_logs(client: &mut dyn StorageClient, tags: &TagSet, files: &[PathBuf]) -> Result<()> {
    for path in files {
        let records = read_benchmark_log(path)?;
        if records.is_empty() {
            warn!("no benchmark results found in {}", path.display());
        }
        client
            .dump(tags, &records)
            .await
            .with_context(|| format!("cannot store results of {}", path.display()))?;
        info!(
            "stored {} benchmark(s) from {} to {}",
            records.len(),
            path.display(),
            client.kind()
        );
    }
    Ok(())
}

/// Read a Go benchmark log into normalized records.
pub fn read_benchmark_log(path: &Path) -> Result<Vec<BenchmarkRecord>> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let samples = benchfmt::parse_set(BufReader::new(file))
        .with_context(|| format!("cannot read benchmark log {}", path.display()))?;
    Ok(samples
        .into_iter()
        .map(|sample| sample.into_record(&[] as &[&str]))
        .collect())
}

/// Benchmark a native driver over fixture directories and store the results
/// with level `driver-native`.
pub async fn driver_native(args: &DriverNativeArgs, ctx: &CommandContext<'_>) -> Result<()> {
    ctx.registry.validate_kind(&args.storage.storage)?;

    let files = get_files(&args.filter_prefix, &args.exclude_suffixes, &args.dirs)
        .context("cannot get files")?;
    debug!("found {} fixture file(s)", files.len());

    let endpoint = CommandEndpoint::new(&args.driver, args.driver_args.clone());
    let runner = BenchmarkRunner::new(RunnerConfig {
        bench_time: args.bench_time,
        trim_prefixes: vec![args.filter_prefix.clone()],
    });
    let records = runner.run_fixtures(&endpoint, &files, &ctx.cancel).await?;

    if let Some(path) = &args.results {
        write_results(path, &records)?;
        info!("results written to {}", path.display());
    }
    if ctx.cancel.is_cancelled() {
        return Err(RunnerError::Cancelled.into());
    }

    store(ctx, &args.storage, Level::DriverNative, &records).await
}

/// Store records from a JSON results file.
pub async fn store_results(args: &StoreResultsArgs, ctx: &CommandContext<'_>) -> Result<()> {
    ctx.registry.validate_kind(&args.storage.storage)?;

    let records = read_results(&args.file)?;
    store(ctx, &args.storage, args.level, &records).await
}

async fn store(
    ctx: &CommandContext<'_>,
    storage: &StorageArgs,
    level: Level,
    records: &[BenchmarkRecord],
) -> Result<()> {
    let tags = tags_for(storage, level);
    let mut client = ctx.registry.new_client(&storage.storage, ctx.settings)?;

    let result = client.dump(&tags, records).await.map_err(anyhow::Error::from);
    if result.is_ok() {
        info!(
            "stored {} benchmark(s) to {} with level {}",
            records.len(),
            client.kind(),
            level
        );
    }
    finish(client, result).await
}

/// Close `client` and combine the outcome with the result of its work.
async fn finish(mut client: Box<dyn StorageClient>, result: Result<()>) -> Result<()> {
    let closed = client.close().await;
    result?;
    closed?;
    Ok(())
}

fn tags_for(storage: &StorageArgs, level: Level) -> TagSet {
    pipeline_tags(&storage.language, &storage.commit, level)
}

/// Write records as a JSON array.
pub fn write_results(path: &Path, records: &[BenchmarkRecord]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("cannot create results file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, records)
        .with_context(|| format!("failed to marshal results to {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("cannot write results file {}", path.display()))
}

/// Read records written by [`write_results`].
pub fn read_results(path: &Path) -> Result<Vec<BenchmarkRecord>> {
    let file = File::open(path)
        .with_context(|| format!("cannot open results file {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("cannot decode results file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::normalize;
    use crate::storage::StorageError;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorded {
        batches: Vec<(TagSet, Vec<BenchmarkRecord>)>,
        closes: usize,
    }

    struct RecordingClient {
        log: Arc<Mutex<Recorded>>,
        fail_dump: bool,
    }

    #[async_trait]
    impl StorageClient for RecordingClient {
        fn kind(&self) -> &'static str {
            "memory"
        }

        async fn dump(&mut self, tags: &TagSet, records: &[BenchmarkRecord]) -> Result<(), StorageError> {
            if self.fail_dump {
                return Err(StorageError::dump("memory", "backend unavailable"));
            }
            self.log
                .lock()
                .unwrap()
                .batches
                .push((tags.clone(), records.to_vec()));
            Ok(())
        }

        async fn close(&mut self) -> Result<(), StorageError> {
            self.log.lock().unwrap().closes += 1;
            Ok(())
        }
    }

    // Constructors are plain fn pointers, so tests share state through a
    // settings key naming a slot in this table.
    static SLOTS: Mutex<Vec<Arc<Mutex<Recorded>>>> = Mutex::new(Vec::new());

    fn memory_client(settings: &Settings) -> Result<Box<dyn StorageClient>, StorageError> {
        let slot: usize = settings
            .require("memory", "MEMORY_SLOT")?
            .parse()
            .map_err(|_| StorageError::ClientConstruction {
                kind: "memory",
                reason: "bad slot".to_string(),
            })?;
        let log = SLOTS.lock().unwrap()[slot].clone();
        Ok(Box::new(RecordingClient {
            log,
            fail_dump: settings.get("MEMORY_FAIL").is_some(),
        }))
    }

    fn memory_settings(fail: bool) -> (Settings, Arc<Mutex<Recorded>>) {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let mut slots = SLOTS.lock().unwrap();
        slots.push(log.clone());
        let mut pairs = vec![("MEMORY_SLOT".to_string(), (slots.len() - 1).to_string())];
        if fail {
            pairs.push(("MEMORY_FAIL".to_string(), "1".to_string()));
        }
        (Settings::from_pairs(pairs), log)
    }

    fn registry() -> StorageRegistry {
        let mut registry = StorageRegistry::with_default_sinks();
        registry.register("memory", memory_client);
        registry
    }

    fn storage_args(kind: &str) -> StorageArgs {
        StorageArgs {
            language: "go".to_string(),
            commit: "3d9682b".to_string(),
            storage: kind.to_string(),
        }
    }

    const LOG: &str = "\
goos: linux
goarch: amd64
BenchmarkGoDriver/transform/accumulator_factory-4   2000   612345 ns/op   81920 B/op   1200 allocs/op
BenchmarkGoDriver/transform/ifelse.go-4   5000   1500 ns/op
PASS
ok      github.com/bblfsh/go-driver/driver    3.2s
";

    #[tokio::test]
    async fn test_parse_and_store_dumps_each_file_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("bench0");
        let second = dir.path().join("bench1");
        std::fs::write(&first, LOG).unwrap();
        std::fs::write(&second, "PASS\n").unwrap();

        let registry = registry();
        let (settings, log) = memory_settings(false);
        let ctx = CommandContext {
            registry: &registry,
            settings: &settings,
            cancel: CancellationToken::new(),
        };
        let args = ParseAndStoreArgs {
            storage: storage_args("memory"),
            files: vec![first, second],
        };
        parse_and_store(&args, &ctx).await.unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.closes, 1);
        assert_eq!(log.batches.len(), 2);
        let (tags, records) = &log.batches[0];
        assert_eq!(tags.get("level").map(String::as_str), Some("transforms"));
        assert_eq!(tags.get("language").map(String::as_str), Some("go"));
        assert_eq!(tags.get("commit").map(String::as_str), Some("3d9682b"));
        let names: Vec<&str> = records.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["accumulator_factory", "ifelse"]);
        assert_eq!(records[0].allocs_per_op(), 1200);
        assert!(log.batches[1].1.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_storage_fails_before_reading_files() {
        let registry = registry();
        let settings = Settings::default();
        let ctx = CommandContext {
            registry: &registry,
            settings: &settings,
            cancel: CancellationToken::new(),
        };
        let args = ParseAndStoreArgs {
            storage: storage_args("mysql"),
            files: vec![PathBuf::from("/definitely/not/here")],
        };
        let err = parse_and_store(&args, &ctx).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::UnsupportedStorageKind { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_log_still_closes_client() {
        let registry = registry();
        let (settings, log) = memory_settings(false);
        let ctx = CommandContext {
            registry: &registry,
            settings: &settings,
            cancel: CancellationToken::new(),
        };
        let args = ParseAndStoreArgs {
            storage: storage_args("memory"),
            files: vec![PathBuf::from("/definitely/not/here")],
        };
        let err = parse_and_store(&args, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here"));
        assert_eq!(log.lock().unwrap().closes, 1);
    }

    #[tokio::test]
    async fn test_dump_failure_is_reported_and_client_closed() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results.json");
        write_results(&results, &[normalize("bench_a.go", &["bench_"], 10, 2e6, 128, 3)]).unwrap();

        let registry = registry();
        let (settings, log) = memory_settings(true);
        let ctx = CommandContext {
            registry: &registry,
            settings: &settings,
            cancel: CancellationToken::new(),
        };
        let args = StoreResultsArgs {
            storage: storage_args("memory"),
            level: Level::Driver,
            file: results,
        };
        let err = store_results(&args, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("backend unavailable"), "{}", err);
        assert_eq!(log.lock().unwrap().closes, 1);
    }

    #[tokio::test]
    async fn test_store_results_uses_given_level() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results.json");
        let records = vec![
            normalize("bench_a.go", &["bench_"], 10, 2e6, 128, 3),
            normalize("bench_b.py", &["bench_"], 20, 1e6, 64, 1),
        ];
        write_results(&results, &records).unwrap();
        assert_eq!(read_results(&results).unwrap(), records);

        let registry = registry();
        let (settings, log) = memory_settings(false);
        let ctx = CommandContext {
            registry: &registry,
            settings: &settings,
            cancel: CancellationToken::new(),
        };
        let args = StoreResultsArgs {
            storage: storage_args("memory"),
            level: Level::Bblfshd,
            file: results,
        };
        store_results(&args, &ctx).await.unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.batches.len(), 1);
        assert_eq!(log.batches[0].0.get("level").map(String::as_str), Some("bblfshd"));
        assert_eq!(log.batches[0].1, records);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_driver_native_with_cat_driver() {
        let fixtures = tempfile::tempdir().unwrap();
        std::fs::write(fixtures.path().join("bench_ifelse.go"), "package main").unwrap();
        std::fs::write(fixtures.path().join("bench_ifelse.go.native"), "{}").unwrap();
        std::fs::write(fixtures.path().join("hello.go"), "package main").unwrap();
        let out = tempfile::tempdir().unwrap();
        let results = out.path().join("results.json");

        let registry = registry();
        let (settings, log) = memory_settings(false);
        let ctx = CommandContext {
            registry: &registry,
            settings: &settings,
            cancel: CancellationToken::new(),
        };
        let args = DriverNativeArgs {
            storage: storage_args("memory"),
            driver: PathBuf::from("cat"),
            driver_args: vec![],
            filter_prefix: "bench_".to_string(),
            exclude_suffixes: crate::defaults::exclude_suffixes(),
            bench_time: std::time::Duration::from_millis(10),
            results: Some(results.clone()),
            dirs: vec![fixtures.path().to_path_buf()],
        };
        driver_native(&args, &ctx).await.unwrap();

        let written = read_results(&results).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].name(), "ifelse");

        let log = log.lock().unwrap();
        assert_eq!(log.closes, 1);
        assert_eq!(log.batches[0].0.get("level").map(String::as_str), Some("driver-native"));
        assert_eq!(log.batches[0].1, written);
    }

    #[tokio::test]
    async fn test_driver_native_without_fixtures() {
        let fixtures = tempfile::tempdir().unwrap();
        let registry = registry();
        let (settings, log) = memory_settings(false);
        let ctx = CommandContext {
            registry: &registry,
            settings: &settings,
            cancel: CancellationToken::new(),
        };
        let args = DriverNativeArgs {
            storage: storage_args("memory"),
            driver: PathBuf::from("cat"),
            driver_args: vec![],
            filter_prefix: "bench_".to_string(),
            exclude_suffixes: vec![],
            bench_time: std::time::Duration::from_millis(1),
            results: None,
            dirs: vec![fixtures.path().to_path_buf()],
        };
        let err = driver_native(&args, &ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "no files detected");
        // Nothing was stored, so no client was opened.
        assert_eq!(log.lock().unwrap().closes, 0);
    }
}
