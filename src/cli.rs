use crate::record::Level;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

const STORAGE_HELP: &str = "Storage kind to store the results (pushgateway, influxdb, file)";

const STORAGE_ENV_HELP: &str = "\
To access storage the corresponding environment variables must be set.

  pushgateway:  PROM_ADDRESS=localhost:9091 PROM_JOB=pushgateway
  influxdb:     INFLUX_ADDRESS=http://localhost:8086 INFLUX_USERNAME= INFLUX_PASSWORD=
                INFLUX_DB=mydb INFLUX_MEASUREMENT=benchmark";

/// Performance test utilities for parser daemons and language drivers
#[derive(Parser, Debug)]
#[clap(name = "parser-perf", version, about, long_about = None)]
pub struct Args {
    /// Verbose output
    #[clap(short = 'v', long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse file(s) with Go benchmark output and store them into a given storage
    #[clap(name = "parse-and-store", visible_aliases = &["pas", "parse-and-dump"], after_help = STORAGE_ENV_HELP)]
    ParseAndStore(ParseAndStoreArgs),

    /// Benchmark a native driver over fixture files and store the results
    #[clap(name = "driver-native", visible_aliases = &["dn", "native"], after_help = STORAGE_ENV_HELP)]
    DriverNative(DriverNativeArgs),

    /// Store results previously written with `driver-native --results`
    #[clap(name = "store-results", after_help = STORAGE_ENV_HELP)]
    StoreResults(StoreResultsArgs),
}

/// Tags and destination shared by every command
#[derive(ClapArgs, Debug, Clone)]
pub struct StorageArgs {
    /// Name of the language being tested
    #[clap(short = 'l', long, default_value = "")]
    pub language: String,

    /// Commit id being tested, used as a tag in the performance report
    #[clap(short = 'c', long, default_value = "")]
    pub commit: String,

    #[clap(short = 's', long, default_value = crate::defaults::STORAGE, help = STORAGE_HELP)]
    pub storage: String,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ParseAndStoreArgs {
    #[clap(flatten)]
    pub storage: StorageArgs,

    /// Files with `go test -bench` output
    #[clap(required = true, num_args = 1..)]
    pub files: Vec<PathBuf>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct DriverNativeArgs {
    #[clap(flatten)]
    pub storage: StorageArgs,

    /// Native driver executable; fixture content is written to its stdin
    #[clap(short = 'd', long)]
    pub driver: PathBuf,

    /// Extra arguments passed to the driver
    #[clap(long = "driver-arg", allow_hyphen_values = true)]
    pub driver_args: Vec<String>,

    /// File prefix to be filtered; also trimmed from benchmark names
    #[clap(long, default_value = crate::defaults::FILE_FILTER_PREFIX)]
    pub filter_prefix: String,

    /// File suffixes to be excluded
    #[clap(long, value_delimiter = ',', default_values_t = crate::defaults::exclude_suffixes())]
    pub exclude_suffixes: Vec<String>,

    /// Minimum measured time per fixture (e.g. "1s", "500ms")
    #[clap(long, value_parser = parse_duration, default_value = "1s")]
    pub bench_time: Duration,

    /// Also write the records as JSON to this file
    #[clap(long)]
    pub results: Option<PathBuf>,

    /// Fixture directories
    #[clap(required = true, num_args = 1..)]
    pub dirs: Vec<PathBuf>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct StoreResultsArgs {
    #[clap(flatten)]
    pub storage: StorageArgs,

    /// Pipeline level the results were taken at
    #[clap(long, value_enum, default_value_t = Level::DriverNative)]
    pub level: Level,

    /// JSON results file
    pub file: PathBuf,
}

/// Parse duration from string (e.g., "10s", "5m", "1h", "250ms")
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if !num.is_finite() || num <= 0.0 {
        return Err(format!("Duration must be positive: {}", s));
    }

    let secs = match unit {
        "ms" => num / 1000.0,
        "s" => num,
        "m" => num * 60.0,
        "h" => num * 3600.0,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Duration::try_from_secs_f64(secs).map_err(|_| format!("Duration out of range: {}", s))
}
