//! # Utility Functions
//!
//! Fixture discovery and human-readable formatting helpers shared by the
//! runner and the commands.
//!
//! ## Usage Examples
//!
//! ```rust
//! use parser_perf::utils::*;
//! use std::time::Duration;
//!
//! assert_eq!(format_duration(Duration::from_micros(1500)), "1.50ms");
//! assert_eq!(format_bytes(1536), "1.50 KB");
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Collect fixture files from `dirs`.
///
/// A file is kept when its name starts with `prefix` and its path does not
/// end with any of `exclude_suffixes`. Results of each directory are sorted;
/// directories keep the order they were given in.
///
/// ## Examples
///
/// With the default prefix `bench_` and suffixes `.legacy`, `.native`,
/// `.uast`, a fixtures directory containing
///
/// ```text
/// bench_ifelse.go
/// bench_ifelse.go.native
/// bench_ifelse.go.uast
/// hello.go
/// ```
///
/// yields only `bench_ifelse.go`.
pub fn get_files<S: AsRef<str>, P: AsRef<Path>>(
    prefix: &str,
    exclude_suffixes: &[S],
    dirs: &[P],
) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for dir in dirs {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("cannot list fixtures directory {}", dir.display()))?;

        let mut matched = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(prefix) || has_any_suffix(&name, exclude_suffixes) {
                continue;
            }
            if path.is_file() {
                matched.push(path);
            }
        }
        matched.sort();
        files.extend(matched);
    }
    Ok(files)
}

fn has_any_suffix<S: AsRef<str>>(s: &str, suffixes: &[S]) -> bool {
    suffixes.iter().any(|suffix| s.ends_with(suffix.as_ref()))
}

/// Format a duration in a human-readable way
///
/// - **Nanoseconds**: < 1,000 ns (e.g., "500ns")
/// - **Microseconds**: < 1,000,000 ns (e.g., "1.50μs")
/// - **Milliseconds**: < 1,000,000,000 ns (e.g., "25.75ms")
/// - **Seconds**: < 60 seconds (e.g., "5.25s")
/// - **Minutes and Hours**: longer durations (e.g., "5m 30s", "2h 15m 30s")
pub fn format_duration(duration: Duration) -> String {
    let total_ns = duration.as_nanos();

    if total_ns < 1_000 {
        format!("{}ns", total_ns)
    } else if total_ns < 1_000_000 {
        format!("{:.2}μs", total_ns as f64 / 1_000.0)
    } else if total_ns < 1_000_000_000 {
        format!("{:.2}ms", total_ns as f64 / 1_000_000.0)
    } else if total_ns < 60_000_000_000 {
        format!("{:.2}s", total_ns as f64 / 1_000_000_000.0)
    } else {
        let seconds = duration.as_secs();
        let minutes = seconds / 60;
        let remaining_seconds = seconds % 60;

        if minutes < 60 {
            format!("{}m {}s", minutes, remaining_seconds)
        } else {
            let hours = minutes / 60;
            let remaining_minutes = minutes % 60;
            format!("{}h {}m {}s", hours, remaining_minutes, remaining_seconds)
        }
    }
}

/// Format a per-operation time given in (possibly fractional) nanoseconds
pub fn format_ns_per_op(ns: f64) -> String {
    if ns.is_finite() && ns >= 0.0 {
        format_duration(Duration::from_nanos(ns.round() as u64))
    } else {
        format!("{}ns", ns)
    }
}

/// Format bytes using binary (1024-based) units
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}
