//! Reader for the Go benchmark text format.
//!
//! `go test -bench` prints one line per benchmark:
//!
//! ```text
//! BenchmarkGoDriver/transform/accumulator_factory-4   2000   612345 ns/op   81920 B/op   1200 allocs/op
//! ```
//!
//! The first field is the benchmark id, the second the iteration count, and
//! the rest are `value unit` pairs. Only `ns/op`, `B/op` and `allocs/op` are
//! kept; other units such as `MB/s` are skipped.

use crate::record::RawSample;
use std::io::BufRead;

const NAME_PREFIX: &str = "Benchmark";

/// Parse a single result line. Returns `None` for anything that is not a
/// benchmark result (headers, `PASS`, `ok ...`, log noise).
pub fn parse_line(line: &str) -> Option<RawSample> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 2 || !fields[0].starts_with(NAME_PREFIX) {
        return None;
    }
    let iterations: u64 = fields[1].parse().ok()?;

    let mut sample = RawSample {
        name: fields[0].to_string(),
        iterations,
        ns_per_op: 0.0,
        alloc_bytes_per_op: 0,
        allocs_per_op: 0,
    };

    for pair in fields[2..].chunks_exact(2) {
        let (value, unit) = (pair[0], pair[1]);
        match unit {
            "ns/op" => {
                if let Ok(v) = value.parse::<f64>() {
                    sample.ns_per_op = v;
                }
            }
            "B/op" => {
                if let Ok(v) = value.parse::<u64>() {
                    sample.alloc_bytes_per_op = v;
                }
            }
            "allocs/op" => {
                if let Ok(v) = value.parse::<u64>() {
                    sample.allocs_per_op = v;
                }
            }
            _ => {}
        }
    }

    Some(sample)
}

/// Parse every benchmark line of a log, in order of appearance.
pub fn parse_set<R: BufRead>(reader: R) -> std::io::Result<Vec<RawSample>> {
    let mut samples = Vec::new();
    for line in reader.lines() {
        if let Some(sample) = parse_line(&line?) {
            samples.push(sample);
        }
    }
    Ok(samples)
}
