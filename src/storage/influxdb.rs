//! InfluxDB 1.x sink.
//!
//! One dump becomes one batch of points written with a single
//! `POST {address}/write?db={db}&precision=s`. Every point shares the
//! measurement, the batch tags plus `name`, and the dump timestamp:
//!
//! ```text
//! benchmark,commit=abc,language=go,level=driver,name=foo n=10i,per_op_alloc_bytes=128i,per_op_allocs=3i,per_op_seconds=0.002 1700000000
//! ```
//!
//! Configuration:
//!
//! - `INFLUX_ADDRESS` (required), e.g. `http://localhost:8086`
//! - `INFLUX_USERNAME`, `INFLUX_PASSWORD` (optional, basic auth)
//! - `INFLUX_DB` (required)
//! - `INFLUX_MEASUREMENT` (required)

use super::{
    Settings, StorageClient, StorageError, StorageRegistry, PER_OP_ALLOCS, PER_OP_ALLOC_BYTES,
    PER_OP_SECONDS,
};
use crate::record::{BenchmarkRecord, TagSet, NAME_TAG};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use tracing::debug;

/// Kind the sink is registered under
pub const KIND: &str = "influxdb";
/// Generic alias for the time-series database sink
pub const ALIAS: &str = "timeseries-db";

/// Field holding the iteration count
pub const ITERATIONS_FIELD: &str = "n";

const PRECISION: &str = "s";

pub(crate) fn register(registry: &mut StorageRegistry) {
    registry.register(KIND, construct);
    registry.register(ALIAS, construct);
}

fn construct(settings: &Settings) -> Result<Box<dyn StorageClient>, StorageError> {
    let config = InfluxConfig::from_settings(settings)?;
    Ok(Box::new(InfluxClient::new(config)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfluxConfig {
    pub address: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: String,
    /// Measurement name; plays the role of a table for the points
    pub measurement: String,
}

impl InfluxConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, StorageError> {
        let address = settings.require(KIND, "INFLUX_ADDRESS")?;
        if !address.starts_with("http://") && !address.starts_with("https://") {
            return Err(StorageError::ClientConstruction {
                kind: KIND,
                reason: format!("unsupported protocol scheme in address {:?}", address),
            });
        }
        Ok(Self {
            address,
            username: settings.get("INFLUX_USERNAME").map(str::to_string),
            password: settings.get("INFLUX_PASSWORD").map(str::to_string),
            database: settings.require(KIND, "INFLUX_DB")?,
            measurement: settings.require(KIND, "INFLUX_MEASUREMENT")?,
        })
    }

    pub fn write_url(&self) -> String {
        format!("{}/write", self.address.trim_end_matches('/'))
    }
}

/// Errors turning a record into a line-protocol point
#[derive(Debug, thiserror::Error)]
pub enum PointError {
    #[error("measurement name is empty")]
    EmptyMeasurement,

    #[error("field {field} of {name} is not a finite number")]
    NonFiniteField { name: String, field: &'static str },

    #[error("{what} {value:?} contains a line break")]
    LineBreak { what: &'static str, value: String },
}

/// One line-protocol point
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: TagSet,
    pub n: u64,
    pub per_op_seconds: f64,
    pub per_op_alloc_bytes: u64,
    pub per_op_allocs: u64,
    pub time: DateTime<Utc>,
}

impl Point {
    /// Build the point for `record`: the batch tags plus `name`.
    pub fn new(
        measurement: &str,
        tags: &TagSet,
        record: &BenchmarkRecord,
        time: DateTime<Utc>,
    ) -> Result<Self, PointError> {
        if measurement.is_empty() {
            return Err(PointError::EmptyMeasurement);
        }
        let per_op_seconds = record.seconds_per_op();
        if !per_op_seconds.is_finite() {
            return Err(PointError::NonFiniteField {
                name: record.name().to_string(),
                field: PER_OP_SECONDS,
            });
        }

        let mut tags = tags.clone();
        tags.insert(NAME_TAG.to_string(), record.name().to_string());

        // A line break would split the point into separate lines of the batch.
        reject_line_break("measurement", measurement)?;
        for (key, value) in &tags {
            reject_line_break("tag key", key)?;
            reject_line_break("tag value", value)?;
        }

        Ok(Self {
            measurement: measurement.to_string(),
            tags,
            n: record.iterations(),
            per_op_seconds,
            per_op_alloc_bytes: record.alloc_bytes_per_op(),
            per_op_allocs: record.allocs_per_op(),
            time,
        })
    }

    /// Encode as a line-protocol line with second precision, without the
    /// trailing newline. Tags with empty values are left out because the
    /// server rejects them.
    pub fn to_line(&self) -> String {
        let mut line = escape(&self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            if value.is_empty() {
                continue;
            }
            let _ = write!(
                line,
                ",{}={}",
                escape(key, &[',', '=', ' ']),
                escape(value, &[',', '=', ' '])
            );
        }
        // Field keys in lexicographic order, integers with the `i` suffix.
        let _ = write!(
            line,
            " {}={}i,{}={}i,{}={}i,{}={:?} {}",
            ITERATIONS_FIELD,
            self.n,
            PER_OP_ALLOC_BYTES,
            self.per_op_alloc_bytes,
            PER_OP_ALLOCS,
            self.per_op_allocs,
            PER_OP_SECONDS,
            self.per_op_seconds,
            self.time.timestamp()
        );
        line
    }
}

fn reject_line_break(what: &'static str, value: &str) -> Result<(), PointError> {
    if value.contains(['\n', '\r']) {
        return Err(PointError::LineBreak {
            what,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn escape(s: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Encode a whole batch; the first record that cannot be encoded aborts it.
pub fn encode_batch(
    measurement: &str,
    tags: &TagSet,
    records: &[BenchmarkRecord],
    time: DateTime<Utc>,
) -> Result<Vec<Point>, PointError> {
    records
        .iter()
        .map(|record| Point::new(measurement, tags, record, time))
        .collect()
}

/// InfluxDB client. The HTTP client is dropped on `close`.
pub struct InfluxClient {
    config: InfluxConfig,
    http: Option<reqwest::Client>,
}

impl InfluxClient {
    pub fn new(config: InfluxConfig) -> Self {
        Self {
            config,
            http: Some(reqwest::Client::new()),
        }
    }
}

#[async_trait]
impl StorageClient for InfluxClient {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn dump(&mut self, tags: &TagSet, records: &[BenchmarkRecord]) -> Result<(), StorageError> {
        let http = self.http.as_ref().ok_or(StorageError::Closed(KIND))?;
        if records.is_empty() {
            debug!("no records to write");
            return Ok(());
        }

        let points = encode_batch(&self.config.measurement, tags, records, Utc::now())
            .map_err(|e| StorageError::dump(KIND, e))?;
        let mut body = String::new();
        for point in &points {
            debug!("batch -> add point {:?}", point);
            body.push_str(&point.to_line());
            body.push('\n');
        }

        let mut request = http
            .post(self.config.write_url())
            .query(&[("db", self.config.database.as_str()), ("precision", PRECISION)])
            .body(body);
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_ref());
        }

        request
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| StorageError::dump(KIND, e))?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        self.http = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{normalize, pipeline_tags, Level};
    use chrono::TimeZone;

    fn full_settings() -> Settings {
        Settings::from_pairs([
            ("INFLUX_ADDRESS", "http://localhost:8086"),
            ("INFLUX_DB", "perf"),
            ("INFLUX_MEASUREMENT", "benchmark"),
        ])
    }

    #[test]
    fn test_config_from_settings() {
        let config = InfluxConfig::from_settings(&full_settings()).unwrap();
        assert_eq!(config.address, "http://localhost:8086");
        assert_eq!(config.username, None);
        assert_eq!(config.database, "perf");
        assert_eq!(config.measurement, "benchmark");
        assert_eq!(config.write_url(), "http://localhost:8086/write");
    }

    #[test]
    fn test_config_requires_database_and_measurement() {
        let settings = Settings::from_pairs([("INFLUX_ADDRESS", "http://localhost:8086")]);
        let err = InfluxConfig::from_settings(&settings).unwrap_err();
        assert!(err.to_string().contains("INFLUX_DB"), "{}", err);
    }

    #[test]
    fn test_config_rejects_address_without_scheme() {
        let settings = Settings::from_pairs([
            ("INFLUX_ADDRESS", "localhost:8086"),
            ("INFLUX_DB", "perf"),
            ("INFLUX_MEASUREMENT", "benchmark"),
        ]);
        assert!(matches!(
            InfluxConfig::from_settings(&settings),
            Err(StorageError::ClientConstruction { kind: KIND, .. })
        ));
    }

    #[test]
    fn test_point_for_sample_record() {
        let tags = pipeline_tags("go", "abc", Level::Driver);
        let record = normalize("foo", &[] as &[&str], 10, 2_000_000.0, 128, 3);
        let time = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        let points = encode_batch("benchmark", &tags, &[record], time).unwrap();
        assert_eq!(points.len(), 1);
        let point = &points[0];
        assert_eq!(point.n, 10);
        assert_eq!(point.per_op_seconds, 0.002);
        assert_eq!(point.per_op_alloc_bytes, 128);
        assert_eq!(point.per_op_allocs, 3);

        let expected_tags: Vec<(&str, &str)> = vec![
            ("commit", "abc"),
            ("language", "go"),
            ("level", "driver"),
            ("name", "foo"),
        ];
        let actual_tags: Vec<(&str, &str)> = point
            .tags
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(actual_tags, expected_tags);

        assert_eq!(
            point.to_line(),
            "benchmark,commit=abc,language=go,level=driver,name=foo \
             n=10i,per_op_alloc_bytes=128i,per_op_allocs=3i,per_op_seconds=0.002 1700000000"
        );
    }

    #[test]
    fn test_point_name_tag_overrides_batch_tag() {
        let mut tags = pipeline_tags("go", "abc", Level::Driver);
        tags.insert("name".to_string(), "stale".to_string());
        let record = normalize("fresh", &[] as &[&str], 1, 1.0, 0, 0);
        let point = Point::new("m", &tags, &record, Utc::now()).unwrap();
        assert_eq!(point.tags["name"], "fresh");
    }

    #[test]
    fn test_line_escaping_and_empty_tags() {
        let mut tags = TagSet::new();
        tags.insert("commit".to_string(), String::new());
        tags.insert("language".to_string(), "c sharp,x=1".to_string());
        let record = normalize("foo", &[] as &[&str], 1, 1e9, 0, 0);
        let time = Utc.timestamp_opt(5, 0).unwrap();
        let line = Point::new("my bench", &tags, &record, time).unwrap().to_line();
        assert_eq!(
            line,
            "my\\ bench,language=c\\ sharp\\,x\\=1,name=foo \
             n=1i,per_op_alloc_bytes=0i,per_op_allocs=0i,per_op_seconds=1.0 5"
        );
    }

    #[test]
    fn test_encode_batch_is_atomic() {
        let tags = pipeline_tags("go", "abc", Level::Driver);
        let records = [
            normalize("ok", &[] as &[&str], 1, 1.0, 0, 0),
            normalize("bad", &[] as &[&str], 1, f64::INFINITY, 0, 0),
        ];
        assert!(matches!(
            encode_batch("benchmark", &tags, &records, Utc::now()),
            Err(PointError::NonFiniteField { .. })
        ));
        assert!(matches!(
            encode_batch("", &tags, &records[..1], Utc::now()),
            Err(PointError::EmptyMeasurement)
        ));
    }

    #[test]
    fn test_encode_batch_rejects_line_breaks() {
        let time = Utc.timestamp_opt(5, 0).unwrap();
        let ok = normalize("foo", &[] as &[&str], 1, 1.0, 0, 0);

        let broken_value = pipeline_tags("go\nbogus", "abc", Level::Driver);
        assert!(matches!(
            encode_batch("m", &broken_value, &[ok.clone()], time),
            Err(PointError::LineBreak { what: "tag value", .. })
        ));

        let mut broken_key = pipeline_tags("go", "abc", Level::Driver);
        broken_key.insert("os\r".to_string(), "linux".to_string());
        assert!(matches!(
            encode_batch("m", &broken_key, &[ok.clone()], time),
            Err(PointError::LineBreak { what: "tag key", .. })
        ));

        let tags = pipeline_tags("go", "abc", Level::Driver);
        assert!(matches!(
            encode_batch("bench\nmark", &tags, &[ok.clone()], time),
            Err(PointError::LineBreak { what: "measurement", .. })
        ));

        // One bad record name aborts the whole batch.
        let records = [ok, normalize("a\nb", &[] as &[&str], 1, 1.0, 0, 0)];
        assert!(matches!(
            encode_batch("m", &tags, &records, time),
            Err(PointError::LineBreak { what: "tag value", .. })
        ));
    }

    #[test]
    fn test_backslash_is_written_verbatim() {
        let mut tags = TagSet::new();
        tags.insert("commit".to_string(), "a\\b".to_string());
        let record = normalize("foo", &[] as &[&str], 1, 1.0, 0, 0);
        let time = Utc.timestamp_opt(5, 0).unwrap();
        let line = Point::new("m", &tags, &record, time).unwrap().to_line();
        assert!(line.starts_with("m,commit=a\\b,name=foo "), "{}", line);
    }

    #[tokio::test]
    async fn test_close_twice_and_dump_after_close() {
        let mut client = InfluxClient::new(InfluxConfig::from_settings(&full_settings()).unwrap());
        assert!(client.close().await.is_ok());
        assert!(client.close().await.is_ok());
        let tags = pipeline_tags("go", "abc", Level::Driver);
        assert!(matches!(
            client.dump(&tags, &[]).await,
            Err(StorageError::Closed(KIND))
        ));
    }

    #[tokio::test]
    async fn test_encoding_failure_sends_nothing() {
        // Nothing listens on port 1; reaching the network would give a
        // transport error with a different message.
        let mut config = InfluxConfig::from_settings(&full_settings()).unwrap();
        config.address = "http://127.0.0.1:1".to_string();
        let mut client = InfluxClient::new(config);
        let tags = pipeline_tags("go", "abc", Level::Driver);
        let records = [normalize("bad", &[] as &[&str], 1, f64::NAN, 0, 0)];
        let err = client.dump(&tags, &records).await.unwrap_err();
        assert!(err.to_string().contains("not a finite number"), "{}", err);
    }
}
