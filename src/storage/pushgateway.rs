//! Prometheus push-gateway sink.
//!
//! Each dump builds three summary families (`per_op_seconds`,
//! `per_op_alloc_bytes`, `per_op_allocs`) labelled with `name` followed by
//! the batch tags in key order, encodes them in the text exposition format
//! and POSTs them to `{address}/metrics/job/{job}`. POST keeps series pushed
//! earlier under the same job and only replaces those with the same labels.
//!
//! Configuration:
//!
//! - `PROM_ADDRESS` (required), e.g. `localhost:9091`; `http://` is assumed
//!   when no scheme is given
//! - `PROM_JOB` (required)

use super::{
    Settings, StorageClient, StorageError, StorageRegistry, PER_OP_ALLOCS, PER_OP_ALLOC_BYTES,
    PER_OP_SECONDS,
};
use crate::record::{BenchmarkRecord, TagSet, NAME_TAG};
use async_trait::async_trait;
use prometheus::proto::{LabelPair, Metric, MetricFamily, MetricType, Summary};
use prometheus::{Encoder, TextEncoder};
use reqwest::Url;
use std::collections::BTreeMap;
use tracing::debug;

/// Kind the sink is registered under
pub const KIND: &str = "pushgateway";
/// Short alias kept for existing scripts
pub const ALIAS: &str = "prom";

const ENV_ADDRESS: &str = "PROM_ADDRESS";
const ENV_JOB: &str = "PROM_JOB";

pub(crate) fn register(registry: &mut StorageRegistry) {
    registry.register(KIND, construct);
    registry.register(ALIAS, construct);
}

fn construct(settings: &Settings) -> Result<Box<dyn StorageClient>, StorageError> {
    let config = PushGatewayConfig::from_settings(settings)?;
    Ok(Box::new(PushGatewayClient::new(config)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushGatewayConfig {
    pub address: String,
    pub job: String,
}

impl PushGatewayConfig {
    /// Read the configuration and check that it yields a valid push URL.
    pub fn from_settings(settings: &Settings) -> Result<Self, StorageError> {
        let config = Self {
            address: settings.require(KIND, ENV_ADDRESS)?,
            job: settings.require(KIND, ENV_JOB)?,
        };
        config.push_url()?;
        Ok(config)
    }

    /// Push URL for the configured job; the job is percent-encoded as a
    /// single path segment.
    pub fn push_url(&self) -> Result<Url, StorageError> {
        let base = if self.address.contains("://") {
            self.address.clone()
        } else {
            format!("http://{}", self.address)
        };
        let invalid = |reason: String| StorageError::ClientConstruction {
            kind: KIND,
            reason: format!("invalid {} {:?}: {}", ENV_ADDRESS, self.address, reason),
        };

        let mut url = Url::parse(&base).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid("address cannot be a base URL".to_string()))?
            .pop_if_empty()
            .extend(["metrics", "job", self.job.as_str()]);
        Ok(url)
    }
}

/// Push-gateway client. Holds no connection of its own, so `close` has
/// nothing to release.
pub struct PushGatewayClient {
    config: PushGatewayConfig,
    http: reqwest::Client,
    closed: bool,
}

impl PushGatewayClient {
    pub fn new(config: PushGatewayConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            closed: false,
        }
    }
}

#[async_trait]
impl StorageClient for PushGatewayClient {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn dump(&mut self, tags: &TagSet, records: &[BenchmarkRecord]) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::Closed(KIND));
        }
        if records.is_empty() {
            debug!("no records to push");
            return Ok(());
        }

        debug!("encoding {} records as summaries", records.len());
        let body = encode_summaries(tags, records)?;

        let url = self.config.push_url()?;
        debug!("pushing metrics to {}", url);
        let encoder = TextEncoder::new();
        self.http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, encoder.format_type())
            .body(body)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| StorageError::dump(KIND, e))?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        self.closed = true;
        Ok(())
    }
}

/// Observations sharing one label set
#[derive(Debug, Default, Clone, Copy)]
struct Observed {
    count: u64,
    sum: f64,
}

/// Encode the batch in the Prometheus text format.
///
/// Records with identical names collapse into one series whose count and
/// sum accumulate, like repeated observations of a summary.
pub fn encode_summaries(tags: &TagSet, records: &[BenchmarkRecord]) -> Result<Vec<u8>, StorageError> {
    let (label_names, tag_values) = label_layout(tags)?;

    let metric_names = [PER_OP_SECONDS, PER_OP_ALLOC_BYTES, PER_OP_ALLOCS];
    let mut series: [BTreeMap<Vec<String>, Observed>; 3] = Default::default();

    for record in records {
        let mut values = Vec::with_capacity(label_names.len());
        values.push(record.name().to_string());
        values.extend(tag_values.iter().cloned());

        let observations = [
            record.seconds_per_op(),
            record.alloc_bytes_per_op() as f64,
            record.allocs_per_op() as f64,
        ];
        for (metric, value) in series.iter_mut().zip(observations) {
            let observed = metric.entry(values.clone()).or_default();
            observed.count += 1;
            observed.sum += value;
        }
    }

    let families: Vec<MetricFamily> = metric_names
        .iter()
        .zip(series.iter())
        .map(|(name, metric)| summary_family(name, &label_names, metric))
        .collect();

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&families, &mut buffer)
        .map_err(|e| StorageError::dump(KIND, format!("cannot encode metrics: {}", e)))?;
    Ok(buffer)
}

/// Label names (`name` first, then tag keys in order) and the tag values in
/// the same positions.
fn label_layout(tags: &TagSet) -> Result<(Vec<String>, Vec<String>), StorageError> {
    let mut names = vec![NAME_TAG.to_string()];
    let mut values = Vec::with_capacity(tags.len());
    for (key, value) in tags {
        // The record name always wins over a caller supplied `name` tag.
        if key == NAME_TAG {
            continue;
        }
        if !is_valid_label_name(key) {
            return Err(StorageError::dump(
                KIND,
                format!("invalid label name {:?}", key),
            ));
        }
        names.push(key.clone());
        values.push(value.clone());
    }
    Ok((names, values))
}

fn summary_family(
    name: &str,
    label_names: &[String],
    series: &BTreeMap<Vec<String>, Observed>,
) -> MetricFamily {
    let metrics: Vec<Metric> = series
        .iter()
        .map(|(values, observed)| {
            let labels: Vec<LabelPair> = label_names
                .iter()
                .zip(values)
                .map(|(n, v)| {
                    let mut pair = LabelPair::default();
                    pair.set_name(n.clone());
                    pair.set_value(v.clone());
                    pair
                })
                .collect();

            let mut summary = Summary::default();
            summary.set_sample_count(observed.count);
            summary.set_sample_sum(observed.sum);

            let mut metric = Metric::default();
            metric.set_label(labels.into());
            metric.set_summary(summary);
            metric
        })
        .collect();

    let mut family = MetricFamily::default();
    family.set_name(name.to_string());
    family.set_help(format!("Benchmark {} observations", name));
    family.set_field_type(MetricType::SUMMARY);
    family.set_metric(metrics.into());
    family
}

fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    !name.starts_with("__") && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
