/// Sample input: newline-delimited JSON throughput statistics.
///
/// Two line shapes are accepted:
/// - a host server event:
///   `{"type":"SERVERSTATISTICS","data":{"providerStatistics":{"can0":{"deltaRate":12.5}}}}`
/// - a flat map of interface name to rate: `{"can0": 12.5}`
///
/// Server events of any other type are skipped. Rates that are missing or not
/// finite are left out, which the registry treats as zero throughput.
use serde::Deserialize;
use std::collections::HashMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

const STATISTICS_EVENT: &str = "SERVERSTATISTICS";

/// Throughput per interface for one sampling cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sample {
    pub throughputs: HashMap<String, f64>,
}

#[derive(Deserialize)]
struct ServerEvent {
    #[serde(default)]
    data: Option<EventData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventData {
    #[serde(default)]
    provider_statistics: HashMap<String, ProviderStatistics>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderStatistics {
    #[serde(default)]
    delta_rate: Option<f64>,
}

/// Parse one input line. Returns `Ok(None)` for blank lines and for events
/// that carry no statistics.
pub fn parse_sample_line(line: &str) -> Result<Option<Sample>, SampleError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| SampleError::Parse { source: e })?;

    // Any object carrying a `type` is a host event, never a flat map.
    let event_kind = value
        .get("type")
        .map(|kind| kind.as_str() == Some(STATISTICS_EVENT));

    let throughputs: HashMap<String, f64> = match event_kind {
        Some(false) => return Ok(None),
        Some(true) => {
            let event: ServerEvent =
                serde_json::from_value(value).map_err(|e| SampleError::Parse { source: e })?;
            let Some(data) = event.data else {
                return Ok(None);
            };
            data.provider_statistics
                .into_iter()
                .filter_map(|(name, stats)| stats.delta_rate.map(|rate| (name, rate)))
                .collect()
        }
        None => {
            let map: HashMap<String, serde_json::Value> =
                serde_json::from_value(value).map_err(|e| SampleError::Parse { source: e })?;
            map.into_iter()
                .filter_map(|(name, value)| value.as_f64().map(|rate| (name, rate)))
                .collect()
        }
    };

    Ok(Some(Sample {
        throughputs: throughputs
            .into_iter()
            .filter(|(_, rate)| rate.is_finite())
            .collect(),
    }))
}

/// Reads samples from an async line source.
pub struct SampleReader<R> {
    lines: Lines<R>,
    line_number: u64,
}

impl<R: AsyncBufRead + Unpin> SampleReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
        }
    }

    /// Next sample, skipping lines without statistics. Malformed lines are
    /// logged and skipped. Returns `Ok(None)` at end of input.
    pub async fn next_sample(&mut self) -> Result<Option<Sample>, SampleError> {
        loop {
            let Some(line) = self
                .lines
                .next_line()
                .await
                .map_err(|e| SampleError::Io { source: e })?
            else {
                return Ok(None);
            };
            self.line_number += 1;

            match parse_sample_line(&line) {
                Ok(Some(sample)) => return Ok(Some(sample)),
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(line = self.line_number, error = %e, "skipping malformed sample");
                }
            }
        }
    }
}

/// Errors from reading sample input.
#[derive(Debug)]
pub enum SampleError {
    Parse { source: serde_json::Error },
    Io { source: std::io::Error },
}

impl std::fmt::Display for SampleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleError::Parse { source } => write!(f, "invalid sample: {source}"),
            SampleError::Io { source } => write!(f, "failed to read samples: {source}"),
        }
    }
}

impl std::error::Error for SampleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SampleError::Parse { source } => Some(source),
            SampleError::Io { source } => Some(source),
        }
    }
}
