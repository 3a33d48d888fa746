use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single named observation.
///
/// Gauges always carry `value`, counters always carry `delta`; the two
/// constructors are the only way to build a record so the pairing cannot
/// drift.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricRecord {
    name: String,
    kind: MetricKind,
    value: Option<f64>,
    delta: Option<i64>,
}

impl MetricRecord {
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        MetricRecord {
            name: name.into(),
            kind: MetricKind::Gauge,
            value: Some(value),
            delta: None,
        }
    }

    pub fn counter(name: impl Into<String>, delta: i64) -> Self {
        MetricRecord {
            name: name.into(),
            kind: MetricKind::Counter,
            value: None,
            delta: Some(delta),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn delta(&self) -> Option<i64> {
        self.delta
    }
}

/// Everything one sampling tick produced, in table order.
#[derive(Clone, Debug)]
pub struct Batch {
    poll: i64,
    captured_at: DateTime<Utc>,
    records: Vec<MetricRecord>,
}

impl Batch {
    pub fn new(poll: i64, captured_at: DateTime<Utc>, records: Vec<MetricRecord>) -> Self {
        Batch {
            poll,
            captured_at,
            records,
        }
    }

    /// Tick number that produced this batch (the `PollCount` delta).
    pub fn poll(&self) -> i64 {
        self.poll
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Time elapsed between capture and `now`, for delivery logs.
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.captured_at
    }

    pub fn records(&self) -> &[MetricRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&MetricRecord> {
        self.records.iter().find(|record| record.name == name)
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a MetricRecord;
    type IntoIter = std::slice::Iter<'a, MetricRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
