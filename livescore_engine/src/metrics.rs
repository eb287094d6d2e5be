//! Counter, gauge and timing emission.
//!
//! Metric names (`job.*`, `match.*`, `db.pool.*`) and tag keys are stable; dashboards are built on them. No wire
//! format is implied: a sink decides how to ship what it receives.
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use log::*;

pub type Tags<'a> = [(&'a str, &'a str)];

pub trait MetricsSink: Send + Sync {
    fn incr(&self, name: &str, tags: &Tags<'_>);
    fn gauge(&self, name: &str, value: f64, tags: &Tags<'_>);
    fn timing(&self, name: &str, duration: Duration, tags: &Tags<'_>);
}

impl<T: MetricsSink + ?Sized> MetricsSink for Arc<T> {
    fn incr(&self, name: &str, tags: &Tags<'_>) {
        (**self).incr(name, tags)
    }

    fn gauge(&self, name: &str, value: f64, tags: &Tags<'_>) {
        (**self).gauge(name, value, tags)
    }

    fn timing(&self, name: &str, duration: Duration, tags: &Tags<'_>) {
        (**self).timing(name, duration, tags)
    }
}

fn format_tags(tags: &Tags<'_>) -> String {
    tags.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<String>>().join(",")
}

/// Writes every metric to the `metrics` log target at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMetrics;

impl MetricsSink for LogMetrics {
    fn incr(&self, name: &str, tags: &Tags<'_>) {
        debug!(target: "metrics", "{name}:1|c|#{}", format_tags(tags));
    }

    fn gauge(&self, name: &str, value: f64, tags: &Tags<'_>) {
        debug!(target: "metrics", "{name}:{value}|g|#{}", format_tags(tags));
    }

    fn timing(&self, name: &str, duration: Duration, tags: &Tags<'_>) {
        debug!(target: "metrics", "{name}:{}|ms|#{}", duration.as_millis(), format_tags(tags));
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr(&self, _name: &str, _tags: &Tags<'_>) {}

    fn gauge(&self, _name: &str, _value: f64, _tags: &Tags<'_>) {}

    fn timing(&self, _name: &str, _duration: Duration, _tags: &Tags<'_>) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricKind {
    Counter,
    Gauge(f64),
    Timing(Duration),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricEvent {
    pub name: String,
    pub kind: MetricKind,
    pub tags: Vec<(String, String)>,
}

impl MetricEvent {
    pub fn has_tag(&self, key: &str, value: &str) -> bool {
        self.tags.iter().any(|(k, v)| k == key && v == value)
    }
}

/// Keeps every metric in memory. Handy for asserting on what a component emitted.
#[derive(Debug, Default, Clone)]
pub struct RecordingMetrics {
    events: Arc<Mutex<Vec<MetricEvent>>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Number of events named `name` that carry every one of `tags`.
    pub fn count(&self, name: &str, tags: &Tags<'_>) -> usize {
        self.events().iter().filter(|e| e.name == name && tags.iter().all(|(k, v)| e.has_tag(k, v))).count()
    }

    pub fn last_gauge(&self, name: &str) -> Option<f64> {
        self.events().iter().rev().find_map(|e| match e.kind {
            MetricKind::Gauge(v) if e.name == name => Some(v),
            _ => None,
        })
    }

    fn record(&self, name: &str, kind: MetricKind, tags: &Tags<'_>) {
        let tags = tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let event = MetricEvent { name: name.to_string(), kind, tags };
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(e) => e.into_inner().push(event),
        }
    }
}

impl MetricsSink for RecordingMetrics {
    fn incr(&self, name: &str, tags: &Tags<'_>) {
        self.record(name, MetricKind::Counter, tags);
    }

    fn gauge(&self, name: &str, value: f64, tags: &Tags<'_>) {
        self.record(name, MetricKind::Gauge(value), tags);
    }

    fn timing(&self, name: &str, duration: Duration, tags: &Tags<'_>) {
        self.record(name, MetricKind::Timing(duration), tags);
    }
}
