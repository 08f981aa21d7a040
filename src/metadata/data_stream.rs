//! Data streams and their lifecycle configuration

use super::Metadata;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single downsample operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownsampleConfig {
    /// The fixed aggregation interval, e.g. `"1h"`. Part of the deterministic
    /// downsample index name.
    pub fixed_interval: String,
}

impl DownsampleConfig {
    pub fn new(fixed_interval: impl Into<String>) -> Self {
        Self {
            fixed_interval: fixed_interval.into(),
        }
    }
}

/// One step of the downsampling schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownsamplingRound {
    /// The round matches an index once its age reaches this duration
    pub after: Duration,
    pub config: DownsampleConfig,
}

impl DownsamplingRound {
    pub fn new(after: Duration, fixed_interval: impl Into<String>) -> Self {
        Self {
            after,
            config: DownsampleConfig::new(fixed_interval),
        }
    }
}

/// Lifecycle configuration attached to a data stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lifecycle {
    pub enabled: bool,
    /// Maximum age a backing index may persist before deletion
    pub data_retention: Option<Duration>,
    /// Downsampling rounds, ordered ascending by `after`
    pub downsampling: Option<Vec<DownsamplingRound>>,
}

impl Lifecycle {
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            enabled: true,
            data_retention: Some(retention),
            downsampling: None,
        }
    }

    /// The retention that currently applies to the stream's indices.
    pub fn effective_retention(&self) -> Option<Duration> {
        self.data_retention
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            enabled: true,
            data_retention: None,
            downsampling: None,
        }
    }
}

/// A named, ordered collection of backing indices with one write index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataStream {
    pub name: String,
    /// Backing indices in generation order; the last one is the write index
    pub indices: Vec<String>,
    pub lifecycle: Option<Lifecycle>,
}

impl DataStream {
    pub fn new(name: impl Into<String>, indices: Vec<String>) -> Self {
        Self {
            name: name.into(),
            indices,
            lifecycle: None,
        }
    }

    /// The distinguished index receiving new writes.
    pub fn write_index(&self) -> Option<&str> {
        self.indices.last().map(String::as_str)
    }

    pub fn contains_index(&self, name: &str) -> bool {
        self.indices.iter().any(|i| i == name)
    }

    /// Backing indices older than the stream's retention, write index excluded.
    pub fn indices_past_retention(&self, metadata: &Metadata, now_millis: i64) -> Vec<String> {
        let Some(lifecycle) = self.lifecycle.as_ref().filter(|l| l.enabled) else {
            return Vec::new();
        };
        let Some(retention) = lifecycle.effective_retention() else {
            return Vec::new();
        };
        let retention_millis = retention.as_millis() as i64;
        let write_index = self.write_index();

        self.indices
            .iter()
            .filter(|name| Some(name.as_str()) != write_index)
            .filter(|name| metadata.is_index_managed_by_lifecycle(name))
            .filter(|name| {
                metadata
                    .index(name)
                    .is_some_and(|meta| meta.age_millis(now_millis) > retention_millis)
            })
            .cloned()
            .collect()
    }

    /// The downsampling rounds that match `index` at `now_millis`, ordered
    /// ascending by `after`. The write index never matches a round.
    pub fn downsampling_rounds_for(
        &self,
        index: &str,
        metadata: &Metadata,
        now_millis: i64,
    ) -> Vec<DownsamplingRound> {
        if Some(index) == self.write_index() || !self.contains_index(index) {
            return Vec::new();
        }
        let Some(lifecycle) = self.lifecycle.as_ref().filter(|l| l.enabled) else {
            return Vec::new();
        };
        let Some(rounds) = lifecycle.downsampling.as_ref() else {
            return Vec::new();
        };
        let Some(meta) = metadata.index(index) else {
            return Vec::new();
        };

        let age = meta.age_millis(now_millis);
        rounds
            .iter()
            .filter(|round| age >= round.after.as_millis() as i64)
            .cloned()
            .collect()
    }
}
