//! Cluster metadata model
//!
//! Immutable views of data streams, backing indices and cluster blocks. A
//! lifecycle run receives one `ClusterState` snapshot and makes every
//! decision against it.

mod data_stream;
mod index;

pub use data_stream::{DataStream, DownsampleConfig, DownsamplingRound, Lifecycle};
pub use index::{DownsampleStatus, IndexMetadata, IndexSettings};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// All data streams and index metadata known to the cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub data_streams: BTreeMap<String, DataStream>,
    pub indices: BTreeMap<String, IndexMetadata>,
}

impl Metadata {
    pub fn index(&self, name: &str) -> Option<&IndexMetadata> {
        self.indices.get(name)
    }

    pub fn data_stream(&self, name: &str) -> Option<&DataStream> {
        self.data_streams.get(name)
    }

    /// The data stream that `index` is a backing index of, if any.
    pub fn parent_data_stream(&self, index: &str) -> Option<&DataStream> {
        self.data_streams
            .values()
            .find(|stream| stream.contains_index(index))
    }

    /// True when `index` is managed by the data stream lifecycle: it backs a
    /// stream with an enabled lifecycle and carries no ILM policy of its own.
    pub fn is_index_managed_by_lifecycle(&self, index: &str) -> bool {
        let Some(meta) = self.index(index) else {
            return false;
        };
        if meta.settings.ilm_policy.is_some() {
            return false;
        }
        self.parent_data_stream(index)
            .and_then(|stream| stream.lifecycle.as_ref())
            .is_some_and(|lifecycle| lifecycle.enabled)
    }
}

/// Cluster-level blocks relevant to lifecycle decisions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterBlocks {
    /// Set while the cluster state has not been recovered yet; lifecycle
    /// processing must not react to such states.
    pub state_not_recovered: bool,
    /// Indices with a write block in place
    pub write_blocks: BTreeSet<String>,
}

impl ClusterBlocks {
    pub fn index_blocked_write(&self, index: &str) -> bool {
        self.write_blocks.contains(index)
    }
}

/// An immutable view of cluster metadata at a point in time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterState {
    pub metadata: Metadata,
    pub blocks: ClusterBlocks,
    /// Whether the local node is the elected master in this state view
    pub local_node_master: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn managed_predicate_requires_enabled_lifecycle_and_no_ilm() {
        let mut metadata = Metadata::default();
        metadata
            .indices
            .insert("idx-1".to_string(), IndexMetadata::new("idx-1", 0));
        let mut stream = DataStream::new("logs", vec!["idx-1".to_string()]);
        stream.lifecycle = Some(Lifecycle::default());
        metadata.data_streams.insert("logs".to_string(), stream);

        assert!(metadata.is_index_managed_by_lifecycle("idx-1"));
        assert!(!metadata.is_index_managed_by_lifecycle("missing"));

        // an ILM policy takes the index out of lifecycle management
        metadata
            .indices
            .get_mut("idx-1")
            .unwrap()
            .settings
            .ilm_policy = Some("hot-warm".to_string());
        assert!(!metadata.is_index_managed_by_lifecycle("idx-1"));
    }

    #[test]
    fn parent_data_stream_finds_backing_stream() {
        let mut metadata = Metadata::default();
        metadata.data_streams.insert(
            "logs".to_string(),
            DataStream::new("logs", vec!["idx-1".to_string()]),
        );
        assert_eq!(
            metadata.parent_data_stream("idx-1").map(|s| s.name.as_str()),
            Some("logs")
        );
        assert!(metadata.parent_data_stream("other").is_none());
    }
}
