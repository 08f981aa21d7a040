//! Transport actions
//!
//! Typed request/response pairs for the admin actions the lifecycle
//! controller issues, and the [`IndicesClient`] seam the controller talks
//! through. Every request projects its logical identity into a [`DedupKey`]
//! that excludes bookkeeping fields, so the same logical operation is
//! deduplicated regardless of which caller built the request.

use crate::metadata::DownsampleConfig;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Sentinel for "effectively no master-node timeout": the operation cost
/// already bounds execution, higher-level timeouts are deliberately absent.
pub const UNBOUNDED_MASTER_TIMEOUT: Duration = Duration::MAX;

/// Index-level blocks that can be requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiBlock {
    Read,
    Write,
    ReadOnly,
}

/// Conditions under which a data stream rolls over its write index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloverConditions {
    pub max_age: Option<Duration>,
    pub max_docs: Option<u64>,
    pub max_primary_shard_size_bytes: Option<u64>,
}

/// Cluster-wide default rollover conditions, resolved per data stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloverConfiguration {
    pub conditions: RolloverConditions,
}

impl Default for RolloverConfiguration {
    fn default() -> Self {
        Self {
            conditions: RolloverConditions {
                max_age: Some(Duration::from_secs(7 * 24 * 3600)),
                max_docs: Some(200_000_000),
                max_primary_shard_size_bytes: Some(50 * 1024 * 1024 * 1024),
            },
        }
    }
}

impl RolloverConfiguration {
    /// Resolve the effective conditions for a stream: a stream must not hold
    /// a write index longer than it is allowed to retain it, so the max-age
    /// condition is capped at the effective retention.
    pub fn resolve(&self, retention: Option<Duration>) -> RolloverConditions {
        let mut conditions = self.conditions.clone();
        if let Some(retention) = retention {
            conditions.max_age = Some(match conditions.max_age {
                Some(max_age) => max_age.min(retention),
                None => retention,
            });
        }
        conditions
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloverRequest {
    /// The data stream to roll over
    pub target: String,
    pub conditions: RolloverConditions,
    pub master_timeout: Duration,
}

impl RolloverRequest {
    pub fn new(target: impl Into<String>, conditions: RolloverConditions) -> Self {
        Self {
            target: target.into(),
            conditions,
            master_timeout: UNBOUNDED_MASTER_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RolloverResponse {
    pub rolled_over: bool,
    pub new_index: Option<String>,
    /// Evaluation result per rollover condition
    pub condition_status: Vec<(String, bool)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteIndexRequest {
    pub index: String,
    pub master_timeout: Duration,
}

impl DeleteIndexRequest {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            master_timeout: UNBOUNDED_MASTER_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddIndexBlockRequest {
    pub block: ApiBlock,
    pub index: String,
    pub master_timeout: Duration,
}

impl AddIndexBlockRequest {
    pub fn new(block: ApiBlock, index: impl Into<String>) -> Self {
        Self {
            block,
            index: index.into(),
            master_timeout: UNBOUNDED_MASTER_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AddBlockShardResult {
    pub shard_id: u32,
    pub failures: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AddBlockResult {
    pub index: String,
    /// Index-level failure, if any
    pub exception: Option<String>,
    pub shards: Vec<AddBlockShardResult>,
}

impl AddBlockResult {
    pub fn has_failures(&self) -> bool {
        self.exception.is_some() || self.shards.iter().any(|s| !s.failures.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct AddIndexBlockResponse {
    pub acknowledged: bool,
    pub indices: Vec<AddBlockResult>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSettingsRequest {
    pub index: String,
    pub merge_policy_floor_segment: u64,
    pub merge_policy_merge_factor: u32,
    pub master_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ForceMergeRequest {
    pub index: String,
    pub max_num_segments: Option<u32>,
    pub only_expunge_deletes: bool,
    pub flush: bool,
    /// Bookkeeping id assigned per request; not part of the logical identity
    pub force_merge_uuid: Uuid,
    pub master_timeout: Duration,
}

impl ForceMergeRequest {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            max_num_segments: None,
            only_expunge_deletes: false,
            flush: true,
            force_merge_uuid: Uuid::new_v4(),
            master_timeout: UNBOUNDED_MASTER_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForceMergeResponse {
    pub total_shards: u32,
    pub successful_shards: u32,
    pub failed_shards: u32,
    pub shard_failures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownsampleRequest {
    pub source_index: String,
    pub target_index: String,
    pub config: DownsampleConfig,
    pub master_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AcknowledgedResponse {
    pub acknowledged: bool,
}

/// Logical identity of a transport request, used as the deduplication key.
///
/// Derived by projection from the request: bookkeeping fields (the
/// force-merge uuid, timeouts are kept since they are part of the request
/// shape the caller chose) never appear here, so two requests for the same
/// logical operation collapse to one in-flight call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    Rollover {
        target: String,
    },
    DeleteIndex {
        index: String,
    },
    AddIndexBlock {
        block: ApiBlock,
        index: String,
    },
    UpdateSettings {
        index: String,
        floor_segment: u64,
        merge_factor: u32,
    },
    ForceMerge {
        index: String,
        max_num_segments: Option<u32>,
        only_expunge_deletes: bool,
        flush: bool,
    },
    Downsample {
        source_index: String,
        target_index: String,
        fixed_interval: String,
    },
}

impl RolloverRequest {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::Rollover {
            target: self.target.clone(),
        }
    }
}

impl DeleteIndexRequest {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::DeleteIndex {
            index: self.index.clone(),
        }
    }
}

impl AddIndexBlockRequest {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::AddIndexBlock {
            block: self.block,
            index: self.index.clone(),
        }
    }
}

impl UpdateSettingsRequest {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::UpdateSettings {
            index: self.index.clone(),
            floor_segment: self.merge_policy_floor_segment,
            merge_factor: self.merge_policy_merge_factor,
        }
    }
}

impl ForceMergeRequest {
    /// The projection intentionally leaves out `force_merge_uuid`: the same
    /// logical merge must deduplicate across callers and across runs.
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::ForceMerge {
            index: self.index.clone(),
            max_num_segments: self.max_num_segments,
            only_expunge_deletes: self.only_expunge_deletes,
            flush: self.flush,
        }
    }
}

impl DownsampleRequest {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::Downsample {
            source_index: self.source_index.clone(),
            target_index: self.target_index.clone(),
            fixed_interval: self.config.fixed_interval.clone(),
        }
    }
}

/// Async client for the admin actions issued by the lifecycle controller.
///
/// This trait abstracts the request transport to peer nodes, allowing a
/// recording implementation in tests.
#[async_trait]
pub trait IndicesClient: Send + Sync {
    async fn rollover(&self, request: RolloverRequest) -> Result<RolloverResponse>;

    async fn delete_index(&self, request: DeleteIndexRequest) -> Result<AcknowledgedResponse>;

    async fn add_index_block(&self, request: AddIndexBlockRequest)
        -> Result<AddIndexBlockResponse>;

    async fn update_settings(&self, request: UpdateSettingsRequest)
        -> Result<AcknowledgedResponse>;

    async fn force_merge(&self, request: ForceMergeRequest) -> Result<ForceMergeResponse>;

    async fn downsample(&self, request: DownsampleRequest) -> Result<AcknowledgedResponse>;
}
