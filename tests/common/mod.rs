//! Shared helpers for the lifecycle integration tests: a recording
//! transport client and cluster-state builders.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streamward::clock::BoundedClock;
use streamward::cluster::ClusterService;
use streamward::config::LifecycleSettings;
use streamward::lifecycle::{
    DataStreamLifecycleService, FORCE_MERGE_COMPLETED_TIMESTAMP_KEY, LIFECYCLE_CUSTOM_METADATA_KEY,
};
use streamward::metadata::{
    ClusterState, DataStream, DownsampleStatus, IndexMetadata, Lifecycle,
};
use streamward::transport::{
    AcknowledgedResponse, AddIndexBlockRequest, AddIndexBlockResponse, DeleteIndexRequest,
    DownsampleRequest, ForceMergeRequest, ForceMergeResponse, IndicesClient, RolloverRequest,
    RolloverResponse, UpdateSettingsRequest,
};
use streamward::{Error, Result};

pub const HOUR_MS: i64 = 3600 * 1000;
pub const DAY_MS: i64 = 24 * HOUR_MS;

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One call observed by the recording client.
#[derive(Debug, Clone)]
pub enum RecordedCall {
    Rollover(RolloverRequest),
    Delete(DeleteIndexRequest),
    AddBlock(AddIndexBlockRequest),
    UpdateSettings(UpdateSettingsRequest),
    ForceMerge(String),
    Downsample(DownsampleRequest),
}

/// Transport client that records every request and answers with
/// configurable responses. Requests marked "held" never resolve, which keeps
/// their deduplicator entry in flight.
#[derive(Default)]
pub struct RecordingIndicesClient {
    calls: Mutex<Vec<RecordedCall>>,
    pub rollover_error: Mutex<Option<Error>>,
    pub force_merge_response: Mutex<Option<ForceMergeResponse>>,
    pub add_block_response: Mutex<Option<AddIndexBlockResponse>>,
    pub hold_deletes: AtomicBool,
    pub hold_downsamples: AtomicBool,
}

impl RecordingIndicesClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, call: RecordedCall) {
        self.calls.lock().push(call);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn rollover_targets(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Rollover(request) => Some(request.target),
                _ => None,
            })
            .collect()
    }

    pub fn deleted_indices(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Delete(request) => Some(request.index),
                _ => None,
            })
            .collect()
    }

    pub fn blocked_indices(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::AddBlock(request) => Some(request.index),
                _ => None,
            })
            .collect()
    }

    pub fn settings_updates(&self) -> Vec<UpdateSettingsRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::UpdateSettings(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn force_merged_indices(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::ForceMerge(index) => Some(index),
                _ => None,
            })
            .collect()
    }

    pub fn downsample_requests(&self) -> Vec<DownsampleRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Downsample(request) => Some(request),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl IndicesClient for RecordingIndicesClient {
    async fn rollover(&self, request: RolloverRequest) -> Result<RolloverResponse> {
        let target = request.target.clone();
        self.record(RecordedCall::Rollover(request));
        if let Some(error) = self.rollover_error.lock().clone() {
            return Err(error);
        }
        Ok(RolloverResponse {
            rolled_over: true,
            new_index: Some(format!("{target}-next")),
            condition_status: vec![("max_age".to_string(), true)],
        })
    }

    async fn delete_index(&self, request: DeleteIndexRequest) -> Result<AcknowledgedResponse> {
        self.record(RecordedCall::Delete(request));
        if self.hold_deletes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(AcknowledgedResponse { acknowledged: true })
    }

    async fn add_index_block(
        &self,
        request: AddIndexBlockRequest,
    ) -> Result<AddIndexBlockResponse> {
        self.record(RecordedCall::AddBlock(request));
        if let Some(response) = self.add_block_response.lock().clone() {
            return Ok(response);
        }
        Ok(AddIndexBlockResponse {
            acknowledged: true,
            indices: Vec::new(),
        })
    }

    async fn update_settings(
        &self,
        request: UpdateSettingsRequest,
    ) -> Result<AcknowledgedResponse> {
        self.record(RecordedCall::UpdateSettings(request));
        Ok(AcknowledgedResponse { acknowledged: true })
    }

    async fn force_merge(&self, request: ForceMergeRequest) -> Result<ForceMergeResponse> {
        self.record(RecordedCall::ForceMerge(request.index.clone()));
        if let Some(response) = self.force_merge_response.lock().clone() {
            return Ok(response);
        }
        Ok(ForceMergeResponse {
            total_shards: 1,
            successful_shards: 1,
            failed_shards: 0,
            shard_failures: Vec::new(),
        })
    }

    async fn downsample(&self, request: DownsampleRequest) -> Result<AcknowledgedResponse> {
        self.record(RecordedCall::Downsample(request));
        if self.hold_downsamples.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(AcknowledgedResponse { acknowledged: true })
    }
}

/// Service under test together with its collaborators.
pub struct Fixture {
    pub client: Arc<RecordingIndicesClient>,
    pub cluster: Arc<ClusterService>,
    pub service: Arc<DataStreamLifecycleService>,
}

pub fn fixture() -> Fixture {
    fixture_with_client(RecordingIndicesClient::new())
}

pub fn fixture_with_client(client: Arc<RecordingIndicesClient>) -> Fixture {
    let cluster = ClusterService::new();
    let service = DataStreamLifecycleService::new(
        LifecycleSettings::default(),
        Arc::clone(&client) as Arc<dyn IndicesClient>,
        Arc::clone(&cluster),
        Arc::new(BoundedClock::default()),
    );
    Fixture {
        client,
        cluster,
        service,
    }
}

pub fn fixture_with_settings(settings: LifecycleSettings) -> Fixture {
    let client = RecordingIndicesClient::new();
    let cluster = ClusterService::new();
    let service = DataStreamLifecycleService::new(
        settings,
        Arc::clone(&client) as Arc<dyn IndicesClient>,
        Arc::clone(&cluster),
        Arc::new(BoundedClock::default()),
    );
    Fixture {
        client,
        cluster,
        service,
    }
}

impl Fixture {
    pub fn set_state(&self, state: ClusterState) {
        self.cluster.publish_state(state);
    }

    /// Run one lifecycle pass over the current cluster state and let the
    /// spawned request futures and queue workers drain.
    pub async fn run(&self) {
        let state = self.cluster.state();
        self.service.run(&state);
        settle().await;
    }
}

/// Give fire-and-forget request futures and task-queue workers time to run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Builder for cluster states used in scenarios.
pub struct StateBuilder {
    state: ClusterState,
}

impl StateBuilder {
    pub fn new() -> Self {
        let mut state = ClusterState::default();
        state.local_node_master = true;
        Self { state }
    }

    pub fn index(mut self, index: IndexMetadata) -> Self {
        self.state
            .metadata
            .indices
            .insert(index.name.clone(), index);
        self
    }

    pub fn stream(mut self, stream: DataStream) -> Self {
        self.state
            .metadata
            .data_streams
            .insert(stream.name.clone(), stream);
        self
    }

    pub fn write_block(mut self, index: &str) -> Self {
        self.state.blocks.write_blocks.insert(index.to_string());
        self
    }

    pub fn not_master(mut self) -> Self {
        self.state.local_node_master = false;
        self
    }

    pub fn build(self) -> ClusterState {
        self.state
    }
}

/// An index created `age_ms` before now.
pub fn index_aged(name: &str, age_ms: i64) -> IndexMetadata {
    IndexMetadata::new(name, now_millis() - age_ms)
}

/// Stamp the force-merge completion marker onto an index, as a previous
/// lifecycle run would have.
pub fn force_merged(mut index: IndexMetadata) -> IndexMetadata {
    index
        .custom_metadata
        .entry(LIFECYCLE_CUSTOM_METADATA_KEY.to_string())
        .or_insert_with(BTreeMap::new)
        .insert(
            FORCE_MERGE_COMPLETED_TIMESTAMP_KEY.to_string(),
            "1".to_string(),
        );
    index
}

/// Mark an index as the product of downsampling `source` with the given
/// task status.
pub fn downsampled_from(
    mut index: IndexMetadata,
    source: &str,
    status: DownsampleStatus,
) -> IndexMetadata {
    index.settings.downsample_source_name = Some(source.to_string());
    index.settings.downsample_status = status;
    index
}

/// A data stream whose lifecycle carries the given retention.
pub fn stream_with_retention(
    name: &str,
    indices: &[&str],
    retention: Duration,
) -> DataStream {
    let mut stream = DataStream::new(name, indices.iter().map(|i| i.to_string()).collect());
    stream.lifecycle = Some(Lifecycle::with_retention(retention));
    stream
}

/// A data stream whose lifecycle carries the given downsampling rounds and
/// no retention.
pub fn stream_with_downsampling(
    name: &str,
    indices: &[&str],
    rounds: Vec<streamward::metadata::DownsamplingRound>,
) -> DataStream {
    let mut stream = DataStream::new(name, indices.iter().map(|i| i.to_string()).collect());
    stream.lifecycle = Some(Lifecycle {
        enabled: true,
        data_retention: None,
        downsampling: Some(rounds),
    });
    stream
}
