//! Data stream lifecycle service
//!
//! The master-node control loop. Every poll interval the service walks all
//! lifecycle-managed data streams once, issuing whatever actions the
//! current cluster state calls for: rollover of the write index, deletion
//! of indices past retention, merge-policy alignment and force-merge, and
//! multi-round downsampling. Each pass is convergent: actions only fire
//! when the snapshot shows their precondition, requests are deduplicated,
//! and the next pass re-observes the resulting state.

mod downsampling;
mod error_store;

pub use downsampling::{
    downsample_index_name, ReplaceSourceWithDownsampleKey, ReplaceSourceWithDownsampleTask,
    DOWNSAMPLED_INDEX_PREFIX,
};
pub use error_store::ErrorStore;

use crate::clock::BoundedClock;
use crate::cluster::{
    BatchedTaskExecutor, ClusterChangedEvent, ClusterService, ClusterStateListener,
    ClusterStateTaskListener, LifecycleState, MasterServiceTaskQueue, Priority,
};
use crate::config::LifecycleSettings;
use crate::dedup::{Completion, CompletionListener, RequestDeduplicator};
use crate::metadata::{ClusterState, DataStream, IndexMetadata, Metadata};
use crate::scheduler::{Job, SchedulerEngine, SchedulerEvent, SchedulerListener};
use crate::transport::{
    AddIndexBlockRequest, ApiBlock, DedupKey, DeleteIndexRequest, ForceMergeRequest,
    IndicesClient, RolloverConfiguration, RolloverRequest, UpdateSettingsRequest,
    UNBOUNDED_MASTER_TIMEOUT,
};
use crate::{Error, Result};
use downsampling::ReplaceBackingWithDownsampleExecutor;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tracing::{debug, error, info, trace};

/// Name of the scheduler job driving the lifecycle runs.
pub const LIFECYCLE_JOB_NAME: &str = "data_stream_lifecycle";
/// Key of the lifecycle-owned custom metadata map on an index.
pub const LIFECYCLE_CUSTOM_METADATA_KEY: &str = "data_stream_lifecycle";
/// Key holding the force-merge completion stamp (epoch millis, decimal).
pub const FORCE_MERGE_COMPLETED_TIMESTAMP_KEY: &str = "force_merge_completed_timestamp";

/// True when the index's lifecycle custom metadata carries the force-merge
/// completion stamp.
pub fn is_force_merge_complete(index: &IndexMetadata) -> bool {
    index
        .custom_data(LIFECYCLE_CUSTOM_METADATA_KEY)
        .is_some_and(|custom| custom.contains_key(FORCE_MERGE_COMPLETED_TIMESTAMP_KEY))
}

/// The data stream lifecycle controller.
///
/// Constructed inert; [`init`](Self::init) wires the cluster listener, and
/// the first master-election transition starts the scheduler job. Losing
/// mastership cancels the job, clears the transport deduplicator and wipes
/// the error store so a re-election starts from a clean slate.
pub struct DataStreamLifecycleService {
    client: Arc<dyn IndicesClient>,
    cluster_service: Arc<ClusterService>,
    clock: Arc<BoundedClock>,
    transport_dedup: Arc<RequestDeduplicator<DedupKey>>,
    swap_dedup: Arc<RequestDeduplicator<ReplaceSourceWithDownsampleKey>>,
    error_store: Arc<ErrorStore>,
    is_master: AtomicBool,
    poll_interval: RwLock<Duration>,
    rollover_configuration: RwLock<RolloverConfiguration>,
    target_merge_factor: AtomicU32,
    target_floor_segment_bytes: AtomicU64,
    /// Lazily created on the first mastership gain, then read-only
    scheduler: OnceLock<Arc<SchedulerEngine>>,
    self_ref: OnceLock<Weak<DataStreamLifecycleService>>,
    force_merge_task_queue: MasterServiceTaskQueue<UpdateForceMergeCompleteTask>,
    swap_task_queue: MasterServiceTaskQueue<ReplaceSourceWithDownsampleTask>,
}

impl DataStreamLifecycleService {
    /// Build the service. Must run inside a tokio runtime: the cluster-state
    /// task queues spawn their batch workers here.
    pub fn new(
        settings: LifecycleSettings,
        client: Arc<dyn IndicesClient>,
        cluster_service: Arc<ClusterService>,
        clock: Arc<BoundedClock>,
    ) -> Arc<Self> {
        let force_merge_task_queue = cluster_service.create_task_queue(
            "data-stream-lifecycle-forcemerge-state-update",
            Priority::Low,
            ForceMergeStampExecutor,
        );
        let swap_task_queue = cluster_service.create_task_queue(
            "data-stream-lifecycle-swap-source-with-downsample",
            Priority::Normal,
            ReplaceBackingWithDownsampleExecutor,
        );

        Arc::new(Self {
            client,
            cluster_service,
            clock,
            transport_dedup: RequestDeduplicator::new(),
            swap_dedup: RequestDeduplicator::new(),
            error_store: Arc::new(ErrorStore::new()),
            is_master: AtomicBool::new(false),
            poll_interval: RwLock::new(settings.poll_interval),
            rollover_configuration: RwLock::new(settings.rollover),
            target_merge_factor: AtomicU32::new(settings.target_merge_factor),
            target_floor_segment_bytes: AtomicU64::new(settings.target_floor_segment_bytes),
            scheduler: OnceLock::new(),
            self_ref: OnceLock::new(),
            force_merge_task_queue,
            swap_task_queue,
        })
    }

    /// Wire the cluster listener. Separate from construction so the service
    /// never publishes a reference to itself before it is fully built.
    pub fn init(self: &Arc<Self>) {
        let _ = self.self_ref.set(Arc::downgrade(self));
        self.cluster_service
            .add_listener(Arc::clone(self) as Arc<dyn ClusterStateListener>);
    }

    /// Stop the scheduler and wipe the error store.
    pub fn close(&self) {
        if let Some(engine) = self.scheduler.get() {
            engine.stop();
        }
        self.error_store.clear_all();
    }

    pub fn error_store(&self) -> &ErrorStore {
        &self.error_store
    }

    /// Number of transport requests currently in flight.
    pub fn in_flight_transport_requests(&self) -> usize {
        self.transport_dedup.len()
    }

    pub fn is_master(&self) -> bool {
        self.is_master.load(Ordering::SeqCst)
    }

    /// Update the poll interval and re-register the job at the new cadence.
    pub fn update_poll_interval(&self, interval: Duration) {
        *self.poll_interval.write() = interval;
        self.maybe_schedule_job();
    }

    pub fn update_rollover_configuration(&self, configuration: RolloverConfiguration) {
        *self.rollover_configuration.write() = configuration;
    }

    pub fn update_target_merge_factor(&self, factor: u32) {
        self.target_merge_factor.store(factor, Ordering::Relaxed);
    }

    pub fn update_target_floor_segment_bytes(&self, bytes: u64) {
        self.target_floor_segment_bytes.store(bytes, Ordering::Relaxed);
    }

    fn maybe_schedule_job(&self) {
        if !self.is_master() {
            return;
        }
        // don't schedule while the node is shutting down
        let lifecycle_state = self.cluster_service.lifecycle_state();
        if matches!(lifecycle_state, LifecycleState::Stopped | LifecycleState::Closed) {
            trace!(
                ?lifecycle_state,
                "not scheduling the lifecycle job, cluster service is shutting down"
            );
            return;
        }

        let engine = self.scheduler.get_or_init(|| {
            let engine = SchedulerEngine::new(Arc::clone(&self.clock));
            if let Some(me) = self.self_ref.get().and_then(Weak::upgrade) {
                engine.register(me as Arc<dyn SchedulerListener>);
            }
            engine
        });
        engine.add(Job::new(LIFECYCLE_JOB_NAME, *self.poll_interval.read()));
    }

    fn cancel_job(&self) {
        if let Some(engine) = self.scheduler.get() {
            engine.remove(LIFECYCLE_JOB_NAME);
        }
    }

    /// One lifecycle pass over every data stream in `state`.
    ///
    /// The pass is synchronous through the decision phase; all issued
    /// requests are fire-and-forget with completion callbacks, so this never
    /// blocks on I/O.
    pub fn run(&self, state: &ClusterState) {
        let now = self.clock.now_millis();
        let mut affected_indices = 0usize;
        let mut affected_data_streams = 0usize;

        for data_stream in state.metadata.data_streams.values() {
            self.clear_error_store_for_unmanaged_indices(state);
            let lifecycle_enabled = data_stream
                .lifecycle
                .as_ref()
                .map(|l| l.enabled)
                .unwrap_or(false);
            if !lifecycle_enabled {
                continue;
            }
            let Some(write_index) = data_stream.write_index() else {
                continue;
            };
            // The pre-rollover write index. Whether or not the rollover goes
            // through, it keeps taking writes until the next run observes the
            // new generation, so it is excluded from every later phase.
            let current_run_write_index = write_index.to_string();

            self.maybe_execute_rollover(state, data_stream);

            let indices_being_removed = self.maybe_execute_retention(state, data_stream, now);

            let mut excluded: HashSet<String> = HashSet::new();
            excluded.insert(current_run_write_index);
            excluded.extend(indices_being_removed);

            let targets = Self::target_indices(data_stream, &excluded, &state.metadata);
            excluded.extend(self.maybe_execute_force_merge(state, targets));

            let targets = Self::target_indices(data_stream, &excluded, &state.metadata);
            excluded.extend(self.maybe_execute_downsampling(state, data_stream, targets, now));

            affected_indices += excluded.len();
            affected_data_streams += 1;
        }

        trace!(
            indices = affected_indices,
            data_streams = affected_data_streams,
            "lifecycle run issued operations"
        );
    }

    /// Lifecycle-managed backing indices that are not excluded for the
    /// remainder of this run.
    fn target_indices(
        data_stream: &DataStream,
        excluded: &HashSet<String>,
        metadata: &Metadata,
    ) -> Vec<String> {
        data_stream
            .indices
            .iter()
            .filter(|index| {
                metadata.is_index_managed_by_lifecycle(index) && !excluded.contains(*index)
            })
            .cloned()
            .collect()
    }

    /// Drop error records for indices that no longer exist or stopped being
    /// lifecycle-managed (e.g. switched to an ILM policy), so the store does
    /// not grow without bound or keep reporting stale state.
    fn clear_error_store_for_unmanaged_indices(&self, state: &ClusterState) {
        for index in self.error_store.all_indices() {
            let still_managed = state.metadata.index(&index).is_some()
                && state.metadata.is_index_managed_by_lifecycle(&index);
            if !still_managed {
                self.error_store.clear(&index);
            }
        }
    }

    fn maybe_execute_rollover(&self, state: &ClusterState, data_stream: &DataStream) {
        let Some(write_index) = data_stream.write_index() else {
            return;
        };
        if !state.metadata.is_index_managed_by_lifecycle(write_index) {
            return;
        }

        let retention = data_stream
            .lifecycle
            .as_ref()
            .and_then(|l| l.effective_retention());
        let conditions = self.rollover_configuration.read().resolve(retention);
        let request = RolloverRequest::new(&data_stream.name, conditions);
        let listener = self.error_recording_listener(
            write_index.to_string(),
            format!("failed to roll over data stream [{}]", data_stream.name),
        );
        let write_index = write_index.to_string();
        self.transport_dedup
            .execute_once(request.dedup_key(), listener, |_key, completion| {
                self.rollover_data_stream(write_index, request, completion);
            });
    }

    /// Issue deletes for every backing index past the stream's retention and
    /// return those indices so later phases skip them.
    fn maybe_execute_retention(
        &self,
        state: &ClusterState,
        data_stream: &DataStream,
        now_millis: i64,
    ) -> Vec<String> {
        let Some(retention) = data_stream
            .lifecycle
            .as_ref()
            .and_then(|l| l.effective_retention())
        else {
            return Vec::new();
        };

        let past_retention = data_stream.indices_past_retention(&state.metadata, now_millis);
        for index in &past_retention {
            // one delete per index; batching deletes is a possible follow-up
            self.delete_index_once(
                index,
                &format!("the lapsed [{}s] retention period", retention.as_secs()),
            );
        }
        past_retention
    }

    /// Force-merge phase. Indices whose merge-policy settings do not match
    /// the configured targets get a settings update first; the merge itself
    /// happens on a later run once the snapshot shows matching settings.
    fn maybe_execute_force_merge(
        &self,
        state: &ClusterState,
        indices: Vec<String>,
    ) -> HashSet<String> {
        let mut affected = HashSet::new();
        for index_name in indices {
            let Some(backing) = state.metadata.index(&index_name) else {
                continue;
            };
            if is_force_merge_complete(backing) {
                trace!(index = %index_name, "already force merged");
                continue;
            }

            let target_floor = self.target_floor_segment_bytes.load(Ordering::Relaxed);
            let target_factor = self.target_merge_factor.load(Ordering::Relaxed);
            let floor_matches = backing.settings.merge_policy_floor_segment == Some(target_floor);
            let factor_matches = backing.settings.merge_policy_merge_factor == Some(target_factor);

            if !floor_matches || !factor_matches {
                affected.insert(index_name.clone());
                let request = UpdateSettingsRequest {
                    index: index_name.clone(),
                    merge_policy_floor_segment: target_floor,
                    merge_policy_merge_factor: target_factor,
                    master_timeout: UNBOUNDED_MASTER_TIMEOUT,
                };
                let listener = self.error_recording_listener(
                    index_name.clone(),
                    format!("failed to update merge policy settings for index [{index_name}]"),
                );
                self.transport_dedup
                    .execute_once(request.dedup_key(), listener, |_key, completion| {
                        self.update_index_settings(request, completion);
                    });
            } else {
                affected.insert(index_name.clone());
                let request = ForceMergeRequest::new(&index_name);
                let listener = self.error_recording_listener(
                    index_name.clone(),
                    format!(
                        "failed to force merge index [{index_name}]; will retry on the next run"
                    ),
                );
                self.transport_dedup
                    .execute_once(request.dedup_key(), listener, |_key, completion| {
                        self.force_merge_index(request, completion);
                    });
            }
        }
        affected
    }

    /// Issue a delete for `index` through the transport deduplicator.
    pub(crate) fn delete_index_once(&self, index: &str, reason: &str) {
        let request = DeleteIndexRequest::new(index);
        let listener = self.error_recording_listener(
            index.to_string(),
            format!("failed to delete index [{index}]"),
        );
        let reason = reason.to_string();
        self.transport_dedup
            .execute_once(request.dedup_key(), listener, |_key, completion| {
                self.delete_index(request, reason, completion);
            });
    }

    /// Issue a write-block for `index` through the transport deduplicator.
    pub(crate) fn add_index_block_once(&self, index: &str) {
        let request = AddIndexBlockRequest::new(ApiBlock::Write, index);
        let listener = self.error_recording_listener(
            index.to_string(),
            format!("failed to mark index [{index}] as read-only"),
        );
        self.transport_dedup
            .execute_once(request.dedup_key(), listener, |_key, completion| {
                self.add_index_block(request, completion);
            });
    }

    fn rollover_data_stream(
        &self,
        write_index_name: String,
        request: RolloverRequest,
        completion: Completion<DedupKey>,
    ) {
        let client = Arc::clone(&self.client);
        let cluster_service = Arc::clone(&self.cluster_service);
        let rollover_target = request.target.clone();
        tokio::spawn(async move {
            trace!(data_stream = %rollover_target, "issuing rollover request");
            match client.rollover(request).await {
                Ok(response) => {
                    // log only when the conditions were met and a rollover happened
                    if response.rolled_over {
                        let met_conditions: Vec<String> = response
                            .condition_status
                            .iter()
                            .filter(|(_, met)| *met)
                            .map(|(condition, _)| condition.clone())
                            .collect();
                        info!(
                            data_stream = %rollover_target,
                            new_index = ?response.new_index,
                            conditions = ?met_conditions,
                            "rolled over data stream"
                        );
                    }
                    completion.complete(Ok(()));
                }
                Err(error) => {
                    // Attribute the failure to the write index that was current
                    // when the rollover was attempted. If the stream has rolled
                    // over in the meantime there is no point recording an error
                    // against the previous write index; persistent problems
                    // will surface against the current one on the next run.
                    let current_state = cluster_service.state();
                    let still_write_index = current_state
                        .metadata
                        .data_stream(&rollover_target)
                        .and_then(|stream| stream.write_index())
                        .is_some_and(|write_index| write_index == write_index_name);
                    if still_write_index {
                        completion.complete(Err(error));
                    } else {
                        completion.complete(Ok(()));
                    }
                }
            }
        });
    }

    fn update_index_settings(
        &self,
        request: UpdateSettingsRequest,
        completion: Completion<DedupKey>,
    ) {
        let client = Arc::clone(&self.client);
        let error_store = Arc::clone(&self.error_store);
        let target_index = request.index.clone();
        let floor_segment = request.merge_policy_floor_segment;
        let merge_factor = request.merge_policy_merge_factor;
        tokio::spawn(async move {
            trace!(
                index = %target_index,
                floor_segment,
                merge_factor,
                "issuing update settings request"
            );
            match client.update_settings(request).await {
                Ok(response) => {
                    if response.acknowledged {
                        info!(
                            index = %target_index,
                            floor_segment,
                            merge_factor,
                            "updated merge policy settings"
                        );
                    } else {
                        trace!(index = %target_index, "update settings request was not acknowledged");
                    }
                    completion.complete(Ok(()));
                }
                Err(Error::IndexNotFound(_)) => {
                    // index was already deleted, nothing left to update
                    error_store.clear(&target_index);
                    completion.complete(Ok(()));
                }
                Err(error) => completion.complete(Err(error)),
            }
        });
    }

    fn add_index_block(&self, request: AddIndexBlockRequest, completion: Completion<DedupKey>) {
        let client = Arc::clone(&self.client);
        let error_store = Arc::clone(&self.error_store);
        let target_index = request.index.clone();
        let block = request.block;
        tokio::spawn(async move {
            trace!(index = %target_index, ?block, "issuing add block request");
            match client.add_index_block(request).await {
                Ok(response) => {
                    if response.acknowledged {
                        info!(index = %target_index, ?block, "added block to index");
                        completion.complete(Ok(()));
                        return;
                    }
                    let result = response
                        .indices
                        .iter()
                        .find(|result| result.index == target_index);
                    let outcome = match result {
                        None => {
                            // no explicit result for our index; surface the
                            // generic failure and let the next run retry
                            trace!(
                                index = %target_index,
                                "unacknowledged add block response carried no result for the index"
                            );
                            Err(Error::NotAcknowledged(format!(
                                "request to mark index [{target_index}] as read-only was not acknowledged"
                            )))
                        }
                        Some(result) if result.has_failures() => {
                            if let Some(exception) = &result.exception {
                                Err(Error::Transport(exception.clone()))
                            } else {
                                let failures: Vec<String> = result
                                    .shards
                                    .iter()
                                    .flat_map(|shard| shard.failures.iter().cloned())
                                    .collect();
                                Err(Error::ShardFailures(failures.join(",")))
                            }
                        }
                        Some(_) => Err(Error::NotAcknowledged(format!(
                            "request to mark index [{target_index}] as read-only was not acknowledged"
                        ))),
                    };
                    completion.complete(outcome);
                }
                Err(Error::IndexNotFound(_)) => {
                    // index was already deleted, treat as success
                    error_store.clear(&target_index);
                    completion.complete(Ok(()));
                }
                Err(error) => completion.complete(Err(error)),
            }
        });
    }

    fn delete_index(
        &self,
        request: DeleteIndexRequest,
        reason: String,
        completion: Completion<DedupKey>,
    ) {
        let client = Arc::clone(&self.client);
        let error_store = Arc::clone(&self.error_store);
        let target_index = request.index.clone();
        tokio::spawn(async move {
            trace!(index = %target_index, "issuing delete request");
            match client.delete_index(request).await {
                Ok(response) => {
                    if response.acknowledged {
                        info!(index = %target_index, %reason, "deleted index");
                    } else {
                        trace!(
                            index = %target_index,
                            "delete request was not acknowledged; retrying on the next run if the index still exists"
                        );
                    }
                    completion.complete(Ok(()));
                }
                Err(Error::IndexNotFound(_)) => {
                    // index was already deleted, treat as success
                    error_store.clear(&target_index);
                    completion.complete(Ok(()));
                }
                Err(error @ Error::SnapshotInProgress(_)) => {
                    info!(
                        index = %target_index,
                        "unable to delete index while it is being snapshotted; retrying on the next run"
                    );
                    completion.complete(Err(error));
                }
                Err(error) => completion.complete(Err(error)),
            }
        });
    }

    /// Execute the force merge; on a fully successful response, submit the
    /// cluster-state task stamping the completion timestamp. The completion
    /// resolves only after the stamp is committed (or anything failed).
    fn force_merge_index(&self, request: ForceMergeRequest, completion: Completion<DedupKey>) {
        let client = Arc::clone(&self.client);
        let clock = Arc::clone(&self.clock);
        let queue = self.force_merge_task_queue.clone();
        let target_index = request.index.clone();
        info!(index = %target_index, "issuing force merge request");
        tokio::spawn(async move {
            match client.force_merge(request).await {
                Ok(response) => {
                    if response.failed_shards > 0 {
                        let failures = if response.shard_failures.is_empty() {
                            "unknown".to_string()
                        } else {
                            response.shard_failures.join(",")
                        };
                        completion.complete(Err(Error::ShardFailures(format!(
                            "force merge failed on {} shards of index [{}]: [{}]",
                            response.failed_shards, target_index, failures
                        ))));
                    } else if response.successful_shards != response.total_shards {
                        completion.complete(Err(Error::ShardFailures(format!(
                            "force merge of index [{}] reached only {} of {} shards",
                            target_index, response.successful_shards, response.total_shards
                        ))));
                    } else {
                        info!(index = %target_index, "force merged index");
                        queue.submit_task(
                            format!("stamp force merge complete for [{target_index}]"),
                            UpdateForceMergeCompleteTask {
                                target_index,
                                clock,
                                completion: Mutex::new(Some(completion)),
                            },
                        );
                    }
                }
                Err(error) => completion.complete(Err(error)),
            }
        });
    }

    /// A completion listener that clears the error record for `target_index`
    /// on success and records-and-logs the failure otherwise.
    pub(crate) fn error_recording_listener(
        &self,
        target_index: String,
        message: String,
    ) -> CompletionListener {
        let error_store = Arc::clone(&self.error_store);
        Box::new(move |result| match result {
            Ok(()) => error_store.clear(&target_index),
            Err(err) => record_and_log_error(&error_store, &target_index, &err, &message),
        })
    }
}

impl ClusterStateListener for DataStreamLifecycleService {
    fn cluster_changed(&self, event: &ClusterChangedEvent) {
        // wait for the cluster state to be recovered
        if event.state.blocks.state_not_recovered {
            return;
        }

        let now_master = event.local_node_master();
        let was_master = self.is_master.swap(now_master, Ordering::SeqCst);
        if was_master == now_master {
            return;
        }
        if now_master {
            // we weren't the master, and now we are
            self.maybe_schedule_job();
        } else {
            // we were the master, and now we aren't
            self.cancel_job();
            // clear the deduplicator so a re-election can re-issue requests
            // without fanning into completions of the previous tenure
            self.transport_dedup.clear();
            self.error_store.clear_all();
        }
    }
}

impl SchedulerListener for DataStreamLifecycleService {
    fn triggered(&self, event: SchedulerEvent) {
        if event.job_name != LIFECYCLE_JOB_NAME {
            return;
        }
        if self.is_master() {
            trace!(
                job = %event.job_name,
                scheduled = %event.scheduled_time,
                triggered = %event.triggered_time,
                "lifecycle job triggered"
            );
            let state = self.cluster_service.state();
            self.run(&state);
        }
    }
}

/// Records the failure for the index and logs at ERROR only when the stored
/// message changed, keeping repeat failures at TRACE.
pub(crate) fn record_and_log_error(
    error_store: &ErrorStore,
    target_index: &str,
    err: &Error,
    message: &str,
) {
    let previous = error_store.record(target_index, err);
    let current = error_store.get(target_index);
    if previous.is_none() || previous != current {
        error!(index = %target_index, error = %err, "{message}");
    } else {
        trace!(index = %target_index, error = %err, "{message}");
    }
}

/// Cluster-state task writing the force-merge completion timestamp into the
/// index's lifecycle custom metadata, preserving any other keys in that map.
pub struct UpdateForceMergeCompleteTask {
    target_index: String,
    clock: Arc<BoundedClock>,
    completion: Mutex<Option<Completion<DedupKey>>>,
}

impl UpdateForceMergeCompleteTask {
    fn execute(&self, state: &ClusterState) -> Result<ClusterState> {
        debug!(index = %self.target_index, "stamping force merge completion into cluster state");
        let mut new_state = state.clone();
        let Some(index) = new_state.metadata.indices.get_mut(&self.target_index) else {
            return Err(Error::IndexNotFound(self.target_index.clone()));
        };
        let custom = index
            .custom_metadata
            .entry(LIFECYCLE_CUSTOM_METADATA_KEY.to_string())
            .or_default();
        custom.insert(
            FORCE_MERGE_COMPLETED_TIMESTAMP_KEY.to_string(),
            self.clock.now_millis().to_string(),
        );
        Ok(new_state)
    }

    fn take_completion(&self) -> Option<Completion<DedupKey>> {
        self.completion.lock().take()
    }
}

impl ClusterStateTaskListener for UpdateForceMergeCompleteTask {
    fn on_failure(&self, error: Error) {
        if let Some(completion) = self.take_completion() {
            completion.complete(Err(error));
        }
    }
}

struct ForceMergeStampExecutor;

impl BatchedTaskExecutor<UpdateForceMergeCompleteTask> for ForceMergeStampExecutor {
    fn execute(
        &self,
        task: &UpdateForceMergeCompleteTask,
        state: &ClusterState,
    ) -> Result<ClusterState> {
        task.execute(state)
    }

    fn task_succeeded(&self, task: &UpdateForceMergeCompleteTask) {
        trace!(index = %task.target_index, "updated cluster state after force merge");
        if let Some(completion) = task.take_completion() {
            completion.complete(Ok(()));
        }
    }
}
