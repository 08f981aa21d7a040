//! Multi-round downsampling
//!
//! Downsampling progresses one visible step per lifecycle run: block writes
//! on the source, trigger (or wait for) the last matching round, swap the
//! finished downsample index into the data stream, then delete the source.
//! Each step only fires when the snapshot shows its precondition, so the
//! state machine resumes cleanly across runs and across master failovers.

use super::{record_and_log_error, DataStreamLifecycleService};
use crate::cluster::{BatchedTaskExecutor, ClusterStateTaskListener};
use crate::dedup::Completion;
use crate::metadata::{
    ClusterState, DataStream, DownsampleStatus, DownsamplingRound, IndexMetadata,
};
use crate::transport::{DedupKey, DownsampleRequest, UNBOUNDED_MASTER_TIMEOUT};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, trace};

/// Prefix of every downsample index name.
pub const DOWNSAMPLED_INDEX_PREFIX: &str = "downsample-";

/// The deterministic name of the downsample index for a source index and
/// round interval. Pure function of its inputs: repeated runs that reach the
/// same state produce the same name and therefore the same deduplication key.
pub fn downsample_index_name(source_index: &str, fixed_interval: &str) -> String {
    format!("{DOWNSAMPLED_INDEX_PREFIX}{source_index}-{fixed_interval}")
}

impl DataStreamLifecycleService {
    /// Downsampling phase of a lifecycle run.
    ///
    /// For every target index with matching rounds, advance its downsampling
    /// by at most one action: mark it read-only first, clean up a replaced
    /// source index, or wait for / trigger a round. Returns the indices with
    /// in-flight operations so later phases of the run skip them.
    pub(crate) fn maybe_execute_downsampling(
        &self,
        state: &ClusterState,
        data_stream: &DataStream,
        targets: Vec<String>,
        now_millis: i64,
    ) -> HashSet<String> {
        let mut affected = HashSet::new();
        for index_name in targets {
            let Some(backing_meta) = state.metadata.index(&index_name) else {
                continue;
            };
            let rounds =
                data_stream.downsampling_rounds_for(&index_name, &state.metadata, now_millis);
            if rounds.is_empty() {
                continue;
            }

            if !backing_meta.is_downsample_index()
                && !state.blocks.index_blocked_write(&index_name)
            {
                // writes must stop before the first round can run
                affected.insert(index_name.clone());
                self.add_index_block_once(&index_name);
            } else if backing_meta.is_downsample_index()
                && backing_meta.settings.downsample_status == DownsampleStatus::Success
            {
                // this backing index already replaced its source; the source
                // must go before any further rounds touch the replacement
                if let Some(source) = backing_meta.settings.downsample_source_name.as_deref() {
                    if state.metadata.index(source).is_some() {
                        affected.insert(index_name.clone());
                        self.delete_index_once(
                            source,
                            "replacement with its downsampled index in the data stream",
                        );
                    }
                }
            }

            if !affected.contains(&index_name) {
                // the index has matching rounds and is read-only: wait for an
                // in-progress round or trigger the last matching one
                affected.extend(self.wait_for_in_progress_or_trigger_downsampling(
                    state,
                    data_stream,
                    backing_meta,
                    &rounds,
                ));
            }
        }
        affected
    }

    /// Walk the matching rounds in ascending order. An earlier round that is
    /// visibly in progress wins; otherwise the last matching round triggers.
    fn wait_for_in_progress_or_trigger_downsampling(
        &self,
        state: &ClusterState,
        data_stream: &DataStream,
        backing_index: &IndexMetadata,
        rounds: &[DownsamplingRound],
    ) -> HashSet<String> {
        let mut affected = HashSet::new();
        let Some(last_round) = rounds.last() else {
            return affected;
        };
        let index_name = backing_index.name.as_str();

        for round in rounds {
            let downsample_name = downsample_index_name(index_name, &round.config.fixed_interval);
            match state.metadata.index(&downsample_name) {
                Some(target_meta) => {
                    let in_progress = self.evaluate_downsample_status(
                        data_stream,
                        target_meta.settings.downsample_status,
                        round,
                        last_round,
                        index_name,
                        &downsample_name,
                    );
                    if !in_progress.is_empty() {
                        affected.extend(in_progress);
                        break;
                    }
                }
                None => {
                    if round == last_round {
                        // no earlier round needs maintenance; kick off the
                        // last matching round
                        affected.insert(index_name.to_string());
                        self.downsample_index_once(round, index_name, &downsample_name);
                    }
                }
            }
        }
        affected
    }

    /// Dispatch on the status of an existing downsample index for one round.
    ///
    /// Returns the source index when an operation was started or is still
    /// running, i.e. when round iteration must stop for this index.
    fn evaluate_downsample_status(
        &self,
        data_stream: &DataStream,
        downsample_status: DownsampleStatus,
        current_round: &DownsamplingRound,
        last_round: &DownsamplingRound,
        index_name: &str,
        downsample_name: &str,
    ) -> HashSet<String> {
        let mut affected = HashSet::new();
        match downsample_status {
            DownsampleStatus::Unknown => {
                if current_round == last_round {
                    // an index with the deterministic target name exists but
                    // is not a downsample index: a name clash we cannot work
                    // around, so record it (once) against the source index
                    let clash = Error::ResourceAlreadyExists(downsample_name.to_string());
                    let previous = self.error_store().record(index_name, &clash);
                    let current = self.error_store().get(index_name);
                    if previous.is_none() || previous != current {
                        error!(
                            index = %index_name,
                            data_stream = %data_stream.name,
                            interval = %current_round.config.fixed_interval,
                            downsample_index = %downsample_name,
                            "cannot downsample index, the target downsample index already exists"
                        );
                    }
                }
            }
            DownsampleStatus::Started => {
                trace!(
                    index = %index_name,
                    downsample_index = %downsample_name,
                    "waiting for in-progress downsample"
                );
                // Re-issue the request through the deduplicator: if this node
                // just became master the in-flight task of the previous tenure
                // is invisible, and re-issuing is the only way to learn whether
                // it failed. With one already in flight this is a no-op.
                self.downsample_index_once(current_round, index_name, downsample_name);
                affected.insert(index_name.to_string());
            }
            DownsampleStatus::Success => {
                if !data_stream.contains_index(downsample_name) {
                    // the round finished but the downsample index is not part
                    // of the data stream yet: swap it in for the source index
                    affected.insert(index_name.to_string());
                    self.replace_backing_with_downsample_once(
                        data_stream,
                        index_name,
                        downsample_name,
                    );
                }
            }
        }
        affected
    }

    /// Issue the downsample request for one round through the transport
    /// deduplicator.
    fn downsample_index_once(
        &self,
        round: &DownsamplingRound,
        source_index: &str,
        downsample_name: &str,
    ) {
        let request = DownsampleRequest {
            source_index: source_index.to_string(),
            target_index: downsample_name.to_string(),
            config: round.config.clone(),
            master_timeout: UNBOUNDED_MASTER_TIMEOUT,
        };
        let listener = self.error_recording_listener(
            source_index.to_string(),
            format!("failed to downsample index [{source_index}]; will retry on the next run"),
        );
        self.transport_dedup
            .execute_once(request.dedup_key(), listener, |_key, completion| {
                self.downsample_index(request, completion);
            });
    }

    fn downsample_index(&self, request: DownsampleRequest, completion: Completion<DedupKey>) {
        let client = Arc::clone(&self.client);
        let source_index = request.source_index.clone();
        let target_index = request.target_index.clone();
        info!(source = %source_index, target = %target_index, "issuing downsample request");
        tokio::spawn(async move {
            match client.downsample(request).await {
                Ok(_response) => {
                    info!(
                        source = %source_index,
                        target = %target_index,
                        "downsampled index"
                    );
                    completion.complete(Ok(()));
                }
                Err(error) => completion.complete(Err(error)),
            }
        });
    }

    /// Submit the cluster-state task replacing `source_index` with its
    /// downsample index in the data stream, deduplicated by task identity.
    fn replace_backing_with_downsample_once(
        &self,
        data_stream: &DataStream,
        source_index: &str,
        downsample_name: &str,
    ) {
        let key = ReplaceSourceWithDownsampleKey {
            data_stream: data_stream.name.clone(),
            source_index: source_index.to_string(),
            downsample_index: downsample_name.to_string(),
        };
        let listener = self.error_recording_listener(
            source_index.to_string(),
            format!(
                "failed to replace index [{source_index}] with [{downsample_name}] in data stream [{}]",
                data_stream.name
            ),
        );
        let queue = self.swap_task_queue.clone();
        let error_store = Arc::clone(&self.error_store);
        self.swap_dedup.execute_once(key, listener, |key, completion| {
            trace!(
                data_stream = %key.data_stream,
                source = %key.source_index,
                downsample = %key.downsample_index,
                "submitting swap task"
            );
            queue.submit_task(
                format!(
                    "replace source [{}] with [{}]",
                    key.source_index, key.downsample_index
                ),
                ReplaceSourceWithDownsampleTask {
                    data_stream: key.data_stream.clone(),
                    source_index: key.source_index.clone(),
                    downsample_index: key.downsample_index.clone(),
                    error_store,
                    completion: Mutex::new(Some(completion)),
                },
            );
        });
    }
}

/// Identity of a swap task, used as its deduplication key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplaceSourceWithDownsampleKey {
    pub data_stream: String,
    pub source_index: String,
    pub downsample_index: String,
}

/// Cluster-state task replacing a backing index with its downsample index.
pub struct ReplaceSourceWithDownsampleTask {
    data_stream: String,
    source_index: String,
    downsample_index: String,
    error_store: Arc<super::ErrorStore>,
    completion: Mutex<Option<Completion<ReplaceSourceWithDownsampleKey>>>,
}

impl ReplaceSourceWithDownsampleTask {
    fn execute(&self, state: &ClusterState) -> Result<ClusterState> {
        let Some(stream) = state.metadata.data_stream(&self.data_stream) else {
            return Err(Error::Internal(format!(
                "data stream [{}] no longer exists",
                self.data_stream
            )));
        };
        if stream.contains_index(&self.downsample_index) {
            // a previous batch already swapped; nothing to do
            return Ok(state.clone());
        }
        let Some(position) = stream
            .indices
            .iter()
            .position(|index| index == &self.source_index)
        else {
            return Err(Error::Internal(format!(
                "index [{}] is not a backing index of data stream [{}]",
                self.source_index, self.data_stream
            )));
        };
        if stream.write_index() == Some(self.source_index.as_str()) {
            return Err(Error::Internal(format!(
                "cannot replace the write index [{}] of data stream [{}]",
                self.source_index, self.data_stream
            )));
        }

        debug!(
            data_stream = %self.data_stream,
            source = %self.source_index,
            downsample = %self.downsample_index,
            "replacing source index with downsample index in cluster state"
        );
        let age_basis = state.metadata.index(&self.source_index).map(|meta| {
            meta.settings
                .origination_date_millis
                .unwrap_or(meta.creation_date_millis)
        });

        let mut new_state = state.clone();
        if let Some(stream) = new_state.metadata.data_streams.get_mut(&self.data_stream) {
            stream.indices[position] = self.downsample_index.clone();
        }
        // the downsample index inherits the source's age basis so retention
        // and later rounds keep measuring the original age
        if let (Some(basis), Some(meta)) = (
            age_basis,
            new_state.metadata.indices.get_mut(&self.downsample_index),
        ) {
            meta.settings.origination_date_millis = Some(basis);
        }
        Ok(new_state)
    }

    fn take_completion(&self) -> Option<Completion<ReplaceSourceWithDownsampleKey>> {
        self.completion.lock().take()
    }
}

impl ClusterStateTaskListener for ReplaceSourceWithDownsampleTask {
    fn on_failure(&self, error: Error) {
        record_and_log_error(
            &self.error_store,
            &self.source_index,
            &error,
            "failed to swap the downsample index into the data stream",
        );
        if let Some(completion) = self.take_completion() {
            completion.complete(Err(error));
        }
    }
}

/// Executor of the swap queue.
pub(crate) struct ReplaceBackingWithDownsampleExecutor;

impl BatchedTaskExecutor<ReplaceSourceWithDownsampleTask> for ReplaceBackingWithDownsampleExecutor {
    fn execute(
        &self,
        task: &ReplaceSourceWithDownsampleTask,
        state: &ClusterState,
    ) -> Result<ClusterState> {
        task.execute(state)
    }

    fn task_succeeded(&self, task: &ReplaceSourceWithDownsampleTask) {
        info!(
            data_stream = %task.data_stream,
            source = %task.source_index,
            downsample = %task.downsample_index,
            "replaced source index with its downsample index in the data stream"
        );
        if let Some(completion) = task.take_completion() {
            completion.complete(Ok(()));
        }
    }
}
