//! Integration tests for master-election transitions: clearing on loss,
//! and re-issuing in-flight downsamples after a failover.

mod common;

use common::*;
use std::sync::atomic::Ordering;
use std::time::Duration;
use streamward::metadata::{DownsampleStatus, DownsamplingRound};
use streamward::Error;

const THIRTY_DAYS: Duration = Duration::from_secs(30 * 24 * 3600);

#[tokio::test]
async fn mastership_loss_clears_the_deduplicator_and_the_error_store() {
    let fixture = fixture();
    fixture.service.init();
    fixture.client.hold_deletes.store(true, Ordering::SeqCst);
    *fixture.client.rollover_error.lock() =
        Some(Error::Transport("no route to host".to_string()));

    let state = StateBuilder::new()
        .index(index_aged("logs-000001", 31 * DAY_MS))
        .index(index_aged("logs-000002", DAY_MS))
        .stream(stream_with_retention(
            "logs",
            &["logs-000001", "logs-000002"],
            THIRTY_DAYS,
        ))
        .build();
    fixture.set_state(state.clone());
    assert!(fixture.service.is_master());

    let snapshot = fixture.cluster.state();
    fixture.service.run(&snapshot);
    settle().await;

    // the held delete is still in flight; the failed rollover was recorded
    // against the write index that was current at attempt time
    assert_eq!(fixture.service.in_flight_transport_requests(), 1);
    assert!(fixture.service.error_store().get("logs-000002").is_some());

    // another node takes over
    let mut demoted = state;
    demoted.local_node_master = false;
    fixture.set_state(demoted);

    assert!(!fixture.service.is_master());
    assert_eq!(fixture.service.in_flight_transport_requests(), 0);
    assert!(fixture.service.error_store().is_empty());
}

#[tokio::test]
async fn events_are_ignored_until_the_cluster_state_is_recovered() {
    let fixture = fixture();
    fixture.service.init();

    let mut state = StateBuilder::new()
        .index(index_aged("logs-000001", DAY_MS))
        .stream(stream_with_retention("logs", &["logs-000001"], THIRTY_DAYS))
        .build();
    state.blocks.state_not_recovered = true;
    fixture.set_state(state.clone());

    assert!(
        !fixture.service.is_master(),
        "an unrecovered state must not flip mastership"
    );

    state.blocks.state_not_recovered = false;
    fixture.set_state(state);
    assert!(fixture.service.is_master());
}

#[tokio::test]
async fn a_new_master_reissues_the_downsample_it_cannot_see_in_flight() {
    let client = RecordingIndicesClient::new();
    client.hold_downsamples.store(true, Ordering::SeqCst);

    // node A triggers the round; the request never completes
    let node_a = fixture_with_client(std::sync::Arc::clone(&client));
    let rounds = vec![DownsamplingRound::new(Duration::from_secs(3600), "1h")];
    let state = StateBuilder::new()
        .index(force_merged(index_aged("idx-1", 2 * HOUR_MS)))
        .index(index_aged("idx-2", HOUR_MS))
        .stream(stream_with_downsampling(
            "metrics",
            &["idx-1", "idx-2"],
            rounds.clone(),
        ))
        .write_block("idx-1")
        .build();
    node_a.set_state(state.clone());
    node_a.run().await;
    assert_eq!(client.downsample_requests().len(), 1);

    // node B becomes master with an empty in-flight map; its snapshot shows
    // the downsample task as STARTED, so it re-issues the same request and
    // waits for SUCCESS
    let node_b = fixture_with_client(std::sync::Arc::clone(&client));
    let started = downsampled_from(
        index_aged("downsample-idx-1-1h", 0),
        "idx-1",
        DownsampleStatus::Started,
    );
    let mut state_b = state;
    state_b
        .metadata
        .indices
        .insert("downsample-idx-1-1h".to_string(), started);
    node_b.set_state(state_b);
    node_b.run().await;

    let requests = client.downsample_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].source_index, requests[1].source_index);
    assert_eq!(requests[0].target_index, requests[1].target_index);
    assert_eq!(requests[0].config, requests[1].config);

    // the source is still the backing index; nothing was swapped or deleted
    let stream_b = node_b.cluster.state();
    let stream = stream_b.metadata.data_stream("metrics").unwrap();
    assert_eq!(stream.indices, vec!["idx-1".to_string(), "idx-2".to_string()]);
    assert!(client.deleted_indices().is_empty());
}
