//! Behavioral tests for the runloop: demand, buffering, back-pressure,
//! revocation, and failure handling.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::time::timeout;

use common::*;
use kaflow::{ClientError, DiagnosticEvent, FetchError, OffsetRetrieval};

#[tokio::test]
async fn pull_receives_polled_records() {
    let (consumer, mut assignments, mock, _events) =
        start(test_config(20), vec![assign_step(&[0])]);

    let (assigned_tp, mut stream) = timeout(WAIT, assignments.next())
        .await
        .expect("assignment arrives")
        .expect("hub open")
        .expect("no failure");
    assert_eq!(assigned_tp, tp("events", 0));
    assert_eq!(mock.subscribed(), vec!["events".to_string()]);

    mock.push_step(records_step(vec![record(0, 0), record(0, 1)]));

    let chunk = timeout(WAIT, stream.next())
        .await
        .expect("chunk arrives")
        .expect("stream open")
        .expect("no failure");
    assert_eq!(chunk.len(), 2);
    assert_eq!(chunk[0].tp(), &tp("events", 0));
    assert_eq!(
        chunk.iter().map(|r| r.offset()).collect::<Vec<_>>(),
        [0, 1]
    );

    consumer.graceful_shutdown();
}

#[tokio::test]
async fn unrequested_records_buffer_until_demand() {
    let (consumer, _assignments, mock, mut events) =
        start(test_config(20), vec![assign_step(&[0, 1])]);

    wait_for_event(&mut events, |event| {
        matches!(event, DiagnosticEvent::PartitionsAssigned { .. })
    })
    .await;
    mock.push_step(records_step(vec![record(0, 0), record(1, 0)]));

    let chunk = timeout(WAIT, consumer.request(tp("events", 0)))
        .await
        .expect("pull resolves")
        .expect("records");
    assert_eq!(chunk.len(), 1);
    assert_eq!(chunk[0].offset(), 0);
    assert_eq!(chunk[0].tp(), &tp("events", 0));

    // partition 1 delivered without demand; the buffer serves the next pull
    // even though no further records arrive
    let chunk = timeout(WAIT, consumer.request(tp("events", 1)))
        .await
        .expect("pull resolves")
        .expect("records");
    assert_eq!(chunk.len(), 1);
    assert_eq!(chunk[0].tp(), &tp("events", 1));
    assert_eq!(chunk[0].payload(), Some("payload-1-0".as_bytes()));

    consumer.graceful_shutdown();
}

#[tokio::test]
async fn pulls_for_the_same_partition_resolve_in_enqueue_order() {
    let (consumer, _assignments, mock, mut events) =
        start(test_config(20), vec![assign_step(&[0])]);
    let consumer = Arc::new(consumer);

    wait_for_event(&mut events, |event| {
        matches!(event, DiagnosticEvent::PartitionsAssigned { .. })
    })
    .await;

    let first = {
        let consumer = Arc::clone(&consumer);
        tokio::spawn(async move { consumer.request(tp("events", 0)).await })
    };
    let second = {
        let consumer = Arc::clone(&consumer);
        tokio::spawn(async move { consumer.request(tp("events", 0)).await })
    };

    // let both pulls register before any records arrive
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    mock.push_step(records_step(vec![record(0, 0)]));
    mock.push_step(records_step(vec![record(0, 1)]));

    let first = timeout(WAIT, first).await.unwrap().unwrap().unwrap();
    let second = timeout(WAIT, second).await.unwrap().unwrap().unwrap();

    // one batch each, never coalesced
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    let mut offsets = vec![first[0].offset(), second[0].offset()];
    offsets.sort_unstable();
    assert_eq!(offsets, [0, 1]);

    consumer.graceful_shutdown();
}

#[tokio::test]
async fn revoked_partition_ends_pending_pull() {
    let (consumer, mut assignments, mock, mut events) =
        start(test_config(20), vec![assign_step(&[0])]);

    let (_, mut stream) = timeout(WAIT, assignments.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let pull = tokio::spawn(async move {
        let item = stream.next().await;
        (item, stream)
    });

    // the pull is registered and unfulfilled
    wait_for_event(&mut events, |event| {
        matches!(event, DiagnosticEvent::Polled { pending, .. } if pending.contains(&tp("events", 0)))
    })
    .await;

    mock.push_step(revoke_step(&[0]));

    let (item, mut stream) = timeout(WAIT, pull).await.unwrap().unwrap();
    assert!(item.is_none());
    assert!(stream.next().await.is_none());
    assert!(consumer.metrics().rebalances >= 1);
}

#[tokio::test]
async fn pull_for_unassigned_partition_fails_fast() {
    let (consumer, _assignments, _mock, mut events) =
        start(test_config(20), vec![assign_step(&[0])]);

    wait_for_event(&mut events, |event| {
        matches!(event, DiagnosticEvent::PartitionsAssigned { .. })
    })
    .await;

    let err = timeout(WAIT, consumer.request(tp("events", 9)))
        .await
        .expect("pull resolves")
        .expect_err("partition is not assigned");
    assert_eq!(err, FetchError::Ended);

    consumer.graceful_shutdown();
}

#[tokio::test]
async fn partitions_without_demand_are_paused() {
    let (consumer, _assignments, mock, mut events) =
        start(test_config(20), vec![assign_step(&[0, 1])]);
    let consumer = Arc::new(consumer);

    wait_for_event(&mut events, |event| {
        matches!(event, DiagnosticEvent::PartitionsAssigned { .. })
    })
    .await;
    // the poll after the assignment became visible pauses everything
    wait_for_polls(&mut events, 2).await;
    let paused = mock.paused();
    assert!(paused.contains(&tp("events", 0)));
    assert!(paused.contains(&tp("events", 1)));

    // demand for partition 0 resumes it at the next poll
    let pull = {
        let consumer = Arc::clone(&consumer);
        tokio::spawn(async move { consumer.request(tp("events", 0)).await })
    };
    wait_for_event(&mut events, |event| {
        matches!(event, DiagnosticEvent::Polled { requested, .. } if requested.contains(&tp("events", 0)))
    })
    .await;
    let paused = mock.paused();
    assert!(!paused.contains(&tp("events", 0)));
    assert!(paused.contains(&tp("events", 1)));

    mock.push_step(records_step(vec![record(0, 0)]));
    timeout(WAIT, pull).await.unwrap().unwrap().unwrap();

    consumer.graceful_shutdown();
}

#[tokio::test]
async fn manual_offsets_seek_newly_assigned_partitions() {
    let mut config = test_config(20);
    config.offset_retrieval = OffsetRetrieval::Manual(Arc::new(|partitions| {
        Ok(partitions.iter().map(|tp| (tp.clone(), 42)).collect())
    }));
    let (consumer, _assignments, mock, mut events) = start(config, vec![assign_step(&[0])]);

    wait_for_event(&mut events, |event| {
        matches!(event, DiagnosticEvent::PartitionsAssigned { .. })
    })
    .await;
    wait_for_polls(&mut events, 1).await;

    assert_eq!(mock.seeks(), vec![(tp("events", 0), 42)]);

    consumer.graceful_shutdown();
}

#[tokio::test]
async fn auto_offsets_never_seek() {
    let (consumer, _assignments, mock, mut events) =
        start(test_config(20), vec![assign_step(&[0])]);

    wait_for_event(&mut events, |event| {
        matches!(event, DiagnosticEvent::PartitionsAssigned { .. })
    })
    .await;
    wait_for_polls(&mut events, 2).await;

    assert!(mock.seeks().is_empty());

    consumer.graceful_shutdown();
}

#[tokio::test]
async fn inactive_subscription_polls_are_harmless() {
    let (consumer, _assignments, mock, mut events) = start(
        test_config(20),
        vec![inactive_step(), inactive_step(), assign_step(&[0])],
    );

    wait_for_event(&mut events, |event| {
        matches!(event, DiagnosticEvent::PartitionsAssigned { .. })
    })
    .await;
    mock.push_step(records_step(vec![record(0, 7)]));
    let chunk = timeout(WAIT, consumer.request(tp("events", 0)))
        .await
        .expect("pull resolves")
        .expect("records");
    assert_eq!(chunk[0].offset(), 7);

    consumer.graceful_shutdown();
}

#[tokio::test]
async fn fatal_poll_error_fails_pulls_and_the_hub() {
    let (_consumer, mut assignments, mock, mut events) =
        start(test_config(20), vec![assign_step(&[0])]);

    let (_, mut stream) = timeout(WAIT, assignments.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let pull = tokio::spawn(async move { stream.next().await });
    wait_for_event(&mut events, |event| {
        matches!(event, DiagnosticEvent::Polled { pending, .. } if pending.contains(&tp("events", 0)))
    })
    .await;

    mock.push_step(fail_step(ClientError::Poll("broker down".to_string())));

    let item = timeout(WAIT, pull).await.unwrap().unwrap();
    assert_eq!(
        item.unwrap().unwrap_err(),
        ClientError::Poll("broker down".to_string())
    );

    let failure = timeout(WAIT, assignments.next())
        .await
        .expect("hub failure arrives")
        .expect("hub yields the cause");
    assert_eq!(
        failure.unwrap_err(),
        ClientError::Poll("broker down".to_string())
    );
    assert!(timeout(WAIT, assignments.next()).await.unwrap().is_none());
}

#[tokio::test]
async fn metrics_track_runloop_activity() {
    let (consumer, _assignments, mock, mut events) =
        start(test_config(20), vec![assign_step(&[0])]);

    wait_for_event(&mut events, |event| {
        matches!(event, DiagnosticEvent::PartitionsAssigned { .. })
    })
    .await;
    mock.push_step(records_step(vec![record(0, 0), record(0, 1)]));
    let chunk = timeout(WAIT, consumer.request(tp("events", 0)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(chunk.len(), 2);

    let mut offsets = HashMap::new();
    offsets.insert(tp("events", 0), 1);
    timeout(WAIT, consumer.commit(offsets))
        .await
        .unwrap()
        .unwrap();

    let metrics = consumer.metrics();
    assert!(metrics.polls >= 1);
    assert_eq!(metrics.records_polled, 2);
    assert_eq!(metrics.pulls_fulfilled, 1);
    assert_eq!(metrics.commits_started, 1);
    assert_eq!(metrics.commits_succeeded, 1);
    assert_eq!(metrics.commits_failed, 0);
    assert!(metrics.last_commit_time.is_some());

    consumer.graceful_shutdown();
}
