//! Playback dispatcher behavior under concurrent submitters

mod helpers;

use helpers::{path, RecordingOutput};
use klaxon_ap::error::PlaybackError;
use klaxon_ap::playback::{PlayOutcome, PlayRequest, PlaybackDispatcher, Priority};
use klaxon_ap::SharedState;
use klaxon_common::events::AlertEvent;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn request(id: &str, priority: Priority) -> PlayRequest {
    PlayRequest {
        sound: id.to_string(),
        path: PathBuf::from(path(id)),
        volume: 0.8,
        priority,
    }
}

fn setup(output: RecordingOutput, max_queue_len: usize) -> (Arc<PlaybackDispatcher>, Arc<RecordingOutput>, Arc<SharedState>) {
    let output = Arc::new(output);
    let state = Arc::new(SharedState::new());
    let dispatcher = Arc::new(PlaybackDispatcher::new(output.clone(), max_queue_len, state.clone()));
    (dispatcher, output, state)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submitters_never_overlap() {
    let (dispatcher, output, _) = setup(RecordingOutput::new(Duration::from_millis(5)), 64);
    let consumer = dispatcher.clone().start();

    let submitters: Vec<_> = (0..16)
        .map(|i| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                let sound = if i % 2 == 0 { "a" } else { "b" };
                dispatcher.submit(request(sound, Priority::Normal)).outcome().await
            })
        })
        .collect();

    for submitter in submitters {
        assert_eq!(submitter.await.unwrap(), PlayOutcome::Played);
    }
    dispatcher.idle().await;

    assert_eq!(output.calls(), 16);
    assert_eq!(output.max_active(), 1);

    dispatcher.shutdown();
    consumer.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_fifo_with_critical_ahead_of_queued_only() {
    let (dispatcher, output, _) = setup(RecordingOutput::new(Duration::from_millis(100)), 16);
    let consumer = dispatcher.clone().start();

    let first = dispatcher.submit(request("a", Priority::Normal));
    // Consumer takes "a"; it is now in flight
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second = dispatcher.submit(request("b", Priority::Normal));
    let third = dispatcher.submit(request("c", Priority::Normal));
    let urgent = dispatcher.submit(request("crit", Priority::Critical));

    for handle in [first, second, third, urgent] {
        assert_eq!(handle.outcome().await, PlayOutcome::Played);
    }
    assert_eq!(output.played(), vec![path("a"), path("crit"), path("b"), path("c")]);

    dispatcher.shutdown();
    consumer.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failure_and_timeout_do_not_block_queue() {
    let output = RecordingOutput::new(Duration::from_millis(10))
        .with_timeout(Duration::from_secs(2))
        .fail_on("/sounds/a.wav")
        .hang_on("/sounds/b.wav");
    let (dispatcher, output, state) = setup(output, 16);
    let mut events = state.subscribe_events();
    let consumer = dispatcher.clone().start();

    let failing = dispatcher.submit(request("a", Priority::Normal));
    let hanging = dispatcher.submit(request("b", Priority::Normal));
    let fine = dispatcher.submit(request("c", Priority::Normal));

    assert!(matches!(
        failing.outcome().await,
        PlayOutcome::Failed(PlaybackError::ExitStatus(_))
    ));
    assert_eq!(
        hanging.outcome().await,
        PlayOutcome::Failed(PlaybackError::Timeout(2000))
    );
    assert_eq!(fine.outcome().await, PlayOutcome::Played);
    assert_eq!(output.played(), vec![path("c")]);

    let counters = state.counters();
    assert_eq!(counters.failed, 2);
    assert_eq!(counters.played, 1);

    let mut failed_events = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, AlertEvent::PlaybackFailed { .. }) {
            failed_events += 1;
        }
    }
    assert_eq!(failed_events, 2);

    dispatcher.shutdown();
    consumer.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_bounded_queue_drops_and_evicts() {
    let (dispatcher, output, state) = setup(RecordingOutput::new(Duration::from_millis(100)), 2);

    let a = dispatcher.submit(request("a", Priority::Normal));
    let b = dispatcher.submit(request("b", Priority::Normal));
    let c = dispatcher.submit(request("c", Priority::Normal));
    assert_eq!(c.outcome().await, PlayOutcome::Dropped);

    // Critical submission evicts the oldest queued normal request
    let crit = dispatcher.submit(request("crit", Priority::Critical));
    assert_eq!(a.outcome().await, PlayOutcome::Dropped);
    assert_eq!(state.counters().dropped, 2);

    let consumer = dispatcher.clone().start();
    assert_eq!(crit.outcome().await, PlayOutcome::Played);
    assert_eq!(b.outcome().await, PlayOutcome::Played);
    assert_eq!(output.played(), vec![path("crit"), path("b")]);

    dispatcher.shutdown();
    consumer.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_idle_waits_for_in_flight_request() {
    let (dispatcher, output, _) = setup(RecordingOutput::new(Duration::from_secs(3)), 4);
    let consumer = dispatcher.clone().start();

    let started = tokio::time::Instant::now();
    let _handle = dispatcher.submit(request("a", Priority::Normal));
    dispatcher.idle().await;

    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(output.played(), vec![path("a")]);

    dispatcher.shutdown();
    consumer.await.unwrap();
}
