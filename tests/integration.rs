//! End-to-end delivery tests against the relay actor.

mod common;

use common::{fast_retry, test_relay, TaskState, TaskStatusUpdate};
use status_relay::{RelayError, RetryPolicy};
use std::time::Duration;
use tempfile::TempDir;

/// Generous bound for "the forward should already have happened".
const RECV: Duration = Duration::from_millis(1500);

/// Bound for "no forward should happen in this window".
const QUIET: Duration = Duration::from_millis(150);

#[test]
fn test_update_is_forwarded_and_acknowledged() {
    let dir = TempDir::new().unwrap();
    let (relay, forwarded) = test_relay(dir.path(), RetryPolicy::default());

    let update = TaskStatusUpdate::new(TaskState::Running);
    relay.update(update.clone(), "s1".into(), false).unwrap();

    let sent = forwarded.recv_timeout(RECV).unwrap();
    assert_eq!(sent.uuid(), update.uuid());

    let open = relay.acknowledgement("s1".into(), update.uuid()).unwrap();
    assert!(open);

    // Queue drained; nothing further goes out.
    assert!(forwarded.recv_timeout(QUIET).is_err());
}

#[test]
fn test_unacknowledged_update_is_retried_with_backoff() {
    let dir = TempDir::new().unwrap();
    let (relay, forwarded) = test_relay(dir.path(), fast_retry());

    let update = TaskStatusUpdate::new(TaskState::Running);
    relay.update(update.clone(), "s1".into(), false).unwrap();

    // Initial forward plus at least two retries while no ack arrives.
    for _ in 0..3 {
        let sent = forwarded.recv_timeout(RECV).unwrap();
        assert_eq!(sent.uuid(), update.uuid());
    }

    relay.acknowledgement("s1".into(), update.uuid()).unwrap();

    // The retry timer is cancelled by the acknowledgement.
    while forwarded.recv_timeout(QUIET).is_ok() {}
    assert!(forwarded.recv_timeout(QUIET).is_err());
}

#[test]
fn test_updates_are_forwarded_in_order() {
    let dir = TempDir::new().unwrap();
    let (relay, forwarded) = test_relay(dir.path(), RetryPolicy::default());

    let u1 = TaskStatusUpdate::new(TaskState::Starting);
    let u2 = TaskStatusUpdate::new(TaskState::Running);
    relay.update(u1.clone(), "s1".into(), false).unwrap();
    relay.update(u2.clone(), "s1".into(), false).unwrap();

    // Only the head is in flight until its ack arrives.
    assert_eq!(forwarded.recv_timeout(RECV).unwrap().uuid(), u1.uuid());
    assert!(forwarded.recv_timeout(QUIET).is_err());

    relay.acknowledgement("s1".into(), u1.uuid()).unwrap();
    assert_eq!(forwarded.recv_timeout(RECV).unwrap().uuid(), u2.uuid());
}

#[test]
fn test_terminal_acknowledgement_closes_the_stream() {
    let dir = TempDir::new().unwrap();
    let (relay, forwarded) = test_relay(dir.path(), RetryPolicy::default());

    let running = TaskStatusUpdate::new(TaskState::Running);
    relay.update(running.clone(), "s1".into(), false).unwrap();
    forwarded.recv_timeout(RECV).unwrap();
    assert!(relay.acknowledgement("s1".into(), running.uuid()).unwrap());

    let finished = TaskStatusUpdate::new(TaskState::Finished);
    relay.update(finished.clone(), "s1".into(), false).unwrap();
    forwarded.recv_timeout(RECV).unwrap();
    assert!(!relay.acknowledgement("s1".into(), finished.uuid()).unwrap());

    // The stream is gone.
    let result = relay.acknowledgement("s1".into(), finished.uuid());
    assert!(matches!(result, Err(RelayError::UnknownStream(_))));
}

#[test]
fn test_duplicate_update_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let (relay, forwarded) = test_relay(dir.path(), RetryPolicy::default());

    let update = TaskStatusUpdate::new(TaskState::Running);
    relay.update(update.clone(), "s1".into(), false).unwrap();
    relay.update(update.clone(), "s1".into(), false).unwrap();

    // One forward only, and a single ack drains the stream.
    forwarded.recv_timeout(RECV).unwrap();
    assert!(forwarded.recv_timeout(QUIET).is_err());

    assert!(relay.acknowledgement("s1".into(), update.uuid()).unwrap());
    assert!(forwarded.recv_timeout(QUIET).is_err());
}

#[test]
fn test_pause_suppresses_forwards_until_resume() {
    let dir = TempDir::new().unwrap();
    let (relay, forwarded) = test_relay(dir.path(), RetryPolicy::default());

    relay.pause().unwrap();

    let update = TaskStatusUpdate::new(TaskState::Running);
    relay.update(update.clone(), "s1".into(), false).unwrap();
    assert!(forwarded.recv_timeout(QUIET).is_err());

    relay.resume().unwrap();
    assert_eq!(forwarded.recv_timeout(RECV).unwrap().uuid(), update.uuid());
}

#[test]
fn test_acknowledgement_while_paused_still_applies() {
    let dir = TempDir::new().unwrap();
    let (relay, forwarded) = test_relay(dir.path(), RetryPolicy::default());

    let u1 = TaskStatusUpdate::new(TaskState::Starting);
    let u2 = TaskStatusUpdate::new(TaskState::Running);
    relay.update(u1.clone(), "s1".into(), false).unwrap();
    forwarded.recv_timeout(RECV).unwrap();

    relay.pause().unwrap();
    relay.update(u2.clone(), "s1".into(), false).unwrap();
    assert!(relay.acknowledgement("s1".into(), u1.uuid()).unwrap());
    assert!(forwarded.recv_timeout(QUIET).is_err());

    relay.resume().unwrap();
    assert_eq!(forwarded.recv_timeout(RECV).unwrap().uuid(), u2.uuid());
}

#[test]
fn test_cleanup_stops_retries_for_the_framework() {
    let dir = TempDir::new().unwrap();
    let (relay, forwarded) = test_relay(dir.path(), fast_retry());

    let update = TaskStatusUpdate::new(TaskState::Running);
    relay.update(update.clone(), "s1".into(), false).unwrap();
    forwarded.recv_timeout(RECV).unwrap();

    relay.cleanup("framework-1".to_string()).unwrap();

    let result = relay.acknowledgement("s1".into(), update.uuid());
    assert!(matches!(result, Err(RelayError::UnknownStream(_))));

    // No retries outlive the stream.
    while forwarded.recv_timeout(QUIET).is_ok() {}
    assert!(forwarded.recv_timeout(QUIET).is_err());
}

#[test]
fn test_streams_are_independent() {
    let dir = TempDir::new().unwrap();
    let (relay, forwarded) = test_relay(dir.path(), RetryPolicy::default());

    let u1 = TaskStatusUpdate::new(TaskState::Running);
    let u2 = TaskStatusUpdate::new(TaskState::Running).with_framework(Some("framework-2"));
    relay.update(u1.clone(), "s1".into(), false).unwrap();
    relay.update(u2.clone(), "s2".into(), false).unwrap();

    let mut sent = vec![
        forwarded.recv_timeout(RECV).unwrap().uuid(),
        forwarded.recv_timeout(RECV).unwrap().uuid(),
    ];
    sent.sort();
    let mut expected = vec![u1.uuid(), u2.uuid()];
    expected.sort();
    assert_eq!(sent, expected);

    // Acknowledging one stream leaves the other outstanding.
    assert!(relay.acknowledgement("s1".into(), u1.uuid()).unwrap());
    assert!(relay.acknowledgement("s2".into(), u2.uuid()).unwrap());
}
