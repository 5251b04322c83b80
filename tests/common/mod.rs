//! Shared fixtures for the integration tests.
//!
//! Each test binary compiles its own copy; not every helper is used by
//! every binary.
#![allow(dead_code)]

use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use status_relay::{ForwardFn, PathFn, RetryPolicy, StatusUpdate, UpdateRelay};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle states reported by the fake tasks driving the relay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Starting,
    Running,
    Finished,
    Failed,
}

/// Minimal update payload satisfying the relay's capability trait.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusUpdate {
    pub status_uuid: Option<Uuid>,
    pub framework_id: Option<String>,
    pub state: TaskState,
}

impl TaskStatusUpdate {
    pub fn new(state: TaskState) -> Self {
        Self {
            status_uuid: Some(Uuid::new_v4()),
            framework_id: Some("framework-1".to_string()),
            state,
        }
    }

    pub fn with_framework(mut self, framework_id: Option<&str>) -> Self {
        self.framework_id = framework_id.map(str::to_string);
        self
    }

    pub fn uuid(&self) -> Uuid {
        self.status_uuid.expect("test update has a status UUID")
    }
}

impl StatusUpdate for TaskStatusUpdate {
    type FrameworkId = String;

    fn status_uuid(&self) -> Option<Uuid> {
        self.status_uuid
    }

    fn framework_id(&self) -> Option<String> {
        self.framework_id.clone()
    }

    fn is_terminal(&self) -> bool {
        matches!(self.state, TaskState::Finished | TaskState::Failed)
    }
}

/// Forward callback that mirrors every update into a channel.
pub fn channel_forward() -> (ForwardFn<TaskStatusUpdate>, Receiver<TaskStatusUpdate>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let forward = Box::new(move |update: &TaskStatusUpdate| {
        let _ = tx.send(update.clone());
    });
    (forward, rx)
}

/// Checkpoint files live at `<base>/<stream id>/updates`.
pub fn path_under(base: &Path) -> PathFn<String> {
    let base = base.to_path_buf();
    Box::new(move |stream_id: &String| base.join(stream_id).join("updates"))
}

/// Retry intervals short enough to observe within a test.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(Duration::from_millis(40), Duration::from_millis(160))
}

/// Relay with channel-captured forwards and checkpoints under `base`.
pub fn test_relay(
    base: &Path,
    retry: RetryPolicy,
) -> (UpdateRelay<String, TaskStatusUpdate>, Receiver<TaskStatusUpdate>) {
    let (forward, forwarded) = channel_forward();
    let relay = UpdateRelay::spawn(retry, forward, path_under(base)).unwrap();
    (relay, forwarded)
}
