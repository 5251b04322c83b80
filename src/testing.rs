//! Shared fixtures for unit tests.

use crate::types::StatusUpdate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle states reported by the fake tasks used in tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Starting,
    Running,
    Finished,
    Failed,
}

impl TaskState {
    fn is_terminal(self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Failed)
    }
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

    /// The status UUID, which tests always set.
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
        self.state.is_terminal()
    }
}
