//! Core traits and recovered-state types for the relay.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use uuid::Uuid;

/// Identifies one update stream.
///
/// The relay treats stream ids as opaque values; any cloneable, hashable
/// key type the embedder already uses (task ids, operation ids) works.
pub trait StreamKey: Clone + Eq + Hash + fmt::Debug + Send + 'static {}

impl<T> StreamKey for T where T: Clone + Eq + Hash + fmt::Debug + Send + 'static {}

/// Capabilities the relay needs from an update payload.
///
/// The relay never looks inside an update beyond these three properties:
/// the unique status UUID used for deduplication and acknowledgement
/// matching, the optional framework id used to group streams for bulk
/// cleanup, and whether the update ends its stream.
pub trait StatusUpdate:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + 'static
{
    /// Value type grouping streams for [`cleanup`](crate::UpdateManager::cleanup).
    type FrameworkId: Clone + Eq + Hash + fmt::Debug + Send + 'static;

    /// The unique 16-byte identifier of this update, if present.
    fn status_uuid(&self) -> Option<Uuid>;

    /// The framework this update belongs to, if any.
    fn framework_id(&self) -> Option<Self::FrameworkId>;

    /// Whether this update ends its stream.
    fn is_terminal(&self) -> bool;
}

/// State rebuilt for a single stream by recovery.
///
/// Contains every update found in the checkpoint log, both pending and
/// already acknowledged, in log order.
#[derive(Clone, Debug)]
pub struct StreamRecovery<U> {
    /// All checkpointed updates, in the order they were accepted.
    pub updates: Vec<U>,
    /// Whether a terminal update had been acknowledged.
    pub terminated: bool,
    /// Whether an unreadable record was tolerated (non-strict recovery only).
    pub error: bool,
}

/// Aggregate result of recovering a set of streams.
#[derive(Clone, Debug)]
pub struct RecoveredState<S, U> {
    /// Per-stream recovered state. `None` if the checkpoint file was
    /// absent or empty, or (non-strict) if the stream could not be
    /// recovered at all.
    pub streams: HashMap<S, Option<StreamRecovery<U>>>,
    /// Number of recoverable errors found during non-strict recovery.
    pub errors: u32,
}

impl<S, U> Default for RecoveredState<S, U> {
    fn default() -> Self {
        Self {
            streams: HashMap::new(),
            errors: 0,
        }
    }
}
