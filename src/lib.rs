//! # Status Relay
//!
//! Reliable, ordered delivery of status update streams from a producer to
//! a remote consumer over an unreliable channel, with optional durable
//! checkpointing so in-flight updates survive a crash.
//!
//! ## Core Concepts
//!
//! - **Streams**: ordered conversations about one subject (a task, an
//!   operation), keyed by an embedder-supplied id
//! - **Updates**: payloads carrying a unique status UUID, retried with
//!   bounded exponential backoff until acknowledged
//! - **Acknowledgements**: consumer confirmations that advance a stream
//! - **Checkpoint logs**: per-stream append-only files replayed on
//!   recovery
//!
//! Delivery is at-least-once with deduplication by status UUID. The relay
//! never garbage collects checkpoint files; the embedder reaps them.
//!
//! ## Example
//!
//! ```ignore
//! use status_relay::{RetryPolicy, UpdateRelay};
//!
//! let relay = UpdateRelay::spawn(
//!     RetryPolicy::default(),
//!     Box::new(|update: &TaskUpdate| transport.send(update)),
//!     Box::new(|task: &TaskId| run_dir.join(task.to_string()).join("updates")),
//! )?;
//!
//! relay.update(update, task_id, /* checkpoint */ true)?;
//! relay.acknowledgement(task_id, status_uuid)?;
//! ```

pub mod actor;
pub mod checkpoint;
pub mod error;
pub mod manager;
pub mod retry;
pub mod stream;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use actor::UpdateRelay;
pub use checkpoint::{CheckpointFile, CheckpointRecord, RecordReader};
pub use error::{RelayError, Result};
pub use manager::{ForwardFn, PathFn, UpdateManager};
pub use retry::RetryPolicy;
pub use stream::UpdateStream;
pub use types::{RecoveredState, StatusUpdate, StreamKey, StreamRecovery};
