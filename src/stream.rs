//! Per-stream state machine.
//!
//! A stream tracks every update it has ever seen (`received`), every update
//! the consumer has confirmed (`acknowledged`), and the unacknowledged
//! updates in arrival order (`pending`). Checkpointed streams append a
//! record to their log before any in-memory change becomes visible, so the
//! in-memory state is always a deterministic function of the log.

use crate::checkpoint::{CheckpointFile, CheckpointRecord, RecordReader};
use crate::error::{RelayError, Result};
use crate::types::{StatusUpdate, StreamRecovery};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// State machine for a single status update stream.
pub struct UpdateStream<S, U: StatusUpdate> {
    stream_id: S,
    /// Fixed from the first accepted update; later updates must match.
    pub(crate) framework_id: Option<U::FrameworkId>,
    /// Present iff the stream is checkpointed.
    checkpoint: Option<CheckpointFile>,
    /// Every status UUID ever accepted.
    received: HashSet<Uuid>,
    /// Every status UUID ever acknowledged.
    acknowledged: HashSet<Uuid>,
    /// Unacknowledged updates, in arrival order.
    pub(crate) pending: VecDeque<U>,
    /// Set once a terminal update is acknowledged.
    pub(crate) terminated: bool,
    /// Deadline of the armed retry timer, if any.
    pub(crate) deadline: Option<Instant>,
    /// Sticky, non-retryable failure. Once set, every operation fails.
    error: Option<String>,
}

impl<S, U> UpdateStream<S, U>
where
    S: fmt::Debug,
    U: StatusUpdate,
{
    /// Create a new stream.
    ///
    /// With a checkpoint path, the file must not already exist (a leftover
    /// file is handled by [`recover`](Self::recover), not creation) and its
    /// parent directory is created if missing.
    pub fn create(
        stream_id: S,
        framework_id: Option<U::FrameworkId>,
        path: Option<PathBuf>,
    ) -> Result<Self> {
        let checkpoint = match path {
            Some(path) => Some(CheckpointFile::create(path)?),
            None => None,
        };

        Ok(Self {
            stream_id,
            framework_id,
            checkpoint,
            received: HashSet::new(),
            acknowledged: HashSet::new(),
            pending: VecDeque::new(),
            terminated: false,
            deadline: None,
            error: None,
        })
    }

    /// Whether updates on this stream are checkpointed to disk.
    pub fn checkpointed(&self) -> bool {
        self.checkpoint.is_some()
    }

    /// Whether a terminal update has been acknowledged.
    pub fn terminated(&self) -> bool {
        self.terminated
    }

    /// Whether the stream hit a sticky, non-retryable failure.
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    /// Handle one update, checkpointing it first if necessary.
    ///
    /// Returns `Ok(false)` if the update is a duplicate or has already been
    /// acknowledged; duplicates never change state.
    pub fn update(&mut self, update: U) -> Result<bool> {
        self.check_error()?;

        let uuid = update.status_uuid().ok_or(RelayError::MissingStatusUuid)?;

        if self.acknowledged.contains(&uuid) {
            warn!(
                stream = ?self.stream_id,
                %uuid,
                "ignoring status update that has already been acknowledged"
            );
            return Ok(false);
        }

        if self.received.contains(&uuid) {
            warn!(stream = ?self.stream_id, %uuid, "ignoring duplicate status update");
            return Ok(false);
        }

        self.persist(&CheckpointRecord::Update(update.clone()))?;
        self.apply_update(uuid, update);

        Ok(true)
    }

    /// Handle an acknowledgement, checkpointing it first if necessary.
    ///
    /// The acknowledgement must match the head of the pending queue.
    /// Returns `Ok(false)` for a duplicate, which never changes state.
    pub fn acknowledgement(&mut self, uuid: Uuid) -> Result<bool> {
        self.check_error()?;

        let head = match self.pending.front() {
            Some(head) => head,
            // A retried update can produce acknowledgements for both the
            // original and the retry; by then the queue may have drained.
            None => return Err(RelayError::UnexpectedAcknowledgement(uuid)),
        };

        if self.acknowledged.contains(&uuid) {
            warn!(
                stream = ?self.stream_id,
                %uuid,
                "duplicate status update acknowledgement"
            );
            return Ok(false);
        }

        let head_uuid = head.status_uuid().ok_or(RelayError::MissingStatusUuid)?;
        if uuid != head_uuid {
            warn!(
                stream = ?self.stream_id,
                received = %uuid,
                expecting = %head_uuid,
                "unexpected status update acknowledgement"
            );
            return Ok(false);
        }

        self.persist(&CheckpointRecord::Ack(uuid))?;
        self.apply_ack(uuid);

        Ok(true)
    }

    /// Head of the pending queue, or the sticky error if one is set.
    pub fn next(&self) -> Result<Option<&U>> {
        self.check_error()?;
        Ok(self.pending.front())
    }

    /// Rebuild a stream by replaying its checkpoint log.
    ///
    /// Returns `None` when there is nothing to resume: the file never
    /// existed, or no record was ever fully written (the file is removed in
    /// that case). Any torn tail record is discarded by truncating the file
    /// to the last valid offset, so future appends cannot interleave with
    /// it. With `strict` set, an unreadable mid-log record fails recovery;
    /// otherwise it is reported via [`StreamRecovery::error`] and replay
    /// stops at the last readable record.
    pub fn recover(
        stream_id: S,
        path: &Path,
        strict: bool,
    ) -> Result<Option<(Self, StreamRecovery<U>)>> {
        // The process may have died before checkpointing any updates.
        if path.parent().is_some_and(|dir| dir.exists()) && !path.exists() {
            return Ok(None);
        }

        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        debug!(stream = ?stream_id, path = %path.display(), "replaying checkpointed status updates");

        let mut stream = Self {
            stream_id,
            framework_id: None,
            checkpoint: None,
            received: HashSet::new(),
            acknowledged: HashSet::new(),
            pending: VecDeque::new(),
            terminated: false,
            deadline: None,
            error: None,
        };

        let mut recovery = StreamRecovery {
            updates: Vec::new(),
            terminated: false,
            error: false,
        };

        let mut reader = RecordReader::new(&mut file)?;
        loop {
            let record = match reader.read_next::<U>() {
                Ok(record) => record,
                Err(e) => {
                    if strict {
                        return Err(e);
                    }
                    warn!(
                        stream = ?stream.stream_id,
                        path = %path.display(),
                        error = %e,
                        "tolerating unreadable checkpoint records"
                    );
                    recovery.error = true;
                    break;
                }
            };

            match record {
                Some(CheckpointRecord::Update(update)) => {
                    let uuid = update.status_uuid().ok_or_else(|| {
                        RelayError::Corruption(
                            "checkpointed status update is missing its status UUID".into(),
                        )
                    })?;
                    stream.apply_update(uuid, update.clone());
                    recovery.updates.push(update);
                }
                Some(CheckpointRecord::Ack(uuid)) => {
                    if stream.pending.is_empty() {
                        return Err(RelayError::Corruption(format!(
                            "unexpected acknowledgement (UUID: {uuid}) in checkpoint log"
                        )));
                    }
                    stream.apply_ack(uuid);
                }
                None => break,
            }
        }

        // Drop any torn tail record.
        let valid = reader.offset();
        drop(reader);
        file.set_len(valid)?;

        recovery.terminated = stream.terminated;

        if recovery.updates.is_empty() {
            // The checkpointing of the first update was interrupted.
            drop(file);
            fs::remove_file(path)?;
            return Ok(None);
        }

        stream.checkpoint = Some(CheckpointFile::from_recovered(path.to_path_buf(), file));
        Ok(Some((stream, recovery)))
    }

    /// Replay the sticky error, if any.
    fn check_error(&self) -> Result<()> {
        match &self.error {
            Some(msg) => Err(RelayError::StreamFailed(msg.clone())),
            None => Ok(()),
        }
    }

    /// Checkpoint a record if the stream is checkpointed. A failed write is
    /// fatal to the stream.
    fn persist(&mut self, record: &CheckpointRecord<U>) -> Result<()> {
        let file = match self.checkpoint.as_mut() {
            Some(file) => file,
            None => return Ok(()),
        };

        debug!(stream = ?self.stream_id, "checkpointing record");

        if let Err(e) = file.append(record) {
            self.error = Some(format!(
                "failed to write checkpoint record to '{}': {}",
                file.path().display(),
                e
            ));
            return Err(e);
        }

        Ok(())
    }

    /// In-memory effect of an `Update` record (shared with recovery replay).
    fn apply_update(&mut self, uuid: Uuid, update: U) {
        if self.framework_id.is_none() {
            self.framework_id = update.framework_id();
        }
        self.received.insert(uuid);
        self.pending.push_back(update);
    }

    /// In-memory effect of an `Ack` record (shared with recovery replay).
    fn apply_ack(&mut self, uuid: Uuid) {
        self.acknowledged.insert(uuid);
        if let Some(update) = self.pending.pop_front() {
            if !self.terminated {
                self.terminated = update.is_terminal();
            }
        }
    }
}
