//! Manager core: stream registry, framework index, retry orchestration.
//!
//! The manager owns every stream and is driven from a single thread (see
//! [`crate::actor`]). It is responsible for reliably forwarding updates,
//! checkpointing them when asked, processing acknowledgements, and
//! recovering checkpointed streams after a restart. It never garbage
//! collects checkpoint files; the embedder reaps them.

use crate::error::{RelayError, Result};
use crate::retry::{RetryPolicy, RetryQueue};
use crate::stream::UpdateStream;
use crate::types::{RecoveredState, StatusUpdate, StreamKey, StreamRecovery};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Hands a status update to the transport. Fire-and-forget; must not block.
pub type ForwardFn<U> = Box<dyn Fn(&U) + Send>;

/// Yields the checkpoint file path for a stream.
pub type PathFn<S> = Box<dyn Fn(&S) -> PathBuf + Send>;

/// Registry of update streams with retry and recovery orchestration.
pub struct UpdateManager<S: StreamKey, U: StatusUpdate> {
    streams: HashMap<S, UpdateStream<S, U>>,
    /// Reverse index used by [`cleanup`](Self::cleanup); keys only.
    framework_streams: HashMap<U::FrameworkId, HashSet<S>>,
    /// While paused, no forwards are issued; state changes still apply.
    paused: bool,
    forward: ForwardFn<U>,
    path_for: PathFn<S>,
    retry: RetryPolicy,
    timers: RetryQueue<S>,
}

impl<S: StreamKey, U: StatusUpdate> UpdateManager<S, U> {
    /// Create a manager with the injected transport and path collaborators.
    pub fn new(retry: RetryPolicy, forward: ForwardFn<U>, path_for: PathFn<S>) -> Self {
        Self {
            streams: HashMap::new(),
            framework_streams: HashMap::new(),
            paused: false,
            forward,
            path_for,
            retry,
            timers: RetryQueue::new(),
        }
    }

    /// Accept a status update, lazily creating its stream.
    ///
    /// If this update put the previously idle stream's queue at exactly one
    /// entry and the manager is not paused, the update is forwarded and a
    /// retry timer armed. Duplicates succeed without forwarding.
    pub fn update(&mut self, update: U, stream_id: S, checkpoint: bool) -> Result<()> {
        info!(stream = ?stream_id, update = ?update, "received status update");

        if !self.streams.contains_key(&stream_id) {
            self.create_stream(&stream_id, update.framework_id(), checkpoint)?;
        }

        let stream = match self.streams.get_mut(&stream_id) {
            Some(stream) => stream,
            None => return Err(RelayError::UnknownStream(format!("{:?}", stream_id))),
        };

        if stream.checkpointed() != checkpoint {
            return Err(RelayError::CheckpointMismatch {
                expected: stream.checkpointed(),
                got: checkpoint,
            });
        }

        let update_framework = update.framework_id();

        // Presence of a framework id must match the stream.
        if update_framework.is_some() != stream.framework_id.is_some() {
            return Err(RelayError::FrameworkMismatch {
                expected: fmt_framework(&stream.framework_id),
                got: fmt_framework(&update_framework),
            });
        }

        // And when both carry one, the values must agree.
        if let (Some(expected), Some(got)) = (&stream.framework_id, &update_framework) {
            if expected != got {
                return Err(RelayError::FrameworkMismatch {
                    expected: format!("{:?}", expected),
                    got: format!("{:?}", got),
                });
            }
        }

        if !stream.update(update)? {
            // Duplicate; subsequent forwards happen on acknowledgement.
            return Ok(());
        }

        let newly_busy = stream.pending.len() == 1;
        if !self.paused && newly_busy {
            self.forward_head(&stream_id, self.retry.min);
        }

        Ok(())
    }

    /// Process an acknowledgement.
    ///
    /// Returns `Ok(true)` while the stream stays open, `Ok(false)` when a
    /// terminal acknowledgement closed it (its checkpoint file, if any,
    /// stays on disk). A duplicate acknowledgement is reported as an error
    /// so the caller can log it.
    pub fn acknowledgement(&mut self, stream_id: &S, uuid: Uuid) -> Result<bool> {
        info!(stream = ?stream_id, %uuid, "received status update acknowledgement");

        let stream = match self.streams.get_mut(stream_id) {
            Some(stream) => stream,
            // Recovery may not have finished, or the stream was cleaned up.
            None => return Err(RelayError::UnknownStream(format!("{:?}", stream_id))),
        };

        if !stream.acknowledgement(uuid)? {
            return Err(RelayError::DuplicateAcknowledgement(uuid));
        }

        stream.deadline = None;

        let terminated = stream.terminated;
        let has_next = !stream.pending.is_empty();

        if terminated {
            if has_next {
                warn!(
                    stream = ?stream_id,
                    "acknowledged a terminal status update but updates are still pending"
                );
            }
            self.remove_stream(stream_id);
        } else if !self.paused && has_next {
            self.forward_head(stream_id, self.retry.min);
        }

        Ok(!terminated)
    }

    /// Recover checkpointed streams after a restart.
    ///
    /// In strict mode the first unrecoverable stream tears down everything
    /// recovered so far and fails; otherwise failures are counted and the
    /// stream is recorded as `None`. Recovered streams with pending updates
    /// forward immediately unless the manager is paused.
    pub fn recover(&mut self, stream_ids: Vec<S>, strict: bool) -> Result<RecoveredState<S, U>> {
        info!("recovering status update streams");

        let mut state = RecoveredState::default();

        for stream_id in stream_ids {
            match self.recover_stream(&stream_id, strict) {
                Ok(recovered) => {
                    if recovered.as_ref().is_some_and(|r| r.error) {
                        state.errors += 1;
                    }
                    state.streams.insert(stream_id, recovered);
                }
                Err(e) => {
                    warn!(
                        stream = ?stream_id,
                        error = %e,
                        "failed to recover status update stream"
                    );

                    if strict {
                        let ids: Vec<S> = self.streams.keys().cloned().collect();
                        for id in &ids {
                            self.remove_stream(id);
                        }
                        self.timers.clear();
                        return Err(e);
                    }

                    state.errors += 1;
                    state.streams.insert(stream_id, None);
                }
            }
        }

        Ok(state)
    }

    /// Close every stream belonging to `framework_id`.
    ///
    /// Stops retrying their pending updates and cancels their timers.
    /// Checkpoint files are left on disk for the embedder to reap.
    pub fn cleanup(&mut self, framework_id: &U::FrameworkId) {
        info!(framework = ?framework_id, "closing status update streams for framework");

        let ids: Vec<S> = self
            .framework_streams
            .get(framework_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();

        for id in &ids {
            self.remove_stream(id);
        }
    }

    /// Stop issuing forwards. Updates and acknowledgements still apply.
    pub fn pause(&mut self) {
        info!("pausing status update forwarding");
        self.paused = true;
    }

    /// Resume forwarding: every stream with pending updates is re-sent at
    /// the minimum retry interval.
    pub fn resume(&mut self) {
        info!("resuming status update forwarding");
        self.paused = false;

        let ids: Vec<S> = self
            .streams
            .iter()
            .filter(|(_, stream)| !stream.pending.is_empty())
            .map(|(id, _)| id.clone())
            .collect();

        for id in ids {
            warn!(stream = ?id, "re-sending pending status update");
            self.forward_head(&id, self.retry.min);
        }
    }

    /// Earliest armed retry deadline, for the relay thread's sleep.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Fire every timer whose deadline has passed, re-sending the head of
    /// the affected stream with doubled, capped backoff.
    pub fn fire_due(&mut self, now: Instant) {
        while let Some(entry) = self.timers.pop_due(now) {
            // A pause consumes the expiry; resume re-arms.
            if self.paused {
                continue;
            }

            let stream = match self.streams.get(&entry.stream_id) {
                Some(stream) => stream,
                None => continue,
            };

            if stream.pending.is_empty() || stream.failed() {
                continue;
            }

            // Stale entry: the timer was cancelled or re-armed since.
            if stream.deadline != Some(entry.deadline) {
                continue;
            }

            warn!(
                stream = ?entry.stream_id,
                "re-sending status update after missing acknowledgement"
            );
            let interval = self.retry.next_interval(entry.interval);
            self.forward_head(&entry.stream_id, interval);
        }
    }

    /// Whether a stream is currently registered.
    pub fn contains_stream(&self, stream_id: &S) -> bool {
        self.streams.contains_key(stream_id)
    }

    /// Number of registered streams.
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Create a new stream, registering it and its framework index entry.
    fn create_stream(
        &mut self,
        stream_id: &S,
        framework_id: Option<U::FrameworkId>,
        checkpoint: bool,
    ) -> Result<()> {
        debug!(stream = ?stream_id, checkpoint, "creating status update stream");

        let path = if checkpoint {
            Some((self.path_for)(stream_id))
        } else {
            None
        };

        // Nothing is registered if creation fails.
        let stream = UpdateStream::create(stream_id.clone(), framework_id.clone(), path)?;

        if let Some(framework_id) = framework_id {
            self.framework_streams
                .entry(framework_id)
                .or_default()
                .insert(stream_id.clone());
        }

        self.streams.insert(stream_id.clone(), stream);
        Ok(())
    }

    /// Recover one stream and register it unless it already terminated.
    fn recover_stream(
        &mut self,
        stream_id: &S,
        strict: bool,
    ) -> Result<Option<StreamRecovery<U>>> {
        debug!(stream = ?stream_id, "recovering status update stream");

        let path = (self.path_for)(stream_id);
        let (stream, recovery) = match UpdateStream::recover(stream_id.clone(), &path, strict)? {
            Some(recovered) => recovered,
            None => return Ok(None),
        };

        // A terminated stream is reported but not resumed.
        if stream.terminated {
            return Ok(Some(recovery));
        }

        if let Some(framework_id) = stream.framework_id.clone() {
            self.framework_streams
                .entry(framework_id)
                .or_default()
                .insert(stream_id.clone());
        }

        let has_next = !stream.pending.is_empty();
        self.streams.insert(stream_id.clone(), stream);

        if !self.paused && has_next {
            self.forward_head(stream_id, self.retry.min);
        }

        Ok(Some(recovery))
    }

    /// Drop a stream and its framework index entry; its timer entries are
    /// skipped when they come due.
    fn remove_stream(&mut self, stream_id: &S) {
        debug!(stream = ?stream_id, "cleaning up status update stream");

        let stream = match self.streams.remove(stream_id) {
            Some(stream) => stream,
            None => return,
        };

        if let Some(framework_id) = stream.framework_id {
            if let Some(ids) = self.framework_streams.get_mut(&framework_id) {
                ids.remove(stream_id);
                if ids.is_empty() {
                    self.framework_streams.remove(&framework_id);
                }
            }
        }
    }

    /// Forward the head of `stream_id`'s queue and arm its retry timer.
    fn forward_head(&mut self, stream_id: &S, interval: Duration) {
        let stream = match self.streams.get_mut(stream_id) {
            Some(stream) => stream,
            None => return,
        };
        if stream.failed() {
            return;
        }
        let update = match stream.pending.front() {
            Some(update) => update,
            None => return,
        };

        debug!(stream = ?stream_id, update = ?update, "forwarding status update");
        (self.forward)(update);

        let deadline = Instant::now() + interval;
        stream.deadline = Some(deadline);
        self.timers.arm(deadline, stream_id.clone(), interval);
    }
}

/// Render an optional framework id for error messages.
fn fmt_framework<F: fmt::Debug>(framework_id: &Option<F>) -> String {
    match framework_id {
        Some(framework_id) => format!("{:?}", framework_id),
        None => "no framework id".to_string(),
    }
}
