//! Actor front-end running the manager on its own thread.
//!
//! All public operations, retry-timer expiries, and forward-callback
//! invocations execute serially on the relay thread: commands arrive on a
//! single-consumer channel and each caller blocks on a one-shot reply.
//! Between commands the thread sleeps until the earliest retry deadline.

use crate::error::{RelayError, Result};
use crate::manager::{ForwardFn, PathFn, UpdateManager};
use crate::retry::RetryPolicy;
use crate::types::{RecoveredState, StatusUpdate, StreamKey};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

enum Command<S: StreamKey, U: StatusUpdate> {
    Update {
        update: U,
        stream_id: S,
        checkpoint: bool,
        reply: Sender<Result<()>>,
    },
    Acknowledgement {
        stream_id: S,
        uuid: Uuid,
        reply: Sender<Result<bool>>,
    },
    Recover {
        stream_ids: Vec<S>,
        strict: bool,
        reply: Sender<Result<RecoveredState<S, U>>>,
    },
    Cleanup {
        framework_id: U::FrameworkId,
        reply: Sender<()>,
    },
    Pause {
        reply: Sender<()>,
    },
    Resume {
        reply: Sender<()>,
    },
    Shutdown,
}

/// Actor-style status update relay.
///
/// Owns an [`UpdateManager`] on a dedicated thread. Dropping the relay
/// shuts the thread down after the mailbox drains.
pub struct UpdateRelay<S: StreamKey, U: StatusUpdate> {
    tx: Sender<Command<S, U>>,
    thread: Option<JoinHandle<()>>,
}

impl<S: StreamKey, U: StatusUpdate> UpdateRelay<S, U> {
    /// Spawn the relay thread with the injected collaborators.
    ///
    /// `forward` hands an update to the transport and must not block; if
    /// the transport can block, the embedder is responsible for
    /// off-loading. `path_for` yields the checkpoint file path for a
    /// stream and is consulted at creation and recovery.
    pub fn spawn(retry: RetryPolicy, forward: ForwardFn<U>, path_for: PathFn<S>) -> Result<Self> {
        let (tx, rx) = unbounded();

        let thread = thread::Builder::new()
            .name("status-update-relay".into())
            .spawn(move || {
                let mut manager = UpdateManager::new(retry, forward, path_for);
                run(&mut manager, &rx);
            })?;

        Ok(Self {
            tx,
            thread: Some(thread),
        })
    }

    /// Forward a status update on `stream_id`, checkpointing it if asked.
    pub fn update(&self, update: U, stream_id: S, checkpoint: bool) -> Result<()> {
        let (reply, response) = bounded(1);
        self.send(Command::Update {
            update,
            stream_id,
            checkpoint,
            reply,
        })?;
        response.recv().map_err(|_| RelayError::Terminated)?
    }

    /// Process an acknowledgement. `Ok(true)` while the stream stays open.
    pub fn acknowledgement(&self, stream_id: S, uuid: Uuid) -> Result<bool> {
        let (reply, response) = bounded(1);
        self.send(Command::Acknowledgement {
            stream_id,
            uuid,
            reply,
        })?;
        response.recv().map_err(|_| RelayError::Terminated)?
    }

    /// Recover the checkpointed streams with the given ids.
    pub fn recover(&self, stream_ids: Vec<S>, strict: bool) -> Result<RecoveredState<S, U>> {
        let (reply, response) = bounded(1);
        self.send(Command::Recover {
            stream_ids,
            strict,
            reply,
        })?;
        response.recv().map_err(|_| RelayError::Terminated)?
    }

    /// Close every stream belonging to `framework_id`.
    pub fn cleanup(&self, framework_id: U::FrameworkId) -> Result<()> {
        let (reply, response) = bounded(1);
        self.send(Command::Cleanup {
            framework_id,
            reply,
        })?;
        response.recv().map_err(|_| RelayError::Terminated)
    }

    /// Suppress outbound forwards without stopping state changes.
    pub fn pause(&self) -> Result<()> {
        let (reply, response) = bounded(1);
        self.send(Command::Pause { reply })?;
        response.recv().map_err(|_| RelayError::Terminated)
    }

    /// Resume forwarding; pending heads are re-sent immediately.
    pub fn resume(&self) -> Result<()> {
        let (reply, response) = bounded(1);
        self.send(Command::Resume { reply })?;
        response.recv().map_err(|_| RelayError::Terminated)
    }

    fn send(&self, command: Command<S, U>) -> Result<()> {
        self.tx.send(command).map_err(|_| RelayError::Terminated)
    }
}

impl<S: StreamKey, U: StatusUpdate> Drop for UpdateRelay<S, U> {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// The relay thread's event loop: commands first, timers when idle.
fn run<S: StreamKey, U: StatusUpdate>(
    manager: &mut UpdateManager<S, U>,
    rx: &Receiver<Command<S, U>>,
) {
    debug!("status update relay started");

    loop {
        let command = match manager.next_deadline() {
            Some(deadline) => match rx.recv_deadline(deadline) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            },
        };

        match command {
            Some(Command::Update {
                update,
                stream_id,
                checkpoint,
                reply,
            }) => {
                let _ = reply.send(manager.update(update, stream_id, checkpoint));
            }
            Some(Command::Acknowledgement {
                stream_id,
                uuid,
                reply,
            }) => {
                let _ = reply.send(manager.acknowledgement(&stream_id, uuid));
            }
            Some(Command::Recover {
                stream_ids,
                strict,
                reply,
            }) => {
                let _ = reply.send(manager.recover(stream_ids, strict));
            }
            Some(Command::Cleanup {
                framework_id,
                reply,
            }) => {
                manager.cleanup(&framework_id);
                let _ = reply.send(());
            }
            Some(Command::Pause { reply }) => {
                manager.pause();
                let _ = reply.send(());
            }
            Some(Command::Resume { reply }) => {
                manager.resume();
                let _ = reply.send(());
            }
            Some(Command::Shutdown) => break,
            None => manager.fire_due(Instant::now()),
        }
    }

    debug!("status update relay stopped");
}
