//! Session state machine.

use std::fmt;

use boothproto::{Collection, PreparePayload};
use chrono::{DateTime, Local};
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

use crate::registry::DeviceRegistry;
use crate::surface::Surface;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Preparing,
    Ready,
    Presenting,
    Paused,
    Closing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Preparing => "preparing",
            SessionState::Ready => "ready",
            SessionState::Presenting => "presenting",
            SessionState::Paused => "paused",
            SessionState::Closing => "closing",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Prepare,
    StreamsReady,
    PrepareFailed,
    Present,
    QueueExhausted,
    /// A task failed and the controller recovered the session.
    TaskFailed,
    Pause,
    Unpause,
    Stop,
    Close,
    Closed,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{event:?} is not valid while {state}")]
pub struct TransitionError {
    pub state: SessionState,
    pub event: SessionEvent,
}

impl SessionState {
    /// The state after `event`, if the transition is allowed.
    pub fn next(self, event: SessionEvent) -> Result<SessionState, TransitionError> {
        use SessionEvent as E;
        use SessionState as S;

        let next = match (self, event) {
            (_, E::Close) => S::Closing,
            (S::Closing, E::Closed) => S::Idle,

            (S::Idle | S::Ready, E::Prepare) => S::Preparing,
            (S::Preparing, E::StreamsReady) => S::Ready,
            (S::Preparing, E::PrepareFailed) => S::Idle,

            (S::Ready, E::Present) => S::Presenting,
            (S::Presenting, E::QueueExhausted) => S::Ready,
            (S::Presenting, E::TaskFailed) => S::Ready,
            (S::Presenting, E::Pause) => S::Paused,
            (S::Paused, E::Unpause) => S::Presenting,
            (S::Paused, E::Stop) => S::Ready,

            (state, event) => return Err(TransitionError { state, event }),
        };
        Ok(next)
    }
}

/// State owned by the coordinating task for one session.
pub struct SessionContext {
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    pub registry: DeviceRegistry,
    pub surface: Box<dyn Surface>,
    pub collection: Option<Collection>,
    pub payload: Option<PreparePayload>,
    pub subject_id: Option<String>,
    pub started_at: Option<DateTime<Local>>,
}

impl SessionContext {
    pub fn new(registry: DeviceRegistry, surface: Box<dyn Surface>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            state: SessionState::Idle,
            state_tx,
            registry,
            surface,
            collection: None,
            payload: None,
            subject_id: None,
            started_at: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Observe state changes from other tasks.
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn apply(&mut self, event: SessionEvent) -> Result<SessionState, TransitionError> {
        let next = self.state.next(event)?;
        debug!(from = %self.state, to = %next, ?event, "session transition");
        self.state = next;
        self.state_tx.send_replace(next);
        Ok(next)
    }

    /// Forget the prepared collection. Device streams are handled by the caller.
    pub fn reset(&mut self) {
        self.collection = None;
        self.payload = None;
        self.subject_id = None;
        self.started_at = None;
    }
}
