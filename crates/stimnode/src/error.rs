//! Error taxonomy for the engine.

use std::time::Duration;

use boothproto::AckError;
use thiserror::Error;

/// Failure pushing a sample to a publishing endpoint.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The downstream endpoint was torn down. Recoverable by recreating it.
    #[error("outlet {0} was closed")]
    EndpointClosed(String),

    #[error("outlet {outlet_id} rejected sample: {reason}")]
    Rejected { outlet_id: String, reason: String },

    #[error("failed to create outlet {outlet_id}: {reason}")]
    Create { outlet_id: String, reason: String },
}

impl PublishError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PublishError::EndpointClosed(_))
    }
}

/// Failure reading from a capture source.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The source has no more data. Ends the publish loop cleanly.
    #[error("end of stream")]
    EndOfStream,

    #[error("capture device failed: {0}")]
    Device(String),
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to open {name}: {reason}")]
    Open { name: String, reason: String },

    #[error("{name}: {reason}")]
    Operation { name: String, reason: String },

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("failed to spawn capture thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// Socket or acquisition service trouble. Logged, never fatal.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot reach {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: std::io::Error,
    },

    #[error("no reply from {endpoint} within {after:?}")]
    Timeout { endpoint: String, after: Duration },

    #[error("io error talking to {endpoint}: {source}")]
    Io {
        endpoint: String,
        source: std::io::Error,
    },

    #[error("bad acknowledgement from {endpoint}: {source}")]
    Ack { endpoint: String, source: AckError },
}

/// Startup failures that abort the process.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("cannot bind command socket {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("cannot read local address of the command socket: {0}")]
    LocalAddr(#[source] std::io::Error),

    #[error("cannot create presentation surface: {0}")]
    Surface(String),
}

/// Raised by the sequencer for the session controller to recover from.
#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("task {task_id} failed: {error:#}")]
    Task {
        task_id: String,
        error: anyhow::Error,
        /// A start-record request went out and no stop has followed.
        recording_open: bool,
        /// The eye tracker is still writing its local file.
        eye_tracking_open: bool,
    },

    #[error("metadata store failed during {task_id}: {error:#}")]
    Store {
        task_id: String,
        error: anyhow::Error,
    },
}
