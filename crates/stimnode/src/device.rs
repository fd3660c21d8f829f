//! Device stream handles.

use std::fmt;
use std::path::Path;

use boothproto::{DeviceKind, DeviceRequirement};
use serde::Serialize;

use crate::devices::marker::MarkerHandle;
use crate::error::DeviceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Disconnected,
    /// Started, nothing published yet.
    Connecting,
    Streaming,
    Error,
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamStatus::Disconnected => "disconnected",
            StreamStatus::Connecting => "connecting",
            StreamStatus::Streaming => "streaming",
            StreamStatus::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub calibration: bool,
    /// Writes its own recording file alongside the acquisition service.
    pub file_recording: bool,
}

/// A named, owned handle to one device channel.
pub trait DeviceStream: Send {
    fn name(&self) -> &str;
    fn kind(&self) -> DeviceKind;
    fn outlet_id(&self) -> &str;
    fn status(&self) -> StreamStatus;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn start(&mut self) -> Result<(), DeviceError>;

    /// Stop streaming. Must tolerate being called on a stopped stream.
    fn stop(&mut self);

    /// Liveness check used by reconnect.
    fn is_healthy(&self) -> bool {
        matches!(
            self.status(),
            StreamStatus::Streaming | StreamStatus::Connecting
        )
    }

    fn as_eye_tracker(&mut self) -> Option<&mut dyn EyeTracker> {
        None
    }

    /// Handle for publishing event labels, for marker streams.
    fn marker(&self) -> Option<MarkerHandle> {
        None
    }
}

/// Extra contract of eye-tracker streams.
pub trait EyeTracker: Send {
    fn calibrated(&self) -> bool;
    fn calibrate(&mut self) -> Result<(), DeviceError>;
    /// Begin the tracker's own file recording at `path`.
    fn start_recording(&mut self, path: &Path) -> Result<(), DeviceError>;
    fn stop_recording(&mut self) -> Result<(), DeviceError>;
    fn is_recording(&self) -> bool;
}

/// Opens a stream for a device requirement.
pub trait DeviceOpener: Send + Sync {
    fn open(&self, requirement: &DeviceRequirement) -> Result<Box<dyn DeviceStream>, DeviceError>;
}

/// Stand-in for a device that failed to open. Always reports `Error`, so
/// the next reconnect retries it.
pub struct FailedDevice {
    name: String,
    kind: DeviceKind,
    reason: String,
}

impl FailedDevice {
    pub fn new(name: impl Into<String>, kind: DeviceKind, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl DeviceStream for FailedDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn outlet_id(&self) -> &str {
        ""
    }

    fn status(&self) -> StreamStatus {
        StreamStatus::Error
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        Err(DeviceError::Open {
            name: self.name.clone(),
            reason: self.reason.clone(),
        })
    }

    fn stop(&mut self) {}
}
