//! Loopback eye tracker: streams synthetic gaze and writes its own recording file.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use boothproto::DeviceKind;
use tracing::info;

use crate::device::{Capabilities, DeviceStream, EyeTracker, StreamStatus};
use crate::devices::PublishedDevice;
use crate::error::DeviceError;

struct ActiveRecording {
    path: PathBuf,
    file: File,
    first_sample: u64,
}

pub struct LoopbackEyeTracker {
    gaze: PublishedDevice,
    calibrated: bool,
    recording: Option<ActiveRecording>,
}

impl LoopbackEyeTracker {
    pub fn new(gaze: PublishedDevice) -> Self {
        Self {
            gaze,
            calibrated: false,
            recording: None,
        }
    }

    fn op_error(&self, reason: impl Into<String>) -> DeviceError {
        DeviceError::Operation {
            name: self.gaze.name().to_string(),
            reason: reason.into(),
        }
    }

    fn published(&self) -> u64 {
        self.gaze
            .publisher()
            .stats()
            .samples_published
            .load(Ordering::Relaxed)
    }
}

impl DeviceStream for LoopbackEyeTracker {
    fn name(&self) -> &str {
        self.gaze.name()
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::EyeTracker
    }

    fn outlet_id(&self) -> &str {
        self.gaze.outlet_id()
    }

    fn status(&self) -> StreamStatus {
        self.gaze.status()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            calibration: true,
            file_recording: true,
        }
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        self.gaze.start()
    }

    fn stop(&mut self) {
        if self.recording.is_some() {
            let _ = self.stop_recording();
        }
        self.gaze.stop();
    }

    fn as_eye_tracker(&mut self) -> Option<&mut dyn EyeTracker> {
        Some(self)
    }
}

impl EyeTracker for LoopbackEyeTracker {
    fn calibrated(&self) -> bool {
        self.calibrated
    }

    fn calibrate(&mut self) -> Result<(), DeviceError> {
        if !self.gaze.is_healthy() {
            return Err(self.op_error("cannot calibrate while not streaming"));
        }
        self.calibrated = true;
        info!(name = %self.gaze.name(), "eye tracker calibrated");
        Ok(())
    }

    fn start_recording(&mut self, path: &Path) -> Result<(), DeviceError> {
        if let Some(active) = &self.recording {
            return Err(self.op_error(format!(
                "already recording to {}",
                active.path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.op_error(e.to_string()))?;
        }
        let mut file = File::create(path).map_err(|e| self.op_error(e.to_string()))?;
        writeln!(file, "# loopback gaze recording outlet={}", self.gaze.outlet_id())
            .map_err(|e| self.op_error(e.to_string()))?;

        info!(name = %self.gaze.name(), path = %path.display(), "eye tracker recording");
        self.recording = Some(ActiveRecording {
            path: path.to_path_buf(),
            file,
            first_sample: self.published(),
        });
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<(), DeviceError> {
        let Some(mut active) = self.recording.take() else {
            return Ok(());
        };
        let samples = self.published().saturating_sub(active.first_sample);
        writeln!(active.file, "# samples={}", samples).map_err(|e| self.op_error(e.to_string()))?;
        info!(name = %self.gaze.name(), path = %active.path.display(), samples, "eye tracker recording stopped");
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.recording.is_some()
    }
}
