//! Built-in device streams.
//!
//! Real hardware drivers plug in through [`DeviceOpener`]. The loopback
//! opener here backs every device kind with a synthetic source, which is
//! what a bench setup without sensors runs against.

pub mod eye_tracker;
pub mod marker;
pub mod signal;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use boothconf::DevicesConfig;
use boothproto::{DeviceKind, DeviceRequirement};
use serde_json::Value;

use crate::device::{DeviceOpener, DeviceStream, StreamStatus};
use crate::error::DeviceError;
use crate::outlet::OutletFactory;
use crate::publisher::{CaptureSource, StreamPublisher};

use eye_tracker::LoopbackEyeTracker;
use marker::MarkerStream;
use signal::{SignalFormat, SignalGenerator};

/// A device whose samples come from a [`StreamPublisher`] loop.
pub struct PublishedDevice {
    kind: DeviceKind,
    publisher: StreamPublisher,
}

impl PublishedDevice {
    pub fn new(kind: DeviceKind, publisher: StreamPublisher) -> Self {
        Self { kind, publisher }
    }

    pub fn publisher(&self) -> &StreamPublisher {
        &self.publisher
    }
}

impl DeviceStream for PublishedDevice {
    fn name(&self) -> &str {
        self.publisher.name()
    }

    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn outlet_id(&self) -> &str {
        self.publisher.outlet_id()
    }

    fn status(&self) -> StreamStatus {
        let stats = self.publisher.stats();
        if stats.failed() {
            StreamStatus::Error
        } else if self.publisher.is_active() {
            if stats.samples_published.load(Ordering::Relaxed) == 0 {
                StreamStatus::Connecting
            } else {
                StreamStatus::Streaming
            }
        } else {
            StreamStatus::Disconnected
        }
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        self.publisher.start()
    }

    fn stop(&mut self) {
        self.publisher.stop();
    }
}

const MAX_CHANNELS: u64 = 256;
const MAX_CHUNK_FRAMES: u64 = 1 << 16;
const MAX_SAMPLE_RATE: u64 = 192_000;

/// Shape of the synthetic signal for one device kind.
struct SignalShape {
    channels: usize,
    frames: usize,
    sample_rate: u32,
    format: SignalFormat,
}

impl SignalShape {
    fn for_kind(kind: DeviceKind, devices: &DevicesConfig) -> Self {
        match kind {
            DeviceKind::Microphone => Self {
                channels: 1,
                frames: devices.chunk_frames,
                sample_rate: devices.sample_rate,
                format: SignalFormat::Pcm16,
            },
            DeviceKind::EyeTracker => Self {
                channels: 2,
                frames: 10,
                sample_rate: 1000,
                format: SignalFormat::Float,
            },
            DeviceKind::Biosensor => Self {
                channels: 3,
                frames: 10,
                sample_rate: 100,
                format: SignalFormat::Float,
            },
            DeviceKind::Camera => Self {
                channels: 1,
                frames: 1,
                sample_rate: 30,
                format: SignalFormat::Float,
            },
            DeviceKind::Screen | DeviceKind::Marker => Self {
                channels: 1,
                frames: 1,
                sample_rate: 10,
                format: SignalFormat::Float,
            },
        }
    }

    /// Per-device overrides from the requirement's kwargs.
    fn with_overrides(mut self, requirement: &DeviceRequirement) -> Result<Self, DeviceError> {
        let get = |key: &str, max: u64| -> Result<Option<u64>, DeviceError> {
            match requirement.kwargs.get(key) {
                None => Ok(None),
                Some(value) => match value.as_u64() {
                    Some(n) if (1..=max).contains(&n) => Ok(Some(n)),
                    _ => Err(DeviceError::Open {
                        name: requirement.name.clone(),
                        reason: format!("{} must be an integer in 1..={}, got {}", key, max, value),
                    }),
                },
            }
        };
        if let Some(channels) = get("channels", MAX_CHANNELS)? {
            self.channels = channels as usize;
        }
        if let Some(frames) = get("chunk_frames", MAX_CHUNK_FRAMES)? {
            self.frames = frames as usize;
        }
        if let Some(rate) = get("sample_rate", MAX_SAMPLE_RATE)? {
            self.sample_rate = rate as u32;
        }
        Ok(self)
    }

    fn source(&self) -> Box<dyn CaptureSource> {
        Box::new(SignalGenerator::new(
            self.channels,
            self.frames,
            self.sample_rate,
            self.format,
        ))
    }
}

/// Opens synthetic streams for every device kind.
pub struct LoopbackOpener {
    factory: Arc<dyn OutletFactory>,
    devices: DevicesConfig,
}

impl LoopbackOpener {
    pub fn new(factory: Arc<dyn OutletFactory>, devices: DevicesConfig) -> Self {
        Self { factory, devices }
    }
}

impl DeviceOpener for LoopbackOpener {
    fn open(&self, requirement: &DeviceRequirement) -> Result<Box<dyn DeviceStream>, DeviceError> {
        let kind = requirement.kind;
        let name = requirement.name.as_str();

        if kind == DeviceKind::Marker {
            let stream = MarkerStream::new(name, Arc::clone(&self.factory))?;
            return Ok(Box::new(stream));
        }

        let shape = SignalShape::for_kind(kind, &self.devices).with_overrides(requirement)?;
        let publisher =
            StreamPublisher::new(name, kind, shape.source(), Arc::clone(&self.factory))?;
        let device = PublishedDevice::new(kind, publisher);

        Ok(match kind {
            DeviceKind::EyeTracker => Box::new(LoopbackEyeTracker::new(device)),
            _ => Box::new(device),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outlet::OutletHub;
    use std::time::Duration;

    fn opener() -> LoopbackOpener {
        LoopbackOpener::new(Arc::new(OutletHub::new()), DevicesConfig::default())
    }

    #[test]
    fn test_opens_each_kind() {
        let opener = opener();
        for kind in [
            DeviceKind::Marker,
            DeviceKind::Microphone,
            DeviceKind::EyeTracker,
            DeviceKind::Biosensor,
            DeviceKind::Camera,
            DeviceKind::Screen,
        ] {
            let mut stream = opener
                .open(&DeviceRequirement::new(format!("{kind}"), kind))
                .unwrap();
            assert_eq!(stream.kind(), kind);
            assert!(!stream.outlet_id().is_empty());
            assert_eq!(stream.status(), StreamStatus::Disconnected);
            stream.start().unwrap();
            assert!(stream.is_healthy());
            stream.stop();
        }
    }

    #[test]
    fn test_eye_tracker_capabilities() {
        let mut stream = opener()
            .open(&DeviceRequirement::new("Eyelink", DeviceKind::EyeTracker))
            .unwrap();
        assert!(stream.capabilities().calibration);
        assert!(stream.as_eye_tracker().is_some());
        assert!(stream.marker().is_none());
    }

    #[test]
    fn test_out_of_range_shape_is_rejected() {
        let opener = opener();
        for (key, value) in [
            ("channels", serde_json::json!(u64::MAX)),
            ("chunk_frames", serde_json::json!(0)),
            ("sample_rate", serde_json::json!(-5)),
            ("channels", serde_json::json!("two")),
        ] {
            let mut req = DeviceRequirement::new("Mic", DeviceKind::Microphone);
            req.kwargs.insert(key.into(), value);
            assert!(matches!(opener.open(&req), Err(DeviceError::Open { .. })));
        }
    }

    #[test]
    fn test_published_device_reaches_streaming() {
        let mut req = DeviceRequirement::new("Mic", DeviceKind::Microphone);
        req.kwargs.insert("chunk_frames".into(), 64.into());
        let mut stream = opener().open(&req).unwrap();
        stream.start().unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while stream.status() != StreamStatus::Streaming && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(stream.status(), StreamStatus::Streaming);
        stream.stop();
    }
}
