//! Device stream registry: the named map of open streams for a session.

use std::collections::BTreeMap;
use std::sync::Arc;

use boothproto::{DeviceKind, DeviceRequirement, FeedLine};
use tracing::{info, warn};

use crate::device::{DeviceOpener, DeviceStream, EyeTracker, FailedDevice, StreamStatus};
use crate::devices::marker::MarkerHandle;
use crate::feed::OperatorFeed;

struct Entry {
    requirement: DeviceRequirement,
    stream: Box<dyn DeviceStream>,
}

/// Summary row for one registered stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub name: String,
    pub kind: DeviceKind,
    pub outlet_id: String,
    pub status: StreamStatus,
}

/// Owns every device stream of the session, unique by name.
///
/// Every entry is either live or a [`FailedDevice`] marked in error.
pub struct DeviceRegistry {
    opener: Arc<dyn DeviceOpener>,
    feed: OperatorFeed,
    entries: BTreeMap<String, Entry>,
}

impl DeviceRegistry {
    pub fn new(opener: Arc<dyn DeviceOpener>, feed: OperatorFeed) -> Self {
        Self {
            opener,
            feed,
            entries: BTreeMap::new(),
        }
    }

    /// Open a stream for each requirement not yet in the map, and reconnect
    /// existing entries that fail their liveness check. Healthy entries are
    /// left untouched, so calling this twice is safe.
    pub fn prepare(&mut self, requirements: &[DeviceRequirement]) -> Vec<String> {
        for requirement in requirements {
            match self.entries.get(&requirement.name) {
                Some(entry) if entry.stream.is_healthy() => {}
                Some(_) => self.replace(requirement.clone()),
                None => {
                    let stream = self.open(requirement);
                    self.entries.insert(
                        requirement.name.clone(),
                        Entry {
                            requirement: requirement.clone(),
                            stream,
                        },
                    );
                }
            }
        }
        self.names()
    }

    /// Replace every unhealthy entry. Returns how many were replaced.
    pub fn reconnect(&mut self) -> usize {
        let unhealthy: Vec<DeviceRequirement> = self
            .entries
            .values()
            .filter(|e| !e.stream.is_healthy())
            .map(|e| e.requirement.clone())
            .collect();

        let count = unhealthy.len();
        for requirement in unhealthy {
            self.replace(requirement);
        }
        count
    }

    /// Stop every stream and empty the map. Safe on an empty or stopped map.
    pub fn close(&mut self) -> usize {
        let count = self.entries.len();
        for (name, mut entry) in std::mem::take(&mut self.entries) {
            entry.stream.stop();
            info!(name = %name, "stream closed");
        }
        count
    }

    fn replace(&mut self, requirement: DeviceRequirement) {
        if let Some(mut old) = self.entries.remove(&requirement.name) {
            warn!(name = %requirement.name, status = %old.stream.status(), "reconnecting stream");
            old.stream.stop();
        }
        let stream = self.open(&requirement);
        self.entries
            .insert(requirement.name.clone(), Entry { requirement, stream });
    }

    /// Open and start one stream. Failures become a [`FailedDevice`] entry.
    fn open(&self, requirement: &DeviceRequirement) -> Box<dyn DeviceStream> {
        let opened = self.opener.open(requirement).and_then(|mut stream| {
            stream.start()?;
            Ok(stream)
        });

        match opened {
            Ok(stream) => {
                info!(name = %requirement.name, kind = %requirement.kind, outlet_id = %stream.outlet_id(), "stream opened");
                self.feed.publish(FeedLine::OutletId {
                    name: requirement.name.clone(),
                    outlet_id: stream.outlet_id().to_string(),
                });
                stream
            }
            Err(e) => {
                warn!(name = %requirement.name, error = %e, "stream failed to open");
                self.feed
                    .publish(format!("Device {} failed to open: {}", requirement.name, e));
                Box::new(FailedDevice::new(
                    requirement.name.clone(),
                    requirement.kind,
                    e.to_string(),
                ))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn status(&self, name: &str) -> Option<StreamStatus> {
        self.entries.get(name).map(|e| e.stream.status())
    }

    /// Missing entries count as unusable too.
    pub fn is_unusable(&self, name: &str) -> bool {
        !matches!(
            self.status(name),
            Some(StreamStatus::Streaming | StreamStatus::Connecting)
        )
    }

    pub fn snapshot(&self) -> Vec<StreamInfo> {
        self.entries
            .iter()
            .map(|(name, e)| StreamInfo {
                name: name.clone(),
                kind: e.stream.kind(),
                outlet_id: e.stream.outlet_id().to_string(),
                status: e.stream.status(),
            })
            .collect()
    }

    pub fn outlet_id(&self, name: &str) -> Option<String> {
        self.entries
            .get(name)
            .map(|e| e.stream.outlet_id().to_string())
    }

    /// First healthy marker stream's publishing handle.
    pub fn marker(&self) -> Option<MarkerHandle> {
        self.entries
            .values()
            .filter(|e| e.stream.is_healthy())
            .find_map(|e| e.stream.marker())
    }

    /// First healthy eye tracker.
    pub fn eye_tracker_mut(&mut self) -> Option<&mut dyn EyeTracker> {
        self.entries
            .values_mut()
            .filter(|e| e.stream.kind() == DeviceKind::EyeTracker && e.stream.is_healthy())
            .find_map(|e| e.stream.as_eye_tracker())
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::LoopbackOpener;
    use crate::outlet::OutletHub;
    use boothconf::DevicesConfig;

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(
            Arc::new(LoopbackOpener::new(
                Arc::new(OutletHub::new()),
                DevicesConfig::default(),
            )),
            OperatorFeed::new(),
        )
    }

    #[test]
    fn test_prepare_announces_outlets() {
        let mut reg = registry();
        let mut rx = reg.feed.subscribe();
        reg.prepare(&[DeviceRequirement::new("marker", DeviceKind::Marker)]);

        let line = rx.try_recv().unwrap();
        assert!(line.starts_with("-OUTLETID-:marker:"));
        assert_eq!(reg.marker().map(|m| m.outlet_id().to_string()), reg.outlet_id("marker"));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut reg = registry();
        reg.prepare(&[
            DeviceRequirement::new("marker", DeviceKind::Marker),
            DeviceRequirement::new("Screen", DeviceKind::Screen),
        ]);
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.close(), 2);
        assert_eq!(reg.close(), 0);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_missing_device_is_unusable() {
        let reg = registry();
        assert!(reg.is_unusable("Eyelink"));
    }
}
