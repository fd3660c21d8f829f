//! Publishing endpoints.
//!
//! An outlet is the addressable sink a device stream writes samples to,
//! identified by a stable id that survives recreation. [`OutletHub`] is the
//! in-process implementation: each outlet id owns a broadcast channel, and
//! consumers subscribe by id. Tearing an outlet down closes the endpoint
//! without dropping subscribers, so a recreated outlet keeps feeding them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use boothproto::DeviceKind;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::PublishError;

const OUTLET_CAPACITY: usize = 4096;

/// Payload of one published sample.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleData {
    /// Flat numeric sample (interleaved channels).
    Numeric(Vec<f32>),
    /// A discrete event label.
    Marker(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Position in the stream, counted from 0 by the publisher.
    pub seq: u64,
    /// Seconds since the unix epoch.
    pub timestamp: f64,
    pub data: SampleData,
}

/// A live publishing endpoint.
pub trait Outlet: Send {
    fn id(&self) -> &str;
    fn push(&self, sample: &Sample) -> Result<(), PublishError>;
}

/// Creates outlets. Called once per stream and again on recovery.
pub trait OutletFactory: Send + Sync {
    fn create(
        &self,
        name: &str,
        kind: DeviceKind,
        outlet_id: &str,
    ) -> Result<Box<dyn Outlet>, PublishError>;

    /// The stream owning `outlet_id` is gone and will not recreate it.
    fn release(&self, _outlet_id: &str) {}
}

struct HubEntry {
    tx: broadcast::Sender<Sample>,
    closed: Arc<AtomicBool>,
}

#[derive(Clone, Default)]
pub struct OutletHub {
    entries: Arc<RwLock<HashMap<String, HubEntry>>>,
}

impl OutletHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to an outlet's samples, including those pushed after recreation.
    pub fn subscribe(&self, outlet_id: &str) -> Option<broadcast::Receiver<Sample>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(outlet_id).map(|e| e.tx.subscribe())
    }

    /// Close the current endpoint of an outlet. Pushes fail with
    /// [`PublishError::EndpointClosed`] until the outlet is recreated.
    pub fn teardown(&self, outlet_id: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(outlet_id) {
            Some(entry) => {
                entry.closed.store(true, Ordering::SeqCst);
                debug!(outlet_id, "outlet torn down");
                true
            }
            None => false,
        }
    }

    /// Forget an outlet. Subscribers see the channel close.
    pub fn remove(&self, outlet_id: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let removed = entries.remove(outlet_id).is_some();
        if removed {
            debug!(outlet_id, "outlet removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_open(&self, outlet_id: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(outlet_id)
            .is_some_and(|e| !e.closed.load(Ordering::SeqCst))
    }
}

impl OutletFactory for OutletHub {
    fn create(
        &self,
        name: &str,
        kind: DeviceKind,
        outlet_id: &str,
    ) -> Result<Box<dyn Outlet>, PublishError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let closed = Arc::new(AtomicBool::new(false));
        let tx = match entries.get_mut(outlet_id) {
            Some(entry) => {
                entry.closed = Arc::clone(&closed);
                entry.tx.clone()
            }
            None => {
                let (tx, _) = broadcast::channel(OUTLET_CAPACITY);
                entries.insert(
                    outlet_id.to_string(),
                    HubEntry {
                        tx: tx.clone(),
                        closed: Arc::clone(&closed),
                    },
                );
                tx
            }
        };
        debug!(name, %kind, outlet_id, "outlet created");

        Ok(Box::new(HubOutlet {
            id: outlet_id.to_string(),
            tx,
            closed,
        }))
    }

    fn release(&self, outlet_id: &str) {
        self.remove(outlet_id);
    }
}

struct HubOutlet {
    id: String,
    tx: broadcast::Sender<Sample>,
    closed: Arc<AtomicBool>,
}

impl Outlet for HubOutlet {
    fn id(&self) -> &str {
        &self.id
    }

    fn push(&self, sample: &Sample) -> Result<(), PublishError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PublishError::EndpointClosed(self.id.clone()));
        }
        // Samples with no consumer are dropped, like an unsubscribed outlet.
        let _ = self.tx.send(sample.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(seq: u64) -> Sample {
        Sample {
            seq,
            timestamp: 0.0,
            data: SampleData::Numeric(vec![seq as f32]),
        }
    }

    #[test]
    fn test_teardown_closes_until_recreated() {
        let hub = OutletHub::new();
        let outlet = hub.create("Mic", DeviceKind::Microphone, "o-1").unwrap();
        let mut rx = hub.subscribe("o-1").unwrap();

        outlet.push(&sample(0)).unwrap();
        assert!(hub.teardown("o-1"));
        assert!(!hub.is_open("o-1"));
        assert_eq!(
            outlet.push(&sample(1)),
            Err(PublishError::EndpointClosed("o-1".into()))
        );

        let outlet = hub.create("Mic", DeviceKind::Microphone, "o-1").unwrap();
        outlet.push(&sample(1)).unwrap();

        assert_eq!(rx.try_recv().unwrap().seq, 0);
        assert_eq!(rx.try_recv().unwrap().seq, 1);
    }

    #[test]
    fn test_release_forgets_the_outlet() {
        let hub = OutletHub::new();
        let outlet = hub.create("Mic", DeviceKind::Microphone, "o-1").unwrap();
        hub.create("Cam", DeviceKind::Camera, "o-2").unwrap();
        assert_eq!(hub.len(), 2);

        hub.release("o-1");
        assert_eq!(hub.len(), 1);
        assert!(hub.subscribe("o-1").is_none());
        assert!(!hub.remove("o-1"));
        // A straggling push from the released outlet is harmless.
        outlet.push(&sample(0)).unwrap();
    }

    #[test]
    fn test_unknown_outlet() {
        let hub = OutletHub::new();
        assert!(!hub.teardown("missing"));
        assert!(hub.subscribe("missing").is_none());
    }
}
