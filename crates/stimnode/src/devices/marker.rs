//! Marker stream: discrete event labels used to align recordings.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use boothproto::DeviceKind;
use tracing::{error, warn};

use crate::device::{DeviceStream, StreamStatus};
use crate::error::{DeviceError, PublishError};
use crate::outlet::{Outlet, OutletFactory, Sample, SampleData};
use crate::publisher::unix_seconds;

struct MarkerInner {
    name: String,
    outlet_id: String,
    factory: Arc<dyn OutletFactory>,
    outlet: Mutex<Box<dyn Outlet>>,
    seq: AtomicU64,
    open: AtomicBool,
    failed: AtomicBool,
}

/// Cloneable handle tasks use to publish markers.
#[derive(Clone)]
pub struct MarkerHandle {
    inner: Arc<MarkerInner>,
}

impl MarkerHandle {
    pub fn outlet_id(&self) -> &str {
        &self.inner.outlet_id
    }

    /// Publish a label, stamped with the current time.
    ///
    /// A torn-down endpoint is recreated once and the label re-sent.
    pub fn push(&self, label: &str) -> Result<(), PublishError> {
        let inner = &self.inner;
        if !inner.open.load(Ordering::SeqCst) {
            return Err(PublishError::Rejected {
                outlet_id: inner.outlet_id.clone(),
                reason: "marker stream is stopped".to_string(),
            });
        }

        let sample = Sample {
            seq: inner.seq.fetch_add(1, Ordering::SeqCst),
            timestamp: unix_seconds(),
            data: SampleData::Marker(label.to_string()),
        };

        let mut outlet = inner.outlet.lock().unwrap_or_else(PoisonError::into_inner);
        let result = match outlet.push(&sample) {
            Err(e) if e.is_recoverable() => {
                warn!(name = %inner.name, "marker outlet closed, recreating");
                inner
                    .factory
                    .create(&inner.name, DeviceKind::Marker, &inner.outlet_id)
                    .and_then(|fresh| {
                        *outlet = fresh;
                        outlet.push(&sample)
                    })
            }
            other => other,
        };

        if let Err(e) = &result {
            error!(name = %inner.name, error = %e, "marker publish failed");
            inner.failed.store(true, Ordering::SeqCst);
        }
        result
    }
}

pub struct MarkerStream {
    handle: MarkerHandle,
}

impl MarkerStream {
    pub fn new(name: impl Into<String>, factory: Arc<dyn OutletFactory>) -> Result<Self, PublishError> {
        let name = name.into();
        let outlet_id = uuid::Uuid::new_v4().to_string();
        let outlet = factory.create(&name, DeviceKind::Marker, &outlet_id)?;

        Ok(Self {
            handle: MarkerHandle {
                inner: Arc::new(MarkerInner {
                    name,
                    outlet_id,
                    factory,
                    outlet: Mutex::new(outlet),
                    seq: AtomicU64::new(0),
                    open: AtomicBool::new(false),
                    failed: AtomicBool::new(false),
                }),
            },
        })
    }
}

impl DeviceStream for MarkerStream {
    fn name(&self) -> &str {
        &self.handle.inner.name
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Marker
    }

    fn outlet_id(&self) -> &str {
        self.handle.outlet_id()
    }

    fn status(&self) -> StreamStatus {
        let inner = &self.handle.inner;
        if inner.failed.load(Ordering::SeqCst) {
            StreamStatus::Error
        } else if inner.open.load(Ordering::SeqCst) {
            StreamStatus::Streaming
        } else {
            StreamStatus::Disconnected
        }
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        self.handle.inner.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.handle.inner.open.store(false, Ordering::SeqCst);
    }

    fn marker(&self) -> Option<MarkerHandle> {
        Some(self.handle.clone())
    }
}

impl Drop for MarkerStream {
    fn drop(&mut self) {
        let inner = &self.handle.inner;
        inner.open.store(false, Ordering::SeqCst);
        inner.factory.release(&inner.outlet_id);
    }
}
