//! Self-healing stream publisher.
//!
//! Each publisher owns one capture source and one outlet and runs its loop on
//! a dedicated thread:
//!
//! ```text
//! CaptureSource::read_chunk ──▶ Chunk::decode ──▶ Outlet::push
//!                                                    │
//!                                   EndpointClosed ──┴──▶ recreate outlet once,
//!                                                         re-push the same sample
//! ```
//!
//! `stop()` only clears the `streaming` flag. The loop notices at the top of
//! its next iteration and clears `active` on the way out, so callers can poll
//! for completion without joining.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use boothproto::DeviceKind;
use tracing::{debug, error, info, warn};

use crate::error::{CaptureError, DeviceError, PublishError};
use crate::outlet::{Outlet, OutletFactory, Sample, SampleData};

/// One chunk as read from a device.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    /// Little-endian signed 16-bit PCM, channels interleaved.
    Pcm16(Vec<u8>),
    /// Already-decoded values.
    Values(Vec<f32>),
}

impl Chunk {
    /// Decode into a flat numeric sample.
    pub fn decode(self) -> SampleData {
        match self {
            Chunk::Pcm16(bytes) => SampleData::Numeric(
                bytes
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32)
                    .collect(),
            ),
            Chunk::Values(values) => SampleData::Numeric(values),
        }
    }
}

/// A device's raw data source. Reads block until a chunk is available.
pub trait CaptureSource: Send {
    fn read_chunk(&mut self) -> Result<Chunk, CaptureError>;
}

/// How long `start` waits for a stopping loop before giving up.
pub const RESTART_WAIT: Duration = Duration::from_secs(2);

const STATUS_IDLE: u8 = 0;
const STATUS_RUNNING: u8 = 1;
const STATUS_FAILED: u8 = 2;

/// Runtime statistics, updated by the publish thread.
#[derive(Debug, Default)]
pub struct PublisherStats {
    pub samples_published: AtomicU64,
    pub recreations: AtomicU64,
    /// Unix milliseconds of the last successful push, 0 if none.
    pub last_activity_ms: AtomicU64,
    status: AtomicU8,
}

impl PublisherStats {
    pub fn last_activity(&self) -> Option<SystemTime> {
        match self.last_activity_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(UNIX_EPOCH + Duration::from_millis(ms)),
        }
    }

    pub fn failed(&self) -> bool {
        self.status.load(Ordering::SeqCst) == STATUS_FAILED
    }

    fn record_push(&self) {
        self.samples_published.fetch_add(1, Ordering::Relaxed);
        self.last_activity_ms.store(unix_ms(), Ordering::Relaxed);
    }
}

/// What the publish thread hands back when it exits, so the stream can restart.
struct LoopParts {
    source: Box<dyn CaptureSource>,
    outlet: Box<dyn Outlet>,
    next_seq: u64,
}

pub struct StreamPublisher {
    name: String,
    kind: DeviceKind,
    outlet_id: String,
    factory: Arc<dyn OutletFactory>,
    streaming: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
    stats: Arc<PublisherStats>,
    parts: Option<LoopParts>,
    thread_handle: Option<JoinHandle<Option<LoopParts>>>,
}

impl StreamPublisher {
    /// Create the outlet under a fresh unique id. Capture does not start yet.
    pub fn new(
        name: impl Into<String>,
        kind: DeviceKind,
        source: Box<dyn CaptureSource>,
        factory: Arc<dyn OutletFactory>,
    ) -> Result<Self, PublishError> {
        let name = name.into();
        let outlet_id = uuid::Uuid::new_v4().to_string();
        let outlet = factory.create(&name, kind, &outlet_id)?;

        Ok(Self {
            name,
            kind,
            outlet_id,
            factory,
            streaming: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(PublisherStats::default()),
            parts: Some(LoopParts {
                source,
                outlet,
                next_seq: 0,
            }),
            thread_handle: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn outlet_id(&self) -> &str {
        &self.outlet_id
    }

    pub fn stats(&self) -> &Arc<PublisherStats> {
        &self.stats
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// True while the publish loop is running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Start the publish thread. No-op if it is already running.
    ///
    /// A loop that was asked to stop but has not exited yet is waited for
    /// (up to [`RESTART_WAIT`]) and then restarted.
    pub fn start(&mut self) -> Result<(), DeviceError> {
        if self.is_active() {
            if self.is_streaming() {
                return Ok(());
            }
            if !self.wait_stopped(RESTART_WAIT) {
                return Err(DeviceError::Operation {
                    name: self.name.clone(),
                    reason: "previous capture loop is still exiting".to_string(),
                });
            }
        }
        self.reclaim();

        let parts = self
            .parts
            .take()
            .ok_or_else(|| DeviceError::Operation {
                name: self.name.clone(),
                reason: "capture source was lost after a failed run".to_string(),
            })?;

        self.stats.status.store(STATUS_RUNNING, Ordering::SeqCst);
        self.streaming.store(true, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);

        let ctx = LoopContext {
            name: self.name.clone(),
            kind: self.kind,
            outlet_id: self.outlet_id.clone(),
            factory: Arc::clone(&self.factory),
            streaming: Arc::clone(&self.streaming),
            active: Arc::clone(&self.active),
            stats: Arc::clone(&self.stats),
        };

        let spawned = thread::Builder::new()
            .name(format!("publish-{}", self.name))
            .spawn(move || run_publish_loop(ctx, parts));

        match spawned {
            Ok(handle) => {
                self.thread_handle = Some(handle);
                info!(name = %self.name, outlet_id = %self.outlet_id, "publisher started");
                Ok(())
            }
            Err(e) => {
                self.streaming.store(false, Ordering::SeqCst);
                self.active.store(false, Ordering::SeqCst);
                self.stats.status.store(STATUS_FAILED, Ordering::SeqCst);
                Err(DeviceError::Thread(e))
            }
        }
    }

    /// Ask the loop to exit. Never blocks; safe to call repeatedly.
    pub fn stop(&self) {
        if self.streaming.swap(false, Ordering::SeqCst) {
            debug!(name = %self.name, "publisher stop requested");
        }
    }

    /// Wait up to `timeout` for the loop to exit.
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_active() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }

    /// Take back the loop's source and outlet after it has exited.
    ///
    /// Only called once `active` is clear, so the join returns promptly.
    fn reclaim(&mut self) {
        let Some(handle) = self.thread_handle.take() else {
            return;
        };
        match handle.join() {
            Ok(parts) => self.parts = parts,
            Err(_) => error!(name = %self.name, "publish thread panicked"),
        }
    }
}

impl Drop for StreamPublisher {
    fn drop(&mut self) {
        self.stop();
        // Never block the caller on a capture read; a loop still inside one
        // is detached and exits on its own once the read returns.
        if let Some(handle) = self.thread_handle.take() {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                debug!(name = %self.name, "publish thread still reading, detached");
            }
        }
        self.factory.release(&self.outlet_id);
    }
}

struct LoopContext {
    name: String,
    kind: DeviceKind,
    outlet_id: String,
    factory: Arc<dyn OutletFactory>,
    streaming: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
    stats: Arc<PublisherStats>,
}

/// Returns the parts for reuse, or None when the outlet could not be recreated.
fn run_publish_loop(ctx: LoopContext, parts: LoopParts) -> Option<LoopParts> {
    let LoopParts {
        mut source,
        mut outlet,
        mut next_seq,
    } = parts;
    let mut outlet_lost = false;

    while ctx.streaming.load(Ordering::SeqCst) {
        let chunk = match source.read_chunk() {
            Ok(chunk) => chunk,
            Err(CaptureError::EndOfStream) => {
                debug!(name = %ctx.name, "capture source exhausted");
                ctx.stats.status.store(STATUS_IDLE, Ordering::SeqCst);
                break;
            }
            Err(e) => {
                error!(name = %ctx.name, error = %e, "capture failed, stream marked in error");
                ctx.stats.status.store(STATUS_FAILED, Ordering::SeqCst);
                break;
            }
        };

        let sample = Sample {
            seq: next_seq,
            timestamp: unix_seconds(),
            data: chunk.decode(),
        };

        match push_with_recovery(&ctx, &mut outlet, &sample) {
            Ok(()) => {
                next_seq += 1;
                ctx.stats.record_push();
            }
            Err(PushFailure::Publish(e)) => {
                error!(name = %ctx.name, error = %e, "publish failed, stream marked in error");
                ctx.stats.status.store(STATUS_FAILED, Ordering::SeqCst);
                break;
            }
            Err(PushFailure::Recreate(e)) => {
                error!(name = %ctx.name, error = %e, "outlet could not be recreated");
                ctx.stats.status.store(STATUS_FAILED, Ordering::SeqCst);
                outlet_lost = true;
                break;
            }
        }
    }

    if ctx.stats.status.load(Ordering::SeqCst) == STATUS_RUNNING {
        ctx.stats.status.store(STATUS_IDLE, Ordering::SeqCst);
    }
    ctx.streaming.store(false, Ordering::SeqCst);
    ctx.active.store(false, Ordering::SeqCst);
    debug!(name = %ctx.name, published = next_seq, "publish loop exited");

    (!outlet_lost).then_some(LoopParts {
        source,
        outlet,
        next_seq,
    })
}

enum PushFailure {
    Publish(PublishError),
    Recreate(PublishError),
}

/// Push a sample. If the endpoint was torn down, recreate it once under the
/// same id and push the same sample again. Other errors are not retried.
fn push_with_recovery(
    ctx: &LoopContext,
    outlet: &mut Box<dyn Outlet>,
    sample: &Sample,
) -> Result<(), PushFailure> {
    match outlet.push(sample) {
        Ok(()) => Ok(()),
        Err(e) if e.is_recoverable() => {
            warn!(name = %ctx.name, outlet_id = %ctx.outlet_id, seq = sample.seq, "outlet closed, recreating");
            *outlet = ctx
                .factory
                .create(&ctx.name, ctx.kind, &ctx.outlet_id)
                .map_err(PushFailure::Recreate)?;
            ctx.stats.recreations.fetch_add(1, Ordering::Relaxed);
            outlet.push(sample).map_err(PushFailure::Publish)
        }
        Err(e) => Err(PushFailure::Publish(e)),
    }
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub(crate) fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outlet::OutletHub;

    struct Counting {
        left: usize,
    }

    impl CaptureSource for Counting {
        fn read_chunk(&mut self) -> Result<Chunk, CaptureError> {
            if self.left == 0 {
                return Err(CaptureError::EndOfStream);
            }
            self.left -= 1;
            Ok(Chunk::Values(vec![self.left as f32]))
        }
    }

    #[test]
    fn test_pcm16_decode() {
        let chunk = Chunk::Pcm16(vec![0x01, 0x00, 0xff, 0xff, 0x00, 0x80]);
        assert_eq!(
            chunk.decode(),
            SampleData::Numeric(vec![1.0, -1.0, -32768.0])
        );
    }

    #[test]
    fn test_runs_to_end_of_stream() {
        let hub = OutletHub::new();
        let mut publisher = StreamPublisher::new(
            "counter",
            DeviceKind::Biosensor,
            Box::new(Counting { left: 5 }),
            Arc::new(hub.clone()),
        )
        .unwrap();
        let mut rx = hub.subscribe(publisher.outlet_id()).unwrap();

        publisher.start().unwrap();
        assert!(publisher.wait_stopped(Duration::from_secs(5)));

        assert_eq!(publisher.stats().samples_published.load(Ordering::SeqCst), 5);
        assert!(!publisher.stats().failed());
        assert!(publisher.stats().last_activity().is_some());
        for seq in 0..5 {
            assert_eq!(rx.try_recv().unwrap().seq, seq);
        }
    }

    struct Endless;

    impl CaptureSource for Endless {
        fn read_chunk(&mut self) -> Result<Chunk, CaptureError> {
            thread::sleep(Duration::from_millis(5));
            Ok(Chunk::Values(vec![0.0]))
        }
    }

    #[test]
    fn test_start_while_running_is_noop() {
        let mut publisher = StreamPublisher::new(
            "endless",
            DeviceKind::Biosensor,
            Box::new(Endless),
            Arc::new(OutletHub::new()),
        )
        .unwrap();
        publisher.start().unwrap();
        publisher.start().unwrap();
        assert!(publisher.is_active());

        publisher.stop();
        publisher.stop();
        assert!(publisher.wait_stopped(Duration::from_secs(5)));
        assert!(!publisher.is_streaming());
    }

    #[test]
    fn test_start_right_after_stop_restarts() {
        let mut publisher = StreamPublisher::new(
            "endless",
            DeviceKind::Biosensor,
            Box::new(Endless),
            Arc::new(OutletHub::new()),
        )
        .unwrap();
        publisher.start().unwrap();
        thread::sleep(Duration::from_millis(20));

        publisher.stop();
        publisher.start().unwrap();
        let before = publisher.stats().samples_published.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));

        assert!(publisher.is_streaming());
        assert!(publisher.is_active());
        assert!(publisher.stats().samples_published.load(Ordering::SeqCst) > before);
        publisher.stop();
        assert!(publisher.wait_stopped(Duration::from_secs(5)));
    }

    /// First read returns at once, every later read blocks for a long time.
    struct Stuck {
        first: bool,
    }

    impl CaptureSource for Stuck {
        fn read_chunk(&mut self) -> Result<Chunk, CaptureError> {
            if !std::mem::replace(&mut self.first, false) {
                thread::sleep(Duration::from_secs(2));
            }
            Ok(Chunk::Values(vec![1.0]))
        }
    }

    #[test]
    fn test_drop_does_not_wait_for_a_blocked_read() {
        let hub = OutletHub::new();
        let mut publisher = StreamPublisher::new(
            "stuck",
            DeviceKind::Camera,
            Box::new(Stuck { first: true }),
            Arc::new(hub.clone()),
        )
        .unwrap();
        publisher.start().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while publisher.stats().samples_published.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(2));
        }

        let dropped_at = Instant::now();
        drop(publisher);

        assert!(dropped_at.elapsed() < Duration::from_millis(500));
        assert!(hub.is_empty());
    }
}
