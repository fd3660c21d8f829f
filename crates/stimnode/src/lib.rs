//! stimnode: session orchestration for the stimulus-presentation node.
//!
//! Operators drive a session over a text command socket. The coordinating
//! task prepares device streams for a collection, presents tasks in order
//! with each recordable task bracketed by acquisition start/stop, and writes
//! one tech-obs row per recorded task.
//!
//! ```text
//! operator ──tcp──▶ dispatcher ──mpsc──▶ coordinator (SessionController)
//!                       │                    ├─ DeviceRegistry ─▶ publishers (threads)
//!                       └──interrupts──▶     ├─ Sequencer ─▶ Recorder (acquisition tcp)
//!                                            └─ MetadataStore (obslog)
//! ```

pub mod controller;
pub mod device;
pub mod devices;
pub mod dispatcher;
pub mod error;
pub mod feed;
pub mod node;
pub mod outlet;
pub mod publisher;
pub mod recorder;
pub mod registry;
pub mod sequencer;
pub mod session;
pub mod store;
pub mod surface;
pub mod task;
pub mod telemetry;

pub use controller::{ControllerParts, Outcome, SessionController};
pub use device::{Capabilities, DeviceOpener, DeviceStream, EyeTracker, FailedDevice, StreamStatus};
pub use devices::LoopbackOpener;
pub use error::{CaptureError, DeviceError, FatalError, PublishError, SequenceError, TransportError};
pub use feed::OperatorFeed;
pub use node::{start, RunningNode};
pub use outlet::{Outlet, OutletFactory, OutletHub, Sample, SampleData};
pub use publisher::{CaptureSource, Chunk, PublisherStats, StreamPublisher};
pub use recorder::{AcquisitionClient, Recorder};
pub use registry::{DeviceRegistry, StreamInfo};
pub use sequencer::{QueuedTask, SequenceOutcome, Sequencer, Signal};
pub use session::{SessionContext, SessionEvent, SessionState, TransitionError};
pub use store::MetadataStore;
pub use surface::{HeadlessSurface, Screen, Surface};
pub use task::{Task, TaskCatalog, TaskContext};
