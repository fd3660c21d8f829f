//! boothproto - wire and domain types for the stimbooth control node.
//!
//! - [`command`]: the operator command envelope received over TCP.
//! - [`acquisition`]: requests sent to the acquisition service.
//! - [`feed`]: lines published on the operator feed.
//! - [`types`]: collections, task descriptors, device requirements and
//!   tech-obs records shared with the metadata store.

pub mod acquisition;
pub mod command;
pub mod feed;
pub mod types;

pub use acquisition::{parse_ack, AckError, AcquisitionRequest};
pub use command::{ping_reply, Command, Interrupt, PreparePayload, ProtocolError, STUDY_ID_DATE};
pub use feed::FeedLine;
pub use types::{
    date_times, event_array, start_stamp, Collection, DeviceKind, DeviceRequirement, Kwargs,
    LogRowId, TaskDescriptor, TaskKind, TechObsRecord, NO_EVENTS,
};
