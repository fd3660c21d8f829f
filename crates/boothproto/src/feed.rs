//! Lines published on the operator feed.
//!
//! The control node parses some of these (outlet ids, task starts), so their
//! text layout is part of the protocol.

use std::fmt;

use crate::types::LogRowId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedLine {
    /// `-OUTLETID-:<name>:<id>`
    OutletId { name: String, outlet_id: String },
    /// `UPDATOR:-Connect-`, streams are ready after prepare.
    Connected,
    /// `Initiating task:<task>:<obs>:<log_id>:<HHh-MMm-SSs>`
    InitiatingTask {
        task_id: String,
        obs_id: String,
        log_id: LogRowId,
        start: String,
    },
    /// `Finished task:<task>`
    FinishedTask { task_id: String },
    TaskNotImplemented { task_id: String },
    PausedOtherMessage,
    Text(String),
}

impl FeedLine {
    pub fn text(s: impl Into<String>) -> Self {
        FeedLine::Text(s.into())
    }
}

impl From<String> for FeedLine {
    fn from(s: String) -> Self {
        FeedLine::Text(s)
    }
}

impl From<&str> for FeedLine {
    fn from(s: &str) -> Self {
        FeedLine::Text(s.to_string())
    }
}

impl fmt::Display for FeedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedLine::OutletId { name, outlet_id } => write!(f, "-OUTLETID-:{}:{}", name, outlet_id),
            FeedLine::Connected => f.write_str("UPDATOR:-Connect-"),
            FeedLine::InitiatingTask {
                task_id,
                obs_id,
                log_id,
                start,
            } => write!(f, "Initiating task:{}:{}:{}:{}", task_id, obs_id, log_id, start),
            FeedLine::FinishedTask { task_id } => write!(f, "Finished task:{}", task_id),
            FeedLine::TaskNotImplemented { task_id } => {
                write!(f, "Task {} not implemented", task_id)
            }
            FeedLine::PausedOtherMessage => f.write_str("While paused received another message"),
            FeedLine::Text(s) => f.write_str(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_layouts() {
        let outlet = FeedLine::OutletId {
            name: "Screen".into(),
            outlet_id: "abc-123".into(),
        };
        assert_eq!(outlet.to_string(), "-OUTLETID-:Screen:abc-123");

        let start = FeedLine::InitiatingTask {
            task_id: "task1".into(),
            obs_id: "obs_1".into(),
            log_id: LogRowId(7),
            start: "10h-01m-02s".into(),
        };
        assert_eq!(start.to_string(), "Initiating task:task1:obs_1:7:10h-01m-02s");
        assert_eq!(FeedLine::Connected.to_string(), "UPDATOR:-Connect-");
    }
}
