//! Acquisition service wire protocol.
//!
//! One request per connection: the control node writes the request text,
//! the acquisition service answers `record_start` with a short
//! acknowledgement. `record_stop` is fire-and-forget.

use std::fmt;
use thiserror::Error;

const FIELD_SEP: &str = "::";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionRequest {
    RecordStart { output_path: String, task_id: String },
    RecordStop,
}

impl AcquisitionRequest {
    pub fn record_start(output_path: impl Into<String>, task_id: impl Into<String>) -> Self {
        AcquisitionRequest::RecordStart {
            output_path: output_path.into(),
            task_id: task_id.into(),
        }
    }

    pub fn to_wire(&self) -> String {
        match self {
            AcquisitionRequest::RecordStart {
                output_path,
                task_id,
            } => format!("record_start{FIELD_SEP}{output_path}{FIELD_SEP}{task_id}"),
            AcquisitionRequest::RecordStop => "record_stop".to_string(),
        }
    }

    /// Decode a request as the acquisition side sees it.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text == "record_stop" {
            return Some(AcquisitionRequest::RecordStop);
        }
        let rest = text.strip_prefix("record_start")?.strip_prefix(FIELD_SEP)?;
        // Task ids never contain the separator; output paths might.
        let (output_path, task_id) = rest.rsplit_once(FIELD_SEP)?;
        if output_path.is_empty() || task_id.is_empty() {
            return None;
        }
        Some(Self::record_start(output_path, task_id))
    }

    /// Whether the sender waits for an acknowledgement.
    pub fn expects_ack(&self) -> bool {
        matches!(self, AcquisitionRequest::RecordStart { .. })
    }
}

impl fmt::Display for AcquisitionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AckError {
    #[error("empty acknowledgement")]
    Empty,

    #[error("acknowledgement is not valid UTF-8")]
    Malformed,
}

/// Decode an acknowledgement from the acquisition service.
pub fn parse_ack(bytes: &[u8]) -> Result<String, AckError> {
    let text = std::str::from_utf8(bytes).map_err(|_| AckError::Malformed)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(AckError::Empty);
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_record_start_wire_format() {
        let req = AcquisitionRequest::record_start("/data/st_2024_10h-01m-02s_obs_1", "task1");
        assert_eq!(
            req.to_wire(),
            "record_start::/data/st_2024_10h-01m-02s_obs_1::task1"
        );
        assert!(req.expects_ack());
        assert!(!AcquisitionRequest::RecordStop.expects_ack());
    }

    #[test]
    fn test_parse_request() {
        assert_eq!(
            AcquisitionRequest::parse("record_start::/tmp/a::b::task1"),
            Some(AcquisitionRequest::record_start("/tmp/a::b", "task1"))
        );
        assert_eq!(
            AcquisitionRequest::parse("record_stop\n"),
            Some(AcquisitionRequest::RecordStop)
        );
        assert_eq!(AcquisitionRequest::parse("record_start::only"), None);
        assert_eq!(AcquisitionRequest::parse("hello"), None);
    }

    #[test]
    fn test_parse_ack() {
        assert_eq!(parse_ack(b"ACQ_ready\n"), Ok("ACQ_ready".to_string()));
        assert_eq!(parse_ack(b"  "), Err(AckError::Empty));
        assert_eq!(parse_ack(&[0xff, 0xfe]), Err(AckError::Malformed));
    }
}
