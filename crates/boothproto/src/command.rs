//! Operator command envelope.
//!
//! The control node speaks plain text over TCP:
//!
//! ```text
//! scr_stream
//! prepare:<collection_id>:<dict>
//! present:<task1-task2-...>:<subject_id>
//! pause tasks | unpause tasks | stop tasks
//! close
//! shutdown
//! time_test
//! ```
//!
//! Everything is decoded into a [`Command`] here, so the engine never sees raw text.

use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

use crate::types::Kwargs;

/// Key in the prepare payload naming the study/date prefix for output files.
pub const STUDY_ID_DATE: &str = "study_id-date";

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("empty command")]
    Empty,

    #[error("unrecognized command: {0}")]
    Unknown(String),

    #[error("malformed {verb} command: {reason}")]
    Malformed { verb: &'static str, reason: String },

    #[error("invalid prepare payload: {0}")]
    Payload(String),
}

/// Out-of-band requests honored by the sequencer at task boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Pause,
    Unpause,
    Stop,
}

impl Interrupt {
    pub fn as_wire(&self) -> &'static str {
        match self {
            Interrupt::Pause => "pause tasks",
            Interrupt::Unpause => "unpause tasks",
            Interrupt::Stop => "stop tasks",
        }
    }
}

/// Session fields supplied with `prepare`.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparePayload {
    /// Prefix for every output file of the session.
    pub study_id_date: String,
    /// Remaining fields, copied into each tech-obs row.
    pub fields: Kwargs,
}

impl PreparePayload {
    /// Parse the dict text of a prepare command.
    ///
    /// JSON objects are accepted as-is. Python dict literals (single quotes,
    /// `True`/`False`/`None`) are normalised to JSON first.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let text = text.trim();
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => serde_json::from_str(&normalize_python_literal(text))
                .map_err(|e| ProtocolError::Payload(e.to_string()))?,
        };

        let Value::Object(mut fields) = value else {
            return Err(ProtocolError::Payload("expected a dict".to_string()));
        };

        let study_id_date = match fields.remove(STUDY_ID_DATE) {
            Some(Value::String(s)) if !s.is_empty() => s,
            Some(_) => {
                return Err(ProtocolError::Payload(format!(
                    "{} must be a non-empty string",
                    STUDY_ID_DATE
                )))
            }
            None => return Err(ProtocolError::Payload(format!("missing {}", STUDY_ID_DATE))),
        };

        Ok(Self {
            study_id_date,
            fields,
        })
    }

    pub fn to_json(&self) -> String {
        let mut map = Map::new();
        map.insert(
            STUDY_ID_DATE.to_string(),
            Value::String(self.study_id_date.clone()),
        );
        map.extend(self.fields.clone());
        Value::Object(map).to_string()
    }
}

/// A decoded operator command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ScreenStream,
    Prepare {
        collection_id: String,
        payload: PreparePayload,
    },
    Present {
        tasks: Vec<String>,
        subject_id: String,
    },
    Interrupt(Interrupt),
    Close,
    Shutdown,
    TimeTest,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }

        match line {
            "pause tasks" => return Ok(Command::Interrupt(Interrupt::Pause)),
            "unpause tasks" => return Ok(Command::Interrupt(Interrupt::Unpause)),
            "stop tasks" => return Ok(Command::Interrupt(Interrupt::Stop)),
            "scr_stream" => return Ok(Command::ScreenStream),
            "close" => return Ok(Command::Close),
            "shutdown" => return Ok(Command::Shutdown),
            "time_test" => return Ok(Command::TimeTest),
            _ => {}
        }

        if let Some(rest) = line.strip_prefix("prepare:") {
            let (collection_id, dict) =
                rest.split_once(':').ok_or_else(|| ProtocolError::Malformed {
                    verb: "prepare",
                    reason: "expected prepare:<collection_id>:<dict>".to_string(),
                })?;
            if collection_id.is_empty() {
                return Err(ProtocolError::Malformed {
                    verb: "prepare",
                    reason: "empty collection id".to_string(),
                });
            }
            return Ok(Command::Prepare {
                collection_id: collection_id.to_string(),
                payload: PreparePayload::parse(dict)?,
            });
        }

        if let Some(rest) = line.strip_prefix("present:") {
            let (tasks, subject_id) =
                rest.split_once(':').ok_or_else(|| ProtocolError::Malformed {
                    verb: "present",
                    reason: "expected present:<tasks>:<subject_id>".to_string(),
                })?;
            let tasks: Vec<String> = tasks
                .split('-')
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
            if tasks.is_empty() {
                return Err(ProtocolError::Malformed {
                    verb: "present",
                    reason: "no tasks".to_string(),
                });
            }
            if subject_id.is_empty() || subject_id.contains(':') {
                return Err(ProtocolError::Malformed {
                    verb: "present",
                    reason: format!("bad subject id {:?}", subject_id),
                });
            }
            return Ok(Command::Present {
                tasks,
                subject_id: subject_id.to_string(),
            });
        }

        Err(ProtocolError::Unknown(line.to_string()))
    }

    /// Verb name, for logging.
    pub fn verb(&self) -> &'static str {
        match self {
            Command::ScreenStream => "scr_stream",
            Command::Prepare { .. } => "prepare",
            Command::Present { .. } => "present",
            Command::Interrupt(i) => i.as_wire(),
            Command::Close => "close",
            Command::Shutdown => "shutdown",
            Command::TimeTest => "time_test",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Prepare {
                collection_id,
                payload,
            } => write!(f, "prepare:{}:{}", collection_id, payload.to_json()),
            Command::Present { tasks, subject_id } => {
                write!(f, "present:{}:{}", tasks.join("-"), subject_id)
            }
            other => f.write_str(other.verb()),
        }
    }
}

/// Reply to `time_test`.
pub fn ping_reply(unix_seconds: f64) -> String {
    format!("ping_{}", unix_seconds)
}

/// Rewrite a Python dict literal as JSON.
///
/// Single-quoted strings become double-quoted, and the bare words
/// `True`, `False` and `None` outside strings become JSON literals.
fn normalize_python_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    // Quote character of the string we are inside, if any.
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => match c {
                '\\' => match chars.next() {
                    Some('\'') => out.push('\''),
                    Some(next) => {
                        out.push('\\');
                        out.push(next);
                    }
                    None => out.push('\\'),
                },
                '"' if q == '\'' => out.push_str("\\\""),
                c if c == q => {
                    out.push('"');
                    quote = None;
                }
                c => out.push(c),
            },
            None => match c {
                '\'' | '"' => {
                    out.push('"');
                    quote = Some(c);
                }
                c if c.is_ascii_alphabetic() => {
                    let mut word = String::from(c);
                    while let Some(&next) = chars.peek() {
                        if next.is_ascii_alphanumeric() || next == '_' {
                            word.push(next);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    out.push_str(match word.as_str() {
                        "True" => "true",
                        "False" => "false",
                        "None" => "null",
                        other => other,
                    });
                }
                c => out.push(c),
            },
        }
    }

    out
}
