//! Session domain types shared by the engine and the metadata store.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Configuration keyword arguments attached to a task or device.
pub type Kwargs = Map<String, Value>;

/// Stored in place of an event array when a task reports no events.
pub const NO_EVENTS: &str = "event:datestamp";

/// Identifier of an allocated tech-obs log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogRowId(pub i64);

impl fmt::Display for LogRowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The sort of device behind a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Discrete event labels used to align recordings.
    Marker,
    Microphone,
    EyeTracker,
    Camera,
    /// Physiological sensors (EMG, accelerometer, ...).
    Biosensor,
    /// Mirror of the presentation screen.
    Screen,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Marker => "marker",
            DeviceKind::Microphone => "microphone",
            DeviceKind::EyeTracker => "eye_tracker",
            DeviceKind::Camera => "camera",
            DeviceKind::Biosensor => "biosensor",
            DeviceKind::Screen => "screen",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "marker" => Ok(DeviceKind::Marker),
            "microphone" => Ok(DeviceKind::Microphone),
            "eye_tracker" => Ok(DeviceKind::EyeTracker),
            "camera" => Ok(DeviceKind::Camera),
            "biosensor" => Ok(DeviceKind::Biosensor),
            "screen" => Ok(DeviceKind::Screen),
            other => Err(format!("unknown device kind: {}", other)),
        }
    }
}

/// A device a task needs, keyed by its unique stream name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRequirement {
    pub name: String,
    pub kind: DeviceKind,
    #[serde(default)]
    pub kwargs: Kwargs,
}

impl DeviceRequirement {
    pub fn new(name: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            kwargs: Kwargs::new(),
        }
    }
}

/// How a task participates in the recording bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Introductory instructions. Not recorded, no log row.
    Instruction,
    /// Device calibration. Not recorded, no log row.
    Calibration,
    Recordable,
}

impl TaskKind {
    /// Infer the kind from a task identifier's naming convention.
    pub fn infer(task_id: &str) -> Self {
        if task_id.contains("calibration_task") {
            TaskKind::Calibration
        } else if task_id.contains("intro_") {
            TaskKind::Instruction
        } else {
            TaskKind::Recordable
        }
    }

    pub fn is_recordable(&self) -> bool {
        matches!(self, TaskKind::Recordable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Instruction => "instruction",
            TaskKind::Calibration => "calibration",
            TaskKind::Recordable => "recordable",
        }
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instruction" => Ok(TaskKind::Instruction),
            "calibration" => Ok(TaskKind::Calibration),
            "recordable" => Ok(TaskKind::Recordable),
            other => Err(format!("unknown task kind: {}", other)),
        }
    }
}

/// One task of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub task_id: String,
    /// Observation-type identifier stored with every log row for this task.
    pub obs_id: String,
    /// Falls back to [`TaskKind::infer`] when absent.
    #[serde(default)]
    pub kind: Option<TaskKind>,
    #[serde(default)]
    pub kwargs: Kwargs,
    #[serde(default)]
    pub devices: Vec<DeviceRequirement>,
}

impl TaskDescriptor {
    pub fn new(task_id: impl Into<String>, obs_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            obs_id: obs_id.into(),
            kind: None,
            kwargs: Kwargs::new(),
            devices: Vec::new(),
        }
    }

    pub fn with_device(mut self, device: DeviceRequirement) -> Self {
        self.devices.push(device);
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    pub fn kind(&self) -> TaskKind {
        self.kind.unwrap_or_else(|| TaskKind::infer(&self.task_id))
    }

    pub fn requires(&self, kind: DeviceKind) -> bool {
        self.devices.iter().any(|d| d.kind == kind)
    }
}

/// A named study protocol: ordered tasks and the devices they need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    #[serde(default)]
    pub tasks: Vec<TaskDescriptor>,
}

impl Collection {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tasks: Vec::new(),
        }
    }

    pub fn with_task(mut self, task: TaskDescriptor) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskDescriptor> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    /// Union of every task's device requirements, first declaration wins.
    pub fn device_requirements(&self) -> Vec<DeviceRequirement> {
        let mut out: Vec<DeviceRequirement> = Vec::new();
        for device in self.tasks.iter().flat_map(|t| t.devices.iter()) {
            if !out.iter().any(|d| d.name == device.name) {
                out.push(device.clone());
            }
        }
        out
    }
}

/// A completed tech-obs row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechObsRecord {
    pub subject_id: String,
    pub task_id: String,
    pub tech_obs_id: String,
    /// `{YYYY-MM-DD HH:MM:SS}` at task start.
    pub date_times: String,
    /// JSON array of event strings, or [`NO_EVENTS`].
    pub event_array: String,
    /// Session fields supplied with `prepare`.
    #[serde(default)]
    pub fields: Kwargs,
}

/// Serialize a task's returned events for the log row.
pub fn event_array(events: Option<&[String]>) -> String {
    match events {
        Some(events) => Value::from(events.to_vec()).to_string(),
        None => NO_EVENTS.to_string(),
    }
}

/// `{YYYY-MM-DD HH:MM:SS}`
pub fn date_times(at: &DateTime<Local>) -> String {
    format!("{{{}}}", at.format("%Y-%m-%d %H:%M:%S"))
}

/// `HHh-MMm-SSs`, used in output file names and the task-start line.
pub fn start_stamp(at: &DateTime<Local>) -> String {
    at.format("%Hh-%Mm-%Ss").to_string()
}
