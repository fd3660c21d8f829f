//! Fakes shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use boothconf::SessionConfig;
use boothproto::{DeviceKind, DeviceRequirement};
use obslog::ObsLogDb;
use stimnode::{
    DeviceError, DeviceOpener, DeviceStream, EyeTracker, Recorder, Screen, Signal, StreamStatus,
    Surface, Task, TaskCatalog, TaskContext, TransportError,
};
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Ordered record of everything the fakes saw.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> usize {
        self.entries()
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("{entry:?} not in journal {:?}", self.entries()))
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }
}

pub struct JournalingRecorder {
    journal: Journal,
    ack: Option<String>,
}

impl JournalingRecorder {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            ack: Some("ACQ ready".to_string()),
        }
    }

    /// Start requests time out, like an absent acquisition service.
    pub fn silent(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            ack: None,
        }
    }
}

#[async_trait]
impl Recorder for JournalingRecorder {
    async fn start_recording(&self, _output_path: &str, task_id: &str) -> Result<String, TransportError> {
        self.journal.push(format!("record_start:{task_id}"));
        self.ack.clone().ok_or_else(|| TransportError::Timeout {
            endpoint: "fake".to_string(),
            after: Duration::from_millis(1),
        })
    }

    async fn stop_recording(&self) -> Result<(), TransportError> {
        self.journal.push("record_stop");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Script {
    Succeed,
    Events(Vec<String>),
    Fail(&'static str),
    /// Send a signal while running, as an operator would mid-task.
    Send(Signal),
}

pub struct ScriptedTask {
    task_id: String,
    journal: Journal,
    script: Script,
    signals: Option<mpsc::Sender<Signal>>,
}

#[async_trait]
impl Task for ScriptedTask {
    async fn run(&mut self, ctx: TaskContext<'_>) -> anyhow::Result<Option<Vec<String>>> {
        self.journal.push(format!("run:{}", self.task_id));
        ctx.mark(&format!("{}_marker", self.task_id));
        match &self.script {
            Script::Succeed => Ok(None),
            Script::Events(events) => Ok(Some(events.clone())),
            Script::Fail(reason) => Err(anyhow!("{reason}")),
            Script::Send(signal) => {
                if let Some(tx) = &self.signals {
                    tx.try_send(signal.clone()).unwrap();
                }
                // Give the operator's message time to land mid-task.
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(None)
            }
        }
    }
}

/// Builtins plus a `scripted` runner driven by `scripts` (default: succeed).
pub fn scripted_catalog(
    journal: &Journal,
    scripts: HashMap<String, Script>,
    signals: Option<mpsc::Sender<Signal>>,
) -> TaskCatalog {
    let journal = journal.clone();
    let mut catalog = TaskCatalog::with_builtins();
    catalog.register("scripted", move |desc, _kwargs| {
        Ok(Box::new(ScriptedTask {
            task_id: desc.task_id.clone(),
            journal: journal.clone(),
            script: scripts.get(&desc.task_id).cloned().unwrap_or(Script::Succeed),
            signals: signals.clone(),
        }) as Box<dyn Task>)
    });
    catalog
}

#[derive(Clone, Default)]
pub struct RecordingSurface {
    pub shown: Arc<Mutex<Vec<Screen>>>,
}

impl RecordingSurface {
    pub fn screens(&self) -> Vec<Screen> {
        self.shown.lock().unwrap().clone()
    }
}

impl Surface for RecordingSurface {
    fn name(&self) -> &str {
        "recording"
    }

    fn show(&mut self, screen: &Screen) -> anyhow::Result<()> {
        self.shown.lock().unwrap().push(screen.clone());
        Ok(())
    }
}

/// Device whose health the test controls. Eye-tracker kinds journal their
/// calibration and recording calls.
pub struct FakeDevice {
    name: String,
    kind: DeviceKind,
    outlet_id: String,
    healthy: Arc<AtomicBool>,
    running: bool,
    calibrated: bool,
    recording: bool,
    /// The tracker's own recording refuses to start.
    eye_broken: bool,
    journal: Journal,
}

impl DeviceStream for FakeDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn outlet_id(&self) -> &str {
        &self.outlet_id
    }

    fn status(&self) -> StreamStatus {
        match (self.running, self.healthy.load(Ordering::SeqCst)) {
            (false, _) => StreamStatus::Disconnected,
            (true, true) => StreamStatus::Streaming,
            (true, false) => StreamStatus::Error,
        }
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        if self.running {
            self.journal.push(format!("stop:{}", self.name));
        }
        self.running = false;
    }

    fn as_eye_tracker(&mut self) -> Option<&mut dyn EyeTracker> {
        if self.kind == DeviceKind::EyeTracker {
            Some(self)
        } else {
            None
        }
    }
}

impl EyeTracker for FakeDevice {
    fn calibrated(&self) -> bool {
        self.calibrated
    }

    fn calibrate(&mut self) -> Result<(), DeviceError> {
        self.journal.push("eye_calibrate");
        self.calibrated = true;
        Ok(())
    }

    fn start_recording(&mut self, path: &Path) -> Result<(), DeviceError> {
        if self.eye_broken {
            self.journal.push("eye_start_failed");
            return Err(DeviceError::Operation {
                name: self.name.clone(),
                reason: "tracker disk full".to_string(),
            });
        }
        let file = path.file_name().map(|f| f.to_string_lossy().into_owned());
        self.journal
            .push(format!("eye_start:{}", file.unwrap_or_default()));
        self.recording = true;
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<(), DeviceError> {
        self.journal.push("eye_stop");
        self.recording = false;
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.recording
    }
}

/// Opens [`FakeDevice`]s. Names in `broken` fail to open.
#[derive(Default)]
pub struct ScriptedOpener {
    journal: Journal,
    health: Mutex<HashMap<String, Arc<AtomicBool>>>,
    opened: AtomicU64,
    broken: HashSet<String>,
    eye_broken: bool,
}

impl ScriptedOpener {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            ..Self::default()
        }
    }

    pub fn with_broken(mut self, name: &str) -> Self {
        self.broken.insert(name.to_string());
        self
    }

    /// Eye trackers open fine but cannot start their own recording.
    pub fn with_broken_eye_recording(mut self) -> Self {
        self.eye_broken = true;
        self
    }

    /// Make the current stream for `name` report an error.
    pub fn fail(&self, name: &str) {
        if let Some(flag) = self.health.lock().unwrap().get(name) {
            flag.store(false, Ordering::SeqCst);
        }
    }
}

impl DeviceOpener for ScriptedOpener {
    fn open(&self, requirement: &DeviceRequirement) -> Result<Box<dyn DeviceStream>, DeviceError> {
        if self.broken.contains(&requirement.name) {
            return Err(DeviceError::Open {
                name: requirement.name.clone(),
                reason: "not plugged in".to_string(),
            });
        }

        let n = self.opened.fetch_add(1, Ordering::SeqCst);
        let healthy = Arc::new(AtomicBool::new(true));
        self.health
            .lock()
            .unwrap()
            .insert(requirement.name.clone(), Arc::clone(&healthy));
        self.journal.push(format!("open:{}", requirement.name));

        Ok(Box::new(FakeDevice {
            name: requirement.name.clone(),
            kind: requirement.kind,
            outlet_id: format!("{}-{}", requirement.name, n),
            healthy,
            running: false,
            calibrated: false,
            recording: false,
            eye_broken: self.eye_broken,
            journal: self.journal.clone(),
        }))
    }
}

pub fn temp_store() -> (TempDir, Arc<ObsLogDb>) {
    let dir = TempDir::new().unwrap();
    let db = ObsLogDb::open(dir.path().join("obslog.db")).unwrap();
    (dir, Arc::new(db))
}

/// No settling delays, so sequences run at test speed.
pub fn fast_timing() -> SessionConfig {
    SessionConfig {
        settle_ms: 0,
        record_lead_ms: 0,
        ..SessionConfig::default()
    }
}

/// Drain whatever is currently queued on a feed subscription.
pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<String>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(line) = rx.try_recv() {
        lines.push(line);
    }
    lines
}
