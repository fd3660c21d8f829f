//! Tasks and the catalog that builds them from collection descriptors.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use boothproto::{Kwargs, TaskDescriptor, TaskKind};
use serde_json::Value;
use tracing::{debug, warn};

use crate::device::EyeTracker;
use crate::devices::marker::MarkerHandle;
use crate::publisher::unix_seconds;
use crate::surface::{Screen, Surface};

/// Everything a task receives for one run.
pub struct TaskContext<'a> {
    pub task_id: &'a str,
    pub surface: &'a mut dyn Surface,
    /// Output file prefix for this task, without extension.
    pub output_path: &'a Path,
    pub subject_id: &'a str,
    pub marker: Option<MarkerHandle>,
    pub eye_tracker: Option<&'a mut dyn EyeTracker>,
    /// Session bundle overlaid with the descriptor's kwargs.
    pub kwargs: &'a Kwargs,
}

impl TaskContext<'_> {
    /// Publish a marker if a marker stream is available. Failures are logged.
    pub fn mark(&self, label: &str) {
        if let Some(marker) = &self.marker {
            if let Err(e) = marker.push(label) {
                warn!(task = self.task_id, error = %e, "marker not published");
            }
        }
    }
}

/// A runnable task.
///
/// Returns the ordered events it captured, or `None` when it has none to report.
#[async_trait]
pub trait Task: Send {
    async fn run(&mut self, ctx: TaskContext<'_>) -> Result<Option<Vec<String>>>;
}

pub type TaskBuilder =
    Arc<dyn Fn(&TaskDescriptor, &Kwargs) -> Result<Box<dyn Task>> + Send + Sync>;

/// Overlay `overlay` onto `base`; overlay keys win.
pub fn merge_kwargs(base: &Kwargs, overlay: &Kwargs) -> Kwargs {
    let mut merged = base.clone();
    merged.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

fn duration_kwarg(kwargs: &Kwargs, key: &str, default: f64) -> Result<Duration> {
    match kwargs.get(key) {
        None => Ok(Duration::from_secs_f64(default)),
        Some(value) => {
            let secs = value
                .as_f64()
                .filter(|s| s.is_finite() && *s >= 0.0)
                .ok_or_else(|| anyhow!("{} must be a non-negative number, got {}", key, value))?;
            Ok(Duration::from_secs_f64(secs))
        }
    }
}

/// Maps runner names to task builders.
///
/// A descriptor picks its runner with the `runner` kwarg; otherwise the
/// runner follows the task kind (`instruction`, `calibration`, `timed`).
#[derive(Clone, Default)]
pub struct TaskCatalog {
    runners: HashMap<String, TaskBuilder>,
}

impl TaskCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register("instruction", |desc, kwargs| {
            Ok(Box::new(InstructionTask::from_kwargs(desc, kwargs)?) as Box<dyn Task>)
        });
        catalog.register("calibration", |_, _| {
            Ok(Box::new(CalibrationTask) as Box<dyn Task>)
        });
        catalog.register("timed", |desc, kwargs| {
            Ok(Box::new(TimedTask::from_kwargs(desc, kwargs)?) as Box<dyn Task>)
        });
        catalog
    }

    pub fn register<F>(&mut self, runner: impl Into<String>, builder: F)
    where
        F: Fn(&TaskDescriptor, &Kwargs) -> Result<Box<dyn Task>> + Send + Sync + 'static,
    {
        self.runners.insert(runner.into(), Arc::new(builder));
    }

    /// Build a task from its descriptor, merging the session bundle with the
    /// descriptor's own kwargs.
    pub fn build(&self, descriptor: &TaskDescriptor, base: &Kwargs) -> Result<Box<dyn Task>> {
        let kwargs = merge_kwargs(base, &descriptor.kwargs);
        let runner = match kwargs.get("runner").and_then(Value::as_str) {
            Some(runner) => runner,
            None => match descriptor.kind() {
                TaskKind::Instruction => "instruction",
                TaskKind::Calibration => "calibration",
                TaskKind::Recordable => "timed",
            },
        };

        let builder = self
            .runners
            .get(runner)
            .ok_or_else(|| anyhow!("no runner named {:?}", runner))?;
        debug!(task = %descriptor.task_id, runner, "building task");
        builder(descriptor, &kwargs).with_context(|| format!("building {}", descriptor.task_id))
    }
}

/// Shows instruction text for a while. Never recorded.
pub struct InstructionTask {
    text: String,
    duration: Duration,
}

impl InstructionTask {
    pub fn from_kwargs(descriptor: &TaskDescriptor, kwargs: &Kwargs) -> Result<Self> {
        Ok(Self {
            text: kwargs
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Instructions: {}", descriptor.task_id)),
            duration: duration_kwarg(kwargs, "duration", 1.0)?,
        })
    }
}

#[async_trait]
impl Task for InstructionTask {
    async fn run(&mut self, mut ctx: TaskContext<'_>) -> Result<Option<Vec<String>>> {
        ctx.surface.show(&Screen::Text(self.text.clone()))?;
        tokio::time::sleep(self.duration).await;
        Ok(None)
    }
}

/// Calibrates the eye tracker when one is attached.
pub struct CalibrationTask;

#[async_trait]
impl Task for CalibrationTask {
    async fn run(&mut self, mut ctx: TaskContext<'_>) -> Result<Option<Vec<String>>> {
        ctx.mark("Calibration_start");
        match ctx.eye_tracker.as_mut() {
            Some(tracker) => tracker.calibrate().context("eye tracker calibration")?,
            None => debug!(task = ctx.task_id, "no eye tracker attached, nothing to calibrate"),
        }
        ctx.mark("Calibration_end");
        Ok(None)
    }
}

/// Generic recordable task: marks start and end around a fixed duration.
pub struct TimedTask {
    instructions: Option<String>,
    duration: Duration,
}

impl TimedTask {
    pub fn from_kwargs(_descriptor: &TaskDescriptor, kwargs: &Kwargs) -> Result<Self> {
        Ok(Self {
            instructions: kwargs
                .get("instructions")
                .and_then(Value::as_str)
                .map(str::to_string),
            duration: duration_kwarg(kwargs, "duration", 3.0)?,
        })
    }
}

#[async_trait]
impl Task for TimedTask {
    async fn run(&mut self, mut ctx: TaskContext<'_>) -> Result<Option<Vec<String>>> {
        if let Some(text) = &self.instructions {
            ctx.surface.show(&Screen::Text(text.clone()))?;
        }

        let start = unix_seconds();
        ctx.mark(&format!("Task_start_{}", start));
        tokio::time::sleep(self.duration).await;
        let end = unix_seconds();
        ctx.mark(&format!("Task_end_{}", end));

        Ok(Some(vec![
            format!("Task_start:{}", start),
            format!("Task_end:{}", end),
        ]))
    }
}
