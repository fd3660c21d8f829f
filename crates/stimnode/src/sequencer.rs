//! Task sequencer: runs a presentation queue, bracketing recordable tasks
//! with acquisition start/stop and honoring pause requests between tasks.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use boothconf::SessionConfig;
use boothproto::{
    date_times, event_array, start_stamp, DeviceKind, FeedLine, Interrupt, Kwargs, TaskDescriptor,
    TechObsRecord,
};
use chrono::Local;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::device::EyeTracker;
use crate::error::{DeviceError, SequenceError};
use crate::feed::OperatorFeed;
use crate::recorder::Recorder;
use crate::session::{SessionContext, SessionEvent};
use crate::store::MetadataStore;
use crate::surface::Screen;
use crate::task::{Task, TaskContext};

/// Out-of-band message delivered to a running sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Interrupt(Interrupt),
    /// Any other command that arrived while paused.
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// Every queued task was consumed.
    Completed,
    /// The operator stopped while paused, or the node is shutting down.
    Stopped,
}

/// One entry of a presentation queue.
pub enum QueuedTask {
    Ready {
        descriptor: TaskDescriptor,
        task: Box<dyn Task>,
        /// Session bundle overlaid with the descriptor's kwargs.
        kwargs: Kwargs,
    },
    /// Not in the collection, or its runner could not be built.
    Missing { task_id: String },
}

impl QueuedTask {
    pub fn task_id(&self) -> &str {
        match self {
            QueuedTask::Ready { descriptor, .. } => &descriptor.task_id,
            QueuedTask::Missing { task_id } => task_id,
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

pub struct Sequencer<'a> {
    pub store: &'a dyn MetadataStore,
    pub recorder: &'a dyn Recorder,
    pub feed: &'a OperatorFeed,
    pub timing: &'a SessionConfig,
    pub data_out: &'a Path,
    pub shutdown: &'a CancellationToken,
}

impl Sequencer<'_> {
    /// Run `queue` in order. The session must already be `Presenting`.
    ///
    /// Task errors are returned to the caller with enough state to close
    /// any recording that is still open.
    pub async fn run(
        &self,
        session: &mut SessionContext,
        queue: Vec<QueuedTask>,
        signals: &mut mpsc::Receiver<Signal>,
    ) -> Result<SequenceOutcome, SequenceError> {
        for queued in queue {
            if self.shutdown.is_cancelled() {
                info!("shutdown requested, abandoning presentation");
                return Ok(SequenceOutcome::Stopped);
            }

            match queued {
                QueuedTask::Missing { task_id } => {
                    self.feed.publish(FeedLine::TaskNotImplemented { task_id });
                }
                QueuedTask::Ready {
                    descriptor,
                    mut task,
                    kwargs,
                } => {
                    let unavailable = descriptor
                        .devices
                        .iter()
                        .find(|d| session.registry.is_unusable(&d.name));
                    match unavailable {
                        Some(device) => {
                            warn!(task = %descriptor.task_id, device = %device.name, "skipping task, device unavailable");
                            self.feed.publish(format!(
                                "Skipping task {}: device {} unavailable",
                                descriptor.task_id, device.name
                            ));
                        }
                        None if descriptor.kind().is_recordable() => {
                            self.run_recorded(session, &descriptor, task.as_mut(), &kwargs)
                                .await?;
                        }
                        None => {
                            self.run_unrecorded(session, &descriptor, task.as_mut(), &kwargs)
                                .await?;
                        }
                    }
                }
            }

            if let Flow::Stop = self.task_boundary(session, signals).await {
                return Ok(SequenceOutcome::Stopped);
            }
        }
        Ok(SequenceOutcome::Completed)
    }

    /// Introductory and calibration tasks: no bracket, no log row.
    async fn run_unrecorded(
        &self,
        session: &mut SessionContext,
        descriptor: &TaskDescriptor,
        task: &mut dyn Task,
        kwargs: &Kwargs,
    ) -> Result<(), SequenceError> {
        let subject_id = session.subject_id.clone().unwrap_or_default();
        let output = self.output_prefix(session, descriptor, &start_stamp(&Local::now()));

        let ctx = TaskContext {
            task_id: &descriptor.task_id,
            surface: session.surface.as_mut(),
            output_path: &output,
            subject_id: &subject_id,
            marker: session.registry.marker(),
            eye_tracker: session.registry.eye_tracker_mut(),
            kwargs,
        };
        task.run(ctx).await.map_err(|error| SequenceError::Task {
            task_id: descriptor.task_id.clone(),
            error,
            recording_open: false,
            eye_tracking_open: false,
        })?;

        self.feed.publish(FeedLine::FinishedTask {
            task_id: descriptor.task_id.clone(),
        });
        Ok(())
    }

    #[instrument(skip_all, fields(task = %descriptor.task_id, obs = %descriptor.obs_id))]
    async fn run_recorded(
        &self,
        session: &mut SessionContext,
        descriptor: &TaskDescriptor,
        task: &mut dyn Task,
        kwargs: &Kwargs,
    ) -> Result<(), SequenceError> {
        let task_id = descriptor.task_id.clone();
        let subject_id = session.subject_id.clone().unwrap_or_default();
        let store_err = |error| SequenceError::Store {
            task_id: task_id.clone(),
            error,
        };

        let row = self.store.allocate_log_row(&subject_id).map_err(store_err)?;
        let started = Local::now();
        let stamp = start_stamp(&started);
        self.feed.publish(FeedLine::InitiatingTask {
            task_id: task_id.clone(),
            obs_id: descriptor.obs_id.clone(),
            log_id: row,
            start: stamp.clone(),
        });
        tokio::time::sleep(self.timing.settle()).await;

        let output = self.output_prefix(session, descriptor, &stamp);

        // A tracker that cannot record does not stop the task.
        let mut eye_tracking_open = false;
        if descriptor.requires(DeviceKind::EyeTracker) {
            if let Some(tracker) = session.registry.eye_tracker_mut() {
                match begin_eye_recording(tracker, &with_suffix(&output, ".edf")) {
                    Ok(()) => eye_tracking_open = true,
                    Err(e) => {
                        warn!(error = %e, "eye tracker not recording, continuing without it");
                        self.feed.publish(format!("Eye tracker: {}", e));
                    }
                }
            }
        }

        let output_str = output.to_string_lossy();
        match self.recorder.start_recording(&output_str, &task_id).await {
            Ok(ack) => self.feed.publish(ack),
            Err(e) => {
                warn!(error = %e, "start-record not acknowledged, continuing");
                self.feed.publish(format!("Acquisition: {}", e));
            }
        }
        tokio::time::sleep(self.timing.record_lead()).await;

        let ctx = TaskContext {
            task_id: &task_id,
            surface: session.surface.as_mut(),
            output_path: &output,
            subject_id: &subject_id,
            marker: session.registry.marker(),
            eye_tracker: session.registry.eye_tracker_mut(),
            kwargs,
        };
        let events = task.run(ctx).await.map_err(|error| SequenceError::Task {
            task_id: task_id.clone(),
            error,
            recording_open: true,
            eye_tracking_open,
        })?;

        if let Err(e) = self.recorder.stop_recording().await {
            warn!(error = %e, "stop-record not delivered");
        }
        if eye_tracking_open {
            if let Some(tracker) = session.registry.eye_tracker_mut() {
                if let Err(e) = tracker.stop_recording() {
                    warn!(error = %e, "eye tracker recording did not stop cleanly");
                }
            }
        }

        self.feed.publish(FeedLine::FinishedTask {
            task_id: task_id.clone(),
        });

        let record = TechObsRecord {
            subject_id,
            task_id: task_id.clone(),
            tech_obs_id: descriptor.obs_id.clone(),
            date_times: date_times(&started),
            event_array: event_array(events.as_deref()),
            fields: session
                .payload
                .as_ref()
                .map(|p| p.fields.clone())
                .unwrap_or_default(),
        };
        self.store.fill_log_row(row, &record).map_err(store_err)?;
        debug!(row = %row, "log row written");
        Ok(())
    }

    /// `<data_out>/<study_id_date>_<HHh-MMm-SSs>_<obs_id>`
    fn output_prefix(&self, session: &SessionContext, descriptor: &TaskDescriptor, stamp: &str) -> PathBuf {
        let study = session
            .payload
            .as_ref()
            .map(|p| p.study_id_date.as_str())
            .or(session.subject_id.as_deref())
            .unwrap_or("session");
        self.data_out
            .join(format!("{}_{}_{}", study, stamp, descriptor.obs_id))
    }

    /// Non-blocking check for operator interrupts between tasks.
    async fn task_boundary(
        &self,
        session: &mut SessionContext,
        signals: &mut mpsc::Receiver<Signal>,
    ) -> Flow {
        while let Ok(signal) = signals.try_recv() {
            match signal {
                Signal::Interrupt(Interrupt::Pause) => return self.paused(session, signals).await,
                Signal::Interrupt(Interrupt::Stop) => {
                    info!("stop received while presenting, only honored when paused");
                }
                Signal::Interrupt(Interrupt::Unpause) => {
                    debug!("unpause received while not paused");
                }
                Signal::Other(message) => debug!(%message, "ignoring message between tasks"),
            }
        }
        Flow::Continue
    }

    async fn paused(&self, session: &mut SessionContext, signals: &mut mpsc::Receiver<Signal>) -> Flow {
        self.transition(session, SessionEvent::Pause);
        self.feed.publish("Session paused");
        if let Err(e) = session.surface.show(&Screen::Paused) {
            warn!(error = %e, "cannot show pause screen");
        }

        loop {
            let signal = tokio::select! {
                _ = self.shutdown.cancelled() => return Flow::Stop,
                signal = signals.recv() => signal,
            };

            match signal {
                Some(Signal::Interrupt(Interrupt::Unpause)) => {
                    self.transition(session, SessionEvent::Unpause);
                    self.feed.publish("Session resumed");
                    return Flow::Continue;
                }
                Some(Signal::Interrupt(Interrupt::Stop)) => {
                    self.transition(session, SessionEvent::Stop);
                    self.feed.publish("Stopping tasks");
                    return Flow::Stop;
                }
                Some(Signal::Interrupt(Interrupt::Pause)) => debug!("already paused"),
                Some(Signal::Other(message)) => {
                    debug!(%message, "message while paused");
                    self.feed.publish(FeedLine::PausedOtherMessage);
                }
                None => {
                    warn!("interrupt channel closed while paused");
                    return Flow::Stop;
                }
            }
        }
    }

    fn transition(&self, session: &mut SessionContext, event: SessionEvent) {
        if let Err(e) = session.apply(event) {
            warn!(error = %e, "unexpected session transition");
        }
    }
}

/// Calibrate lazily, then start the tracker's own file.
fn begin_eye_recording(tracker: &mut dyn EyeTracker, path: &Path) -> Result<(), DeviceError> {
    if !tracker.calibrated() {
        info!("calibrating eye tracker");
        tracker.calibrate()?;
    }
    tracker.start_recording(path)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_keeps_dots_in_stem() {
        assert_eq!(
            with_suffix(Path::new("/data/s1.v2_10h-00m-00s_obs"), ".edf"),
            PathBuf::from("/data/s1.v2_10h-00m-00s_obs.edf")
        );
    }

    #[test]
    fn test_queued_task_ids() {
        let missing = QueuedTask::Missing {
            task_id: "task9".into(),
        };
        assert_eq!(missing.task_id(), "task9");
    }
}
