//! Session controller: applies operator commands to the session.
//!
//! Owned by the single coordinating task, so commands are handled one at a
//! time and the device map is never touched concurrently.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use boothconf::SessionConfig;
use boothproto::{
    ping_reply, Command, DeviceKind, DeviceRequirement, FeedLine, Kwargs, PreparePayload,
};
use chrono::Local;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::device::{DeviceOpener, DeviceStream};
use crate::error::SequenceError;
use crate::feed::OperatorFeed;
use crate::publisher::unix_seconds;
use crate::recorder::Recorder;
use crate::registry::DeviceRegistry;
use crate::sequencer::{QueuedTask, SequenceOutcome, Sequencer, Signal};
use crate::session::{SessionContext, SessionEvent, SessionState};
use crate::store::MetadataStore;
use crate::surface::{Screen, Surface};
use crate::task::{merge_kwargs, Task, TaskCatalog};

const SCREEN_STREAM: &str = "Screen";

/// Result of handling one command.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Text written back to the issuing operator.
    pub reply: Option<String>,
    pub shutdown: bool,
}

/// Collaborators the controller is built from.
pub struct ControllerParts {
    pub store: Arc<dyn MetadataStore>,
    pub recorder: Arc<dyn Recorder>,
    pub opener: Arc<dyn DeviceOpener>,
    pub catalog: TaskCatalog,
    pub surface: Box<dyn Surface>,
    pub feed: OperatorFeed,
    pub data_out: PathBuf,
    pub timing: SessionConfig,
    pub shutdown: CancellationToken,
}

pub struct SessionController {
    session: SessionContext,
    store: Arc<dyn MetadataStore>,
    recorder: Arc<dyn Recorder>,
    opener: Arc<dyn DeviceOpener>,
    catalog: TaskCatalog,
    feed: OperatorFeed,
    data_out: PathBuf,
    timing: SessionConfig,
    shutdown: CancellationToken,
    /// Screen mirror. Lives outside the registry so `close` leaves it running.
    screen: Option<Box<dyn DeviceStream>>,
}

impl SessionController {
    pub fn new(parts: ControllerParts) -> Self {
        let registry = DeviceRegistry::new(Arc::clone(&parts.opener), parts.feed.clone());
        Self {
            session: SessionContext::new(registry, parts.surface),
            store: parts.store,
            recorder: parts.recorder,
            opener: parts.opener,
            catalog: parts.catalog,
            feed: parts.feed,
            data_out: parts.data_out,
            timing: parts.timing,
            shutdown: parts.shutdown,
            screen: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.session.watch()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.session.registry
    }

    pub fn screen_outlet_id(&self) -> Option<&str> {
        self.screen.as_ref().map(|s| s.outlet_id())
    }

    /// Handle one command. `signals` carries interrupts for a presentation.
    pub async fn handle(&mut self, command: Command, signals: &mut mpsc::Receiver<Signal>) -> Outcome {
        debug!(verb = command.verb(), state = %self.state(), "handling command");
        match command {
            Command::ScreenStream => self.screen_stream(),
            Command::Prepare {
                collection_id,
                payload,
            } => self.prepare(&collection_id, payload),
            Command::Present { tasks, subject_id } => {
                self.present(&tasks, subject_id, signals).await
            }
            Command::Close => self.close(),
            Command::Shutdown => {
                info!("shutdown requested by operator");
                return Outcome {
                    reply: None,
                    shutdown: true,
                };
            }
            Command::TimeTest => {
                return Outcome {
                    reply: Some(ping_reply(unix_seconds())),
                    shutdown: false,
                };
            }
            Command::Interrupt(interrupt) => {
                debug!(interrupt = interrupt.as_wire(), "interrupt outside a presentation, ignored");
            }
        }
        Outcome::default()
    }

    fn prepare(&mut self, collection_id: &str, payload: PreparePayload) {
        if let Err(e) = self.session.apply(SessionEvent::Prepare) {
            warn!(error = %e, "prepare rejected");
            self.feed
                .publish(format!("Cannot prepare while {}", self.state()));
            return;
        }

        let collection = match self.store.resolve_collection(collection_id) {
            Ok(collection) => collection,
            Err(e) => {
                error!(collection = collection_id, error = %format!("{:#}", e), "cannot resolve collection");
                self.feed
                    .publish(format!("Cannot prepare {}: {:#}", collection_id, e));
                self.transition(SessionEvent::PrepareFailed);
                return;
            }
        };

        if self.session.registry.is_empty() {
            self.feed.publish("Preparing devices");
        } else {
            self.feed.publish("Checking prepared devices");
        }
        let names = self
            .session
            .registry
            .prepare(&collection.device_requirements());
        info!(collection = %collection.id, devices = ?names, tasks = collection.tasks.len(), "collection prepared");

        self.session.collection = Some(collection);
        self.session.payload = Some(payload);
        self.transition(SessionEvent::StreamsReady);
        self.feed.publish(FeedLine::Connected);
    }

    async fn present(&mut self, tasks: &[String], subject_id: String, signals: &mut mpsc::Receiver<Signal>) {
        let collection = match (&self.session.collection, self.state()) {
            (Some(collection), SessionState::Ready) => collection.clone(),
            (_, state) => {
                warn!(%state, "present rejected");
                self.feed.publish(format!("Cannot present while {}", state));
                return;
            }
        };

        let mut stale = 0;
        while signals.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(stale, "discarded interrupts received before the presentation");
        }

        self.transition(SessionEvent::Present);
        self.session.subject_id = Some(subject_id);
        self.session.started_at = Some(Local::now());

        let base = self.base_kwargs();
        let mut preloaded: HashMap<String, Box<dyn Task>> = HashMap::new();
        for descriptor in &collection.tasks {
            match self.catalog.build(descriptor, &base) {
                Ok(task) => {
                    preloaded.insert(descriptor.task_id.clone(), task);
                }
                Err(e) => {
                    warn!(task = %descriptor.task_id, error = %format!("{:#}", e), "task could not be built")
                }
            }
        }

        let queue: Vec<QueuedTask> = tasks
            .iter()
            .map(|task_id| {
                let descriptor = collection.task(task_id);
                // A task listed twice gets a fresh instance the second time.
                let task = preloaded.remove(task_id).or_else(|| {
                    descriptor.and_then(|d| self.catalog.build(d, &base).ok())
                });
                match (descriptor, task) {
                    (Some(descriptor), Some(task)) => QueuedTask::Ready {
                        descriptor: descriptor.clone(),
                        task,
                        kwargs: merge_kwargs(&base, &descriptor.kwargs),
                    },
                    _ => QueuedTask::Missing {
                        task_id: task_id.clone(),
                    },
                }
            })
            .collect();

        self.show(&Screen::Welcome);
        let sequencer = Sequencer {
            store: self.store.as_ref(),
            recorder: self.recorder.as_ref(),
            feed: &self.feed,
            timing: &self.timing,
            data_out: &self.data_out,
            shutdown: &self.shutdown,
        };
        let result = sequencer.run(&mut self.session, queue, signals).await;

        match result {
            Ok(SequenceOutcome::Completed) => {
                self.transition(SessionEvent::QueueExhausted);
                info!("presentation finished");
            }
            Ok(SequenceOutcome::Stopped) => {
                info!(state = %self.state(), "presentation stopped");
            }
            Err(e) => self.recover(e).await,
        }
        self.show(&Screen::Finished);
    }

    /// Close whatever a failed task left open and return to `Ready`.
    async fn recover(&mut self, error: SequenceError) {
        error!(error = %error, "presentation aborted");
        self.feed.publish(format!("Error: {}", error));

        let (recording_open, eye_tracking_open) = match &error {
            SequenceError::Task {
                recording_open,
                eye_tracking_open,
                ..
            } => (*recording_open, *eye_tracking_open),
            SequenceError::Store { .. } => (false, false),
        };

        if recording_open {
            if let Err(e) = self.recorder.stop_recording().await {
                warn!(error = %e, "stop-record after failure not delivered");
            }
        }
        if eye_tracking_open {
            if let Some(tracker) = self.session.registry.eye_tracker_mut() {
                if tracker.is_recording() {
                    if let Err(e) = tracker.stop_recording() {
                        warn!(error = %e, "eye tracker recording not stopped");
                    }
                }
            }
        }

        self.transition(SessionEvent::TaskFailed);
    }

    fn screen_stream(&mut self) {
        if let Some(screen) = self.screen.as_ref().filter(|s| s.is_healthy()) {
            self.feed.publish(FeedLine::OutletId {
                name: screen.name().to_string(),
                outlet_id: screen.outlet_id().to_string(),
            });
            self.feed.publish("Already running screen feed");
            return;
        }

        let requirement = DeviceRequirement::new(SCREEN_STREAM, DeviceKind::Screen);
        let opened = self.opener.open(&requirement).and_then(|mut stream| {
            stream.start()?;
            Ok(stream)
        });
        match opened {
            Ok(stream) => {
                self.feed.publish(FeedLine::OutletId {
                    name: SCREEN_STREAM.to_string(),
                    outlet_id: stream.outlet_id().to_string(),
                });
                self.feed.publish("Stim screen feed running");
                if let Some(mut old) = self.screen.replace(stream) {
                    old.stop();
                }
            }
            Err(e) => {
                warn!(error = %e, "screen mirror failed to start");
                self.feed.publish(format!("Screen feed failed: {}", e));
            }
        }
    }

    fn close(&mut self) {
        self.transition(SessionEvent::Close);
        let closed = self.session.registry.close();
        self.session.reset();
        self.feed.publish("Closing devices");
        info!(streams = closed, "devices closed");
        self.transition(SessionEvent::Closed);
    }

    /// Close everything, including the screen mirror. Used on shutdown.
    pub fn teardown(&mut self) {
        self.close();
        if let Some(mut screen) = self.screen.take() {
            screen.stop();
            self.feed.publish("Closing screen mirroring");
        }
        self.feed.publish("Closing Stim server");
    }

    fn base_kwargs(&self) -> Kwargs {
        let mut base = Kwargs::new();
        base.insert(
            "path".to_string(),
            Value::from(self.data_out.to_string_lossy().into_owned()),
        );
        if let Some(payload) = &self.session.payload {
            base.insert(
                "subject_id".to_string(),
                Value::from(payload.study_id_date.clone()),
            );
        }
        base
    }

    fn show(&mut self, screen: &Screen) {
        if let Err(e) = self.session.surface.show(screen) {
            warn!(surface = self.session.surface.name(), error = %e, "cannot show screen");
        }
    }

    fn transition(&mut self, event: SessionEvent) {
        if let Err(e) = self.session.apply(event) {
            warn!(error = %e, "unexpected session transition");
        }
    }
}
