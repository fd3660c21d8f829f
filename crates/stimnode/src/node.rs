//! Wires the dispatcher to the coordinating task.

use std::net::SocketAddr;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::controller::{ControllerParts, SessionController};
use crate::dispatcher::{self, CommandRequest, Dispatcher, Links};
use crate::error::FatalError;
use crate::sequencer::Signal;

const COMMAND_QUEUE: usize = 32;
const SIGNAL_QUEUE: usize = 32;

/// A started node: command socket bound, coordinator running.
pub struct RunningNode {
    local_addr: SocketAddr,
    dispatcher: JoinHandle<()>,
    coordinator: JoinHandle<()>,
}

impl RunningNode {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait until the node has torn everything down.
    pub async fn wait(self) {
        if let Err(e) = self.dispatcher.await {
            warn!(error = %e, "dispatcher task failed");
        }
        if let Err(e) = self.coordinator.await {
            warn!(error = %e, "coordinator task failed");
        }
    }
}

/// Bind the command socket and start serving.
pub async fn start(bind: &str, parts: ControllerParts) -> Result<RunningNode, FatalError> {
    let listener = dispatcher::bind(bind).await?;
    let local_addr = listener.local_addr().map_err(FatalError::LocalAddr)?;

    let feed = parts.feed.clone();
    let shutdown = parts.shutdown.clone();
    let controller = SessionController::new(parts);

    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
    let (signals_tx, signals_rx) = mpsc::channel(SIGNAL_QUEUE);

    let links = Links {
        commands: commands_tx,
        signals: signals_tx,
        state: controller.watch(),
        feed,
        shutdown: shutdown.clone(),
    };

    let dispatcher = tokio::spawn(Dispatcher::new(listener, links).run());
    let coordinator = tokio::spawn(coordinate(controller, commands_rx, signals_rx, shutdown));

    info!(%local_addr, "command socket listening");
    Ok(RunningNode {
        local_addr,
        dispatcher,
        coordinator,
    })
}

/// The coordinating task. Owns the controller until shutdown.
async fn coordinate(
    mut controller: SessionController,
    mut commands: mpsc::Receiver<CommandRequest>,
    mut signals: mpsc::Receiver<Signal>,
    shutdown: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = shutdown.cancelled() => break,
            request = commands.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let outcome = controller.handle(request.command, &mut signals).await;
        // The operator may have disconnected; the reply is best effort.
        let _ = request.reply.send(outcome.reply);
        if outcome.shutdown {
            shutdown.cancel();
            break;
        }
    }

    controller.teardown();
    info!("session coordinator stopped");
}
