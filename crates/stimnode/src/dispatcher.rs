//! Command dispatcher: operator connections on the command socket.
//!
//! Each connection reads newline-delimited commands. Session commands go to
//! the coordinating task; interrupts go straight to the running sequence so
//! a pause never waits behind the task in progress.

use std::net::SocketAddr;

use boothproto::{ping_reply, Command};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FatalError;
use crate::feed::OperatorFeed;
use crate::publisher::unix_seconds;
use crate::sequencer::Signal;
use crate::session::SessionState;

const REPLY_BUFFER: usize = 64;

/// A decoded command and where to send its reply.
pub struct CommandRequest {
    pub command: Command,
    pub reply: oneshot::Sender<Option<String>>,
}

/// What the dispatcher does with one inbound line.
#[derive(Debug, PartialEq)]
pub enum Route {
    /// Answer `time_test` without involving the coordinator.
    Ping,
    Command(Command),
    Signal(Signal),
    Ignore(String),
}

/// Decide where `line` goes given the current session state.
pub fn route(line: &str, state: SessionState) -> Route {
    let paused = state == SessionState::Paused;
    match Command::parse(line) {
        Ok(Command::TimeTest) => Route::Ping,
        Ok(Command::Interrupt(interrupt)) => match state {
            SessionState::Presenting | SessionState::Paused => {
                Route::Signal(Signal::Interrupt(interrupt))
            }
            other => Route::Ignore(format!("{} while {}", interrupt.as_wire(), other)),
        },
        Ok(_) | Err(_) if paused => Route::Signal(Signal::Other(line.trim().to_string())),
        Ok(command) => Route::Command(command),
        Err(e) => Route::Ignore(e.to_string()),
    }
}

pub async fn bind(addr: &str) -> Result<TcpListener, FatalError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| FatalError::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Channels shared by every connection.
#[derive(Clone)]
pub struct Links {
    pub commands: mpsc::Sender<CommandRequest>,
    pub signals: mpsc::Sender<Signal>,
    pub state: watch::Receiver<SessionState>,
    pub feed: OperatorFeed,
    pub shutdown: CancellationToken,
}

pub struct Dispatcher {
    listener: TcpListener,
    links: Links,
}

impl Dispatcher {
    pub fn new(listener: TcpListener, links: Links) -> Self {
        Self { listener, links }
    }

    /// Accept operators until shutdown. Dropping the listener closes the socket.
    pub async fn run(self) {
        let Dispatcher { listener, links } = self;
        loop {
            let accepted = tokio::select! {
                _ = links.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((socket, peer)) => {
                    info!(%peer, "operator connected");
                    tokio::spawn(serve_connection(socket, peer, links.clone()));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }
        info!("command socket closed");
    }
}

async fn serve_connection(socket: TcpStream, peer: SocketAddr, links: Links) {
    let (read_half, write_half) = socket.into_split();
    let (out_tx, out_rx) = mpsc::channel::<String>(REPLY_BUFFER);
    let writer = tokio::spawn(write_lines(write_half, out_rx, links.feed.subscribe()));

    let mut lines = BufReader::new(read_half).lines();
    loop {
        let line = tokio::select! {
            _ = links.shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(%peer, error = %e, "read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let state = *links.state.borrow();
        match route(&line, state) {
            Route::Ping => {
                let _ = out_tx.send(ping_reply(unix_seconds())).await;
            }
            Route::Signal(signal) => {
                debug!(%peer, ?signal, "forwarding to presentation");
                if let Err(e) = links.signals.try_send(signal) {
                    warn!(%peer, error = %e, "interrupt dropped");
                }
            }
            Route::Command(command) => {
                let (reply_tx, reply_rx) = oneshot::channel();
                let request = CommandRequest {
                    command,
                    reply: reply_tx,
                };
                if links.commands.send(request).await.is_err() {
                    warn!(%peer, "coordinator gone, closing connection");
                    break;
                }
                let out = out_tx.clone();
                tokio::spawn(async move {
                    if let Ok(Some(reply)) = reply_rx.await {
                        let _ = out.send(reply).await;
                    }
                });
            }
            Route::Ignore(reason) => {
                warn!(%peer, %reason, line = %line.trim(), "ignoring message");
            }
        }
    }

    drop(out_tx);
    if let Err(e) = writer.await {
        warn!(%peer, error = %e, "connection writer failed");
    }
    info!(%peer, "operator disconnected");
}

/// Write replies and feed lines until the connection is done.
async fn write_lines(
    mut socket: OwnedWriteHalf,
    mut replies: mpsc::Receiver<String>,
    mut feed: broadcast::Receiver<String>,
) {
    loop {
        let line = tokio::select! {
            reply = replies.recv() => match reply {
                Some(line) => line,
                None => break,
            },
            fed = feed.recv() => match fed {
                Ok(line) => line,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "operator feed lagging");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        let mut framed = line.into_bytes();
        framed.push(b'\n');
        if socket.write_all(&framed).await.is_err() {
            break;
        }
    }
    let _ = socket.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use boothproto::Interrupt;

    #[test]
    fn test_interrupts_only_during_presentation() {
        assert_eq!(
            route("pause tasks", SessionState::Presenting),
            Route::Signal(Signal::Interrupt(Interrupt::Pause))
        );
        assert_eq!(
            route("unpause tasks", SessionState::Paused),
            Route::Signal(Signal::Interrupt(Interrupt::Unpause))
        );
        assert!(matches!(route("pause tasks", SessionState::Ready), Route::Ignore(_)));
    }

    #[test]
    fn test_other_messages_while_paused() {
        assert_eq!(
            route("close", SessionState::Paused),
            Route::Signal(Signal::Other("close".into()))
        );
        assert_eq!(
            route("garbage", SessionState::Paused),
            Route::Signal(Signal::Other("garbage".into()))
        );
    }

    #[test]
    fn test_commands_and_garbage() {
        assert_eq!(route("close", SessionState::Ready), Route::Command(Command::Close));
        assert_eq!(route("time_test", SessionState::Paused), Route::Ping);
        assert!(matches!(route("dance", SessionState::Idle), Route::Ignore(_)));
    }
}
