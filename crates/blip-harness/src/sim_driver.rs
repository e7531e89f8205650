//! The simulation-side actor driving a [`blip_core::Connection`] over a
//! length-prefixed raw byte stream (normally `turmoil::net::TcpStream`).
//!
//! Structurally mirrors `blip-transport`'s driver (same `Action` dispatch),
//! swapping the `tokio-tungstenite` socket for [`crate::framed::FramedSocket`]
//! and exposing raw [`blip_core::Action`]s to the test harness instead of a
//! delegate trait, so scenario tests can assert on exactly what the engine
//! produced.

use std::collections::HashMap;

use blip_core::{Action, CloseKind, CloseStatus, Connection, ConnectionConfig, ConnectionError};
use blip_proto::{MessageBuilder, MessageNo};
use tokio::io::{AsyncRead, AsyncWrite, split};
use tokio::sync::{mpsc, oneshot};

use crate::framed::{self, FramedSocket};

/// How a sent request resolved.
#[derive(Debug, Clone)]
pub enum SimOutcome {
    /// The paired response arrived.
    Response(blip_proto::CompletedMessage),
    /// The connection died before the response arrived.
    Disconnected,
}

enum Command {
    SendRequest(MessageBuilder, oneshot::Sender<Result<SimOutcome, ConnectionError>>),
    Respond(MessageNo, MessageBuilder),
    Close(u16, String),
}

/// A handle to a simulated connection actor.
#[derive(Clone)]
pub struct SimHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl SimHandle {
    /// Enqueues `builder` as a request and awaits its response (or a
    /// disconnect).
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Cancelled`] if the actor has shut down.
    pub async fn send_request(
        &self,
        builder: MessageBuilder,
    ) -> Result<SimOutcome, ConnectionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::SendRequest(builder, tx))
            .map_err(|_| ConnectionError::Cancelled)?;
        rx.await.map_err(|_| ConnectionError::Cancelled)?
    }

    /// Sends a deferred response.
    pub fn respond(&self, msg_no: MessageNo, builder: MessageBuilder) {
        let _ = self.commands.send(Command::Respond(msg_no, builder));
    }

    /// Initiates graceful shutdown.
    pub fn close(&self, code: u16, message: impl Into<String>) {
        let _ = self.commands.send(Command::Close(code, message.into()));
    }
}

/// Spawns the actor task driving `stream`. Every [`blip_core::Action`] the
/// connection produces (other than `Send`, which the actor executes
/// directly) is forwarded on `events` for the test to observe.
pub fn spawn<S>(
    stream: S,
    config: ConnectionConfig,
    configure: impl FnOnce(&mut Connection),
    events: mpsc::UnboundedSender<Action>,
) -> (SimHandle, tokio::task::JoinHandle<()>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut read_half, write_half) = split(stream);
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();

    // A dedicated reader task, rather than racing `read_frame` directly
    // inside the actor's `select!`, so a half-read length prefix is never
    // dropped by a cancelled future (`mpsc::Receiver::recv` is cancel-safe,
    // `AsyncReadExt::read_exact` is not).
    tokio::spawn(async move {
        loop {
            match framed::read_frame(&mut read_half).await {
                Ok(Some(bytes)) => {
                    if frames_tx.send(Ok(bytes)).is_err() {
                        break;
                    }
                },
                Ok(None) => {
                    let _ = frames_tx.send(Err(None));
                    break;
                },
                Err(err) => {
                    let _ = frames_tx.send(Err(Some(err)));
                    break;
                },
            }
        }
    });

    let mut connection = Connection::new(config);
    configure(&mut connection);

    let actor = Actor {
        connection,
        socket: FramedSocket::new(write_half),
        events,
        pending_requests: HashMap::new(),
    };

    let handle = tokio::spawn(actor.run(commands_rx, frames_rx));
    (SimHandle { commands: commands_tx }, handle)
}

struct Actor<W> {
    connection: Connection,
    socket: FramedSocket<W>,
    events: mpsc::UnboundedSender<Action>,
    pending_requests: HashMap<MessageNo, oneshot::Sender<Result<SimOutcome, ConnectionError>>>,
}

impl<W> Actor<W>
where
    W: AsyncWrite + Unpin + Send + Sync + 'static,
{
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut frames: mpsc::UnboundedReceiver<Result<Vec<u8>, Option<std::io::Error>>>,
    ) {
        self.connection.start();
        let actions = self.connection.on_connect();
        self.execute(actions).await;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::SendRequest(builder, reply)) => self.on_send_request(builder, reply).await,
                    Some(Command::Respond(msg_no, builder)) => {
                        self.connection.respond(msg_no, builder);
                        self.drain().await;
                    },
                    Some(Command::Close(code, message)) => {
                        let actions = self.connection.close(code, message);
                        self.execute(actions).await;
                    },
                    None => break,
                },
                frame = frames.recv() => {
                    if !self.on_frame(frame).await {
                        break;
                    }
                },
            }
        }

        for (_, reply) in self.pending_requests.drain() {
            let _ = reply.send(Ok(SimOutcome::Disconnected));
        }
    }

    async fn on_send_request(
        &mut self,
        builder: MessageBuilder,
        reply: oneshot::Sender<Result<SimOutcome, ConnectionError>>,
    ) {
        match self.connection.send_request(builder) {
            Ok((msg_no, actions)) => {
                self.pending_requests.insert(msg_no, reply);
                self.execute(actions).await;
                self.drain().await;
            },
            Err(err) => {
                let _ = reply.send(Err(err));
            },
        }
    }

    async fn on_frame(&mut self, frame: Option<Result<Vec<u8>, Option<std::io::Error>>>) -> bool {
        match frame {
            Some(Ok(bytes)) => {
                let actions = self.connection.receive_frame(&bytes);
                // An ack in this frame may have unfrozen an iceboxed
                // message; drain keeps it moving (mirrors blip-transport).
                if !self.execute(actions).await {
                    return false;
                }
                self.drain().await;
                true
            },
            Some(Err(None)) | None => {
                let actions = self.connection.on_close(CloseStatus {
                    kind: CloseKind::Transport,
                    code: 1006,
                    message: "stream ended".to_string(),
                });
                self.execute(actions).await
            },
            Some(Err(Some(err))) => {
                let actions = self.connection.on_close(CloseStatus {
                    kind: CloseKind::Transport,
                    code: 1006,
                    message: err.to_string(),
                });
                self.execute(actions).await
            },
        }
    }

    async fn drain(&mut self) {
        loop {
            let actions = self.connection.poll_outbox();
            if actions.is_empty() {
                break;
            }
            if !self.execute(actions).await {
                break;
            }
        }
    }

    async fn execute(&mut self, actions: Vec<Action>) -> bool {
        use blip_core::WebSocket as _;
        let mut keep_running = true;
        for action in actions {
            match &action {
                Action::Send(bytes) => {
                    if self.socket.send_binary(bytes.clone()).await.is_err() {
                        keep_running = false;
                    }
                    continue;
                },
                Action::CloseSocket { code, reason } => {
                    let _ = self.socket.close(*code, reason).await;
                },
                Action::Progress(event) => self.handle_progress(event),
                Action::Closed(_) => keep_running = false,
                Action::Log { .. } | Action::RequestBeginning { .. } | Action::RequestReceived(_) | Action::DeferredRequest(..) => {},
            }
            let _ = self.events.send(action);
        }
        keep_running
    }

    fn handle_progress(&mut self, event: &blip_core::ProgressEvent) {
        use blip_core::ProgressState;
        match event.state {
            ProgressState::Complete => {
                if let Some(reply) = self.pending_requests.remove(&event.msg_no) {
                    let outcome = event
                        .response
                        .clone()
                        .map_or(SimOutcome::Disconnected, SimOutcome::Response);
                    let _ = reply.send(Ok(outcome));
                }
            },
            ProgressState::Disconnected => {
                if let Some(reply) = self.pending_requests.remove(&event.msg_no) {
                    let _ = reply.send(Ok(SimOutcome::Disconnected));
                }
            },
            ProgressState::Queued
            | ProgressState::Sending
            | ProgressState::AwaitingReply
            | ProgressState::ReceivingReply => {},
        }
    }
}
