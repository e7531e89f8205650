//! The single-threaded actor task that drives a [`blip_core::Connection`]
//! over a negotiated `tokio-tungstenite` WebSocket.
//!
//! One task owns the socket and the protocol state machine, reading commands
//! from a channel and frames from the socket, executing whatever
//! [`blip_core::Action`]s each call produces.

use std::collections::HashMap;
use std::sync::Arc;

use blip_core::{
    Action, CloseKind, CloseStatus, Connection, ConnectionConfig, ConnectionError, WebSocket,
};
use blip_proto::{CompletedMessage, MessageBuilder, MessageNo};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use crate::delegate::ConnectionDelegate;
use crate::socket::TungsteniteSocket;

/// How a sent request finally resolved.
#[derive(Debug, Clone)]
pub enum MessageOutcome {
    /// The paired response arrived.
    Response(CompletedMessage),
    /// The connection died before the response arrived.
    Disconnected,
}

enum Command {
    SendRequest(MessageBuilder, oneshot::Sender<Result<MessageOutcome, ConnectionError>>),
    Respond(MessageNo, MessageBuilder),
    Close(u16, String),
}

/// A handle to a running connection actor. Cloning is cheap; every clone
/// posts to the same actor task.
#[derive(Clone)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl ConnectionHandle {
    /// Enqueues `builder` as a request and resolves once its response (or a
    /// disconnect) arrives.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Cancelled`] if the actor has already shut down or
    /// the connection was not connected when the request was posted.
    pub async fn send_request(
        &self,
        builder: MessageBuilder,
    ) -> Result<MessageOutcome, ConnectionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::SendRequest(builder, reply_tx))
            .map_err(|_| ConnectionError::Cancelled)?;
        reply_rx.await.map_err(|_| ConnectionError::Cancelled)?
    }

    /// Sends a deferred response for a request the host's handler accepted
    /// with [`blip_core::HandlerOutcome::Deferred`].
    pub fn respond(&self, msg_no: MessageNo, builder: MessageBuilder) {
        let _ = self.commands.send(Command::Respond(msg_no, builder));
    }

    /// Initiates graceful shutdown.
    pub fn close(&self, code: u16, message: impl Into<String>) {
        let _ = self.commands.send(Command::Close(code, message.into()));
    }
}

/// Spawns the actor task driving `stream`, returning a [`ConnectionHandle`]
/// and the task's [`tokio::task::JoinHandle`].
///
/// `configure` runs against the fresh [`Connection`] before it starts —
/// register request handlers here.
pub fn spawn<S>(
    stream: WebSocketStream<S>,
    config: ConnectionConfig,
    configure: impl FnOnce(&mut Connection),
    delegate: Arc<dyn ConnectionDelegate>,
) -> (ConnectionHandle, tokio::task::JoinHandle<()>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (sink, source) = stream.split();
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();

    let mut connection = Connection::new(config);
    configure(&mut connection);

    let actor = Actor {
        connection,
        socket: TungsteniteSocket::new(sink),
        source,
        delegate,
        pending_requests: HashMap::new(),
    };

    let handle = tokio::spawn(actor.run(commands_rx));
    (ConnectionHandle { commands: commands_tx }, handle)
}

type Sink<S> = futures_util::stream::SplitSink<WebSocketStream<S>, Message>;
type Source<S> = futures_util::stream::SplitStream<WebSocketStream<S>>;

struct Actor<S> {
    connection: Connection,
    socket: TungsteniteSocket<Sink<S>>,
    source: Source<S>,
    delegate: Arc<dyn ConnectionDelegate>,
    pending_requests: HashMap<MessageNo, oneshot::Sender<Result<MessageOutcome, ConnectionError>>>,
}

impl<S> Actor<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.connection.start();
        let actions = self.connection.on_connect();
        self.delegate.on_connect();
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
                message = self.source.next() => {
                    if !self.on_message(message).await {
                        break;
                    }
                },
            }
        }

        for (_, reply) in self.pending_requests.drain() {
            let _ = reply.send(Ok(MessageOutcome::Disconnected));
        }
    }

    async fn on_send_request(
        &mut self,
        builder: MessageBuilder,
        reply: oneshot::Sender<Result<MessageOutcome, ConnectionError>>,
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

    /// Returns `false` once the actor should stop (socket closed or failed).
    async fn on_message(
        &mut self,
        message: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) -> bool {
        match message {
            Some(Ok(Message::Binary(bytes))) => {
                let actions = self.connection.receive_frame(&bytes);
                // A received frame may carry an ack that unfreezes an
                // iceboxed message (spec.md S7); drain keeps it moving
                // instead of waiting for the next unrelated command.
                if !self.execute(actions).await {
                    return false;
                }
                self.drain().await;
                true
            },
            Some(Ok(Message::Close(_))) => {
                let actions = self.connection.on_close(CloseStatus {
                    kind: CloseKind::Normal,
                    code: 1000,
                    message: "peer closed".to_string(),
                });
                self.execute(actions).await
            },
            Some(Ok(_)) => true, // text/ping/pong frames are ignored
            Some(Err(err)) => {
                let actions = self.connection.on_close(CloseStatus {
                    kind: CloseKind::Transport,
                    code: 1006,
                    message: err.to_string(),
                });
                self.execute(actions).await
            },
            None => {
                let actions = self.connection.on_close(CloseStatus {
                    kind: CloseKind::Transport,
                    code: 1006,
                    message: "stream ended".to_string(),
                });
                self.execute(actions).await
            },
        }
    }

    /// Repeatedly polls the outbox until it and the icebox stop producing
    /// frames. Called whenever the socket becomes writable; `tokio-tungstenite`'s
    /// sink applies its own backpressure via `await`, so we poll eagerly.
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

    /// Executes `actions`, returning `false` if the connection has closed
    /// and the actor loop should stop.
    async fn execute(&mut self, actions: Vec<Action>) -> bool {
        let mut keep_running = true;
        for action in actions {
            match action {
                Action::Send(bytes) => {
                    if self.socket.send_binary(bytes).await.is_err() {
                        keep_running = false;
                    }
                },
                Action::Log { level, message } => log_action(level, &message),
                Action::RequestBeginning { msg_no, properties } => {
                    self.delegate.on_request_beginning(msg_no, &properties);
                },
                Action::RequestReceived(request) => self.delegate.on_request_received(&request),
                Action::DeferredRequest(msg_no, request) => {
                    self.delegate.on_deferred_request(msg_no, &request);
                },
                Action::Progress(event) => self.handle_progress(event),
                Action::CloseSocket { code, reason } => {
                    let _ = self.socket.close(code, &reason).await;
                },
                Action::Closed(status) => {
                    self.delegate.on_close(&status, self.connection.state());
                    keep_running = false;
                },
            }
        }
        keep_running
    }

    fn handle_progress(&mut self, event: blip_core::ProgressEvent) {
        use blip_core::ProgressState;
        match event.state {
            ProgressState::Complete => {
                if let Some(reply) = self.pending_requests.remove(&event.msg_no) {
                    let outcome = event
                        .response
                        .map_or(MessageOutcome::Disconnected, MessageOutcome::Response);
                    let _ = reply.send(Ok(outcome));
                }
            },
            ProgressState::Disconnected => {
                if let Some(reply) = self.pending_requests.remove(&event.msg_no) {
                    let _ = reply.send(Ok(MessageOutcome::Disconnected));
                }
            },
            ProgressState::Queued
            | ProgressState::Sending
            | ProgressState::AwaitingReply
            | ProgressState::ReceivingReply => {},
        }
    }
}

fn log_action(level: blip_core::LogLevel, message: &str) {
    use blip_core::LogLevel;
    match level {
        LogLevel::Debug => tracing::debug!("{message}"),
        LogLevel::Verbose => tracing::trace!("{message}"),
        LogLevel::Info => tracing::info!("{message}"),
        LogLevel::Warning => tracing::warn!("{message}"),
        LogLevel::Error | LogLevel::None => tracing::error!("{message}"),
    }
}
