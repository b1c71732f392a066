use crate::channel::{ChannelManager, ConnectionId, Outbound, Subscriber};
use crate::protocol::{ClientMessage, CommandsMessage, InitialStateMessage, ProtocolError};
use crate::config::ServerConfig;
use crate::queue::ConnectionQueue;
use crate::route::{Command, Session};
use axum::extract::ws::{Message, WebSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Subscriber id used for connections that joined no channel
const PRIVATE_SUBSCRIBER_ID: u64 = 0;

/// State shared between the socket loop and the connection's queued tasks
struct Connection {
    id: ConnectionId,
    subscriber_id: u64,
    channel: Option<String>,
    subscriber: Subscriber,
    session: Box<dyn Session>,
    channels: Arc<dyn ChannelManager>,
    close_on_function_error: bool,
    /// Set once the connection is being torn down; queued tasks bail out
    closing: AtomicBool,
}

impl Connection {
    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Stop running further tasks and ask the socket loop to close
    fn force_close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.subscriber.close();
    }

    async fn send_initial_state(self: Arc<Self>) -> anyhow::Result<()> {
        let state = match self.session.initial_state().await {
            Ok(state) => state,
            Err(e) => {
                self.force_close();
                return Err(e.context("initial state failed"));
            }
        };

        let message = InitialStateMessage {
            s: state,
            i: self.subscriber_id,
        };
        let json = serde_json::to_string(&message)?;
        self.subscriber.send(&json);
        Ok(())
    }

    async fn handle_message(self: Arc<Self>, message: ClientMessage) -> anyhow::Result<()> {
        if self.is_closing() {
            return Ok(());
        }

        let Some(invocation) = self.session.invoke(&message.function, message.args) else {
            error!(
                connection_id = %self.id,
                function = %message.function,
                "Function not found, closing connection"
            );
            self.force_close();
            return Ok(());
        };

        let commands = match invocation.await {
            Ok(commands) => commands,
            Err(e) => {
                if self.close_on_function_error {
                    self.force_close();
                }
                return Err(e.context(format!("client function '{}' failed", message.function)));
            }
        };

        self.broadcast(commands)
    }

    /// Deliver one invocation's commands to the whole channel, the invoker
    /// included
    fn broadcast(&self, commands: Vec<Command>) -> anyhow::Result<()> {
        let message = CommandsMessage {
            c: commands,
            i: self.subscriber_id,
        };
        let json = serde_json::to_string(&message)?;

        match &self.channel {
            Some(channel) => self.channels.post(channel, &json),
            None => {
                self.subscriber.send(&json);
            }
        }
        Ok(())
    }

    fn reject_frame(&self, violation: ProtocolError) {
        warn!(connection_id = %self.id, error = %violation, "Protocol violation, closing connection");
        self.force_close();
    }
}

async fn send_close(socket: &mut WebSocket, id: ConnectionId) {
    if let Err(e) = socket.send(Message::Close(None)).await {
        debug!(connection_id = %id, error = %e, "Failed to send close frame");
    }
}

/// Drive an established connection until the transport closes or the
/// connection is force-closed
pub(crate) async fn run(
    mut socket: WebSocket,
    channels: Arc<dyn ChannelManager>,
    session: Box<dyn Session>,
    config: ServerConfig,
) {
    let id = ConnectionId::new();
    let (tx, mut rx) = mpsc::channel(config.send_queue_limit.max(1));
    let subscriber = Subscriber::new(id, tx);
    let channel = session.channel().map(str::to_string);

    let subscriber_id = match &channel {
        Some(name) => channels.add_listener(subscriber.clone(), name),
        None => PRIVATE_SUBSCRIBER_ID,
    };

    info!(
        connection_id = %id,
        channel = ?channel,
        subscriber_id = subscriber_id,
        "WebSocket connection established"
    );

    let connection = Arc::new(Connection {
        id,
        subscriber_id,
        channel,
        subscriber,
        session,
        channels,
        close_on_function_error: config.close_on_function_error,
        closing: AtomicBool::new(false),
    });

    let mut queue = ConnectionQueue::new(config.task_queue_limit);
    // First task, so the snapshot precedes this connection's own broadcasts
    let mut posted = queue.post(Arc::clone(&connection).send_initial_state());

    loop {
        if let Err(e) = posted {
            warn!(connection_id = %id, error = %e, "Task not queued, closing connection");
            send_close(&mut socket, id).await;
            break;
        }

        tokio::select! {
            msg = socket.recv() => {
                posted = match msg {
                    Some(Ok(Message::Text(text))) => {
                        let connection = Arc::clone(&connection);
                        match ClientMessage::parse(&text) {
                            Ok(message) => queue.post(connection.handle_message(message)),
                            // Queued so earlier invocations still complete first
                            Err(violation) => queue.post(async move {
                                connection.reject_frame(violation);
                                Ok(())
                            }),
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let connection = Arc::clone(&connection);
                        queue.post(async move {
                            connection.reject_frame(ProtocolError::Binary);
                            Ok(())
                        })
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = socket.send(Message::Pong(data)).await {
                            error!(connection_id = %id, error = %e, "Failed to send pong");
                            break;
                        }
                        Ok(())
                    }
                    Some(Ok(Message::Pong(_))) => Ok(()),
                    Some(Ok(Message::Close(_))) | None => {
                        info!(connection_id = %id, "WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection_id = %id, error = %e, "WebSocket error");
                        break;
                    }
                };
            }

            Some(outbound) = rx.recv() => {
                match outbound {
                    Outbound::Text(text) => {
                        if let Err(e) = socket.send(Message::Text(text)).await {
                            error!(connection_id = %id, error = %e, "Failed to send message");
                            break;
                        }
                    }
                    Outbound::Close => {
                        send_close(&mut socket, id).await;
                        break;
                    }
                }
            }

            _ = connection.subscriber.overflowed() => {
                send_close(&mut socket, id).await;
                break;
            }
        }
    }

    connection.closing.store(true, Ordering::SeqCst);
    if let Some(channel) = &connection.channel {
        connection.channels.remove_listener(id, channel);
    }
    queue.discard();

    info!(connection_id = %id, "WebSocket connection closed");
}
