//! WebSocket connection management
//!
//! Accepts TCP connections, upgrades them, and runs one task per client. The
//! task owns the socket: it drains the client's hub queue into the sink,
//! hands inbound text to the [`CommandHandler`], pings on an interval, and
//! unregisters from the hub before the socket is closed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message, Utf8Bytes};
use tokio_tungstenite::{WebSocketStream, accept_async};

use crate::commands::CommandHandler;
use crate::hub::{BroadcastHub, ClientHandle, ConnectionId, Payload};

/// Per-connection limits and timers
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Outbound snapshots buffered per client before it starts missing some
    pub queue_capacity: usize,
    pub handshake_timeout: Duration,
    pub ping_interval: Duration,
    /// Close a connection that has sent nothing for this long
    pub ping_timeout: Duration,
    /// Upper bound on the graceful close at shutdown
    pub close_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            handshake_timeout: Duration::from_millis(5000),
            ping_interval: Duration::from_secs(20),
            ping_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(10),
        }
    }
}

/// Why a connection task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent a close frame or dropped the TCP stream
    ClientClosed,
    /// No inbound frame within the ping timeout
    TimedOut,
    /// Read or write failed
    Error(String),
    /// Server shutting down
    Shutdown,
}

impl CloseReason {
    /// Whether we should still send our own close frame
    fn server_initiated(&self) -> bool {
        matches!(self, Self::TimedOut | Self::Shutdown)
    }
}

/// Accept loop plus per-connection tasks
pub struct ConnectionManager {
    hub: Arc<BroadcastHub>,
    handler: Arc<CommandHandler>,
    settings: ConnectionSettings,
    shutdown_tx: broadcast::Sender<()>,
}

impl ConnectionManager {
    pub fn new(
        hub: Arc<BroadcastHub>,
        handler: Arc<CommandHandler>,
        settings: ConnectionSettings,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            hub,
            handler,
            settings,
            shutdown_tx,
        }
    }

    /// Accept connections until shutdown, then close the listener and give
    /// open connections up to `close_timeout` to finish their close.
    pub async fn run(self: Arc<Self>, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        let mut tasks = JoinSet::new();

        loop {
            // Subscribed before accepting so a shutdown racing the accept is
            // still seen by the new connection.
            let conn_shutdown = self.shutdown_tx.subscribe();

            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let this = Arc::clone(&self);
                        tasks.spawn(async move { this.serve(stream, peer, conn_shutdown).await });
                    }
                    Err(e) => {
                        log::warn!("[Conn] Accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        log::error!("[Conn] Connection task failed: {}", e);
                    }
                }
                _ = shutdown.recv() => break,
            }
        }

        drop(listener);
        log::info!("[Conn] Listener closed, closing {} connections", tasks.len());

        let drain = async { while tasks.join_next().await.is_some() {} };
        if tokio::time::timeout(self.settings.close_timeout, drain).await.is_err() {
            log::warn!(
                "[Conn] {} connections did not close within {:?}, aborting",
                tasks.len(),
                self.settings.close_timeout
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }

    /// Handshake, register, and run one client until it closes.
    async fn serve(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        mut shutdown: broadcast::Receiver<()>,
    ) -> CloseReason {
        let ws = match tokio::time::timeout(self.settings.handshake_timeout, accept_async(stream))
            .await
        {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                log::debug!("[Conn] Handshake with {} failed: {}", peer, e);
                return CloseReason::Error(e.to_string());
            }
            Err(_) => {
                log::debug!("[Conn] Handshake with {} timed out", peer);
                return CloseReason::TimedOut;
            }
        };

        let id = self.hub.next_id();
        let (tx, rx) = mpsc::channel(self.settings.queue_capacity);
        self.hub.register(ClientHandle::new(id, Some(peer), tx));
        log::info!(
            "[Conn] Client {} connected from {} ({} clients)",
            id,
            peer,
            self.hub.client_count()
        );

        let reason = self.pump(id, ws, rx, &mut shutdown).await;

        log::info!(
            "[Conn] Client {} disconnected: {:?} ({} clients)",
            id,
            reason,
            self.hub.client_count()
        );
        reason
    }

    /// Move data both ways until either side ends the connection, then
    /// unregister and, if the server is the one closing, send a close frame.
    async fn pump(
        &self,
        id: ConnectionId,
        ws: WebSocketStream<TcpStream>,
        mut rx: mpsc::Receiver<Payload>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> CloseReason {
        let (mut sink, mut stream) = ws.split();

        let mut ping = tokio::time::interval(self.settings.ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ping.reset();
        let mut last_seen = Instant::now();

        let reason = loop {
            tokio::select! {
                queued = rx.recv() => match queued {
                    Some(payload) => {
                        // A client closing mid-send ends here, not in the hub.
                        let message = Message::Text(payload);
                        let sent = send_within(&mut sink, message, self.settings.ping_timeout);
                        if let Err(reason) = sent.await {
                            break reason;
                        }
                    }
                    None => break CloseReason::Shutdown,
                },

                frame = stream.next() => match frame {
                    Some(Ok(message)) => {
                        last_seen = Instant::now();
                        match message {
                            Message::Text(text) => {
                                self.handler.handle_text(text.as_str());
                            }
                            Message::Close(_) => break CloseReason::ClientClosed,
                            Message::Binary(_) => {
                                log::debug!("[Conn] Client {} sent binary frame, ignoring", id);
                            }
                            // Pings are answered by tungstenite on the next write.
                            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                        }
                    }
                    Some(Err(e)) => break CloseReason::Error(e.to_string()),
                    None => break CloseReason::ClientClosed,
                },

                _ = ping.tick() => {
                    if last_seen.elapsed() >= self.settings.ping_timeout {
                        break CloseReason::TimedOut;
                    }
                    let message = Message::Ping(Default::default());
                    let sent = send_within(&mut sink, message, self.settings.ping_timeout);
                    if let Err(reason) = sent.await {
                        break reason;
                    }
                }

                _ = shutdown.recv() => break CloseReason::Shutdown,
            }
        };

        // Out of the broadcast set before the socket goes away.
        self.hub.unregister(id);
        drop(rx);

        if reason.server_initiated() {
            let frame = match reason {
                CloseReason::TimedOut => CloseFrame {
                    code: CloseCode::Policy,
                    reason: Utf8Bytes::from_static("ping timeout"),
                },
                _ => CloseFrame {
                    code: CloseCode::Away,
                    reason: Utf8Bytes::from_static("server shutting down"),
                },
            };

            // Send our close frame and wait for the client's reply.
            let close = async {
                sink.send(Message::Close(Some(frame))).await?;
                while let Some(message) = stream.next().await {
                    message?;
                }
                Ok::<(), WsError>(())
            };

            match tokio::time::timeout(self.settings.close_timeout, close).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::debug!("[Conn] Client {} close handshake: {}", id, e),
                Err(_) => log::debug!("[Conn] Client {} close handshake timed out", id),
            }
        } else {
            let _ = sink.close().await;
        }

        reason
    }
}

/// Write one message, giving up after `limit` so a peer that stops reading
/// cannot stall the connection task.
async fn send_within<S>(
    sink: &mut S,
    message: Message,
    limit: Duration,
) -> Result<(), CloseReason>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    match tokio::time::timeout(limit, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(CloseReason::Error(e.to_string())),
        Err(_) => Err(CloseReason::TimedOut),
    }
}
