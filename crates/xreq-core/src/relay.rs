//! Relay channel: the privileged end of every bridge connection.
//!
//! Each inbound `fetch` runs on its own task and answers with exactly one
//! `fetch_callback` on the connection it arrived on. Settings messages are
//! answered inline.

use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::executor::Executor;
use crate::http::HttpClient;
use crate::protocol::{ChannelMessage, FetchEnvelope, ResultEnvelope, CHANNEL_NAME};
use crate::transport::unix::{handshake, UnixRelayListener};
use crate::transport::{Connection, ConnectionSender, Incoming, LocalAcceptor};

pub struct RelayChannel<C> {
    executor: Arc<Executor<C>>,
}

impl<C> Clone for RelayChannel<C> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
        }
    }
}

impl<C: HttpClient> RelayChannel<C> {
    pub fn new(executor: Executor<C>) -> Self {
        Self {
            executor: Arc::new(executor),
        }
    }

    pub fn executor(&self) -> &Arc<Executor<C>> {
        &self.executor
    }

    /// Serve one connection. Connections on any other channel name are
    /// dropped and `None` is returned.
    pub fn accept(&self, conn: Connection) -> Option<JoinHandle<()>> {
        if conn.name != CHANNEL_NAME {
            tracing::debug!(channel = %conn.name, "ignoring connection on foreign channel");
            return None;
        }
        Some(tokio::spawn(serve_connection(
            Arc::clone(&self.executor),
            conn,
        )))
    }

    /// Accept in-process connections until every hub handle is dropped.
    pub async fn serve_local(&self, mut acceptor: LocalAcceptor) {
        while let Some(conn) = acceptor.accept().await {
            self.accept(conn);
        }
        tracing::debug!("local acceptor closed");
    }

    /// Accept socket connections forever. Accept and handshake errors are
    /// logged and the loop continues.
    pub async fn serve_unix(&self, listener: UnixRelayListener) {
        tracing::info!(path = %listener.path().display(), "relay listening");
        loop {
            match listener.accept().await {
                Ok(stream) => {
                    let relay = self.clone();
                    tokio::spawn(async move {
                        match handshake(stream).await {
                            Ok(conn) => {
                                relay.accept(conn);
                            }
                            Err(e) => tracing::debug!("relay socket handshake: {}", e),
                        }
                    });
                }
                Err(e) => tracing::debug!("relay socket accept: {}", e),
            }
        }
    }
}

async fn serve_connection<C: HttpClient>(executor: Arc<Executor<C>>, conn: Connection) {
    let Connection {
        name,
        sender,
        mut receiver,
    } = conn;
    tracing::info!(channel = %name, "bridge connected");
    loop {
        match receiver.recv().await {
            Incoming::Message(msg) => handle_message(&executor, &sender, msg).await,
            Incoming::Disconnected(reason) => {
                tracing::info!(channel = %name, "bridge disconnected: {}", reason);
                break;
            }
        }
    }
}

/// Fetches are spawned; settings messages are answered in arrival order.
async fn handle_message<C: HttpClient>(
    executor: &Arc<Executor<C>>,
    sender: &ConnectionSender,
    msg: ChannelMessage,
) {
    match msg {
        ChannelMessage::Fetch(envelope) => {
            tokio::spawn(dispatch_fetch(
                Arc::clone(executor),
                sender.clone(),
                envelope,
            ));
        }
        ChannelMessage::GetConfig => {
            reply(
                sender,
                ChannelMessage::Config {
                    config: executor.config().get(),
                },
            );
        }
        ChannelMessage::UpdateConfig { config } => {
            // Saving writes the settings file.
            let store = Arc::clone(executor.config());
            let saved = tokio::task::spawn_blocking(move || store.save(&config)).await;
            let answer = match saved {
                Ok(Ok(_)) => ChannelMessage::ConfigUpdated {
                    success: true,
                    error: None,
                },
                Ok(Err(e)) => ChannelMessage::ConfigUpdated {
                    success: false,
                    error: Some(e.to_string()),
                },
                Err(e) => ChannelMessage::ConfigUpdated {
                    success: false,
                    error: Some(format!("settings worker failed: {e}")),
                },
            };
            reply(sender, answer);
        }
        other => tracing::debug!(?other, "ignoring unexpected channel message"),
    }
}

async fn dispatch_fetch<C: HttpClient>(
    executor: Arc<Executor<C>>,
    sender: ConnectionSender,
    envelope: FetchEnvelope,
) {
    let FetchEnvelope { node_id, req } = envelope;
    let result = match executor.fetch(&req).await {
        Ok(res) => ResultEnvelope::ok(&node_id, &req.request_id, res),
        Err(e) => ResultEnvelope::err(&node_id, &req.request_id, e.to_payload()),
    };
    if sender.send(ChannelMessage::FetchCallback(result)).is_err() {
        tracing::debug!(request_id = %req.request_id, "connection gone; result dropped");
    }
}

fn reply(sender: &ConnectionSender, msg: ChannelMessage) {
    if let Err(e) = sender.send(msg) {
        tracing::debug!("relay reply: {}", e);
    }
}
