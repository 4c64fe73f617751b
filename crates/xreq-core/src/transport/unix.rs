//! Unix domain socket transport.
//! Protocol: the first line names the channel; every following line is one
//! JSON-encoded [`ChannelMessage`] in either direction.

use anyhow::{Context, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

use super::{
    ConnectError, Connection, ConnectionReceiver, ConnectionSender, Connector, Disconnect, Frame,
};
use crate::protocol::{ChannelMessage, ResultEnvelope};

/// `$XDG_STATE_HOME/xreq/relay.sock`.
pub fn default_socket_path() -> Result<PathBuf> {
    let dirs = xdg::BaseDirectories::with_prefix("xreq")?;
    dirs.place_state_file("relay.sock")
        .context("creating state directory for relay socket")
}

/// Wrap a socket whose handshake is done into a [`Connection`].
fn attach(name: String, reader: BufReader<OwnedReadHalf>, writer: OwnedWriteHalf) -> Connection {
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Frame>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Frame>();
    tokio::spawn(write_loop(writer, out_rx));
    tokio::spawn(read_loop(reader, in_tx, out_tx.downgrade()));
    Connection {
        name,
        sender: ConnectionSender::new(out_tx),
        receiver: ConnectionReceiver::new(in_rx),
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(_) => break,
        };
        let mut line = match serde_json::to_string(&msg) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("relay socket encode: {}", e);
                continue;
            }
        };
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::debug!("relay socket write: {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// `reply` feeds this end's write loop; it is weak so that dropping the
/// connection still ends the write loop. A `fetch` frame that does not decode
/// is answered there with an error callback so the requester is not left
/// waiting. Other malformed lines are logged and skipped.
async fn read_loop(
    reader: BufReader<OwnedReadHalf>,
    tx: mpsc::UnboundedSender<Frame>,
    reply: mpsc::WeakUnboundedSender<Frame>,
) {
    let mut lines = reader.lines();
    let reason = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<ChannelMessage>(line) {
                    Ok(msg) => {
                        if tx.send(Ok(msg)).is_err() {
                            return;
                        }
                    }
                    Err(e) => reject(line, &e, &reply),
                }
            }
            Ok(None) => break Disconnect::Closed,
            Err(e) => break Disconnect::Error(e.to_string()),
        }
    };
    let _ = tx.send(Err(reason));
}

fn reject(line: &str, err: &serde_json::Error, reply: &mpsc::WeakUnboundedSender<Frame>) {
    let answer = serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|frame| ResultEnvelope::for_undecodable(&frame, &err.to_string()));
    match answer {
        Some(result) => {
            tracing::warn!(request_id = %result.request_id, "relay socket: rejecting malformed fetch: {}", err);
            if let Some(tx) = reply.upgrade() {
                let _ = tx.send(Ok(ChannelMessage::FetchCallback(result)));
            }
        }
        None => tracing::warn!("relay socket: ignoring malformed message: {}", err),
    }
}

/// Relay-side listener. Removes a stale socket file on bind and its own on drop.
#[derive(Debug)]
pub struct UnixRelayListener {
    listener: UnixListener,
    path: PathBuf,
}

impl UnixRelayListener {
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path)
            .with_context(|| format!("binding relay socket {}", path.display()))?;
        Ok(Self { listener, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept the next raw stream. Run [`handshake`] on it off the accept loop.
    pub async fn accept(&self) -> std::io::Result<UnixStream> {
        let (stream, _) = self.listener.accept().await?;
        Ok(stream)
    }
}

impl Drop for UnixRelayListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Read the channel-name line and wrap the stream.
pub async fn handshake(stream: UnixStream) -> std::io::Result<Connection> {
    let (read, write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut name = String::new();
    if reader.read_line(&mut name).await? == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "closed before handshake",
        ));
    }
    Ok(attach(name.trim().to_string(), reader, write))
}

/// Connects to a relay served on a Unix socket.
#[derive(Debug, Clone)]
pub struct UnixConnector {
    path: PathBuf,
}

impl UnixConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn open(path: PathBuf, name: String) -> Result<Connection, ConnectError> {
        let unavailable = |e: std::io::Error| {
            ConnectError::Unavailable(format!("{}: {}", path.display(), e))
        };
        let stream = UnixStream::connect(&path).await.map_err(unavailable)?;
        let (read, mut write) = stream.into_split();
        write
            .write_all(format!("{name}\n").as_bytes())
            .await
            .map_err(unavailable)?;
        Ok(attach(name, BufReader::new(read), write))
    }
}

impl Connector for UnixConnector {
    fn connect(&self, name: &str) -> impl Future<Output = Result<Connection, ConnectError>> + Send {
        Self::open(self.path.clone(), name.to_string())
    }
}
