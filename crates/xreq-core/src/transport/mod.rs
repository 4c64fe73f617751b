//! Bidirectional message transport between the bridge and the relay channel.
//!
//! A [`Connection`] is a named duplex pipe of [`ChannelMessage`]s. The far end
//! closing, failing, or being invalidated arrives on the receiver as an
//! [`Incoming::Disconnected`] carrying the reason.

pub mod memory;
pub mod unix;

use std::future::Future;
use tokio::sync::mpsc;

use crate::protocol::ChannelMessage;

pub use memory::{LocalAcceptor, LocalHub};
pub use unix::{default_socket_path, UnixConnector, UnixRelayListener};

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Disconnect {
    #[error("connection closed")]
    Closed,
    #[error("connection error: {0}")]
    Error(String),
    /// The hosting runtime went away. No reconnect can succeed.
    #[error("context invalidated")]
    ContextInvalidated,
}

impl Disconnect {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Disconnect::ContextInvalidated)
    }
}

/// Failure to open a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("context invalidated")]
    ContextInvalidated,
    #[error("relay unavailable: {0}")]
    Unavailable(String),
}

impl ConnectError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, ConnectError::ContextInvalidated)
    }
}

/// The peer is gone; the message was not delivered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("connection closed")]
pub struct SendError;

pub(crate) type Frame = Result<ChannelMessage, Disconnect>;

/// Sending half. Cheap to clone; every clone feeds the same peer.
#[derive(Debug, Clone)]
pub struct ConnectionSender {
    tx: mpsc::UnboundedSender<Frame>,
}

impl ConnectionSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Frame>) -> Self {
        Self { tx }
    }

    pub fn send(&self, msg: ChannelMessage) -> Result<(), SendError> {
        self.tx.send(Ok(msg)).map_err(|_| SendError)
    }

    /// Tell the peer the connection is over.
    pub fn disconnect(&self, reason: Disconnect) {
        let _ = self.tx.send(Err(reason));
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn same_channel(&self, other: &ConnectionSender) -> bool {
        self.tx.same_channel(&other.tx)
    }

    pub(crate) fn downgrade(&self) -> mpsc::WeakUnboundedSender<Frame> {
        self.tx.downgrade()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Message(ChannelMessage),
    Disconnected(Disconnect),
}

#[derive(Debug)]
pub struct ConnectionReceiver {
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl ConnectionReceiver {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Frame>) -> Self {
        Self { rx }
    }

    /// Next message, or the reason the connection ended. Once a
    /// `Disconnected` has been returned the connection is finished.
    pub async fn recv(&mut self) -> Incoming {
        match self.rx.recv().await {
            Some(Ok(msg)) => Incoming::Message(msg),
            Some(Err(reason)) => {
                self.rx.close();
                Incoming::Disconnected(reason)
            }
            None => Incoming::Disconnected(Disconnect::Closed),
        }
    }
}

#[derive(Debug)]
pub struct Connection {
    pub name: String,
    pub sender: ConnectionSender,
    pub receiver: ConnectionReceiver,
}

/// Two cross-wired ends of one in-process connection.
pub fn pair(name: &str) -> (Connection, Connection) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    let near = Connection {
        name: name.to_string(),
        sender: ConnectionSender::new(a_tx),
        receiver: ConnectionReceiver::new(b_rx),
    };
    let far = Connection {
        name: name.to_string(),
        sender: ConnectionSender::new(b_tx),
        receiver: ConnectionReceiver::new(a_rx),
    };
    (near, far)
}

/// Opens named connections to a relay.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, name: &str) -> impl Future<Output = Result<Connection, ConnectError>> + Send;
}
