//! In-process transport: bridges and relay live in the same runtime.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

use super::{pair, ConnectError, Connection, Connector, Disconnect, Frame};

struct Peer {
    /// Feeds the connecting side.
    to_client: mpsc::WeakUnboundedSender<Frame>,
    /// Feeds the accepting side.
    to_relay: mpsc::WeakUnboundedSender<Frame>,
}

struct HubInner {
    accept_tx: mpsc::UnboundedSender<Connection>,
    invalidated: AtomicBool,
    peers: Mutex<Vec<Peer>>,
}

/// Connector for relays running in this process. Clones share one hub.
#[derive(Clone)]
pub struct LocalHub {
    inner: Arc<HubInner>,
}

/// Accepting side of a [`LocalHub`].
#[derive(Debug)]
pub struct LocalAcceptor {
    rx: mpsc::UnboundedReceiver<Connection>,
}

impl LocalAcceptor {
    /// Next incoming connection; `None` once every hub handle is gone.
    pub async fn accept(&mut self) -> Option<Connection> {
        self.rx.recv().await
    }
}

impl LocalHub {
    pub fn new() -> (Self, LocalAcceptor) {
        let (accept_tx, rx) = mpsc::unbounded_channel();
        let hub = Self {
            inner: Arc::new(HubInner {
                accept_tx,
                invalidated: AtomicBool::new(false),
                peers: Mutex::new(Vec::new()),
            }),
        };
        (hub, LocalAcceptor { rx })
    }

    /// Tear down the hosting context: live connections end with
    /// [`Disconnect::ContextInvalidated`] and new connects are refused.
    pub fn invalidate(&self) {
        self.inner.invalidated.store(true, Ordering::SeqCst);
        let peers = std::mem::take(
            &mut *self
                .inner
                .peers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for peer in peers {
            if let Some(tx) = peer.to_client.upgrade() {
                let _ = tx.send(Err(Disconnect::ContextInvalidated));
            }
            if let Some(tx) = peer.to_relay.upgrade() {
                let _ = tx.send(Err(Disconnect::Closed));
            }
        }
        tracing::info!("local relay context invalidated");
    }

    pub fn is_invalidated(&self) -> bool {
        self.inner.invalidated.load(Ordering::SeqCst)
    }

    fn open(&self, name: &str) -> Result<Connection, ConnectError> {
        if self.is_invalidated() {
            return Err(ConnectError::ContextInvalidated);
        }
        let (near, far) = pair(name);
        let peer = Peer {
            to_client: far.sender.downgrade(),
            to_relay: near.sender.downgrade(),
        };
        self.inner
            .accept_tx
            .send(far)
            .map_err(|_| ConnectError::Unavailable("relay is not accepting".to_string()))?;

        let mut peers = self
            .inner
            .peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        peers.retain(|p| p.to_client.upgrade().is_some() || p.to_relay.upgrade().is_some());
        peers.push(peer);
        Ok(near)
    }
}

impl Connector for LocalHub {
    fn connect(&self, name: &str) -> impl Future<Output = Result<Connection, ConnectError>> + Send {
        let result = self.open(name);
        async move { result }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ChannelMessage;
    use crate::transport::Incoming;

    #[tokio::test]
    async fn connect_reaches_acceptor() {
        let (hub, mut acceptor) = LocalHub::new();
        let mut client = hub.connect("chan").await.unwrap();
        let mut server = acceptor.accept().await.unwrap();
        assert_eq!(server.name, "chan");

        client.sender.send(ChannelMessage::GetConfig).unwrap();
        assert_eq!(server.receiver.recv().await, Incoming::Message(ChannelMessage::GetConfig));
        server
            .sender
            .send(ChannelMessage::ConfigUpdated { success: true, error: None })
            .unwrap();
        assert!(matches!(client.receiver.recv().await, Incoming::Message(_)));
    }

    #[tokio::test]
    async fn invalidate_is_permanent() {
        let (hub, mut acceptor) = LocalHub::new();
        let mut client = hub.connect("chan").await.unwrap();
        let mut server = acceptor.accept().await.unwrap();

        hub.invalidate();
        assert_eq!(
            client.receiver.recv().await,
            Incoming::Disconnected(Disconnect::ContextInvalidated)
        );
        assert_eq!(server.receiver.recv().await, Incoming::Disconnected(Disconnect::Closed));
        assert_eq!(
            hub.connect("chan").await.unwrap_err(),
            ConnectError::ContextInvalidated
        );
    }

    #[tokio::test]
    async fn connect_without_acceptor_is_unavailable() {
        let (hub, acceptor) = LocalHub::new();
        drop(acceptor);
        let err = hub.connect("chan").await.unwrap_err();
        assert!(!err.is_permanent());
    }
}
