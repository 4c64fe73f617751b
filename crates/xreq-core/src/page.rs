//! In-page messaging surface shared by every script in one page.
//!
//! Everything posted is seen by every subscriber, including messages from
//! other documents and unrelated scripts; receivers filter by `source` and
//! `nodeId`.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::protocol::{PageRequest, PageResult};

pub(crate) const BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageMessage {
    Request(PageRequest),
    Result(PageResult),
    /// Anything else posted on the page.
    Other(serde_json::Value),
}

#[derive(Debug, Clone)]
pub struct PageBus {
    tx: broadcast::Sender<PageMessage>,
}

impl Default for PageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl PageBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Post to every current subscriber. Posting with nobody listening is not an error.
    pub fn post(&self, msg: PageMessage) {
        let _ = self.tx.send(msg);
    }

    pub fn subscribe(&self) -> PageSubscription {
        PageSubscription {
            rx: self.tx.subscribe(),
        }
    }
}

#[derive(Debug)]
pub struct PageSubscription {
    rx: broadcast::Receiver<PageMessage>,
}

impl PageSubscription {
    /// Next message; `None` once the bus is gone. Messages lost to a slow
    /// subscriber are logged and skipped.
    pub async fn recv(&mut self) -> Option<PageMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "page subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn every_subscriber_sees_every_post() {
        let bus = PageBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.post(PageMessage::Other(json!({"hello": 1})));
        assert_eq!(a.recv().await, Some(PageMessage::Other(json!({"hello": 1}))));
        assert_eq!(b.recv().await, Some(PageMessage::Other(json!({"hello": 1}))));
    }

    #[test]
    fn foreign_json_parses_as_other() {
        let msg: PageMessage = serde_json::from_value(json!({"source": "ads", "x": 1})).unwrap();
        assert!(matches!(msg, PageMessage::Other(_)));
    }

    #[test]
    fn page_request_json_parses() {
        let msg: PageMessage = serde_json::from_value(json!({
            "source": "cross_request_page",
            "nodeId": "n1",
            "req": {"requestId": "r1", "url": "https://a.example/"}
        }))
        .unwrap();
        match msg {
            PageMessage::Request(r) => {
                assert_eq!(r.node_id, "n1");
                assert_eq!(r.req.method, "GET");
                assert_eq!(r.req.timeout, 30_000);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
