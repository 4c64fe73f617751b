//! Content-tier bridge between one document's page surface and the relay.
//!
//! The bridge owns at most one relay connection. It is opened on the first
//! request and re-opened [`RECONNECT_DELAY`] after it drops. Only one connect
//! attempt is ever in flight. A permanent failure (the hosting context was
//! invalidated) stops reconnecting for good and raises a single notice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::page::{PageBus, PageMessage, PageSubscription};
use crate::protocol::{
    ChannelMessage, FetchEnvelope, PageRequest, PageResult, CHANNEL_NAME, PAGE_SOURCE,
};
use crate::transport::{
    Connection, ConnectionReceiver, ConnectionSender, Connector, Disconnect, Incoming,
};

pub const RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Shown once when the relay context is gone for good.
pub const INVALIDATED_NOTICE: &str =
    "The relay was reloaded or removed. Reload this page to keep sending cross-origin requests.";

/// User-visible notice surface.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, message: &str);
}

/// Notices go to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        tracing::warn!(target: "xreq::notice", "{}", message);
    }
}

#[derive(Debug, Clone)]
enum Link {
    Idle,
    /// An attempt is running or scheduled.
    Connecting,
    Connected(ConnectionSender),
    Invalidated,
}

struct Shared<K> {
    node_id: String,
    connector: K,
    bus: PageBus,
    notifier: Arc<dyn Notifier>,
    link: watch::Sender<Link>,
    notified: AtomicBool,
}

pub struct Bridge<K> {
    shared: Arc<Shared<K>>,
}

impl<K: Connector> Bridge<K> {
    /// Attach to a document with a freshly generated `nodeId`. Hand
    /// [`Bridge::node_id`] to the document's page client.
    pub fn attach(connector: K, bus: PageBus, notifier: Arc<dyn Notifier>) -> Self {
        let node_id = uuid::Uuid::new_v4().simple().to_string();
        let (link, _) = watch::channel(Link::Idle);
        tracing::debug!(%node_id, "bridge attached");
        Self {
            shared: Arc::new(Shared {
                node_id,
                connector,
                bus,
                notifier,
                link,
                notified: AtomicBool::new(false),
            }),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.shared.node_id
    }

    /// Start forwarding page requests. The subscription is taken before this
    /// returns, so nothing posted afterwards is missed. Requests queue in
    /// order while the relay is unreachable; the page surface keeps draining.
    pub fn start(&self) -> JoinHandle<()> {
        let sub = self.shared.bus.subscribe();
        let (outbox, queued) = mpsc::unbounded_channel();
        tokio::spawn(Arc::clone(&self.shared).forward_loop(queued));
        tokio::spawn(Arc::clone(&self.shared).page_loop(sub, outbox))
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.shared.link.borrow(), Link::Connected(_))
    }

    pub fn is_invalidated(&self) -> bool {
        matches!(*self.shared.link.borrow(), Link::Invalidated)
    }
}

impl<K: Connector> Shared<K> {
    async fn page_loop(
        self: Arc<Self>,
        mut sub: PageSubscription,
        outbox: mpsc::UnboundedSender<PageRequest>,
    ) {
        while let Some(msg) = sub.recv().await {
            let PageMessage::Request(req) = msg else {
                continue;
            };
            if req.source != PAGE_SOURCE || req.node_id != self.node_id {
                continue;
            }
            if outbox.send(req).is_err() {
                break;
            }
        }
        tracing::debug!(node_id = %self.node_id, "page surface closed");
    }

    async fn forward_loop(self: Arc<Self>, mut queued: mpsc::UnboundedReceiver<PageRequest>) {
        while let Some(req) = queued.recv().await {
            self.forward(req).await;
        }
    }

    async fn forward(self: &Arc<Self>, req: PageRequest) {
        let request_id = req.req.request_id.clone();
        let Some(sender) = self.current_link().await else {
            tracing::debug!(%request_id, "relay invalidated; request dropped");
            return;
        };
        let msg = ChannelMessage::Fetch(FetchEnvelope {
            node_id: req.node_id,
            req: req.req,
        });
        if sender.send(msg).is_err() {
            tracing::warn!(%request_id, "relay connection lost; request dropped");
            self.connection_lost(&sender, Disconnect::Closed);
        }
    }

    /// Wait for a live connection, starting one if none is in flight.
    /// `None` once the relay is invalidated.
    async fn current_link(self: &Arc<Self>) -> Option<ConnectionSender> {
        let mut rx = self.link.subscribe();
        loop {
            let state = rx.borrow_and_update().clone();
            match state {
                Link::Connected(sender) => return Some(sender),
                Link::Invalidated => return None,
                Link::Idle => self.begin_connect(),
                Link::Connecting => {}
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }

    fn begin_connect(self: &Arc<Self>) {
        let started = self.link.send_if_modified(|link| match link {
            Link::Idle => {
                *link = Link::Connecting;
                true
            }
            _ => false,
        });
        if started {
            tokio::spawn(Arc::clone(self).connect_loop(Duration::ZERO));
        }
    }

    async fn connect_loop(self: Arc<Self>, mut delay: Duration) {
        loop {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match self.connector.connect(CHANNEL_NAME).await {
                Ok(Connection {
                    sender, receiver, ..
                }) => {
                    tracing::info!(node_id = %self.node_id, "connected to relay");
                    self.link.send_replace(Link::Connected(sender.clone()));
                    tokio::spawn(Arc::clone(&self).pump(sender, receiver));
                    return;
                }
                Err(e) if e.is_permanent() => {
                    self.invalidate();
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        node_id = %self.node_id,
                        "relay connect failed: {}; retrying in {:?}",
                        e,
                        RECONNECT_DELAY
                    );
                    delay = RECONNECT_DELAY;
                }
            }
        }
    }

    /// Relay → page. Results are re-tagged with this document's `nodeId`.
    async fn pump(self: Arc<Self>, sender: ConnectionSender, mut receiver: ConnectionReceiver) {
        loop {
            match receiver.recv().await {
                Incoming::Message(ChannelMessage::FetchCallback(result)) => {
                    let result = PageResult::from_envelope(&self.node_id, result);
                    self.bus.post(PageMessage::Result(result));
                }
                Incoming::Message(other) => {
                    tracing::debug!(?other, "bridge ignoring channel message");
                }
                Incoming::Disconnected(reason) => {
                    self.connection_lost(&sender, reason);
                    return;
                }
            }
        }
    }

    /// Schedule a reconnect for the connection behind `dead`, unless it was
    /// already replaced or the failure is permanent.
    fn connection_lost(self: &Arc<Self>, dead: &ConnectionSender, reason: Disconnect) {
        if reason.is_permanent() {
            self.invalidate();
            return;
        }
        let lost = self.link.send_if_modified(|link| match link {
            Link::Connected(current) if current.same_channel(dead) => {
                *link = Link::Connecting;
                true
            }
            _ => false,
        });
        if lost {
            tracing::warn!(
                node_id = %self.node_id,
                "relay disconnected ({}); reconnecting in {:?}",
                reason,
                RECONNECT_DELAY
            );
            tokio::spawn(Arc::clone(self).connect_loop(RECONNECT_DELAY));
        }
    }

    fn invalidate(&self) {
        self.link.send_replace(Link::Invalidated);
        tracing::info!(node_id = %self.node_id, "relay context invalidated; not reconnecting");
        if !self.notified.swap(true, Ordering::SeqCst) {
            self.notifier.notify(INVALIDATED_NOTICE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::BUS_CAPACITY;
    use crate::protocol::{RequestEnvelope, ResponsePayload, ResultEnvelope, CONTENT_SOURCE};
    use crate::transport::{ConnectError, LocalAcceptor, LocalHub};
    use std::future::Future;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::sync::Semaphore;

    /// Counts connect attempts. Each attempt parks on `gate` and then fails
    /// while `failures_left` is non-zero.
    struct GateState {
        hub: LocalHub,
        gate: Semaphore,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        failures_left: AtomicUsize,
    }

    #[derive(Clone)]
    struct GatedConnector(Arc<GateState>);

    impl GatedConnector {
        fn new(hub: LocalHub, permits: usize, failures: usize) -> Self {
            Self(Arc::new(GateState {
                hub,
                gate: Semaphore::new(permits),
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                failures_left: AtomicUsize::new(failures),
            }))
        }

        fn calls(&self) -> usize {
            self.0.calls.load(Ordering::SeqCst)
        }

        fn max_in_flight(&self) -> usize {
            self.0.max_in_flight.load(Ordering::SeqCst)
        }
    }

    impl Connector for GatedConnector {
        fn connect(&self, name: &str) -> impl Future<Output = Result<Connection, ConnectError>> + Send {
            let state = Arc::clone(&self.0);
            let name = name.to_string();
            async move {
                state.calls.fetch_add(1, Ordering::SeqCst);
                let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                state.max_in_flight.fetch_max(now, Ordering::SeqCst);
                if let Ok(permit) = state.gate.acquire().await {
                    permit.forget();
                }
                state.in_flight.fetch_sub(1, Ordering::SeqCst);
                let failed = state
                    .failures_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if failed {
                    return Err(ConnectError::Unavailable("relay down".into()));
                }
                state.hub.connect(&name).await
            }
        }
    }

    fn gated_setup(
        permits: usize,
        failures: usize,
    ) -> (Bridge<GatedConnector>, GatedConnector, LocalAcceptor, PageBus) {
        let (hub, acceptor) = LocalHub::new();
        let connector = GatedConnector::new(hub, permits, failures);
        let bus = PageBus::new();
        let bridge = Bridge::attach(
            connector.clone(),
            bus.clone(),
            Arc::new(RecordingNotifier::default()),
        );
        bridge.start();
        (bridge, connector, acceptor, bus)
    }

    #[derive(Default)]
    struct RecordingNotifier {
        notices: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, message: &str) {
            self.notices.lock().unwrap().push(message.to_string());
        }
    }

    fn request(node_id: &str, id: &str) -> PageMessage {
        PageMessage::Request(PageRequest::new(
            node_id,
            RequestEnvelope {
                case_id: None,
                request_id: id.into(),
                url: "https://api.example.com/x".into(),
                method: "GET".into(),
                headers: Default::default(),
                data: Default::default(),
                task_id: None,
                timeout: 30_000,
            },
        ))
    }

    fn ok(id: &str) -> ChannelMessage {
        ChannelMessage::FetchCallback(ResultEnvelope::ok(
            "relay-side",
            id,
            ResponsePayload {
                header: Default::default(),
                status: 200,
                status_text: "OK".into(),
                body: serde_json::Value::Null,
            },
        ))
    }

    async fn next_fetch(conn: &mut Connection) -> FetchEnvelope {
        match conn.receiver.recv().await {
            Incoming::Message(ChannelMessage::Fetch(f)) => f,
            other => panic!("unexpected {other:?}"),
        }
    }

    async fn next_result(sub: &mut PageSubscription) -> PageResult {
        loop {
            if let Some(PageMessage::Result(r)) = sub.recv().await {
                return r;
            }
        }
    }

    fn setup() -> (Bridge<LocalHub>, LocalHub, LocalAcceptor, PageBus, Arc<RecordingNotifier>) {
        let (hub, acceptor) = LocalHub::new();
        let bus = PageBus::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let bridge = Bridge::attach(hub.clone(), bus.clone(), notifier.clone());
        bridge.start();
        (bridge, hub, acceptor, bus, notifier)
    }

    #[tokio::test]
    async fn forwards_own_requests_and_retags_results() {
        let (bridge, _hub, mut acceptor, bus, _) = setup();
        let mut page = bus.subscribe();
        assert!(!bridge.is_connected());

        bus.post(request("someone-else", "foreign"));
        bus.post(PageMessage::Other(serde_json::json!({"noise": true})));
        bus.post(request(bridge.node_id(), "mine"));

        let mut conn = acceptor.accept().await.unwrap();
        assert_eq!(conn.name, CHANNEL_NAME);
        let fetch = next_fetch(&mut conn).await;
        assert_eq!(fetch.req.request_id, "mine");
        assert_eq!(fetch.node_id, bridge.node_id());
        assert!(bridge.is_connected());

        conn.sender.send(ok("mine")).unwrap();
        let result = next_result(&mut page).await;
        assert_eq!(result.source, CONTENT_SOURCE);
        assert_eq!(result.kind, "fetch_callback");
        assert_eq!(result.node_id, bridge.node_id());
        assert_eq!(result.request_id, "mine");
        assert!(result.success);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_the_fixed_delay() {
        let (bridge, _hub, mut acceptor, bus, notifier) = setup();

        bus.post(request(bridge.node_id(), "first"));
        let mut conn = acceptor.accept().await.unwrap();
        next_fetch(&mut conn).await;

        let dropped_at = tokio::time::Instant::now();
        drop(conn);
        let mut conn = acceptor.accept().await.unwrap();
        assert!(dropped_at.elapsed() >= RECONNECT_DELAY);

        bus.post(request(bridge.node_id(), "second"));
        assert_eq!(next_fetch(&mut conn).await.req.request_id, "second");
        assert!(notifier.notices.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalidation_stops_reconnects_and_notifies_once() {
        let (bridge, hub, mut acceptor, bus, notifier) = setup();

        bus.post(request(bridge.node_id(), "first"));
        let mut conn = acceptor.accept().await.unwrap();
        next_fetch(&mut conn).await;

        hub.invalidate();
        while !bridge.is_invalidated() {
            tokio::task::yield_now().await;
        }
        bus.post(request(bridge.node_id(), "after"));
        bus.post(request(bridge.node_id(), "after-2"));
        tokio::task::yield_now().await;

        assert_eq!(notifier.notices.lock().unwrap().as_slice(), [INVALIDATED_NOTICE]);
        assert!(bridge.is_invalidated());
    }

    #[tokio::test]
    async fn invalidated_before_first_connect() {
        let (bridge, hub, _acceptor, bus, notifier) = setup();
        hub.invalidate();
        bus.post(request(bridge.node_id(), "r"));
        while !bridge.is_invalidated() {
            tokio::task::yield_now().await;
        }
        assert_eq!(notifier.notices.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn requests_while_connecting_share_one_attempt() {
        let (bridge, connector, mut acceptor, bus) = gated_setup(0, 0);
        let ids = ["a", "b", "c", "d", "e"];
        for id in ids {
            bus.post(request(bridge.node_id(), id));
            tokio::task::yield_now().await;
        }
        while connector.calls() == 0 {
            tokio::task::yield_now().await;
        }
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(connector.calls(), 1);
        assert!(!bridge.is_connected());

        connector.0.gate.add_permits(1);
        let mut conn = acceptor.accept().await.unwrap();
        for id in ids {
            assert_eq!(next_fetch(&mut conn).await.req.request_id, id);
        }
        assert_eq!(connector.calls(), 1);
        assert_eq!(connector.max_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempts_retry_one_at_a_time() {
        let (bridge, connector, mut acceptor, bus) = gated_setup(Semaphore::MAX_PERMITS, 2);
        let start = tokio::time::Instant::now();
        bus.post(request(bridge.node_id(), "first"));
        tokio::time::sleep(RECONNECT_DELAY / 2).await;
        bus.post(request(bridge.node_id(), "second"));

        let mut conn = acceptor.accept().await.unwrap();
        assert!(start.elapsed() >= RECONNECT_DELAY * 2);
        assert_eq!(next_fetch(&mut conn).await.req.request_id, "first");
        assert_eq!(next_fetch(&mut conn).await.req.request_id, "second");
        assert_eq!(connector.calls(), 3);
        assert_eq!(connector.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn page_keeps_draining_while_relay_is_unreachable() {
        let (bridge, connector, mut acceptor, bus) = gated_setup(0, 0);
        let total = BUS_CAPACITY + 44;
        for i in 0..total {
            bus.post(request(bridge.node_id(), &format!("r-{i}")));
            tokio::task::yield_now().await;
        }
        connector.0.gate.add_permits(1);

        let mut conn = acceptor.accept().await.unwrap();
        for i in 0..total {
            assert_eq!(next_fetch(&mut conn).await.req.request_id, format!("r-{i}"));
        }
        assert_eq!(connector.calls(), 1);
    }
}
