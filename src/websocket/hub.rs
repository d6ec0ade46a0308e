//! WebSocket Connection Hub
//!
//! Owns the active set of live connections and fans routable messages out
//! to their outbound queues. The set is guarded by a single `RwLock`:
//! dispatch iterates under the read lock and only enqueues (never writes to
//! a socket); register, unregister and eviction take the write lock.

use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, oneshot, RwLock};
use uuid::Uuid;

use crate::routing::{Address, ClientId, GroupId, RoutableMessage};

/// Unique identifier for one live connection (one per socket)
pub type ConnectionId = Uuid;

/// Configuration for the connection hub
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each connection's outbound queue
    pub queue_capacity: usize,
    /// Interval between keepalive pings, `None` disables them
    pub keepalive_interval: Option<std::time::Duration>,
    /// How long a connection whose reader ended may keep flushing its queue
    pub close_grace: std::time::Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            keepalive_interval: Some(std::time::Duration::from_secs(30)),
            close_grace: std::time::Duration::from_secs(5),
        }
    }
}

/// Result of a non-blocking enqueue attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Queued,
    /// Queue at capacity; the connection is unresponsive
    Full,
    /// Receiver already gone; the payload is dropped
    Closed,
}

impl Enqueue {
    /// Why a failed enqueue removes the connection
    pub fn eviction_reason(self) -> Option<&'static str> {
        match self {
            Enqueue::Queued => None,
            Enqueue::Full => Some("outbound queue full"),
            Enqueue::Closed => Some("outbound queue closed"),
        }
    }
}

/// Hub-side handle for a registered connection.
///
/// Holds the only sender of the connection's outbound queue, so removing the
/// handle from the active set closes the queue. Dropping the handle also
/// drops its close signal, which wakes a connection whose writer is stuck on
/// a client that stopped reading.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    client_id: ClientId,
    groups: HashSet<GroupId>,
    sender: mpsc::Sender<Bytes>,
    _closed: Option<oneshot::Sender<()>>,
}

impl ConnectionHandle {
    pub fn new(
        id: ConnectionId,
        client_id: ClientId,
        groups: HashSet<GroupId>,
        sender: mpsc::Sender<Bytes>,
    ) -> Self {
        Self {
            id,
            client_id,
            groups,
            sender,
            _closed: None,
        }
    }

    /// Attach a signal that resolves once the handle leaves the hub
    pub fn with_close_signal(mut self, closed: oneshot::Sender<()>) -> Self {
        self._closed = Some(closed);
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn groups(&self) -> &HashSet<GroupId> {
        &self.groups
    }

    /// Whether this connection is selected by the address
    pub fn matches(&self, address: &Address) -> bool {
        match address {
            Address::Unicast(client) => self.client_id == *client,
            Address::Multicast(group) => self.groups.contains(group),
            Address::Broadcast => true,
        }
    }

    /// Push a payload without waiting
    pub fn enqueue(&self, payload: Bytes) -> Enqueue {
        match self.sender.try_send(payload) {
            Ok(()) => Enqueue::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Enqueue::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Enqueue::Closed,
        }
    }
}

/// Outcome of one dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Connections selected by the address
    pub matched: usize,
    /// Connections whose queue accepted the payload
    pub delivered: usize,
    /// Connections removed because their queue was full or closed
    pub evicted: usize,
}

/// Registry of live connections
pub struct Hub {
    /// Active connections: ConnectionId → ConnectionHandle
    connections: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
    config: HubConfig,
}

impl Hub {
    /// Create a new connection hub
    pub fn new(config: HubConfig) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Add a connection to the active set.
    ///
    /// Registering an id that is already live replaces the previous handle
    /// (closing its queue) rather than counting it twice.
    pub async fn register(&self, handle: ConnectionHandle) {
        let id = handle.id;
        let client_id = handle.client_id;
        let groups = handle.groups.len();

        let replaced = self.connections.write().await.insert(id, handle);
        if replaced.is_some() {
            tracing::warn!(connection_id = %id, "Connection re-registered, previous queue closed");
        }

        tracing::info!(
            connection_id = %id,
            client_id = %client_id,
            groups,
            "WebSocket connected"
        );
    }

    /// Remove a connection and close its outbound queue.
    ///
    /// Returns `false` when the connection was not registered; repeated calls
    /// are no-ops.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.connections.write().await.remove(&id);

        match removed {
            Some(handle) => {
                tracing::info!(
                    connection_id = %id,
                    client_id = %handle.client_id,
                    "WebSocket disconnected"
                );
                true
            }
            None => false,
        }
    }

    /// Deliver a message to every matching connection.
    ///
    /// A connection whose queue is full is evicted and does not receive the
    /// message; other connections are unaffected.
    pub async fn dispatch(&self, message: &RoutableMessage) -> DispatchSummary {
        let address = message.address();
        let mut summary = DispatchSummary::default();
        let mut unresponsive = Vec::new();

        {
            let connections = self.connections.read().await;
            for handle in connections.values().filter(|h| h.matches(&address)) {
                summary.matched += 1;
                match handle.enqueue(message.payload().clone()) {
                    Enqueue::Queued => summary.delivered += 1,
                    failed => unresponsive.push((handle.id, failed)),
                }
            }
        }

        if !unresponsive.is_empty() {
            let mut connections = self.connections.write().await;
            for (id, outcome) in unresponsive {
                if let Some(handle) = connections.remove(&id) {
                    summary.evicted += 1;
                    tracing::warn!(
                        connection_id = %id,
                        client_id = %handle.client_id,
                        reason = outcome.eviction_reason().unwrap_or("unknown"),
                        "Evicting connection"
                    );
                }
            }
        }

        tracing::trace!(
            mode = address.mode(),
            matched = summary.matched,
            delivered = summary.delivered,
            evicted = summary.evicted,
            "Dispatched message"
        );

        summary
    }

    /// Current size of the active set
    pub async fn active_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Number of live connections opened by one client
    pub async fn client_connection_count(&self, client: ClientId) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|h| h.client_id == client)
            .count()
    }

    /// Whether a connection is currently registered
    pub async fn is_active(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(
        client: ClientId,
        groups: &[GroupId],
        capacity: usize,
    ) -> (ConnectionHandle, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = ConnectionHandle::new(
            Uuid::new_v4(),
            client,
            groups.iter().copied().collect(),
            tx,
        );
        (handle, rx)
    }

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();
        assert_eq!(config.queue_capacity, 256);
        assert!(config.keepalive_interval.is_some());
    }

    #[test]
    fn test_eviction_reason() {
        assert_eq!(Enqueue::Queued.eviction_reason(), None);
        assert_eq!(Enqueue::Full.eviction_reason(), Some("outbound queue full"));
        assert_eq!(Enqueue::Closed.eviction_reason(), Some("outbound queue closed"));
    }

    #[tokio::test]
    async fn test_enqueue_distinguishes_full_from_closed() {
        let (full, _full_rx) = handle(Uuid::new_v4(), &[], 1);
        assert_eq!(full.enqueue(Bytes::from_static(b"a")), Enqueue::Queued);
        assert_eq!(full.enqueue(Bytes::from_static(b"b")), Enqueue::Full);

        let (closed, closed_rx) = handle(Uuid::new_v4(), &[], 1);
        drop(closed_rx);
        assert_eq!(closed.enqueue(Bytes::from_static(b"a")), Enqueue::Closed);
    }

    #[tokio::test]
    async fn test_close_signal_fires_on_eviction_and_unregister() {
        let hub = Hub::default();

        let (slow, _slow_rx) = handle(Uuid::new_v4(), &[], 1);
        let (slow_tx, mut slow_closed) = oneshot::channel();
        hub.register(slow.with_close_signal(slow_tx)).await;

        let (left, _left_rx) = handle(Uuid::new_v4(), &[], 4);
        let left_id = left.id();
        let (left_tx, mut left_closed) = oneshot::channel();
        hub.register(left.with_close_signal(left_tx)).await;

        hub.dispatch(&RoutableMessage::broadcast("one")).await;
        assert!(left_closed.try_recv().is_err());
        let summary = hub.dispatch(&RoutableMessage::broadcast("two")).await;
        assert_eq!(summary.evicted, 1);
        assert!(matches!(
            slow_closed.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));

        // Still registered, signal pending
        assert!(matches!(
            left_closed.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ));
        hub.unregister(left_id).await;
        assert!(matches!(
            left_closed.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let hub = Hub::default();
        let (h1, _rx1) = handle(Uuid::new_v4(), &[], 4);
        let (h2, _rx2) = handle(Uuid::new_v4(), &[], 4);
        let (id1, id2) = (h1.id(), h2.id());

        hub.register(h1).await;
        hub.register(h2).await;
        assert_eq!(hub.active_count().await, 2);

        assert!(hub.unregister(id1).await);
        assert_eq!(hub.active_count().await, 1);
        assert!(!hub.is_active(id1).await);
        assert!(hub.is_active(id2).await);

        assert!(hub.unregister(id2).await);
        assert_eq!(hub.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_unregister_twice_is_noop() {
        let hub = Hub::default();
        let (h, mut rx) = handle(Uuid::new_v4(), &[], 4);
        let (other, _other_rx) = handle(Uuid::new_v4(), &[], 4);
        let id = h.id();

        hub.register(h).await;
        hub.register(other).await;

        assert!(hub.unregister(id).await);
        assert!(!hub.unregister(id).await);
        assert_eq!(hub.active_count().await, 1);

        // Queue closed exactly once
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_register_not_double_counted() {
        let hub = Hub::default();
        let client = Uuid::new_v4();
        let id = Uuid::new_v4();

        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, _rx2) = mpsc::channel(4);
        hub.register(ConnectionHandle::new(id, client, HashSet::new(), tx1))
            .await;
        hub.register(ConnectionHandle::new(id, client, HashSet::new(), tx2))
            .await;

        assert_eq!(hub.active_count().await, 1);
        // The replaced handle's queue is closed
        assert!(rx1.recv().await.is_none());

        hub.unregister(id).await;
        assert_eq!(hub.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_delivers_exact_bytes_in_order() {
        let hub = Hub::default();
        let mut receivers = Vec::new();
        for _ in 0..5 {
            let (h, rx) = handle(Uuid::new_v4(), &[], 8);
            hub.register(h).await;
            receivers.push(rx);
        }

        let payloads: Vec<Vec<u8>> = vec![b"first".to_vec(), vec![0, 255, 7], b"third".to_vec()];
        for payload in &payloads {
            let summary = hub
                .dispatch(&RoutableMessage::broadcast(payload.clone()))
                .await;
            assert_eq!(summary.matched, 5);
            assert_eq!(summary.delivered, 5);
            assert_eq!(summary.evicted, 0);
        }

        for rx in receivers.iter_mut() {
            for payload in &payloads {
                let got = rx.try_recv().unwrap();
                assert_eq!(got.as_ref(), payload.as_slice());
            }
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_full_queue_evicts_only_slow_connection() {
        let hub = Hub::default();
        let slow_client = Uuid::new_v4();
        let (slow, mut slow_rx) = handle(slow_client, &[], 1);
        let (fast, mut fast_rx) = handle(Uuid::new_v4(), &[], 8);
        let slow_id = slow.id();

        hub.register(slow).await;
        hub.register(fast).await;

        // Fill the slow connection's queue to capacity
        hub.dispatch(&RoutableMessage::unicast(slow_client, "filler"))
            .await;

        let summary = hub.dispatch(&RoutableMessage::broadcast("overflow")).await;
        assert_eq!(summary.matched, 2);
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.evicted, 1);

        assert!(!hub.is_active(slow_id).await);
        assert_eq!(hub.active_count().await, 1);

        // Slow connection gets what was queued before, then the queue closes
        assert_eq!(slow_rx.recv().await.unwrap().as_ref(), b"filler");
        assert!(slow_rx.recv().await.is_none());

        assert_eq!(fast_rx.recv().await.unwrap().as_ref(), b"overflow");
    }

    #[tokio::test]
    async fn test_unicast_without_match_is_noop() {
        let hub = Hub::default();
        let (h, mut rx) = handle(Uuid::new_v4(), &[], 4);
        hub.register(h).await;

        let summary = hub
            .dispatch(&RoutableMessage::unicast(Uuid::new_v4(), "nobody"))
            .await;

        assert_eq!(summary, DispatchSummary::default());
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_unicast_reaches_every_device() {
        let hub = Hub::default();
        let client = Uuid::new_v4();
        let (phone, mut phone_rx) = handle(client, &[], 4);
        let (laptop, mut laptop_rx) = handle(client, &[], 4);
        let (stranger, mut stranger_rx) = handle(Uuid::new_v4(), &[], 4);

        hub.register(phone).await;
        hub.register(laptop).await;
        hub.register(stranger).await;
        assert_eq!(hub.client_connection_count(client).await, 2);

        let summary = hub.dispatch(&RoutableMessage::unicast(client, "dm")).await;
        assert_eq!(summary.delivered, 2);

        assert_eq!(phone_rx.try_recv().unwrap().as_ref(), b"dm");
        assert_eq!(laptop_rx.try_recv().unwrap().as_ref(), b"dm");
        assert!(stranger_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_multicast_matches_group_membership() {
        let hub = Hub::default();
        let group = Uuid::new_v4();
        let other_group = Uuid::new_v4();

        let (member, mut member_rx) = handle(Uuid::new_v4(), &[group, other_group], 4);
        let (outsider, mut outsider_rx) = handle(Uuid::new_v4(), &[other_group], 4);
        let (loner, mut loner_rx) = handle(Uuid::new_v4(), &[], 4);

        hub.register(member).await;
        hub.register(outsider).await;
        hub.register(loner).await;

        let summary = hub
            .dispatch(&RoutableMessage::multicast(group, "post"))
            .await;
        assert_eq!(summary.matched, 1);

        assert_eq!(member_rx.try_recv().unwrap().as_ref(), b"post");
        assert!(outsider_rx.try_recv().is_err());
        assert!(loner_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_receiver_is_evicted_without_panic() {
        let hub = Hub::default();
        let (h, rx) = handle(Uuid::new_v4(), &[], 4);
        let id = h.id();
        hub.register(h).await;
        drop(rx);

        let summary = hub.dispatch(&RoutableMessage::broadcast("late")).await;
        assert_eq!(summary.delivered, 0);
        assert_eq!(summary.evicted, 1);
        assert!(!hub.is_active(id).await);
    }
}
