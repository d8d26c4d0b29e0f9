//! Typed event mailbox.
//!
//! Every external occurrence (pub/sub traffic, request completions,
//! timer ticks, local user actions) is delivered as one `SyncEvent` into
//! an mpsc channel consumed by a single dispatch loop. No two handlers
//! ever run concurrently, so session state needs no locking.

use std::time::Duration;

use tokio::sync::mpsc;

/// Default mailbox capacity.
pub const MAILBOX_CAPACITY: usize = 256;

/// Heartbeat period driving keepalive and reconnection.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(30);

/// Which pub/sub link an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkId {
    /// Link to the master-side broker (event feed).
    MasterFeed,
    /// Link to the slave-side broker (bridge namespace).
    SlaveBridge,
}

/// Which one-shot request a completion belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Bootstrap device list (identity resolver input).
    DeviceList,
    /// Bootstrap device-table snapshot (registry population).
    DeviceTable,
    /// One reverse-update dispatch.
    ReverseUpdate,
}

/// Event from a pub/sub link.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// TCP-level connection established.
    Connected,
    /// CONNECT handshake acknowledged by the broker.
    HandshakeAck,
    /// Subscription acknowledged.
    SubscribeAck(Vec<String>),
    /// Inbound publish.
    Message { topic: String, payload: Vec<u8> },
    /// Keepalive ping answered.
    PingResponse,
    /// Connection lost or closed.
    Disconnected,
}

/// Completion of a request/response exchange.
#[derive(Debug, Clone)]
pub enum HttpEvent {
    Response { status: u16, body: Vec<u8> },
    /// The exchange failed before any response arrived.
    Failed(String),
}

/// A user action on a slave-side shadow device.
#[derive(Debug, Clone)]
pub struct LocalAction {
    /// Local unit of the shadow device the action targeted.
    pub unit: u32,
    pub command: String,
    pub level: i32,
    pub color: String,
}

/// One mailbox event.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Link(LinkId, LinkEvent),
    Http(RequestKind, HttpEvent),
    /// Periodic keepalive tick.
    Heartbeat,
    Local(LocalAction),
    /// Stop the dispatch loop.
    Shutdown,
}

/// Sender half of the mailbox, cloned into transports and timers.
pub type Mailbox = mpsc::Sender<SyncEvent>;

/// Create the session mailbox.
pub fn mailbox() -> (Mailbox, mpsc::Receiver<SyncEvent>) {
    mpsc::channel(MAILBOX_CAPACITY)
}

/// Spawn the heartbeat timer task feeding `Heartbeat` ticks into the
/// mailbox at a fixed period, independent of message traffic.
pub fn spawn_heartbeat(tx: Mailbox, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The immediate first tick would race bootstrap; skip it.
        interval.tick().await;
        loop {
            interval.tick().await;
            if tx.send(SyncEvent::Heartbeat).await.is_err() {
                break;
            }
        }
    })
}
