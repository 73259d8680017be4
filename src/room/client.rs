/// Per-connection client handle.
///
/// Each connected user owns one `Client`: a shared identity cell plus a
/// bounded outbound message queue. The hub is the only writer of the
/// identity and the only producer on the queue once the client is
/// registered; the session task is the sole consumer, forwarding queued
/// messages to the terminal one at a time.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;

use super::message::Message;

/// Outbound queue depth. A client that falls this far behind is dead
/// weight and gets evicted rather than stalling the hub.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Stable identity of a connection, independent of display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

/// Shared handle to a client. The hub and the session task each hold one.
pub type ClientRef = Arc<Client>;

#[derive(Debug)]
struct Identity {
    name: String,
    authed: bool,
}

#[derive(Debug)]
pub struct Client {
    id: ClientId,
    identity: RwLock<Identity>,
    /// `None` once the hub has closed the queue (eviction or unregister).
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
}

/// Why an enqueue was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    #[error("outbound queue is full")]
    Full,
    #[error("outbound queue is closed")]
    Closed,
}

impl Client {
    /// Create a client with a proposed display name.
    ///
    /// Returns the shared handle and the receiving end of the outbound
    /// queue; the session task drains the receiver.
    pub fn new(name: impl Into<String>) -> (ClientRef, mpsc::Receiver<Message>) {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let client = Arc::new(Self {
            id: ClientId(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
            identity: RwLock::new(Identity {
                name: name.into(),
                authed: false,
            }),
            outbound: Mutex::new(Some(tx)),
        });
        (client, rx)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Current display name. Hub-written; safe to read from any task.
    pub fn name(&self) -> String {
        self.identity.read().unwrap().name.clone()
    }

    /// True while the client holds a GitHub-verified name.
    pub fn is_authed(&self) -> bool {
        self.identity.read().unwrap().authed
    }

    /// Hub-only: rewrite the display name.
    pub(crate) fn set_name(&self, name: impl Into<String>) {
        self.identity.write().unwrap().name = name.into();
    }

    /// Hub-only: flip the verified flag.
    pub(crate) fn set_authed(&self, authed: bool) {
        self.identity.write().unwrap().authed = authed;
    }

    /// Non-blocking enqueue onto the outbound queue.
    ///
    /// `Full` means the consumer has stopped draining — the caller (the
    /// hub) treats that as a dead client. The session itself may also
    /// enqueue self-directed notices before registration.
    pub fn try_enqueue(&self, msg: Message) -> Result<(), EnqueueError> {
        let guard = self.outbound.lock().unwrap();
        match guard.as_ref() {
            Some(tx) => tx.try_send(msg).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
                mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
            }),
            None => Err(EnqueueError::Closed),
        }
    }

    /// Hub-only: close the outbound queue. The session's forwarder sees
    /// end-of-stream on its next `recv` and winds the connection down.
    pub(crate) fn close_outbound(&self) {
        self.outbound.lock().unwrap().take();
    }
}
