//! Server-to-server federation.
//!
//! One [`link::PeerLink`] per configured peer carries newline-delimited
//! JSON [`wire::Frame`]s both ways: a 5-second full nick sync, eager
//! name-change announcements, and relayed private messages. Peers are
//! trusted-but-flaky; there are no acks, and frame loss is repaired by
//! the next nick sync.

pub mod codec;
pub mod link;
pub mod wire;

pub use codec::{CodecError, FrameCodec};
pub use wire::Frame;

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::warn;

use crate::room::hub::HubHandle;
use link::PeerLink;

/// An established peer connection, post-hello, speaking frames.
pub type PeerConn = Framed<TcpStream, FrameCodec>;

/// The set of all peer links plus the name-change fan-out.
pub struct Federation {
    links: Vec<Arc<PeerLink>>,
}

impl Federation {
    /// Create one link per configured peer and spawn its connection task.
    ///
    /// Each task dials out immediately and keeps redialing with backoff;
    /// inbound connections from the same peer rebind the link in place.
    pub fn start(hub: HubHandle, peer_addrs: &[String]) -> Arc<Self> {
        let links = peer_addrs
            .iter()
            .map(|addr| PeerLink::spawn(addr.clone(), hub.clone()))
            .collect();
        Arc::new(Self { links })
    }

    /// Configured peer addresses, in config order.
    pub fn peer_addrs(&self) -> Vec<String> {
        self.links.iter().map(|l| l.addr().to_string()).collect()
    }

    /// Announce a completed rename to every peer. Never blocks: frames
    /// are queued on each link and dropped with a warning if a link's
    /// buffer is full.
    pub fn broadcast_name_change(&self, old_name: &str, new_name: &str, is_github_auth: bool) {
        for link in &self.links {
            link.send(Frame::NameChange {
                old_name: old_name.to_string(),
                new_name: new_name.to_string(),
                is_github_auth,
            });
        }
    }

    /// Relay a private message to the peer believed to host `to`.
    ///
    /// Returns false when no link is configured for `peer_addr`.
    pub fn send_private_message(&self, peer_addr: &str, from: &str, to: &str, text: &str) -> bool {
        match self.links.iter().find(|l| l.addr() == peer_addr) {
            Some(link) => {
                link.send(Frame::PrivateMessage {
                    from: from.to_string(),
                    to: to.to_string(),
                    text: text.to_string(),
                });
                true
            }
            None => false,
        }
    }

    /// Hand an accepted inbound peer connection to its link.
    ///
    /// Peers are matched by host only; the port a peer dials out from is
    /// ephemeral. Returns false for unknown origins — the caller drops
    /// the connection.
    pub fn attach_inbound(&self, remote_host: &str, conn: PeerConn) -> bool {
        match self.links.iter().find(|l| l.host() == remote_host) {
            Some(link) => {
                link.attach(conn);
                true
            }
            None => {
                warn!(%remote_host, "ignoring connection from unknown server");
                false
            }
        }
    }
}
