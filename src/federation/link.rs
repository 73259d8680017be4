//! A single peer link — dial, rebind, read, and periodically sync.
//!
//! Each configured peer gets one long-lived task owning both directions
//! of the link. The task dials out with capped exponential backoff, and
//! at any moment an inbound connection from the same host may arrive and
//! rebind the link. All writes (hub name-change emissions, the sync
//! timer) funnel through one channel, so frames never interleave.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::SinkExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;
use tracing::{info, warn};

use super::codec::FrameCodec;
use super::wire::Frame;
use super::PeerConn;
use crate::room::hub::HubHandle;
use crate::room::message::Message;

/// How often the full local nick list is pushed to the peer. This is
/// both initial synchronization and loss repair; there is no diff
/// protocol.
pub const NICK_SYNC_INTERVAL: Duration = Duration::from_secs(5);

/// Outbound frame buffer per link. The hub never blocks on a link;
/// frames beyond this budget are dropped and repaired by the next sync.
const OUTBOUND_BUFFER: usize = 256;

/// A connection that lives at least this long resets the redial backoff.
const STABLE_CONNECTION: Duration = Duration::from_secs(60);

/// Handle to one peer's connection task.
pub struct PeerLink {
    addr: String,
    host: String,
    outbound_tx: mpsc::Sender<Frame>,
    attach_tx: mpsc::Sender<PeerConn>,
}

impl PeerLink {
    pub(super) fn spawn(addr: String, hub: HubHandle) -> Arc<Self> {
        let host = match addr.rsplit_once(':') {
            Some((host, _port)) => host.to_string(),
            None => addr.clone(),
        };
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (attach_tx, attach_rx) = mpsc::channel(1);
        tokio::spawn(link_task(addr.clone(), hub, outbound_rx, attach_rx));
        Arc::new(Self {
            addr,
            host,
            outbound_tx,
            attach_tx,
        })
    }

    /// Configured `host:port` of the peer. Doubles as the peer's key in
    /// the hub's remote-nick index.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Host part only, for matching inbound connections.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Queue a frame for the peer. Never blocks.
    pub(super) fn send(&self, frame: Frame) {
        if self.outbound_tx.try_send(frame).is_err() {
            warn!(peer = %self.addr, "link buffer full, dropping outbound frame");
        }
    }

    /// Rebind the link to an inbound connection from this peer.
    pub(super) fn attach(&self, conn: PeerConn) {
        if self.attach_tx.try_send(conn).is_err() {
            warn!(peer = %self.addr, "attach slot busy, dropping inbound peer connection");
        }
    }
}

/// What ended a connection.
enum ConnOutcome {
    /// Transport error, decode error, or EOF — redial after backoff.
    Lost,
    /// The peer dialed in while we were connected; rebind to the new
    /// connection immediately.
    Replaced(PeerConn),
    /// The federation was torn down.
    Shutdown,
}

/// What ended a backoff wait.
enum BackoffOutcome {
    Elapsed,
    Attached(PeerConn),
    Shutdown,
}

/// The per-peer connection task: acquire a connection (outbound dial or
/// inbound attach), run it until it dies, back off, repeat.
async fn link_task(
    addr: String,
    hub: HubHandle,
    mut outbound_rx: mpsc::Receiver<Frame>,
    mut attach_rx: mpsc::Receiver<PeerConn>,
) {
    let mut failures: u32 = 0;
    let mut pending: Option<PeerConn> = None;

    loop {
        let conn = match pending.take() {
            Some(conn) => conn,
            None => {
                tokio::select! {
                    maybe = attach_rx.recv() => match maybe {
                        Some(conn) => {
                            info!(peer = %addr, "peer connected inbound");
                            conn
                        }
                        None => return,
                    },
                    dialed = dial(&addr) => match dialed {
                        Ok(conn) => {
                            info!(peer = %addr, "connected to peer");
                            conn
                        }
                        Err(e) => {
                            failures += 1;
                            if failures <= 3 {
                                warn!(peer = %addr, attempt = failures, "failed to dial peer, will retry: {e}");
                            } else if failures % 30 == 0 {
                                warn!(peer = %addr, attempt = failures, "still failing to dial peer: {e}");
                            }
                            match backoff(&mut attach_rx, failures).await {
                                BackoffOutcome::Elapsed => continue,
                                BackoffOutcome::Attached(conn) => {
                                    info!(peer = %addr, "peer connected inbound");
                                    conn
                                }
                                BackoffOutcome::Shutdown => return,
                            }
                        }
                    },
                }
            }
        };

        let connected_at = Instant::now();
        let outcome = run_connection(conn, &addr, &hub, &mut outbound_rx, &mut attach_rx).await;
        if connected_at.elapsed() >= STABLE_CONNECTION {
            failures = 0;
        } else {
            failures += 1;
        }

        match outcome {
            ConnOutcome::Replaced(conn) => {
                info!(peer = %addr, "peer reconnected inbound, rebinding link");
                failures = 0;
                pending = Some(conn);
            }
            ConnOutcome::Lost => {
                info!(peer = %addr, lived_secs = connected_at.elapsed().as_secs(), "peer link lost");
                match backoff(&mut attach_rx, failures).await {
                    BackoffOutcome::Elapsed => {}
                    BackoffOutcome::Attached(conn) => {
                        info!(peer = %addr, "peer connected inbound");
                        pending = Some(conn);
                    }
                    BackoffOutcome::Shutdown => return,
                }
            }
            ConnOutcome::Shutdown => return,
        }
    }
}

/// Dial the peer and identify as a federation session.
async fn dial(addr: &str) -> io::Result<PeerConn> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(b"estuary federation\n").await?;
    Ok(Framed::new(stream, FrameCodec))
}

/// Wait out the redial backoff while staying receptive to an inbound
/// connection from the peer.
async fn backoff(attach_rx: &mut mpsc::Receiver<PeerConn>, failures: u32) -> BackoffOutcome {
    let secs = 2u64.saturating_pow(failures.min(6)).min(60);
    let wait = tokio::time::sleep(Duration::from_secs(secs));
    tokio::pin!(wait);
    tokio::select! {
        _ = &mut wait => BackoffOutcome::Elapsed,
        maybe = attach_rx.recv() => match maybe {
            Some(conn) => BackoffOutcome::Attached(conn),
            None => BackoffOutcome::Shutdown,
        },
    }
}

/// Drive one established connection until it ends.
///
/// The select arms are the link's whole life: inbound frames to the hub,
/// queued outbound frames to the wire, the periodic nick sync (first
/// tick immediate, so a fresh connection synchronizes at once), and a
/// possible inbound rebind.
async fn run_connection(
    mut conn: PeerConn,
    addr: &str,
    hub: &HubHandle,
    outbound_rx: &mut mpsc::Receiver<Frame>,
    attach_rx: &mut mpsc::Receiver<PeerConn>,
) -> ConnOutcome {
    let mut sync = tokio::time::interval(NICK_SYNC_INTERVAL);
    sync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = conn.next() => match frame {
                Some(Ok(frame)) => dispatch(frame, addr, hub).await,
                Some(Err(e)) => {
                    warn!(peer = %addr, "peer link decode error: {e}");
                    return ConnOutcome::Lost;
                }
                None => {
                    info!(peer = %addr, "peer closed connection");
                    return ConnOutcome::Lost;
                }
            },

            maybe = outbound_rx.recv() => match maybe {
                Some(frame) => {
                    if let Err(e) = conn.send(frame).await {
                        warn!(peer = %addr, "peer link write error: {e}");
                        return ConnOutcome::Lost;
                    }
                }
                None => return ConnOutcome::Shutdown,
            },

            _ = sync.tick() => {
                let nicks = hub.local_user_list().await;
                if let Err(e) = conn.send(Frame::NickSync { nicks }).await {
                    warn!(peer = %addr, "peer link write error: {e}");
                    return ConnOutcome::Lost;
                }
            },

            maybe = attach_rx.recv() => match maybe {
                Some(conn) => return ConnOutcome::Replaced(conn),
                None => return ConnOutcome::Shutdown,
            },
        }
    }
}

/// Forward an inbound frame to the hub.
async fn dispatch(frame: Frame, addr: &str, hub: &HubHandle) {
    match frame {
        Frame::NickSync { nicks } => hub.sync_nicks(addr.to_string(), nicks).await,
        Frame::PrivateMessage { from, to, text } => {
            hub.private_message(to, Message::private(from, text), None).await;
        }
        Frame::NameChange {
            old_name,
            new_name,
            is_github_auth,
        } => {
            hub.remote_name_change(old_name, new_name, is_github_auth, addr.to_string())
                .await;
        }
    }
}
