//! Integration tests for the federation layer, over real TCP.
//!
//! A test either stands in for a peer server (speaking raw JSON frames
//! after the `estuary federation` hello) or runs two full servers on
//! loopback and watches their name indexes converge.

use std::net::SocketAddr;
use std::time::Duration;

use futures::SinkExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_stream::StreamExt;
use tokio_util::codec::{Framed, LinesCodec};

use estuary::config::Config;
use estuary::federation::{Frame, FrameCodec};
use estuary::server::Server;

/// A discard-port peer address: inbound matching only needs the host,
/// and nothing ever answers the server's outbound dials.
const UNDIALABLE_PEER: &str = "127.0.0.1:9";

async fn start_server(peers: Vec<String>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut config = Config::default();
    config.auth.client_id = "test-client".into();
    config.federation.peers = peers;
    let server = Server::with_listener(listener, config);
    tokio::spawn(server.run());
    addr
}

/// A chat user driven over the line protocol.
struct TestUser {
    framed: Framed<TcpStream, LinesCodec>,
    name: String,
}

impl TestUser {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, LinesCodec::new());
        framed.send("estuary user".to_string()).await.unwrap();

        // First line is the welcome notice carrying our assigned name:
        //   [12:34] Welcome, Anonymous1234! Use /n <newname> ...
        let mut user = Self {
            framed,
            name: String::new(),
        };
        let welcome = user.recv_containing("Welcome, ").await;
        let start = welcome.find("Welcome, ").unwrap() + "Welcome, ".len();
        let end = welcome[start..].find('!').unwrap() + start;
        user.name = welcome[start..end].to_string();
        user
    }

    async fn send(&mut self, line: &str) {
        self.framed.send(line.to_string()).await.unwrap();
    }

    async fn recv_line(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(10), self.framed.next())
            .await
            .expect("timed out waiting for a line")
            .expect("connection closed")
            .expect("line decode failed")
    }

    /// Read lines until one contains `needle`.
    async fn recv_containing(&mut self, needle: &str) -> String {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            assert!(
                tokio::time::Instant::now() < deadline,
                "never saw a line containing {needle:?}"
            );
            let line = self.recv_line().await;
            if line.contains(needle) {
                return line;
            }
        }
    }

    /// Claim a deterministic name and wait for the rename broadcast.
    async fn rename(&mut self, name: &str) {
        self.send(&format!("/n {name}")).await;
        self.recv_containing(&format!("is now known as {name}."))
            .await;
        self.name = name.to_string();
    }

    /// Poll `/u` until the list contains `name`.
    async fn wait_for_user(&mut self, name: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
        loop {
            assert!(
                tokio::time::Instant::now() < deadline,
                "user {name:?} never appeared in /u"
            );
            self.send("/u").await;
            let listing = self.recv_containing("Users online").await;
            if listing.contains(name) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }
}

/// A fake peer server: hello, then raw frames both ways.
struct TestPeer {
    framed: Framed<TcpStream, FrameCodec>,
}

impl TestPeer {
    async fn connect(addr: SocketAddr) -> Self {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"estuary federation\n").await.unwrap();
        Self {
            framed: Framed::new(stream, FrameCodec),
        }
    }

    async fn send(&mut self, frame: Frame) {
        self.framed.send(frame).await.unwrap();
    }

    async fn recv_frame(&mut self) -> Frame {
        tokio::time::timeout(Duration::from_secs(10), self.framed.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("peer connection closed")
            .expect("frame decode failed")
    }

    /// Read frames until one matches, skipping nick syncs and any
    /// earlier buffered announcements.
    async fn recv_where(&mut self, pred: impl Fn(&Frame) -> bool, what: &str) -> Frame {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            assert!(
                tokio::time::Instant::now() < deadline,
                "never received {what}"
            );
            let frame = self.recv_frame().await;
            if pred(&frame) {
                return frame;
            }
        }
    }
}

// ── Single server + fake peer ────────────────────────────────────

#[tokio::test]
async fn synced_remote_nicks_show_up_in_the_user_list() {
    let addr = start_server(vec![UNDIALABLE_PEER.into()]).await;
    let mut peer = TestPeer::connect(addr).await;
    peer.send(Frame::NickSync {
        nicks: vec!["remoterick".into()],
    })
    .await;

    let mut user = TestUser::connect(addr).await;
    user.wait_for_user("remoterick").await;
}

#[tokio::test]
async fn server_pushes_its_user_list_to_the_peer() {
    let addr = start_server(vec![UNDIALABLE_PEER.into()]).await;
    let mut user = TestUser::connect(addr).await;
    user.rename("alice").await;

    let mut peer = TestPeer::connect(addr).await;
    // The first sync arrives immediately on connect; give renames a
    // couple of ticks to be reflected.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        assert!(
            tokio::time::Instant::now() < deadline,
            "nick sync never listed alice"
        );
        if let Frame::NickSync { nicks } = peer.recv_frame().await {
            if nicks.iter().any(|n| n == "alice") {
                return;
            }
        }
    }
}

#[tokio::test]
async fn renames_are_announced_to_peers_eagerly() {
    let addr = start_server(vec![UNDIALABLE_PEER.into()]).await;
    let mut peer = TestPeer::connect(addr).await;
    let mut user = TestUser::connect(addr).await;
    let old_name = user.name.clone();

    user.rename("driftwood").await;

    let frame = peer
        .recv_where(
            |f| matches!(f, Frame::NameChange { .. }),
            "a name change announcement",
        )
        .await;
    assert_eq!(
        frame,
        Frame::NameChange {
            old_name,
            new_name: "driftwood".into(),
            is_github_auth: false,
        }
    );
}

#[tokio::test]
async fn verified_remote_claim_evicts_and_answers_with_a_rename() {
    let addr = start_server(vec![UNDIALABLE_PEER.into()]).await;
    let mut user = TestUser::connect(addr).await;
    user.rename("carol").await;

    let mut peer = TestPeer::connect(addr).await;
    peer.send(Frame::NameChange {
        old_name: "x".into(),
        new_name: "carol".into(),
        is_github_auth: true,
    })
    .await;

    // The squatter is told, and the forced rename goes back out,
    // unverified.
    let notice = user
        .recv_containing("because an authenticating user claimed the name 'carol'")
        .await;
    assert!(notice.contains("Your name was changed to Anonymous"));

    // Skip the buffered rename-to-carol announcement from before the
    // attach; the eviction is the change away from "carol".
    let frame = peer
        .recv_where(
            |f| matches!(f, Frame::NameChange { old_name, .. } if old_name == "carol"),
            "the eviction rename",
        )
        .await;
    match frame {
        Frame::NameChange {
            new_name,
            is_github_auth,
            ..
        } => {
            assert!(new_name.starts_with("Anonymous"));
            assert!(!is_github_auth);
        }
        other => panic!("expected the eviction rename, got {other:?}"),
    }
}

#[tokio::test]
async fn whisper_to_a_remote_name_is_relayed_without_confirmation() {
    let addr = start_server(vec![UNDIALABLE_PEER.into()]).await;
    let mut peer = TestPeer::connect(addr).await;
    peer.send(Frame::NickSync {
        nicks: vec!["remoterick".into()],
    })
    .await;

    let mut user = TestUser::connect(addr).await;
    user.rename("alice").await;
    user.wait_for_user("remoterick").await;

    user.send("/w remoterick meet me at the sandbar").await;

    let frame = peer
        .recv_where(
            |f| matches!(f, Frame::PrivateMessage { .. }),
            "the relayed whisper",
        )
        .await;
    assert_eq!(
        frame,
        Frame::PrivateMessage {
            from: "alice".into(),
            to: "remoterick".into(),
            text: "meet me at the sandbar".into(),
        }
    );

    // No local confirmation: the next thing alice sees is her own
    // public echo, with no `(to remoterick)` line before it.
    user.send("done").await;
    loop {
        let line = user.recv_line().await;
        assert!(
            !line.contains("(to remoterick)"),
            "remote whispers must not be confirmed, got: {line}"
        );
        if line.ends_with("alice: done") {
            break;
        }
    }
}

#[tokio::test]
async fn inbound_private_message_frames_reach_local_users() {
    let addr = start_server(vec![UNDIALABLE_PEER.into()]).await;
    let mut user = TestUser::connect(addr).await;
    user.rename("bob").await;

    let mut peer = TestPeer::connect(addr).await;
    peer.send(Frame::PrivateMessage {
        from: "remoterick".into(),
        to: "bob".into(),
        text: "ahoy".into(),
    })
    .await;

    user.recv_containing("(from remoterick): ahoy").await;
}

// ── Two real servers ─────────────────────────────────────────────

#[tokio::test]
async fn two_servers_converge_on_one_name_index() {
    // Bind both listeners first so each config can name the other.
    let listener_a = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener_b = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr_a = listener_a.local_addr().unwrap();
    let addr_b = listener_b.local_addr().unwrap();

    let mut config_a = Config::default();
    config_a.auth.client_id = "test-client".into();
    config_a.federation.peers = vec![addr_b.to_string()];
    let mut config_b = Config::default();
    config_b.auth.client_id = "test-client".into();
    config_b.federation.peers = vec![addr_a.to_string()];

    tokio::spawn(Server::with_listener(listener_a, config_a).run());
    tokio::spawn(Server::with_listener(listener_b, config_b).run());

    let mut alice = TestUser::connect(addr_a).await;
    alice.rename("alice").await;
    let mut bob = TestUser::connect(addr_b).await;
    bob.rename("bob").await;

    // Each side learns the other's user through nick sync.
    alice.wait_for_user("bob").await;
    bob.wait_for_user("alice").await;

    // A whisper crosses the federation; the sender gets no echo.
    alice.send("/w bob meet me at the sandbar").await;
    bob.recv_containing("(from alice): meet me at the sandbar")
        .await;

    // Federation-wide uniqueness: bob's server rejects taking "alice".
    bob.send("/n alice").await;
    bob.recv_containing("Name 'alice' is already taken.").await;
}
