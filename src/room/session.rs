//! Per-connection session handling.
//!
//! Every connection opens with one hello line — `estuary user` or
//! `estuary federation` — which routes it either into a chat session or
//! to the peer-link handler. A chat session is two loops in one select:
//! input lines in (classified as commands or public messages), queued
//! [`Message`]s out (rendered one per line, in arrival order).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use tokio::net::TcpStream;
use tokio_stream::StreamExt;
use tokio_util::codec::{Framed, FramedParts, LinesCodec};
use tracing::{info, warn};

use super::client::Client;
use super::commands;
use super::message::{Message, MessageKind};
use super::names;
use crate::config::Config;
use crate::federation::{Federation, Frame, FrameCodec, PeerConn};
use crate::room::hub::HubHandle;

/// Longest accepted input line.
const MAX_LINE_LENGTH: usize = 1024;

/// How long a connection may sit silent before its hello.
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a session needs to reach the rest of the server.
#[derive(Clone)]
pub struct SessionContext {
    pub hub: HubHandle,
    pub federation: Arc<Federation>,
    pub config: Arc<Config>,
}

/// The role a connection declares in its hello line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Federation,
}

/// Parse `estuary <role>`.
///
/// `federation` is reserved for peer links; every other role word is a
/// user session. A line without the `estuary` prefix is not a hello.
pub fn parse_hello(line: &str) -> Option<Role> {
    let mut parts = line.split_whitespace();
    if parts.next() != Some("estuary") {
        return None;
    }
    match parts.next() {
        Some("federation") => Some(Role::Federation),
        _ => Some(Role::User),
    }
}

/// Drive one accepted connection from hello to close.
pub async fn handle_connection(socket: TcpStream, addr: SocketAddr, ctx: SessionContext) {
    let mut lines = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    let hello = match tokio::time::timeout(HELLO_TIMEOUT, lines.next()).await {
        Ok(Some(Ok(line))) => line,
        Ok(Some(Err(e))) => {
            warn!(%addr, "hello read error: {e}");
            return;
        }
        Ok(None) => return,
        Err(_) => {
            let _ = lines
                .send("estuary: no hello received; closing.".to_string())
                .await;
            return;
        }
    };

    match parse_hello(&hello) {
        None => {
            let _ = lines
                .send("estuary: expected `estuary user` or `estuary federation`; closing.".to_string())
                .await;
        }
        Some(Role::Federation) => {
            // Hand the connection to its peer link; unknown origins are
            // dropped by the federation registry.
            info!(%addr, "inbound federation connection");
            ctx.federation
                .attach_inbound(&addr.ip().to_string(), reframe(lines));
        }
        Some(Role::User) => run_chat_session(lines, addr, ctx).await,
    }
}

/// Swap the hello-line codec for the federation frame codec, keeping
/// any bytes the peer already pipelined behind its hello.
fn reframe(lines: Framed<TcpStream, LinesCodec>) -> PeerConn {
    let parts = lines.into_parts();
    let mut framed = FramedParts::new::<Frame>(parts.io, FrameCodec);
    framed.read_buf = parts.read_buf;
    framed.write_buf = parts.write_buf;
    Framed::from_parts(framed)
}

async fn run_chat_session(
    mut lines: Framed<TcpStream, LinesCodec>,
    addr: SocketAddr,
    ctx: SessionContext,
) {
    let (client, mut outbound) = Client::new(names::anonymous_name());
    info!(%addr, name = %client.name(), "chat session started");

    // Self-directed notices, queued before registration so they render
    // ahead of the join broadcast.
    let _ = client.try_enqueue(Message::system(format!(
        "Welcome, {}! Use /n <newname> to change your name, or /gh to authenticate with GitHub.",
        client.name()
    )));
    if !ctx.config.chat.welcome_message.is_empty() {
        let _ = client.try_enqueue(Message::system(ctx.config.chat.welcome_message.clone()));
    }

    ctx.hub.register(Arc::clone(&client)).await;

    loop {
        tokio::select! {
            line = lines.next() => match line {
                Some(Ok(line)) => {
                    let input = line.trim();
                    if input.is_empty() {
                        continue;
                    }
                    if input.starts_with('/') {
                        commands::dispatch(input, &client, &ctx).await;
                    } else {
                        ctx.hub
                            .broadcast(Message::public(client.name(), input, client.is_authed()))
                            .await;
                    }
                }
                Some(Err(e)) => {
                    warn!(%addr, "session read error: {e}");
                    break;
                }
                None => break,
            },

            maybe = outbound.recv() => match maybe {
                Some(msg) => {
                    if lines.send(render(&msg)).await.is_err() {
                        break;
                    }
                }
                // Queue closed — the hub evicted or unregistered us.
                None => break,
            },
        }
    }

    ctx.hub.unregister(client).await;
    info!(%addr, "chat session ended");
}

/// Render one message as a timestamped terminal line.
///
/// System and private contents already carry their routing context
/// (`(from x):`, notices); only public messages need the author shown.
fn render(msg: &Message) -> String {
    let stamp = chrono::Local::now().format("%H:%M");
    match msg.kind {
        MessageKind::Public => format!("[{stamp}] {}: {}", msg.author, msg.content),
        MessageKind::Private | MessageKind::System => format!("[{stamp}] {}", msg.content),
    }
}
