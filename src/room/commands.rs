//! Slash commands.
//!
//! Case-sensitive, space-tokenized, dispatched from the session loop.
//! Immediate feedback (help, usage errors, lists) goes straight onto
//! the caller's queue; anything that touches shared state is submitted
//! to the hub, which answers on the same queue.

use std::sync::Arc;

use tracing::warn;

use super::auth;
use super::client::ClientRef;
use super::message::Message;
use super::names;
use super::session::SessionContext;

const HELP_TEXT: &str = "Available commands:\n  \
    /h                    - Show this help message\n  \
    /u                    - List users in the chat\n  \
    /s                    - List federated servers\n  \
    /n <name>             - Change your name\n  \
    /w <user> <message>   - Send a private message\n  \
    /gh                   - Authenticate with GitHub to get your GitHub name";

/// Handle one `/`-prefixed input line.
pub async fn dispatch(input: &str, client: &ClientRef, ctx: &SessionContext) {
    let mut parts = input.split_whitespace();
    let Some(command) = parts.next() else { return };

    match command {
        "/h" => notice(client, HELP_TEXT),

        "/u" => {
            let users = ctx.hub.user_list().await;
            notice(
                client,
                format!("Users online ({}): {}", users.len(), users.join(", ")),
            );
        }

        "/s" => {
            let peers = ctx.federation.peer_addrs();
            if peers.is_empty() {
                notice(client, "No federated servers configured.");
            } else {
                notice(
                    client,
                    format!("Federated servers ({}): {}", peers.len(), peers.join(", ")),
                );
            }
        }

        "/n" => match parts.next() {
            None => notice(client, "Usage: /n <newname>"),
            Some(name) if !names::is_valid_username(name) => notice(
                client,
                "Invalid name. Use 3-20 alphanumeric characters, underscores, or hyphens.",
            ),
            Some(name) => {
                ctx.hub
                    .change_name(Arc::clone(client), name.to_string(), false)
                    .await;
            }
        },

        "/w" => {
            let target = parts.next();
            let text: Vec<&str> = parts.collect();
            match target {
                Some(target) if !text.is_empty() => {
                    ctx.hub
                        .private_message(
                            target.to_string(),
                            Message::private(client.name(), text.join(" ")),
                            Some(Arc::clone(client)),
                        )
                        .await;
                }
                _ => notice(client, "Usage: /w <username> <message>"),
            }
        }

        "/gh" => {
            notice(client, "Starting GitHub authentication...");
            spawn_auth(client, ctx);
        }

        other => notice(client, format!("Unknown command: {other}")),
    }
}

/// Run the device flow off the session loop; the session keeps chatting
/// while the user authorizes in a browser.
fn spawn_auth(client: &ClientRef, ctx: &SessionContext) {
    let client = Arc::clone(client);
    let hub = ctx.hub.clone();
    let auth_cfg = ctx.config.auth.clone();
    tokio::spawn(async move {
        match auth::device_flow(&auth_cfg, &client).await {
            Ok(login) if names::is_valid_username(&login) => {
                hub.change_name(client, login, true).await;
            }
            Ok(login) => {
                // The registry only holds names matching the room's
                // shape; a login outside it cannot be claimed.
                notice(
                    &client,
                    format!(
                        "Your GitHub login '{login}' can't be used as a display name \
                         (3-20 alphanumeric characters, underscores, or hyphens)."
                    ),
                );
            }
            Err(e) => {
                warn!(name = %client.name(), "authentication failed: {e}");
                notice(&client, format!("GitHub authentication failed: {e}"));
            }
        }
    });
}

fn notice(client: &ClientRef, content: impl Into<String>) {
    let _ = client.try_enqueue(Message::system(content));
}
