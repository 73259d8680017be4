//! The hub — single-writer state machine at the center of the room.
//!
//! Every mutation of the client registry, the remote-nick mirror, and
//! any client's identity funnels through one request channel consumed by
//! one task. Handlers run to completion without yielding; the only
//! writes they perform toward other tasks are non-blocking enqueues onto
//! client outbound queues and federation link buffers. A client whose
//! queue is full is dead and gets evicted on the spot.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::client::{ClientId, ClientRef};
use super::message::Message;
use super::names;
use crate::federation::Federation;

/// Depth of the hub request queue. Submitters await a slot, so this is a
/// handoff buffer, not a backlog.
const REQUEST_QUEUE: usize = 64;

/// One mutation or query, consumed in FIFO order by the hub loop.
pub enum HubRequest {
    Register {
        client: ClientRef,
    },
    Unregister {
        client: ClientRef,
    },
    Broadcast {
        message: Message,
    },
    PrivateMessage {
        target: String,
        message: Message,
        /// `None` when the message arrived over federation.
        sender: Option<ClientRef>,
    },
    ChangeName {
        client: ClientRef,
        new_name: String,
        /// True only when the name was verified by the auth provider.
        /// Grants preemption over a non-verified holder.
        is_external_auth: bool,
    },
    RemoteNameChange {
        old_name: String,
        new_name: String,
        is_external_auth: bool,
        peer: String,
    },
    SyncNicks {
        peer: String,
        nicks: Vec<String>,
    },
    UserList {
        reply: oneshot::Sender<Vec<String>>,
    },
    LocalUserList {
        reply: oneshot::Sender<Vec<String>>,
    },
}

/// Cloneable submitter handle to the hub loop.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubRequest>,
}

/// Create the hub request channel. The receiving end goes to
/// [`Hub::run`]; handles go everywhere else.
pub fn channel() -> (HubHandle, mpsc::Receiver<HubRequest>) {
    let (tx, rx) = mpsc::channel(REQUEST_QUEUE);
    (HubHandle { tx }, rx)
}

impl HubHandle {
    pub async fn register(&self, client: ClientRef) {
        self.submit(HubRequest::Register { client }).await;
    }

    pub async fn unregister(&self, client: ClientRef) {
        self.submit(HubRequest::Unregister { client }).await;
    }

    pub async fn broadcast(&self, message: Message) {
        self.submit(HubRequest::Broadcast { message }).await;
    }

    pub async fn private_message(
        &self,
        target: String,
        message: Message,
        sender: Option<ClientRef>,
    ) {
        self.submit(HubRequest::PrivateMessage {
            target,
            message,
            sender,
        })
        .await;
    }

    pub async fn change_name(&self, client: ClientRef, new_name: String, is_external_auth: bool) {
        self.submit(HubRequest::ChangeName {
            client,
            new_name,
            is_external_auth,
        })
        .await;
    }

    pub async fn remote_name_change(
        &self,
        old_name: String,
        new_name: String,
        is_external_auth: bool,
        peer: String,
    ) {
        self.submit(HubRequest::RemoteNameChange {
            old_name,
            new_name,
            is_external_auth,
            peer,
        })
        .await;
    }

    pub async fn sync_nicks(&self, peer: String, nicks: Vec<String>) {
        self.submit(HubRequest::SyncNicks { peer, nicks }).await;
    }

    /// Union of local display names and every peer's nicks. Unordered.
    pub async fn user_list(&self) -> Vec<String> {
        let (reply, rx) = oneshot::channel();
        self.submit(HubRequest::UserList { reply }).await;
        rx.await.unwrap_or_default()
    }

    /// Local display names only, as sent in nick syncs.
    pub async fn local_user_list(&self) -> Vec<String> {
        let (reply, rx) = oneshot::channel();
        self.submit(HubRequest::LocalUserList { reply }).await;
        rx.await.unwrap_or_default()
    }

    async fn submit(&self, req: HubRequest) {
        if self.tx.send(req).await.is_err() {
            warn!("hub loop is gone, dropping request");
        }
    }
}

/// Authoritative room state. Owned exclusively by the loop in
/// [`Hub::run`].
pub struct Hub {
    clients: HashMap<ClientId, ClientRef>,
    by_name: HashMap<String, ClientId>,
    /// peer address → that peer's last-synced nick list.
    remote_nicks: HashMap<String, Vec<String>>,
    federation: Arc<Federation>,
}

impl Hub {
    pub fn new(federation: Arc<Federation>) -> Self {
        Self {
            clients: HashMap::new(),
            by_name: HashMap::new(),
            remote_nicks: HashMap::new(),
            federation,
        }
    }

    /// Consume requests until every handle is dropped.
    pub async fn run(mut self, mut rx: mpsc::Receiver<HubRequest>) {
        while let Some(req) = rx.recv().await {
            self.handle(req);
        }
        debug!("hub loop exiting");
    }

    fn handle(&mut self, req: HubRequest) {
        match req {
            HubRequest::Register { client } => self.handle_register(client),
            HubRequest::Unregister { client } => self.handle_unregister(&client),
            HubRequest::Broadcast { message } => self.broadcast(message),
            HubRequest::PrivateMessage {
                target,
                message,
                sender,
            } => self.handle_private_message(&target, message, sender),
            HubRequest::ChangeName {
                client,
                new_name,
                is_external_auth,
            } => self.handle_change_name(&client, new_name, is_external_auth),
            HubRequest::RemoteNameChange {
                old_name,
                new_name,
                is_external_auth,
                peer,
            } => self.handle_remote_name_change(&old_name, new_name, is_external_auth, peer),
            HubRequest::SyncNicks { peer, nicks } => self.handle_sync_nicks(peer, nicks),
            HubRequest::UserList { reply } => {
                let _ = reply.send(self.user_list());
            }
            HubRequest::LocalUserList { reply } => {
                let _ = reply.send(self.local_user_list());
            }
        }
    }

    // ── Handlers ─────────────────────────────────────────────────

    fn handle_register(&mut self, client: ClientRef) {
        let mut name = client.name();
        if self.name_in_federation(&name) {
            name = self.fresh_anonymous_name();
            client.set_name(&name);
        }
        self.clients.insert(client.id(), Arc::clone(&client));
        self.by_name.insert(name.clone(), client.id());
        info!(%name, "client registered");
        self.broadcast(Message::system(format!("{name} has joined.")));
    }

    fn handle_unregister(&mut self, client: &ClientRef) {
        if self.clients.remove(&client.id()).is_none() {
            return; // Already evicted or never registered.
        }
        let name = client.name();
        self.by_name.remove(&name);
        client.close_outbound();
        info!(%name, "client unregistered");
        self.broadcast(Message::system(format!("{name} has left.")));
    }

    fn handle_private_message(
        &mut self,
        target: &str,
        message: Message,
        sender: Option<ClientRef>,
    ) {
        if let Some(&target_id) = self.by_name.get(target) {
            let target_client = Arc::clone(&self.clients[&target_id]);
            if let Some(sender) = &sender {
                if sender.id() == target_id {
                    self.enqueue_or_evict(
                        sender,
                        Message::system("You can't send a message to yourself."),
                    );
                    return;
                }
            }
            self.enqueue_or_evict(
                &target_client,
                Message::private(
                    message.author.clone(),
                    format!("(from {}): {}", message.author, message.content),
                ),
            );
            if let Some(sender) = &sender {
                self.enqueue_or_evict(
                    sender,
                    Message::private(
                        message.author.clone(),
                        format!("(to {target}): {}", message.content),
                    ),
                );
            }
        } else if let Some(peer) = self.peer_for_nick(target) {
            let peer = peer.to_string();
            // No confirmation to the sender; delivery is best-effort.
            if !self
                .federation
                .send_private_message(&peer, &message.author, target, &message.content)
            {
                warn!(%peer, "no link for peer while relaying private message");
            }
        } else if let Some(sender) = &sender {
            self.enqueue_or_evict(
                sender,
                Message::system(format!("User '{target}' not found.")),
            );
        }
    }

    fn handle_change_name(&mut self, client: &ClientRef, new_name: String, is_external_auth: bool) {
        if !self.clients.contains_key(&client.id()) {
            // The session raced its own eviction; nothing to rename.
            debug!(name = %client.name(), "name change for unregistered client ignored");
            return;
        }

        let old_name = client.name();
        let taken = self.name_in_federation(&new_name) && old_name != new_name;

        if !taken {
            if old_name == new_name {
                return;
            }
            self.by_name.remove(&old_name);
            self.by_name.insert(new_name.clone(), client.id());
            client.set_name(&new_name);
            // An ordinary rename drops verification; only an external-auth
            // rename confers it.
            client.set_authed(is_external_auth);
            info!(old = %old_name, new = %new_name, "name changed");
            self.broadcast(Message::system(format!(
                "{old_name} is now known as {new_name}."
            )));
            self.federation
                .broadcast_name_change(&old_name, &new_name, is_external_auth);
            return;
        }

        if !is_external_auth {
            self.enqueue_or_evict(
                client,
                Message::system(format!("Name '{new_name}' is already taken.")),
            );
            return;
        }

        // Preemption: the verified claim wins. A local squatter is moved
        // to a fresh anonymous name first; a remote squatter is handled
        // by its own hub when the name_change frame arrives.
        let local_owner = self
            .by_name
            .get(&new_name)
            .map(|id| Arc::clone(&self.clients[id]));
        let evicted = local_owner.map(|owner| self.evict_name_holder(&owner));

        self.by_name.remove(&old_name);
        self.by_name.insert(new_name.clone(), client.id());
        client.set_name(&new_name);
        client.set_authed(true);

        if let Some((evicted_old, evicted_new)) = &evicted {
            self.broadcast(Message::system(format!(
                "{evicted_old} has been renamed to {evicted_new}."
            )));
        }
        self.broadcast(Message::system(format!(
            "{old_name} has authenticated and is now known as {new_name}."
        )));

        if let Some((evicted_old, evicted_new)) = &evicted {
            self.federation
                .broadcast_name_change(evicted_old, evicted_new, false);
        }
        self.federation
            .broadcast_name_change(&old_name, &new_name, true);
        info!(old = %old_name, new = %new_name, "authenticated name claim");
    }

    fn handle_remote_name_change(
        &mut self,
        old_name: &str,
        new_name: String,
        is_external_auth: bool,
        peer: String,
    ) {
        let nicks = self.remote_nicks.entry(peer.clone()).or_default();
        if let Some(pos) = nicks.iter().position(|n| n == old_name) {
            nicks.remove(pos);
        }
        nicks.push(new_name.clone());

        if !is_external_auth {
            return;
        }
        // The remote claim is verified: a local holder of the name loses it.
        let Some(owner) = self
            .by_name
            .get(&new_name)
            .map(|id| Arc::clone(&self.clients[id]))
        else {
            return;
        };
        let (evicted_old, evicted_new) = self.evict_name_holder(&owner);
        self.federation
            .broadcast_name_change(&evicted_old, &evicted_new, false);
        info!(%peer, old = %evicted_old, new = %evicted_new, "local client preempted by remote claim");
    }

    fn handle_sync_nicks(&mut self, peer: String, nicks: Vec<String>) {
        for nick in &nicks {
            if let Some(other) = self.peer_for_nick(nick) {
                if other != peer {
                    // A federation invariant violation; surfaced, not repaired.
                    warn!(%nick, first = %other, second = %peer, "name in use on multiple servers");
                }
            }
        }
        self.remote_nicks.insert(peer, nicks);
    }

    // ── Registry helpers ─────────────────────────────────────────

    /// Move `owner` to a fresh anonymous name, de-verify it, and notify
    /// it. Returns `(old_name, new_name)`.
    fn evict_name_holder(&mut self, owner: &ClientRef) -> (String, String) {
        let evicted_old = owner.name();
        let evicted_new = self.fresh_anonymous_name();
        self.by_name.remove(&evicted_old);
        self.by_name.insert(evicted_new.clone(), owner.id());
        owner.set_name(&evicted_new);
        owner.set_authed(false);
        self.enqueue_or_evict(
            owner,
            Message::system(format!(
                "Your name was changed to {evicted_new} because an authenticating user claimed the name '{evicted_old}'."
            )),
        );
        (evicted_old, evicted_new)
    }

    /// Deliver to every live client, evicting any whose queue is full.
    fn broadcast(&mut self, message: Message) {
        let recipients: Vec<ClientRef> = self.clients.values().cloned().collect();
        for client in &recipients {
            self.enqueue_or_evict(client, message.clone());
        }
    }

    /// Non-blocking enqueue. On failure the client is dead: remove it
    /// from the registry and close its queue. No leave broadcast — the
    /// client was already unable to keep up. Returns false on eviction.
    fn enqueue_or_evict(&mut self, client: &ClientRef, message: Message) -> bool {
        match client.try_enqueue(message) {
            Ok(()) => true,
            Err(err) => {
                if self.clients.remove(&client.id()).is_some() {
                    let name = client.name();
                    self.by_name.remove(&name);
                    client.close_outbound();
                    warn!(%name, %err, "outbound queue unavailable, disconnecting client");
                }
                false
            }
        }
    }

    fn name_in_federation(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
            || self
                .remote_nicks
                .values()
                .any(|nicks| nicks.iter().any(|n| n == name))
    }

    fn peer_for_nick(&self, nick: &str) -> Option<&str> {
        self.remote_nicks
            .iter()
            .find(|(_, nicks)| nicks.iter().any(|n| n == nick))
            .map(|(peer, _)| peer.as_str())
    }

    /// Draw anonymous names until one is free across the federation.
    fn fresh_anonymous_name(&self) -> String {
        loop {
            let candidate = names::anonymous_name();
            if !self.name_in_federation(&candidate) {
                return candidate;
            }
        }
    }

    fn user_list(&self) -> Vec<String> {
        let mut users: Vec<String> = self.by_name.keys().cloned().collect();
        for nicks in self.remote_nicks.values() {
            users.extend(nicks.iter().cloned());
        }
        users
    }

    fn local_user_list(&self) -> Vec<String> {
        self.by_name.keys().cloned().collect()
    }
}
