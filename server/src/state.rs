use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::error::RoomError;
use crate::protocol::{ChatMessage, ClientMessage, ServerMessage};
use crate::room::{now_ms, Room, Track};
use crate::store::{RoomPatch, RoomStore};

pub type ClientSender = mpsc::UnboundedSender<ServerMessage>;

/// Connection metadata tracked by the session registry. A connection occupies
/// at most one room at a time.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub room_id: Option<String>,
    pub username: Option<String>,
}

/// Shared server state: session registry, broadcast routing and the room
/// state machine handlers. Every room mutation runs under that room's mutex,
/// with store calls as the only awaits inside the held scope, and broadcasts
/// only after the store write succeeded.
#[derive(Clone)]
pub struct ServerState {
    store: Arc<dyn RoomStore>,
    /// All connected clients: client_id -> membership
    clients: Arc<DashMap<Uuid, ClientInfo>>,
    /// Room membership: room_id -> joined client ids
    room_members: Arc<DashMap<String, Vec<Uuid>>>,
    /// Outbound channels: client_id -> sender
    senders: Arc<DashMap<Uuid, ClientSender>>,
    /// Per-room mutation locks
    room_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    next_room_id: Arc<AtomicU64>,
}

impl ServerState {
    pub fn new(store: Arc<dyn RoomStore>) -> Self {
        Self {
            store,
            clients: Arc::new(DashMap::new()),
            room_members: Arc::new(DashMap::new()),
            senders: Arc::new(DashMap::new()),
            room_locks: Arc::new(DashMap::new()),
            next_room_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Routes one inbound event to its handler.
    pub async fn dispatch(&self, client_id: Uuid, msg: ClientMessage) -> Result<(), RoomError> {
        match msg {
            ClientMessage::Create {
                name,
                room_public,
                room_password,
                active_listeners,
            } => {
                self.create_room(client_id, name, room_public, room_password, active_listeners)
                    .await
            }
            ClientMessage::Join {
                room_id,
                username,
                password,
            } => {
                self.join_room(client_id, &room_id, &username, password.as_deref())
                    .await
            }
            ClientMessage::Leave => self.leave(client_id).await,
            ClientMessage::NewMessage(message) => {
                self.relay_chat(client_id, message);
                Ok(())
            }
            ClientMessage::AddToQueue { room_id, track } => {
                self.add_to_queue(&room_id, track).await
            }
            ClientMessage::ClearQueue { room_id } => self.clear_queue(&room_id).await,
            ClientMessage::TogglePlay { room_id, paused } => {
                self.set_playback_state(&room_id, paused).await
            }
            ClientMessage::ToggleShuffle { room_id, shuffled } => {
                self.toggle_shuffle(&room_id, shuffled).await
            }
            ClientMessage::SkipForward { room_id } => self.skip_forward(&room_id).await,
            ClientMessage::SkipBackward { room_id } => self.skip_backward(&room_id).await,
            ClientMessage::GetAvailableRooms => {
                self.send_available_rooms(Some(client_id)).await
            }
            ClientMessage::GetRoomPrivacy { room_id } => {
                self.room_privacy(client_id, &room_id).await
            }
            ClientMessage::CheckPassword { room_id, password } => {
                self.check_password(client_id, &room_id, &password).await
            }
        }
    }

    // ---- session registry ----

    pub fn register_client(&self, client_id: Uuid, sender: ClientSender) {
        self.clients.insert(client_id, ClientInfo::default());
        self.senders.insert(client_id, sender);
        tracing::info!("client {} connected", client_id);
    }

    /// Connection teardown: leaves whatever room the connection occupied,
    /// then drops it from the registry.
    pub async fn remove_client(&self, client_id: Uuid) {
        if let Err(err) = self.leave(client_id).await {
            tracing::error!("cleanup for client {} failed: {}", client_id, err);
        }
        self.clients.remove(&client_id);
        self.senders.remove(&client_id);
        tracing::info!("client {} disconnected", client_id);
    }

    /// The room a connection currently occupies, if any.
    pub fn client_room(&self, client_id: Uuid) -> Option<String> {
        self.clients
            .get(&client_id)
            .and_then(|info| info.room_id.clone())
    }

    fn attach(&self, client_id: Uuid, room_id: &str, username: &str) {
        if let Some(mut info) = self.clients.get_mut(&client_id) {
            info.room_id = Some(room_id.to_string());
            info.username = Some(username.to_string());
        }
        let mut members = self.room_members.entry(room_id.to_string()).or_default();
        if !members.contains(&client_id) {
            members.push(client_id);
        }
    }

    fn detach(&self, client_id: Uuid, room_id: &str) {
        if let Some(mut info) = self.clients.get_mut(&client_id) {
            info.room_id = None;
        }
        if let Some(mut members) = self.room_members.get_mut(room_id) {
            members.retain(|id| *id != client_id);
        }
    }

    // ---- broadcast router ----

    /// Reply only to the originating connection.
    pub fn unicast(&self, client_id: Uuid, message: ServerMessage) {
        if let Some(tx) = self.senders.get(&client_id) {
            let _ = tx.send(message);
        }
    }

    /// Deliver to every connection currently joined to `room_id`.
    pub fn room_cast(&self, room_id: &str, message: ServerMessage) {
        let members = self
            .room_members
            .get(room_id)
            .map(|m| m.value().clone())
            .unwrap_or_default();
        for member in members {
            if let Some(tx) = self.senders.get(&member) {
                let _ = tx.send(message.clone());
            }
        }
    }

    /// Deliver to every connected session, joined to a room or not.
    pub fn global_cast(&self, message: ServerMessage) {
        for entry in self.senders.iter() {
            let _ = entry.value().send(message.clone());
        }
    }

    // ---- room state machine ----

    pub async fn create_room(
        &self,
        client_id: Uuid,
        name: String,
        room_public: bool,
        room_password: Option<String>,
        active_listeners: Vec<String>,
    ) -> Result<(), RoomError> {
        let room_id = self.generate_room_id();
        let room = Room::new(
            room_id.clone(),
            name,
            room_public,
            room_password,
            client_id.to_string(),
            active_listeners,
        );

        self.store
            .create_room(room)
            .await
            .map_err(RoomError::Creation)?;
        tracing::info!("client {} created room {}", client_id, room_id);

        self.unicast(client_id, ServerMessage::room_created(room_id.clone()));
        // Lobby views refresh on every public state change.
        self.send_available_rooms(None).await?;
        // Nobody has joined yet, so this reaches no one; kept so create
        // announces like every other mutation once listeners exist.
        self.broadcast_room(&room_id).await
    }

    pub async fn join_room(
        &self,
        client_id: Uuid,
        room_id: &str,
        username: &str,
        password: Option<&str>,
    ) -> Result<(), RoomError> {
        // Reject bad credentials before touching any membership; a failed
        // join must not detach the connection from its current room.
        let room = self.store.find_room(room_id, true).await?;
        Self::verify_password(&room, password)?;

        // A connection occupies at most one room; joining elsewhere leaves
        // the old room first (no-op for unjoined connections).
        self.leave(client_id).await?;

        let lock = self.room_lock(room_id);
        let _guard = lock.lock().await;

        // Re-read and re-check under the room lock; the record may have
        // changed between the precheck and here.
        let mut room = self.store.find_room(room_id, true).await?;
        Self::verify_password(&room, password)?;

        room.add_listener(username);
        self.store
            .update_room(
                room_id,
                RoomPatch {
                    active_listeners: Some(room.active_listeners.clone()),
                    ..Default::default()
                },
            )
            .await?;

        self.attach(client_id, room_id, username);
        tracing::info!("client {} joined room {} as {}", client_id, room_id, username);

        self.send_available_rooms(None).await?;
        self.broadcast_room(room_id).await
    }

    /// Detaches the connection from its current room. Safe no-op for
    /// connections that never joined one.
    pub async fn leave(&self, client_id: Uuid) -> Result<(), RoomError> {
        let (room_id, username) = match self.clients.get(&client_id) {
            Some(info) => (info.room_id.clone(), info.username.clone()),
            None => (None, None),
        };
        let room_id = match room_id {
            Some(room_id) => room_id,
            None => return Ok(()),
        };

        // Detach first so the room-cast below reaches only remaining members.
        self.detach(client_id, &room_id);

        let lock = self.room_lock(&room_id);
        let _guard = lock.lock().await;

        if let Some(username) = username {
            let mut room = self.store.find_room(&room_id, false).await?;
            room.remove_listener(&username);
            self.store
                .update_room(
                    &room_id,
                    RoomPatch {
                        active_listeners: Some(room.active_listeners.clone()),
                        ..Default::default()
                    },
                )
                .await?;
            tracing::info!("client {} left room {}", client_id, room_id);
        }

        self.send_available_rooms(None).await?;
        self.broadcast_room(&room_id).await
    }

    pub async fn add_to_queue(&self, room_id: &str, track: Track) -> Result<(), RoomError> {
        let lock = self.room_lock(room_id);
        let _guard = lock.lock().await;

        let mut room = self.store.find_room(room_id, false).await?;
        let auto_play = room.enqueue(track);
        self.store
            .update_room(
                room_id,
                RoomPatch {
                    queue: Some(room.queue.clone()),
                    ..Default::default()
                },
            )
            .await?;
        self.broadcast_room(room_id).await?;

        if auto_play {
            self.advance_locked(room_id).await?;
        }
        Ok(())
    }

    pub async fn clear_queue(&self, room_id: &str) -> Result<(), RoomError> {
        let lock = self.room_lock(room_id);
        let _guard = lock.lock().await;

        let mut room = self.store.find_room(room_id, false).await?;
        room.clear_queue();
        self.store
            .update_room(
                room_id,
                RoomPatch {
                    queue: Some(room.queue.clone()),
                    shuffled_queue: Some(room.shuffled_queue.clone()),
                    ..Default::default()
                },
            )
            .await?;
        self.broadcast_room(room_id).await
    }

    pub async fn skip_forward(&self, room_id: &str) -> Result<(), RoomError> {
        let lock = self.room_lock(room_id);
        let _guard = lock.lock().await;
        self.advance_locked(room_id).await
    }

    pub async fn skip_backward(&self, room_id: &str) -> Result<(), RoomError> {
        let lock = self.room_lock(room_id);
        let _guard = lock.lock().await;

        let mut room = self.store.find_room(room_id, false).await?;
        if !room.skip_backward(now_ms()) {
            // Exhausted history: nothing to restore, nothing to announce.
            return Ok(());
        }
        self.store
            .update_room(
                room_id,
                RoomPatch {
                    queue: Some(room.queue.clone()),
                    shuffled_queue: Some(room.shuffled_queue.clone()),
                    current_track: Some(room.current_track.clone()),
                    history: Some(room.history.clone()),
                    ..Default::default()
                },
            )
            .await?;
        self.broadcast_room(room_id).await
    }

    pub async fn set_playback_state(&self, room_id: &str, paused: bool) -> Result<(), RoomError> {
        let lock = self.room_lock(room_id);
        let _guard = lock.lock().await;

        let mut room = self.store.find_room(room_id, false).await?;
        if room.set_paused(paused) {
            self.store
                .update_room(
                    room_id,
                    RoomPatch {
                        current_track: Some(room.current_track.clone()),
                        ..Default::default()
                    },
                )
                .await?;
        }
        self.broadcast_room(room_id).await
    }

    pub async fn toggle_shuffle(&self, room_id: &str, shuffled: bool) -> Result<(), RoomError> {
        let lock = self.room_lock(room_id);
        let _guard = lock.lock().await;

        let mut room = self.store.find_room(room_id, false).await?;
        room.set_shuffled(shuffled);
        self.store
            .update_room(
                room_id,
                RoomPatch {
                    shuffled: Some(room.shuffled),
                    shuffled_queue: Some(room.shuffled_queue.clone()),
                    ..Default::default()
                },
            )
            .await?;
        self.broadcast_room(room_id).await
    }

    /// Relays a chat message to the sender's room. No state mutation.
    pub fn relay_chat(&self, client_id: Uuid, message: ChatMessage) {
        if let Some(room_id) = self.client_room(client_id) {
            self.room_cast(&room_id, ServerMessage::chat(message));
        }
    }

    /// Pushes the public room listing, either to one connection (on request)
    /// or to every connected session (after a membership/creation change).
    pub async fn send_available_rooms(&self, requester: Option<Uuid>) -> Result<(), RoomError> {
        let rooms = self.store.all_rooms().await?;
        let message = ServerMessage::all_rooms(rooms);
        match requester {
            Some(client_id) => self.unicast(client_id, message),
            None => self.global_cast(message),
        }
        Ok(())
    }

    pub async fn room_privacy(&self, client_id: Uuid, room_id: &str) -> Result<(), RoomError> {
        let room = self.store.find_room(room_id, false).await?;
        self.unicast(client_id, ServerMessage::is_private(room.room_public));
        Ok(())
    }

    /// Verbatim password comparison; does not join or mutate.
    pub async fn check_password(
        &self,
        client_id: Uuid,
        room_id: &str,
        password: &str,
    ) -> Result<(), RoomError> {
        let room = self.store.find_room(room_id, true).await?;
        let correct = room.room_password.as_deref() == Some(password);
        self.unicast(client_id, ServerMessage::password_check(correct));
        Ok(())
    }

    // ---- internals ----

    /// Forward-skip body; caller must hold the room's mutex.
    async fn advance_locked(&self, room_id: &str) -> Result<(), RoomError> {
        let mut room = self.store.find_room(room_id, false).await?;
        if !room.skip_forward(now_ms()) {
            // Both queue orderings drained: no write, no broadcast.
            return Ok(());
        }
        self.store
            .update_room(
                room_id,
                RoomPatch {
                    queue: Some(room.queue.clone()),
                    shuffled_queue: Some(room.shuffled_queue.clone()),
                    current_track: Some(room.current_track.clone()),
                    history: Some(room.history.clone()),
                    ..Default::default()
                },
            )
            .await?;
        self.broadcast_room(room_id).await
    }

    /// Room-casts the freshly persisted snapshot, password stripped.
    async fn broadcast_room(&self, room_id: &str) -> Result<(), RoomError> {
        let room = self.store.find_room(room_id, false).await?;
        self.room_cast(room_id, ServerMessage::full_room_info(room));
        Ok(())
    }

    fn room_lock(&self, room_id: &str) -> Arc<Mutex<()>> {
        self.room_locks
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn generate_room_id(&self) -> String {
        format!("room{}", self.next_room_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Public rooms admit anyone; private rooms compare the stored password
    /// verbatim against the supplied one.
    fn verify_password(room: &Room, password: Option<&str>) -> Result<(), RoomError> {
        if !room.room_public && room.room_password.as_deref() != Some(password.unwrap_or("")) {
            return Err(RoomError::WrongPassword);
        }
        Ok(())
    }
}
