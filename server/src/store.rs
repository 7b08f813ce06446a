use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::room::{CurrentTrack, Room, Track};

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("no room record for {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Partial update applied to a stored room record. `None` fields are left
/// untouched. `current_track` is doubly optional because "nothing loaded" is
/// itself a storable value.
#[derive(Debug, Clone, Default)]
pub struct RoomPatch {
    pub active_listeners: Option<Vec<String>>,
    pub queue: Option<Vec<Track>>,
    pub shuffled: Option<bool>,
    pub shuffled_queue: Option<Vec<Track>>,
    pub current_track: Option<Option<CurrentTrack>>,
    pub history: Option<Vec<Option<CurrentTrack>>>,
}

impl RoomPatch {
    pub fn apply(self, room: &mut Room) {
        if let Some(active_listeners) = self.active_listeners {
            room.active_listeners = active_listeners;
        }
        if let Some(queue) = self.queue {
            room.queue = queue;
        }
        if let Some(shuffled) = self.shuffled {
            room.shuffled = shuffled;
        }
        if let Some(shuffled_queue) = self.shuffled_queue {
            room.shuffled_queue = shuffled_queue;
        }
        if let Some(current_track) = self.current_track {
            room.current_track = current_track;
        }
        if let Some(history) = self.history {
            room.history = history;
        }
    }
}

/// System of record for room state. Each call is a single attempt against an
/// external key-addressed store: atomic per call, no retries, last write
/// visible to the next read.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Reads one room. The room password is stripped unless secrets are
    /// explicitly requested.
    async fn find_room(&self, id: &str, include_secrets: bool) -> Result<Room, StoreError>;

    async fn create_room(&self, room: Room) -> Result<(), StoreError>;

    async fn update_room(&self, id: &str, patch: RoomPatch) -> Result<(), StoreError>;

    /// Every room, passwords stripped, ordered by id.
    async fn all_rooms(&self) -> Result<Vec<Room>, StoreError>;
}

/// In-memory implementation backing the server and the test suite.
#[derive(Clone, Default)]
pub struct MemoryStore {
    rooms: Arc<RwLock<HashMap<String, Room>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn find_room(&self, id: &str, include_secrets: bool) -> Result<Room, StoreError> {
        let rooms = self.rooms.read().await;
        let room = rooms
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(if include_secrets {
            room
        } else {
            room.without_secrets()
        })
    }

    async fn create_room(&self, room: Room) -> Result<(), StoreError> {
        self.rooms.write().await.insert(room.id.clone(), room);
        Ok(())
    }

    async fn update_room(&self, id: &str, patch: RoomPatch) -> Result<(), StoreError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        patch.apply(room);
        Ok(())
    }

    async fn all_rooms(&self) -> Result<Vec<Room>, StoreError> {
        let rooms = self.rooms.read().await;
        let mut listing: Vec<Room> = rooms
            .values()
            .cloned()
            .map(Room::without_secrets)
            .collect();
        listing.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(listing)
    }
}
