use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::shuffle;

/// Unix epoch milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub uri: String,
    pub duration_ms: u32,
}

/// The track currently loaded on the shared player. Flattens the full track
/// so the snapshot can be requeued losslessly on a backward skip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentTrack {
    #[serde(flatten)]
    pub track: Track,
    pub position_ms: u32,
    pub paused: bool,
    /// Unix epoch ms at which the track was loaded.
    pub timestamp: u64,
}

impl CurrentTrack {
    /// Loads `track` from the start, unpaused.
    pub fn load(track: Track, now: u64) -> Self {
        Self {
            track,
            position_ms: 0,
            paused: false,
            timestamp: now,
        }
    }
}

/// A named, independently stateful listening session: queue, playback state
/// and membership. Mutated in place for its whole life; there is no room
/// deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub name: String,
    pub room_public: bool,
    /// Compared verbatim on join when the room is private. Stripped before
    /// any payload leaves the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_password: Option<String>,
    pub creator_id: String,
    pub active_listeners: Vec<String>,
    pub queue: Vec<Track>,
    pub shuffled: bool,
    /// Permutation of `queue`'s remaining entries, authoritative only while
    /// `shuffled` is true.
    pub shuffled_queue: Vec<Track>,
    pub current_track: Option<CurrentTrack>,
    /// Previously played snapshots, newest last. A forward skip pushes the
    /// outgoing current track even when nothing was loaded yet.
    pub history: Vec<Option<CurrentTrack>>,
}

impl Room {
    /// Fresh room: empty queue and history, nothing loaded. An empty `name`
    /// falls back to the room id.
    pub fn new(
        id: String,
        name: String,
        room_public: bool,
        room_password: Option<String>,
        creator_id: String,
        active_listeners: Vec<String>,
    ) -> Self {
        let name = if name.is_empty() { id.clone() } else { name };
        Self {
            id,
            name,
            room_public,
            room_password,
            creator_id,
            active_listeners,
            queue: Vec::new(),
            shuffled: false,
            shuffled_queue: Vec::new(),
            current_track: None,
            history: Vec::new(),
        }
    }

    /// Copy safe to put on the wire: the password never leaves the engine.
    pub fn without_secrets(mut self) -> Self {
        self.room_password = None;
        self
    }

    /// Appends `track` to the queue. Returns true when playback should start
    /// automatically: nothing loaded and the queue was empty before the
    /// append.
    pub fn enqueue(&mut self, track: Track) -> bool {
        let auto_play = self.current_track.is_none() && self.queue.is_empty();
        self.queue.push(track);
        auto_play
    }

    /// Empties both queue orderings. Current track and history stay.
    pub fn clear_queue(&mut self) {
        self.queue.clear();
        self.shuffled_queue.clear();
    }

    /// Advances to the next track: the shuffled queue's head while shuffle is
    /// on and it still has entries, FIFO order otherwise. The chosen track is
    /// removed from both orderings and the outgoing current track (possibly
    /// none) is pushed onto history. Returns false when neither source has an
    /// entry; the room is left untouched.
    pub fn skip_forward(&mut self, now: u64) -> bool {
        let next = if self.shuffled && !self.shuffled_queue.is_empty() {
            let next = self.shuffled_queue.remove(0);
            if let Some(pos) = self.queue.iter().position(|t| *t == next) {
                self.queue.remove(pos);
            }
            next
        } else if !self.queue.is_empty() {
            self.queue.remove(0)
        } else {
            return false;
        };

        let outgoing = self.current_track.take();
        self.history.push(outgoing);
        self.current_track = Some(CurrentTrack::load(next, now));
        true
    }

    /// Steps back through history. The outgoing current track is reinserted
    /// at the front of the queue (and of the shuffled queue while shuffle is
    /// on) so that an immediate forward skip plays it again. Popping a null
    /// snapshot unloads the player. Empty history is a no-op.
    pub fn skip_backward(&mut self, now: u64) -> bool {
        let snapshot = match self.history.pop() {
            Some(snapshot) => snapshot,
            None => return false,
        };

        if let Some(outgoing) = self.current_track.take() {
            if self.shuffled {
                self.shuffled_queue.insert(0, outgoing.track.clone());
            }
            self.queue.insert(0, outgoing.track);
        }

        self.current_track = snapshot.map(|prev| CurrentTrack::load(prev.track, now));
        true
    }

    /// Updates only the paused flag of the loaded track. No-op when nothing
    /// is loaded.
    pub fn set_paused(&mut self, paused: bool) -> bool {
        match &mut self.current_track {
            Some(current) => {
                current.paused = paused;
                true
            }
            None => false,
        }
    }

    /// Enabling with a non-empty queue computes a fresh fair permutation;
    /// anything else leaves the shuffled queue empty until re-enabled.
    pub fn set_shuffled(&mut self, shuffled: bool) {
        self.shuffled = shuffled;
        self.shuffled_queue = if shuffled && !self.queue.is_empty() {
            shuffle::permutation(&self.queue)
        } else {
            Vec::new()
        };
    }

    /// Idempotent: a listener already present is not appended again.
    pub fn add_listener(&mut self, username: &str) {
        if !self.active_listeners.iter().any(|l| l == username) {
            self.active_listeners.push(username.to_string());
        }
    }

    pub fn remove_listener(&mut self, username: &str) {
        self.active_listeners.retain(|l| l != username);
    }
}
