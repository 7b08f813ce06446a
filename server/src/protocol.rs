use serde::{Deserialize, Serialize};

use crate::room::{Room, Track};

/// Inbound client events. Event names are the kebab-case variant names, so
/// dispatch is a static tagged enum rather than a string-keyed lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Create {
        name: String,
        room_public: bool,
        #[serde(default)]
        room_password: Option<String>,
        #[serde(default)]
        active_listeners: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Join {
        room_id: String,
        username: String,
        #[serde(default)]
        password: Option<String>,
    },
    Leave,
    NewMessage(ChatMessage),
    #[serde(rename_all = "camelCase")]
    AddToQueue { room_id: String, track: Track },
    #[serde(rename_all = "camelCase")]
    ClearQueue { room_id: String },
    #[serde(rename_all = "camelCase")]
    TogglePlay { room_id: String, paused: bool },
    #[serde(rename_all = "camelCase")]
    ToggleShuffle { room_id: String, shuffled: bool },
    #[serde(rename_all = "camelCase")]
    SkipForward { room_id: String },
    #[serde(rename_all = "camelCase")]
    SkipBackward { room_id: String },
    GetAvailableRooms,
    #[serde(rename_all = "camelCase")]
    GetRoomPrivacy { room_id: String },
    #[serde(rename_all = "camelCase")]
    CheckPassword { room_id: String, password: String },
}

/// Chat payload, relayed verbatim to the sender's room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub user: String,
    pub msg: String,
}

/// Outbound message with the uniform envelope
/// `{event, source, message: {payload}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerMessage {
    pub event: &'static str,
    pub source: &'static str,
    pub message: EventBody,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventBody {
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Room(Room),
    Rooms(Vec<Room>),
    Chat(ChatMessage),
    Flag(bool),
    Text(String),
}

impl ServerMessage {
    fn wrap(event: &'static str, payload: EventPayload) -> Self {
        Self {
            event,
            source: "server",
            message: EventBody { payload },
        }
    }

    /// Reply to a create request: the freshly allocated room id.
    pub fn room_created(room_id: String) -> Self {
        Self::wrap("room/create", EventPayload::Text(room_id))
    }

    pub fn full_room_info(room: Room) -> Self {
        Self::wrap("room/full_info", EventPayload::Room(room))
    }

    pub fn all_rooms(rooms: Vec<Room>) -> Self {
        Self::wrap("room/set_all", EventPayload::Rooms(rooms))
    }

    /// Carries the room's `roomPublic` flag.
    pub fn is_private(room_public: bool) -> Self {
        Self::wrap("room/is_private", EventPayload::Flag(room_public))
    }

    pub fn password_check(correct: bool) -> Self {
        Self::wrap("room/password_check", EventPayload::Flag(correct))
    }

    pub fn chat(message: ChatMessage) -> Self {
        Self::wrap("room/chat/new_message", EventPayload::Chat(message))
    }

    pub fn server_error(message: String) -> Self {
        Self::wrap("server-error", EventPayload::Text(message))
    }
}
