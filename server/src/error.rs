use crate::store::StoreError;

/// Failures surfaced by room operations. Nothing here aborts the process;
/// every variant is contained to the request that triggered it.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The store has no record for the requested room id.
    #[error("Room {0} not found")]
    NotFound(String),

    /// Private-room join with a password that does not match. The message
    /// text is user-facing and sent back to the join attempt verbatim.
    #[error("Wrong Password")]
    WrongPassword,

    /// The store rejected the write while creating a room.
    #[error("could not create room: {0}")]
    Creation(StoreError),

    /// Any other store failure during a read or update.
    #[error("room store failed: {0}")]
    Store(StoreError),
}

impl From<StoreError> for RoomError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => RoomError::NotFound(id),
            other => RoomError::Store(other),
        }
    }
}
