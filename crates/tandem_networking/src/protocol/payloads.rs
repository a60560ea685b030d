//! Payload layouts per message type.
//!
//! | Type                                   | Content                                   |
//! |----------------------------------------|-------------------------------------------|
//! | `Connected`                            | `u32` player id                           |
//! | `JoinGameRequest`                      | `u32` room id                             |
//! | `JoinGameDenied`                       | `u32` [`DenyReason`]                      |
//! | `RoomInfo`, `JoinGameSuccess`, `PlayerJoinedRoom` | [`RoomSummary`], `u32` count, `u32` ids |
//! | `RoomList`                             | `u32` count, [`RoomSummary`] each         |
//! | `GameInitialSync`, `GameSync`          | `i32` byte count + UTF-8 scene state      |
//! | `AdvanceTime`                          | `i32` game time                           |
//! | `TimeSyncHash`                         | [`TimeSyncHashPayload`]                   |
//! | `TimeSyncHashDebug`                    | [`TimeSyncHashPayload`] + string dump     |
//! | `GenericGameplay`                      | string method + string JSON metadata      |
//! | `GenericGameplayWithTime`              | `i32` game time + the `GenericGameplay` layout |

use serde::de::DeserializeOwned;
use serde::Serialize;
use tandem_shared::{DenyReason, MessageType, PlayerId, RoomSummary, TimeSyncHashPayload};

use super::message::NetworkMessage;
use crate::error::{FrameError, FrameResult};

/// `Connected` carrying the assigned id.
#[must_use]
pub fn connected(player: PlayerId) -> NetworkMessage {
    NetworkMessage::with_pod(MessageType::Connected, &player.0)
}

/// Player id of a `Connected` message.
///
/// # Errors
///
/// [`FrameError::PayloadMalformed`] if the content is too short.
pub fn read_player_id(message: &NetworkMessage) -> FrameResult<PlayerId> {
    message
        .reader()
        .read_u32()
        .map(PlayerId)
        .ok_or(FrameError::PayloadMalformed("expected player id"))
}

/// `JoinGameRequest` for `room_id`.
#[must_use]
pub fn join_game_request(room_id: u32) -> NetworkMessage {
    NetworkMessage::with_pod(MessageType::JoinGameRequest, &room_id)
}

/// Room id of a `JoinGameRequest`.
///
/// # Errors
///
/// [`FrameError::PayloadMalformed`] if the content is too short.
pub fn read_room_id(message: &NetworkMessage) -> FrameResult<u32> {
    message
        .reader()
        .read_u32()
        .ok_or(FrameError::PayloadMalformed("expected room id"))
}

/// `JoinGameDenied` with a reason.
#[must_use]
pub fn join_denied(reason: DenyReason) -> NetworkMessage {
    NetworkMessage::with_pod(MessageType::JoinGameDenied, &(reason as u32))
}

/// Reason carried by a `JoinGameDenied`.
///
/// # Errors
///
/// [`FrameError::PayloadMalformed`] for a missing or unknown reason.
pub fn read_deny_reason(message: &NetworkMessage) -> FrameResult<DenyReason> {
    message
        .reader()
        .read_u32()
        .and_then(DenyReason::from_u32)
        .ok_or(FrameError::PayloadMalformed("expected deny reason"))
}

/// A room summary plus its member ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomDescription {
    /// Fixed-layout summary.
    pub summary: RoomSummary,
    /// Member ids in join order.
    pub players: Vec<PlayerId>,
}

/// Room description message of the given type.
///
/// # Errors
///
/// [`FrameError::ContentTooLarge`] if the member list does not fit.
pub fn room_description(
    message_type: MessageType,
    summary: &RoomSummary,
    players: &[PlayerId],
) -> FrameResult<NetworkMessage> {
    let mut message = NetworkMessage::new(message_type);
    let mut writer = message.writer();
    #[allow(clippy::cast_possible_truncation)]
    let count = players.len() as u32;
    let mut ok = writer.write_pod(summary) && writer.write_u32(count);
    for player in players {
        ok = ok && writer.write_u32(player.0);
    }
    if !ok {
        return Err(FrameError::ContentTooLarge {
            declared: players.len() as i64 * 4,
            max: tandem_shared::MAX_CONTENT_SIZE,
        });
    }
    Ok(message)
}

/// Parses a room description message.
///
/// # Errors
///
/// [`FrameError::PayloadMalformed`] if the content is cut short.
pub fn read_room_description(message: &NetworkMessage) -> FrameResult<RoomDescription> {
    const MALFORMED: FrameError = FrameError::PayloadMalformed("expected room description");
    let mut reader = message.reader();
    let summary = reader.read_pod::<RoomSummary>().ok_or(MALFORMED)?;
    let count = reader.read_u32().ok_or(MALFORMED)?;
    let mut players = Vec::new();
    for _ in 0..count {
        players.push(PlayerId(reader.read_u32().ok_or(MALFORMED)?));
    }
    Ok(RoomDescription { summary, players })
}

/// `RoomList` of the given summaries.
#[must_use]
pub fn room_list(rooms: &[RoomSummary]) -> NetworkMessage {
    let mut message = NetworkMessage::new(MessageType::RoomList);
    let mut writer = message.writer();
    #[allow(clippy::cast_possible_truncation)]
    let count = rooms.len() as u32;
    // Listings are capped far below what the content region holds.
    let _ = writer.write_u32(count);
    for room in rooms {
        let _ = writer.write_pod(room);
    }
    message
}

/// Parses a `RoomList`.
///
/// # Errors
///
/// [`FrameError::PayloadMalformed`] if the content is cut short.
pub fn read_room_list(message: &NetworkMessage) -> FrameResult<Vec<RoomSummary>> {
    const MALFORMED: FrameError = FrameError::PayloadMalformed("expected room list");
    let mut reader = message.reader();
    let count = reader.read_u32().ok_or(MALFORMED)?;
    let mut rooms = Vec::new();
    for _ in 0..count {
        rooms.push(reader.read_pod::<RoomSummary>().ok_or(MALFORMED)?);
    }
    Ok(rooms)
}

/// Message carrying one length-prefixed text block.
///
/// # Errors
///
/// [`FrameError::ContentTooLarge`] if the text does not fit.
pub fn text_message(message_type: MessageType, text: &str) -> FrameResult<NetworkMessage> {
    let mut message = NetworkMessage::new(message_type);
    if !message.writer().write_str(text) {
        return Err(FrameError::ContentTooLarge {
            declared: text.len() as i64 + 4,
            max: tandem_shared::MAX_CONTENT_SIZE,
        });
    }
    Ok(message)
}

/// Text block of a [`text_message`].
///
/// # Errors
///
/// [`FrameError::PayloadMalformed`] if no valid string is present.
pub fn read_text(message: &NetworkMessage) -> FrameResult<&str> {
    message
        .reader()
        .read_str()
        .ok_or(FrameError::PayloadMalformed("expected text block"))
}

/// `AdvanceTime` announcing the next game time.
#[must_use]
pub fn advance_time(time: i32) -> NetworkMessage {
    NetworkMessage::with_pod(MessageType::AdvanceTime, &time)
}

/// Game time carried by `AdvanceTime`.
///
/// # Errors
///
/// [`FrameError::PayloadMalformed`] if the content is too short.
pub fn read_time(message: &NetworkMessage) -> FrameResult<i32> {
    message
        .reader()
        .read_i32()
        .ok_or(FrameError::PayloadMalformed("expected game time"))
}

/// `TimeSyncHash` for one slice.
#[must_use]
pub fn time_sync_hash(time: i32, hash: i32) -> NetworkMessage {
    NetworkMessage::with_pod(MessageType::TimeSyncHash, &TimeSyncHashPayload { time, hash })
}

/// `TimeSyncHashDebug` carrying a state dump.
///
/// # Errors
///
/// [`FrameError::ContentTooLarge`] if the dump does not fit.
pub fn time_sync_hash_debug(time: i32, hash: i32, dump: &str) -> FrameResult<NetworkMessage> {
    let mut message =
        NetworkMessage::with_pod(MessageType::TimeSyncHashDebug, &TimeSyncHashPayload { time, hash });
    if !message.writer().write_str(dump) {
        return Err(FrameError::ContentTooLarge {
            declared: dump.len() as i64 + 12,
            max: tandem_shared::MAX_CONTENT_SIZE,
        });
    }
    Ok(message)
}

/// Hash report plus the dump of a debug report.
///
/// # Errors
///
/// [`FrameError::PayloadMalformed`] if the fixed part is missing.
pub fn read_time_sync_hash(message: &NetworkMessage) -> FrameResult<(TimeSyncHashPayload, Option<&str>)> {
    let mut reader = message.reader();
    let payload = reader
        .read_pod::<TimeSyncHashPayload>()
        .ok_or(FrameError::PayloadMalformed("expected time sync hash"))?;
    let dump = if message.kind() == Some(MessageType::TimeSyncHashDebug) {
        reader.read_str()
    } else {
        None
    };
    Ok((payload, dump))
}

/// A gameplay call: a method name and its structured arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameplayMessage {
    /// Gameplay function to invoke.
    pub method: String,
    /// JSON-encoded arguments.
    pub metadata: String,
}

impl GameplayMessage {
    /// Builds a call with `metadata` serialized to JSON.
    ///
    /// # Errors
    ///
    /// [`FrameError::PayloadMalformed`] if `metadata` cannot be serialized.
    pub fn new(method: impl Into<String>, metadata: &impl Serialize) -> FrameResult<Self> {
        let metadata = serde_json::to_string(metadata)
            .map_err(|_| FrameError::PayloadMalformed("metadata is not serializable"))?;
        Ok(Self {
            method: method.into(),
            metadata,
        })
    }

    /// Parses the metadata.
    ///
    /// # Errors
    ///
    /// [`FrameError::PayloadMalformed`] if the JSON does not match `T`.
    pub fn metadata_as<T: DeserializeOwned>(&self) -> FrameResult<T> {
        serde_json::from_str(&self.metadata)
            .map_err(|_| FrameError::PayloadMalformed("metadata does not match the expected shape"))
    }

    /// Encodes as `GenericGameplay`.
    ///
    /// # Errors
    ///
    /// [`FrameError::ContentTooLarge`] if the call does not fit.
    pub fn to_message(&self) -> FrameResult<NetworkMessage> {
        let mut message = NetworkMessage::new(MessageType::GenericGameplay);
        let mut writer = message.writer();
        if !(writer.write_str(&self.method) && writer.write_str(&self.metadata)) {
            return Err(self.too_large());
        }
        Ok(message)
    }

    /// Encodes as `GenericGameplayWithTime` stamped with `time`.
    ///
    /// # Errors
    ///
    /// [`FrameError::ContentTooLarge`] if the call does not fit.
    pub fn to_timed_message(&self, time: i32) -> FrameResult<NetworkMessage> {
        let mut message = NetworkMessage::new(MessageType::GenericGameplayWithTime);
        let mut writer = message.writer();
        if !(writer.write_i32(time) && writer.write_str(&self.method) && writer.write_str(&self.metadata)) {
            return Err(self.too_large());
        }
        Ok(message)
    }

    /// Parses a `GenericGameplay` message.
    ///
    /// # Errors
    ///
    /// [`FrameError::PayloadMalformed`] if the content is not a gameplay call.
    pub fn from_message(message: &NetworkMessage) -> FrameResult<Self> {
        let mut reader = message.reader();
        Self::read_call(&mut reader)
    }

    /// Parses a `GenericGameplayWithTime` message into its time and call.
    ///
    /// # Errors
    ///
    /// [`FrameError::PayloadMalformed`] if the content is not a timed call.
    pub fn from_timed_message(message: &NetworkMessage) -> FrameResult<(i32, Self)> {
        let mut reader = message.reader();
        let time = reader
            .read_i32()
            .ok_or(FrameError::PayloadMalformed("expected game time"))?;
        Ok((time, Self::read_call(&mut reader)?))
    }

    fn read_call(reader: &mut super::serialization::ContentReader<'_>) -> FrameResult<Self> {
        const MALFORMED: FrameError = FrameError::PayloadMalformed("expected gameplay call");
        let method = reader.read_str().ok_or(MALFORMED)?;
        let metadata = reader.read_str().ok_or(MALFORMED)?;
        Ok(Self {
            method: method.to_owned(),
            metadata: metadata.to_owned(),
        })
    }

    fn too_large(&self) -> FrameError {
        FrameError::ContentTooLarge {
            declared: (self.method.len() + self.metadata.len() + 12) as i64,
            max: tandem_shared::MAX_CONTENT_SIZE,
        }
    }
}
