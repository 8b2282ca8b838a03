use serde::{Deserialize, Serialize};

use super::messages::{ClientMessage, MessageType, ServerMessage};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum message size in bytes, type prefix included.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024; // 64 KiB

#[derive(Debug)]
pub enum ProtocolError {
    EmptyMessage,
    UnknownMessageType(u8),
    UnexpectedDirection(MessageType),
    PayloadTooLarge(usize),
    SerializeError(String),
    DeserializeError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::UnknownMessageType(b) => write!(f, "unknown message type: 0x{b:02x}"),
            Self::UnexpectedDirection(t) => write!(f, "{t:?} is not valid in this direction"),
            Self::PayloadTooLarge(size) => {
                write!(
                    f,
                    "payload too large: {size} bytes (max {MAX_MESSAGE_SIZE})"
                )
            },
            Self::SerializeError(e) => write!(f, "serialize error: {e}"),
            Self::DeserializeError(e) => write!(f, "deserialize error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Encode a serializable payload with a 1-byte type prefix.
pub fn encode_message<T: Serialize + ?Sized>(
    msg_type: MessageType,
    payload: &T,
) -> Result<Vec<u8>, ProtocolError> {
    let payload_bytes = rmp_serde::to_vec_named(payload)
        .map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
    let total = 1 + payload_bytes.len();
    if total > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(total));
    }
    let mut buf = Vec::with_capacity(total);
    buf.push(msg_type as u8);
    buf.extend_from_slice(&payload_bytes);
    Ok(buf)
}

/// Encode a `ClientMessage` to wire format.
pub fn encode_client_message(msg: &ClientMessage) -> Result<Vec<u8>, ProtocolError> {
    let t = msg.message_type();
    match msg {
        ClientMessage::CreateRoom(m) => encode_message(t, m),
        ClientMessage::ReconnectHost(m) => encode_message(t, m),
        ClientMessage::JoinRoom(m) => encode_message(t, m),
        ClientMessage::ReconnectPlayer(m) => encode_message(t, m),
        ClientMessage::StartGame(m) => encode_message(t, m),
        ClientMessage::UpdateSettings(m) => encode_message(t, m),
        ClientMessage::SetJukebox(m) => encode_message(t, m),
        ClientMessage::GameInput(m) => encode_message(t, m),
        ClientMessage::LeaveRoom
        | ClientMessage::EndGame
        | ClientMessage::PauseGame
        | ClientMessage::ResumeGame
        | ClientMessage::EndRoom => encode_message(t, &()),
    }
}

/// Encode a `ServerMessage` to wire format.
pub fn encode_server_message(msg: &ServerMessage) -> Result<Vec<u8>, ProtocolError> {
    let t = msg.message_type();
    match msg {
        ServerMessage::RoomCreated(m) => encode_message(t, m.as_ref()),
        ServerMessage::Joined(m) => encode_message(t, m.as_ref()),
        ServerMessage::Ack(m) => encode_message(t, m),
        ServerMessage::Error(m) => encode_message(t, m),
        ServerMessage::RoomUpdate(m) => encode_message(t, m.as_ref()),
        ServerMessage::GameState(m) => encode_message(t, m.as_ref()),
        ServerMessage::Leaderboard(m) => encode_message(t, m),
        ServerMessage::RoomClosed(m) => encode_message(t, m),
    }
}

/// Extract the message type byte from raw wire data.
pub fn decode_message_type(data: &[u8]) -> Result<MessageType, ProtocolError> {
    let Some(&first) = data.first() else {
        return Err(ProtocolError::EmptyMessage);
    };
    MessageType::from_byte(first).ok_or(ProtocolError::UnknownMessageType(first))
}

/// Decode a MessagePack payload (bytes after the type prefix).
pub fn decode_payload<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(data.len()));
    }
    rmp_serde::from_slice(&data[1..]).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
}

/// Decode raw wire data into a `ClientMessage`.
pub fn decode_client_message(data: &[u8]) -> Result<ClientMessage, ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(data.len()));
    }
    let msg = match decode_message_type(data)? {
        MessageType::CreateRoom => ClientMessage::CreateRoom(decode_payload(data)?),
        MessageType::ReconnectHost => ClientMessage::ReconnectHost(decode_payload(data)?),
        MessageType::JoinRoom => ClientMessage::JoinRoom(decode_payload(data)?),
        MessageType::ReconnectPlayer => ClientMessage::ReconnectPlayer(decode_payload(data)?),
        MessageType::LeaveRoom => ClientMessage::LeaveRoom,
        MessageType::StartGame => ClientMessage::StartGame(decode_payload(data)?),
        MessageType::EndGame => ClientMessage::EndGame,
        MessageType::PauseGame => ClientMessage::PauseGame,
        MessageType::ResumeGame => ClientMessage::ResumeGame,
        MessageType::EndRoom => ClientMessage::EndRoom,
        MessageType::UpdateSettings => ClientMessage::UpdateSettings(decode_payload(data)?),
        MessageType::SetJukebox => ClientMessage::SetJukebox(decode_payload(data)?),
        MessageType::GameInput => ClientMessage::GameInput(decode_payload(data)?),
        other => return Err(ProtocolError::UnexpectedDirection(other)),
    };
    Ok(msg)
}

/// Decode raw wire data into a `ServerMessage`.
pub fn decode_server_message(data: &[u8]) -> Result<ServerMessage, ProtocolError> {
    let msg = match decode_message_type(data)? {
        MessageType::RoomCreated => ServerMessage::RoomCreated(Box::new(decode_payload(data)?)),
        MessageType::Joined => ServerMessage::Joined(Box::new(decode_payload(data)?)),
        MessageType::Ack => ServerMessage::Ack(decode_payload(data)?),
        MessageType::Error => ServerMessage::Error(decode_payload(data)?),
        MessageType::RoomUpdate => ServerMessage::RoomUpdate(Box::new(decode_payload(data)?)),
        MessageType::GameState => ServerMessage::GameState(Box::new(decode_payload(data)?)),
        MessageType::Leaderboard => ServerMessage::Leaderboard(decode_payload(data)?),
        MessageType::RoomClosed => ServerMessage::RoomClosed(decode_payload(data)?),
        other => return Err(ProtocolError::UnexpectedDirection(other)),
    };
    Ok(msg)
}
