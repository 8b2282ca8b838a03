use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use partyline_core::game_trait::EngineSnapshot;
use partyline_core::net::messages::{
    ClientMessage, GameStateMsg, JoinedMsg, RoomCreatedMsg, RoomView, ServerMessage,
};
use partyline_core::net::protocol::{MAX_MESSAGE_SIZE, decode_client_message};
use partyline_core::player::validate_player_name;
use partyline_core::room::Room;

use crate::auth;
use crate::error::RoomError;
use crate::players::JoinRequest;
use crate::service::PlayerSession;
use crate::state::{AppState, ConnectionGuard};

pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let max_ws = state.config.limits.max_ws_connections;
    let current = state.ws_connection_count.load(Ordering::Relaxed);
    if current >= max_ws {
        tracing::warn!(current, max = max_ws, "WS connection limit reached");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    // Hosts signed in upstream get their rooms back across devices.
    let owner = auth::account_id(&headers);
    ws.max_message_size(MAX_MESSAGE_SIZE * 2)
        .on_upgrade(move |socket| handle_socket(socket, state, owner))
}

async fn handle_socket(socket: WebSocket, state: AppState, owner: Option<String>) {
    let _guard = ConnectionGuard::new(Arc::clone(&state.ws_connection_count));
    let conn = uuid::Uuid::new_v4().to_string();
    let (ws_sender, mut ws_receiver) = socket.split();

    let (tx, rx) = mpsc::channel::<Bytes>(state.config.limits.player_message_buffer);
    state.rooms.write().await.register_sender(&conn, tx);
    spawn_writer(ws_sender, rx);
    tracing::debug!(conn = %conn, "Connection opened");

    let mut session = Session {
        state: &state,
        conn: conn.clone(),
        owner,
        role: Role::None,
    };
    read_loop(&mut ws_receiver, &mut session).await;

    // Transport gone: mark whoever this was as disconnected, keep the room.
    let mut rooms = state.rooms.write().await;
    if let Some(code) = rooms.leave_room(&conn, true) {
        rooms.broadcast_room_update(&code);
    }
    rooms.unregister_sender(&conn);
    drop(rooms);

    tracing::info!(conn = %conn, role = ?session.role, "Connection closed");
}

fn spawn_writer(
    mut ws_sender: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Bytes>,
) {
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if ws_sender.send(Message::Binary(data)).await.is_err() {
                break;
            }
        }
    });
}

/// Per-connection rate limiter (token bucket).
struct RateLimiter {
    tokens: f64,
    last_refill: tokio::time::Instant,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
}

impl RateLimiter {
    fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            tokens: max_tokens,
            last_refill: tokio::time::Instant::now(),
            max_tokens,
            refill_rate,
        }
    }

    /// Returns true if the message is allowed; false if rate-limited.
    fn allow(&mut self) -> bool {
        let now = tokio::time::Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

async fn read_loop(
    ws_receiver: &mut futures::stream::SplitStream<WebSocket>,
    session: &mut Session<'_>,
) {
    let limits = &session.state.config.limits;
    let mut rate_limiter =
        RateLimiter::new(limits.ws_rate_limit_burst, limits.ws_rate_limit_per_sec);

    while let Some(Ok(msg)) = ws_receiver.next().await {
        let data = match msg {
            Message::Binary(d) => d,
            Message::Close(_) => break,
            _ => continue,
        };

        if !rate_limiter.allow() {
            tracing::warn!(conn = %session.conn, "Rate limited");
            session
                .send(ServerMessage::error("rate_limited", "Too many messages, slow down"))
                .await;
            continue;
        }

        if data.is_empty() || data.len() > MAX_MESSAGE_SIZE {
            session
                .send(ServerMessage::error("bad_message", "Message is empty or too large"))
                .await;
            continue;
        }

        let msg = match decode_client_message(&data) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(conn = %session.conn, error = %e, "Undecodable client message");
                session
                    .send(ServerMessage::error("bad_message", "Could not decode message"))
                    .await;
                continue;
            },
        };

        let msg_type = msg.message_type();
        let outcome = match session.handle(msg).await {
            Ok(outcome) => outcome,
            Err(failure) => {
                tracing::debug!(
                    conn = %session.conn, ?msg_type, kind = failure.kind, reason = %failure.reason,
                    "Client action failed"
                );
                Outcome::reply(ServerMessage::error(failure.kind, failure.reason))
            },
        };
        session.finish(outcome).await;
    }
}

/// What a connection is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Role {
    None,
    Host(String),
    Player(String),
}

/// A failed action, sent back as `ServerMessage::Error`.
struct Failure {
    kind: &'static str,
    reason: String,
}

impl Failure {
    fn new(kind: &'static str, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl From<RoomError> for Failure {
    fn from(e: RoomError) -> Self {
        Self {
            kind: e.kind(),
            reason: e.to_string(),
        }
    }
}

/// The terminal response to one client action, plus what the rest of the
/// room should hear about it.
struct Outcome {
    reply: ServerMessage,
    room_update: Option<String>,
    game_state: Option<GameStateMsg>,
}

impl Outcome {
    fn reply(reply: ServerMessage) -> Self {
        Self {
            reply,
            room_update: None,
            game_state: None,
        }
    }

    fn ack(action: &str) -> Self {
        Self::reply(ServerMessage::ack(action))
    }

    fn notify(mut self, code: &str) -> Self {
        self.room_update = Some(code.to_string());
        self
    }

    fn with_game_state(mut self, code: &str, snapshot: Option<EngineSnapshot>) -> Self {
        self.game_state = snapshot.map(|snapshot| GameStateMsg {
            room_code: code.to_string(),
            snapshot,
        });
        self
    }
}

struct Session<'a> {
    state: &'a AppState,
    conn: String,
    owner: Option<String>,
    role: Role,
}

impl Session<'_> {
    async fn send(&self, msg: ServerMessage) {
        self.state.rooms.read().await.send_to(&self.conn, &msg);
    }

    /// Reply first, then fan out, so the actor sees its own result before
    /// the room update it caused.
    async fn finish(&self, outcome: Outcome) {
        let rooms = self.state.rooms.read().await;
        rooms.send_to(&self.conn, &outcome.reply);
        if let Some(state) = outcome.game_state {
            let code = state.room_code.clone();
            rooms.broadcast(&code, &ServerMessage::GameState(Box::new(state)));
        }
        if let Some(ref code) = outcome.room_update {
            rooms.broadcast_room_update(code);
        }
    }

    fn require_unattached(&self) -> Result<(), Failure> {
        match self.role {
            Role::None => Ok(()),
            _ => Err(Failure::new(
                "invalid_request",
                "This connection is already attached to a room",
            )),
        }
    }

    /// The room this connection hosts, checked against the live registry.
    async fn hosted_room(&self) -> Result<String, Failure> {
        let Role::Host(ref code) = self.role else {
            return Err(RoomError::NotHost.into());
        };
        let rooms = self.state.rooms.read().await;
        if !rooms.room_exists(code) {
            return Err(RoomError::RoomNotFound.into());
        }
        if !rooms.is_host(code, &self.conn) {
            return Err(RoomError::NotHost.into());
        }
        Ok(code.clone())
    }

    async fn handle(&mut self, msg: ClientMessage) -> Result<Outcome, Failure> {
        match msg {
            ClientMessage::CreateRoom(create) => {
                self.require_unattached()?;
                let name = validate_player_name(&create.host_name).ok_or(RoomError::InvalidName)?;
                let hosted = self
                    .state
                    .service
                    .create_or_get_room(&self.conn, &name, self.owner.as_deref())
                    .await;
                self.role = Role::Host(hosted.room.code.clone());
                Ok(host_attached(hosted.room, hosted.host_token))
            },
            ClientMessage::ReconnectHost(reconnect) => {
                self.require_unattached()?;
                let room = self
                    .state
                    .service
                    .reconnect_host(&reconnect.token, &self.conn)
                    .await?;
                self.role = Role::Host(room.code.clone());
                Ok(host_attached(room, reconnect.token))
            },
            ClientMessage::JoinRoom(join) => {
                self.require_unattached()?;
                let request = JoinRequest {
                    name: join.player_name,
                    avatar: join.avatar,
                    language: join.language,
                    stored_avatar: None,
                };
                let player = self
                    .state
                    .service
                    .join_room(&join.room_code, &self.conn, request)
                    .await?;
                Ok(self.player_attached(player))
            },
            ClientMessage::ReconnectPlayer(reconnect) => {
                self.require_unattached()?;
                let player = self
                    .state
                    .service
                    .reconnect_player(
                        &reconnect.room_code,
                        &reconnect.token,
                        &self.conn,
                        reconnect.language,
                    )
                    .await?;
                Ok(self.player_attached(player))
            },
            ClientMessage::LeaveRoom => {
                let code = match self.role {
                    Role::None => return Err(RoomError::RoomNotFound.into()),
                    // A host stepping away leaves the room running.
                    Role::Host(_) => self.state.rooms.write().await.leave_room(&self.conn, true),
                    Role::Player(_) => self.state.rooms.write().await.leave_room(&self.conn, false),
                };
                self.role = Role::None;
                let outcome = Outcome::ack("leave_room");
                Ok(match code {
                    Some(code) => outcome.notify(&code),
                    None => outcome,
                })
            },
            ClientMessage::StartGame(start) => {
                let code = self.hosted_room().await?;
                let snapshot = self
                    .state
                    .service
                    .start_game(&code, start.game_type, start.content)
                    .await?;
                Ok(Outcome::ack("start_game")
                    .notify(&code)
                    .with_game_state(&code, Some(snapshot)))
            },
            ClientMessage::EndGame => {
                let code = self.hosted_room().await?;
                let mut rooms = self.state.rooms.write().await;
                rooms.end_game(&code)?;
                Ok(Outcome::ack("end_game").notify(&code))
            },
            ClientMessage::PauseGame => {
                let code = self.hosted_room().await?;
                let mut rooms = self.state.rooms.write().await;
                if !rooms.pause_game(&code)? {
                    return Err(Failure::new("not_allowed", "The game cannot be paused right now"));
                }
                let snapshot = rooms.get_game(&code);
                Ok(Outcome::ack("pause_game")
                    .notify(&code)
                    .with_game_state(&code, snapshot))
            },
            ClientMessage::ResumeGame => {
                let code = self.hosted_room().await?;
                let mut rooms = self.state.rooms.write().await;
                if !rooms.resume_game(&code)? {
                    return Err(Failure::new("not_allowed", "The game is not paused"));
                }
                let snapshot = rooms.get_game(&code);
                Ok(Outcome::ack("resume_game")
                    .notify(&code)
                    .with_game_state(&code, snapshot))
            },
            ClientMessage::EndRoom => {
                let code = self.hosted_room().await?;
                self.state.rooms.write().await.delete_room(&code);
                self.role = Role::None;
                Ok(Outcome::ack("end_room"))
            },
            ClientMessage::UpdateSettings(update) => {
                let code = self.hosted_room().await?;
                let updated = self
                    .state
                    .rooms
                    .write()
                    .await
                    .update_settings(&code, update.settings)
                    .map_err(|e| Failure::new("invalid_settings", e.to_string()))?;
                if !updated {
                    return Err(RoomError::RoomNotFound.into());
                }
                Ok(Outcome::ack("update_settings").notify(&code))
            },
            ClientMessage::SetJukebox(set) => {
                let code = self.hosted_room().await?;
                if !self.state.rooms.write().await.set_jukebox(&code, set.jukebox) {
                    return Err(RoomError::RoomNotFound.into());
                }
                Ok(Outcome::ack("set_jukebox"))
            },
            ClientMessage::GameInput(input) => {
                let Role::Player(ref code) = self.role else {
                    return Err(Failure::new("not_allowed", "Only players send game input"));
                };
                let code = code.clone();
                let accepted = self
                    .state
                    .rooms
                    .write()
                    .await
                    .apply_game_input(&code, &self.conn, &input.input)?;
                if !accepted {
                    return Err(Failure::new("input_rejected", "Input was not accepted"));
                }
                Ok(Outcome::ack("game_input").notify(&code))
            },
        }
    }

    fn player_attached(&mut self, player: PlayerSession) -> Outcome {
        let code = player.room.code.clone();
        self.role = Role::Player(code.clone());
        Outcome::reply(ServerMessage::Joined(Box::new(JoinedMsg {
            player_id: self.conn.clone(),
            player_token: player.token,
            reconnected: player.reconnected,
            session_score: player.session_score,
            room: RoomView::from(&player.room),
        })))
        .notify(&code)
    }
}

fn host_attached(room: Room, host_token: String) -> Outcome {
    let code = room.code.clone();
    Outcome::reply(ServerMessage::RoomCreated(Box::new(RoomCreatedMsg {
        host_token,
        room: RoomView::from(&room),
    })))
    .notify(&code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rate_limiter_allows_burst_then_refills() {
        let mut limiter = RateLimiter::new(3.0, 1.0);
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());

        tokio::time::advance(std::time::Duration::from_secs(1)).await;
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[test]
    fn outcome_builders() {
        let outcome = Outcome::ack("end_game").notify("ABCD");
        assert_eq!(outcome.reply, ServerMessage::ack("end_game"));
        assert_eq!(outcome.room_update.as_deref(), Some("ABCD"));
        assert!(outcome.with_game_state("ABCD", None).game_state.is_none());
    }

    #[test]
    fn room_errors_keep_their_kind() {
        let failure = Failure::from(RoomError::RoomFull);
        assert_eq!(failure.kind, "room_full");
        assert_eq!(failure.reason, "Room is full");
    }
}
