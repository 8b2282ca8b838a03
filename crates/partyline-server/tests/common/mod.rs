use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use partyline_core::game_registry::GameType;
use partyline_core::net::messages::{
    ClientMessage, CreateRoomMsg, JoinRoomMsg, JoinedMsg, RoomCreatedMsg, ServerMessage,
};
use partyline_core::net::protocol::{decode_server_message, encode_client_message};
use partyline_core::test_helpers::EngineProbe;

use partyline_server::build_router;
use partyline_server::config::{AuthFileConfig, ServerConfig};
use partyline_server::game_session::ServerGameRegistry;
use partyline_server::state::AppState;
use partyline_server::store::{MemoryStore, SharedStore};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    _shutdown: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server with no auth and no store.
    pub async fn new() -> Self {
        Self::start(ServerConfig::default(), None, ServerGameRegistry::new()).await
    }

    /// Start a test server with bearer token auth.
    pub async fn with_auth(token: &str) -> Self {
        let config = ServerConfig {
            auth: AuthFileConfig {
                bearer_token: Some(token.to_string()),
            },
            ..ServerConfig::default()
        };
        Self::start(config, None, ServerGameRegistry::new()).await
    }

    /// Start a test server backed by an in-process store.
    pub async fn with_store(store: &Arc<MemoryStore>) -> Self {
        let shared: SharedStore = Arc::clone(store) as SharedStore;
        Self::start(ServerConfig::default(), Some(shared), ServerGameRegistry::new()).await
    }

    /// Start a test server whose only game is a scripted trivia engine with
    /// no warm-up.
    pub async fn with_probe(probe: &EngineProbe) -> Self {
        let mut registry = ServerGameRegistry::empty();
        registry.register(GameType::Trivia, probe.factory(GameType::Trivia, Duration::ZERO));
        Self::start(ServerConfig::default(), None, registry).await
    }

    pub async fn start(
        config: ServerConfig,
        store: Option<SharedStore>,
        registry: ServerGameRegistry,
    ) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let backend = if store.is_some() { "memory" } else { "none" };
        let state = AppState::with_registry(config, store, backend, registry);
        let app = build_router(state.clone());

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            state,
            _shutdown: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

/// Connect as a signed-in account (the upstream sets `x-account-id`).
pub async fn ws_connect_as(url: &str, account: &str) -> WsStream {
    let mut request = url.into_client_request().unwrap();
    request
        .headers_mut()
        .insert("x-account-id", HeaderValue::from_str(account).unwrap());
    let (stream, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    stream
}

/// Send a ClientMessage from a WS stream.
pub async fn ws_send_client_msg(stream: &mut WsStream, msg: &ClientMessage) {
    let encoded = encode_client_message(msg).unwrap();
    stream.send(Message::Binary(encoded.into())).await.unwrap();
}

/// Read raw binary data from a WebSocket stream (5s timeout).
pub async fn ws_read_raw(stream: &mut WsStream) -> Vec<u8> {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return data.to_vec(),
                Some(Ok(Message::Close(_))) => panic!("WebSocket closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket message")
}

/// Read the next ServerMessage from a WebSocket stream (5s timeout).
pub async fn ws_read_server_msg(stream: &mut WsStream) -> ServerMessage {
    let data = ws_read_raw(stream).await;
    decode_server_message(&data).unwrap()
}

/// Skip messages until one matches `pred`.
pub async fn ws_read_until(
    stream: &mut WsStream,
    pred: impl Fn(&ServerMessage) -> bool,
) -> ServerMessage {
    loop {
        let msg = ws_read_server_msg(stream).await;
        if pred(&msg) {
            return msg;
        }
    }
}

/// The terminal response to the last action: RoomCreated, Joined, Ack or Error.
pub async fn ws_read_result(stream: &mut WsStream) -> ServerMessage {
    ws_read_until(stream, |m| {
        matches!(
            m,
            ServerMessage::RoomCreated(_)
                | ServerMessage::Joined(_)
                | ServerMessage::Ack(_)
                | ServerMessage::Error(_)
        )
    })
    .await
}

/// Send an action and return its terminal response.
pub async fn ws_request(stream: &mut WsStream, msg: &ClientMessage) -> ServerMessage {
    ws_send_client_msg(stream, msg).await;
    ws_read_result(stream).await
}

/// Create a room as host `name`.
pub async fn ws_create_room(stream: &mut WsStream, name: &str) -> RoomCreatedMsg {
    let msg = ClientMessage::CreateRoom(CreateRoomMsg {
        host_name: name.to_string(),
    });
    match ws_request(stream, &msg).await {
        ServerMessage::RoomCreated(created) => *created,
        other => panic!("Expected RoomCreated, got: {other:?}"),
    }
}

pub fn join_msg(room_code: &str, name: &str) -> ClientMessage {
    ClientMessage::JoinRoom(JoinRoomMsg {
        room_code: room_code.to_string(),
        player_name: name.to_string(),
        avatar: None,
        language: None,
    })
}

/// Join `room_code` as `name`, expecting success.
pub async fn ws_join_room(stream: &mut WsStream, room_code: &str, name: &str) -> JoinedMsg {
    match ws_request(stream, &join_msg(room_code, name)).await {
        ServerMessage::Joined(joined) => *joined,
        other => panic!("Expected Joined, got: {other:?}"),
    }
}

/// Assert `msg` is an Error of the given kind.
pub fn assert_error_kind(msg: &ServerMessage, kind: &str) {
    match msg {
        ServerMessage::Error(e) => assert_eq!(e.kind, kind, "unexpected error: {e:?}"),
        other => panic!("Expected Error({kind}), got: {other:?}"),
    }
}
