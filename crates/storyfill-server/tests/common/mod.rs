use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use storyfill_server::config::ServerConfig;
use storyfill_server::narration::StaticNarrationProvider;
use storyfill_server::{build_app_with_provider, spawn_room_sweeper};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    _serve: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a server with test-friendly limits and the stub narrator.
    pub async fn new() -> Self {
        Self::from_config(test_config()).await
    }

    pub async fn from_config(config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, state) = build_app_with_provider(
            config,
            StaticNarrationProvider::new("/tts/audio/test.mp3"),
        );
        spawn_room_sweeper(state);

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            _serve: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    pub fn ws_url(&self, room_code: &str, token: &str) -> String {
        format!(
            "ws://{}/v1/ws?room_code={room_code}&token={token}",
            self.addr
        )
    }
}

/// Defaults with the burst limits loosened so multi-step flows don't trip
/// them; individual tests that exercise limiting bring their own config.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.limits.create_room = (1000, 60);
    config.limits.join_room = (1000, 60);
    config.limits.submit_prompt_burst = (1000, 1);
    config.limits.submit_prompt_sustained = (1000, 60);
    config
}

/// POST helper returning the parsed body; panics on transport errors only.
pub async fn post_json(url: &str, body: serde_json::Value) -> (u16, serde_json::Value) {
    let client = reqwest::Client::new();
    let resp = client.post(url).json(&body).send().await.unwrap();
    let status = resp.status().as_u16();
    let value = resp.json().await.unwrap_or(serde_json::Value::Null);
    (status, value)
}

pub async fn get_json(url: &str) -> (u16, serde_json::Value) {
    let resp = reqwest::get(url).await.unwrap();
    let status = resp.status().as_u16();
    let value = resp.json().await.unwrap_or(serde_json::Value::Null);
    (status, value)
}

/// Create a room and return the full CreateRoomResponse body.
pub async fn create_room(server: &TestServer, template_id: &str, name: &str) -> serde_json::Value {
    let (status, body) = post_json(
        &format!("{}/rooms", server.base_url()),
        serde_json::json!({ "template_id": template_id, "display_name": name }),
    )
    .await;
    assert_eq!(status, 200, "create_room failed: {body}");
    body
}

/// Join a room and return the JoinRoomResponse body.
pub async fn join_room(server: &TestServer, code: &str, name: &str) -> serde_json::Value {
    let (status, body) = post_json(
        &format!("{}/rooms/{code}/join", server.base_url()),
        serde_json::json!({ "display_name": name }),
    )
    .await;
    assert_eq!(status, 200, "join_room failed: {body}");
    body
}

pub async fn start_room(server: &TestServer, code: &str, host_token: &str) -> serde_json::Value {
    let (status, body) = post_json(
        &format!("{}/rooms/{code}/start", server.base_url()),
        serde_json::json!({ "host_token": host_token }),
    )
    .await;
    assert_eq!(status, 200, "start_room failed: {body}");
    body
}

/// Fetch a player's prompts for the current round.
pub async fn list_prompts(
    server: &TestServer,
    code: &str,
    round_id: &str,
    player_id: &str,
    player_token: &str,
) -> serde_json::Value {
    let (status, body) = get_json(&format!(
        "{}/rooms/{code}/rounds/{round_id}/prompts?player_id={player_id}&player_token={player_token}",
        server.base_url()
    ))
    .await;
    assert_eq!(status, 200, "list_prompts failed: {body}");
    body
}

pub async fn submit_prompt(
    server: &TestServer,
    code: &str,
    round_id: &str,
    prompt_id: &str,
    player_id: &str,
    player_token: &str,
    value: &str,
) -> (u16, serde_json::Value) {
    post_json(
        &format!(
            "{}/rooms/{code}/rounds/{round_id}/prompts/{prompt_id}:submit",
            server.base_url()
        ),
        serde_json::json!({
            "player_id": player_id,
            "player_token": player_token,
            "value": value,
        }),
    )
    .await
}

/// Submit every prompt held by the given players, choosing values by slot id.
/// Panics if any submission is rejected.
pub async fn submit_all(
    server: &TestServer,
    code: &str,
    round_id: &str,
    players: &[(String, String)],
    values_by_slot: &HashMap<&str, &str>,
) {
    for (player_id, player_token) in players {
        let prompts = list_prompts(server, code, round_id, player_id, player_token).await;
        for prompt in prompts["prompts"].as_array().unwrap() {
            if prompt["submitted"].as_bool().unwrap() {
                continue;
            }
            let slot_id = prompt["slot_id"].as_str().unwrap();
            let value = values_by_slot
                .get(slot_id)
                .copied()
                .unwrap_or("something nice");
            let (status, body) = submit_prompt(
                server,
                code,
                round_id,
                prompt["id"].as_str().unwrap(),
                player_id,
                player_token,
                value,
            )
            .await;
            assert_eq!(status, 200, "submit failed: {body}");
        }
    }
}

/// The canonical slot values used by the end-to-end scenarios.
pub fn forest_values() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("adjective", "brave"),
        ("name", "Sam"),
        ("verb", "running"),
        ("place", "forest"),
        ("sound", "boom"),
        ("noun", "squirrels"),
    ])
}

pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

/// Read the next text frame as JSON (5s timeout). Panics on close.
pub async fn ws_read_json(stream: &mut WsStream) -> serde_json::Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(text.as_str()).unwrap();
                },
                Some(Ok(Message::Close(frame))) => panic!("WebSocket closed: {frame:?}"),
                Some(Ok(_)) => continue,
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket message")
}

/// Read frames until the socket closes; returns (close_code, events_seen).
pub async fn ws_collect_until_close(stream: &mut WsStream) -> (Option<u16>, Vec<serde_json::Value>) {
    let mut events = Vec::new();
    let deadline = Duration::from_secs(10);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    events.push(serde_json::from_str(text.as_str()).unwrap());
                },
                Some(Ok(Message::Close(frame))) => {
                    return (frame.map(|f| u16::from(f.code)), events);
                },
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return (None, events),
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket close")
}

/// Expect the connection to be refused with a close frame carrying `code`.
pub async fn ws_expect_close(url: &str, code: u16) {
    let mut stream = ws_connect(url).await;
    let (close_code, _) = ws_collect_until_close(&mut stream).await;
    assert_eq!(close_code, Some(code));
}
