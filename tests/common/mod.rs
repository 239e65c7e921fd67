//! Common test utilities - CombatTest harness for end-to-end testing

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use combatd::combat::ScriptedRoller;
use combatd::directory::{GameSession, SqliteDirectory, StatBlock};
use combatd::{Config, RealtimeConfig, Server};
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// A registered account
#[derive(Debug, Clone)]
pub struct TestUser {
    pub id: String,
    pub username: String,
    pub token: String,
}

/// Test harness that spawns a real combatd server on a random port
pub struct CombatTest {
    pub addr: SocketAddr,
    pub client: Client,
    /// Dice the server rolls; push values before an action to script it
    pub roller: Arc<ScriptedRoller>,
    server: Arc<Server>,
    _handle: JoinHandle<()>,
}

impl CombatTest {
    /// Start a new test server instance
    pub async fn start() -> Result<Self> {
        Self::start_with(RealtimeConfig::default()).await
    }

    /// Start with custom realtime tuning
    pub async fn start_with(realtime: RealtimeConfig) -> Result<Self> {
        // Find a random available port
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        drop(listener);

        let config = Config {
            bind_addr: addr,
            db_path: None,
            realtime,
        };

        let roller = Arc::new(ScriptedRoller::new([]));
        let server = Arc::new(Server::with_roller(config, roller.clone()).await?);
        let server_clone = server.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = server_clone.run().await {
                eprintln!("Server error: {}", e);
            }
        });

        let client = Client::builder().timeout(Duration::from_secs(5)).build()?;

        // Poll until server is ready (max 2 seconds)
        let mut ready = false;
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if client
                .get(format!("http://{}/health", addr))
                .send()
                .await
                .is_ok()
            {
                ready = true;
                break;
            }
        }

        if !ready {
            panic!("Server failed to start within 2 seconds");
        }

        Ok(Self {
            addr,
            client,
            roller,
            server,
            _handle: handle,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .get(format!("{}{}", self.base_url(), path))
            .send()
            .await?)
    }

    /// POST a JSON body, with a bearer token when given
    pub async fn post<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        token: Option<&str>,
        body: &T,
    ) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url(), path))
            .json(body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        Ok(request.send().await?)
    }

    /// POST raw bytes as JSON
    pub async fn post_raw(&self, path: &str, token: &str, body: &'static str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .post(format!("{}{}", self.base_url(), path))
            .bearer_auth(token)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await?)
    }

    pub fn shutdown(&self) {
        self.server.shutdown();
    }

    /// Poll `/health` until the live room count equals `expected`
    pub async fn wait_for_rooms(&self, expected: u64) -> Result<()> {
        let mut last = Value::Null;
        for _ in 0..50 {
            let health: Value = self.get("/health").await?.json().await?;
            if health["rooms"].as_u64() == Some(expected) {
                return Ok(());
            }
            last = health["rooms"].clone();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        anyhow::bail!("expected {expected} rooms, still {last}")
    }

    fn directory(&self) -> SqliteDirectory {
        SqliteDirectory::new(self.server.db().pool().clone())
    }

    /// Register an account through the API
    pub async fn register(&self, username: &str, role: &str) -> Result<TestUser> {
        let resp = self
            .post(
                "/auth/register",
                None,
                &json!({"username": username, "password": "password123", "role": role}),
            )
            .await?;
        anyhow::ensure!(resp.status() == 201, "register failed: {}", resp.status());
        let body: Value = resp.json().await?;
        Ok(TestUser {
            id: body["accountId"].as_str().unwrap_or_default().to_string(),
            username: username.to_string(),
            token: body["token"].as_str().unwrap_or_default().to_string(),
        })
    }

    /// Create a game session facilitated by `dm`
    pub async fn create_session(&self, name: &str, dm: &TestUser) -> Result<GameSession> {
        let dir = self.directory();
        let session = dir.create_session(name, &dm.id).await?;
        Ok(session)
    }

    pub async fn create_character(&self, owner: &TestUser, name: &str, stats: StatBlock) -> Result<String> {
        let character = self.directory().create_character(&owner.id, name, stats).await?;
        Ok(character.id)
    }

    pub fn ws_url(&self, room: Option<&str>) -> String {
        match room {
            Some(room) => format!("ws://{}/ws?room={}", self.addr, room),
            None => format!("ws://{}/ws", self.addr),
        }
    }

    /// Connect and consume the `auth_required` greeting
    pub async fn connect_ws(&self, room: Option<&str>) -> Result<WsClient> {
        let (ws_stream, _) = connect_async(self.ws_url(room)).await?;
        let (write, read) = ws_stream.split();
        let mut client = WsClient { write, read };
        let greeting = client.recv_json().await?;
        anyhow::ensure!(greeting["type"] == "auth_required", "unexpected greeting: {greeting}");
        Ok(client)
    }

    /// Connect, authenticate into `room` and consume `auth_success`
    pub async fn join_room(&self, user: &TestUser, room: &str) -> Result<WsClient> {
        let mut client = self.connect_ws(None).await?;
        client
            .send_json(&json!({"type": "auth", "token": user.token, "room": room}))
            .await?;
        let reply = client.recv_json().await?;
        anyhow::ensure!(reply["type"] == "auth_success", "auth failed: {reply}");
        Ok(client)
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// WebSocket client for testing
pub struct WsClient {
    write: futures_util::stream::SplitSink<WsStream, Message>,
    read: futures_util::stream::SplitStream<WsStream>,
}

impl WsClient {
    pub async fn send_json(&mut self, value: &Value) -> Result<()> {
        self.write
            .send(Message::Text(value.to_string().into()))
            .await?;
        Ok(())
    }

    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.write.send(Message::Text(text.to_string().into())).await?;
        Ok(())
    }

    /// Receive the next message as JSON
    pub async fn recv_json(&mut self) -> Result<Value> {
        self.recv_json_timeout(Duration::from_secs(5)).await
    }

    pub async fn recv_json_timeout(&mut self, timeout: Duration) -> Result<Value> {
        tokio::time::timeout(timeout, async {
            loop {
                match self.read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        return Ok(serde_json::from_str(&text)?);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        anyhow::bail!("WebSocket closed");
                    }
                    Some(Err(e)) => anyhow::bail!("WebSocket error: {e}"),
                    _ => continue, // Skip binary/ping/pong frames
                }
            }
        })
        .await
        .map_err(|_| anyhow::anyhow!("Timeout waiting for message"))?
    }

    /// Skip messages until one of the given `type` arrives
    pub async fn recv_type(&mut self, kind: &str) -> Result<Value> {
        loop {
            let msg = self.recv_json().await?;
            if msg["type"] == kind {
                return Ok(msg);
            }
        }
    }

    /// Skip messages until a combat update of the given kind arrives
    pub async fn recv_combat(&mut self, kind: &str) -> Result<Value> {
        loop {
            let msg = self.recv_type("combat").await?;
            if msg["data"]["kind"] == kind {
                return Ok(msg);
            }
        }
    }

    /// True if nothing arrives within `wait`
    pub async fn is_silent(&mut self, wait: Duration) -> bool {
        self.recv_json_timeout(wait).await.is_err()
    }

    /// True once the server has closed the connection
    pub async fn closed(&mut self) -> bool {
        let result = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match self.read.next().await {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return true,
                    _ => continue,
                }
            }
        })
        .await;
        result.unwrap_or(false)
    }

    pub async fn close(mut self) -> Result<()> {
        self.write.send(Message::Close(None)).await?;
        Ok(())
    }
}
