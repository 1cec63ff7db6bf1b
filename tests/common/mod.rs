#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use futures_util::{SinkExt, StreamExt};
use http::{Method, Request};
use matchserver::cluster::InMemoryCluster;
use matchserver::config::ClusterBackend;
use matchserver::orchestrator::provisioner::{ProvisionSettings, Provisioner, StaticNodeAddress};
use matchserver::orchestrator::Orchestrator;
use matchserver::routes;
use matchserver::state::AppState;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Test server backed by an in-process cluster. Each instance is isolated.
pub struct TestServer {
    pub state: AppState,
    pub cluster: InMemoryCluster,
}

impl TestServer {
    pub fn new() -> Self {
        Self::with_cluster(InMemoryCluster::new(), Duration::from_secs(5))
    }

    pub fn with_cluster(cluster: InMemoryCluster, ready_timeout: Duration) -> Self {
        let provisioner = Provisioner::new(
            Arc::new(cluster.clone()),
            Arc::new(StaticNodeAddress("localhost".into())),
            ProvisionSettings {
                image: "igormendonca/damas-pod".into(),
                container_name: "damas-pod".into(),
                container_port: 8080,
                workload_prefix: "damas-pod".into(),
                endpoint_prefix: "game-service-".into(),
                ready_timeout,
            },
        );
        let state = AppState {
            orchestrator: Orchestrator::new(provisioner),
            cluster_backend: ClusterBackend::Memory,
        };
        Self { state, cluster }
    }

    /// Returns an Axum Router wired to this server's state for `oneshot()` calls.
    pub fn router(&self) -> axum::Router {
        routes::router(self.state.clone())
    }

    /// Binds a TCP listener on port 0, spawns the server, and returns the ws URL.
    pub async fn spawn(&self) -> String {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("ws://127.0.0.1:{}/ws", addr.port())
    }
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Parse a response body into a `serde_json::Value`.
pub async fn parse_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ---------------------------------------------------------------------------
// WebSocket helpers
// ---------------------------------------------------------------------------

pub async fn connect(url: &str) -> Socket {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

pub async fn send_json(ws: &mut Socket, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Next text frame as JSON, failing the test after two seconds.
pub async fn recv_json(ws: &mut Socket) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("socket closed")
            .expect("socket error");
        if msg.is_text() {
            let text = msg.into_text().unwrap();
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Asserts nothing arrives within `wait`.
pub async fn expect_silence(ws: &mut Socket, wait: Duration) {
    if let Ok(Some(Ok(msg))) = tokio::time::timeout(wait, ws.next()).await {
        panic!("expected no message, got {msg:?}");
    }
}

/// Connects and logs in, consuming the `login_success` reply.
pub async fn login(url: &str, username: &str) -> Socket {
    let mut ws = connect(url).await;
    send_json(
        &mut ws,
        serde_json::json!({ "type": "login", "username": username }),
    )
    .await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "login_success");
    assert_eq!(reply["username"], username);
    ws
}
