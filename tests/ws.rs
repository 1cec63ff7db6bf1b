mod common;

use std::time::Duration;

use common::{connect, expect_silence, login, recv_json, send_json, TestServer};
use futures_util::SinkExt;
use matchserver::cluster::{Fault, InMemoryCluster};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

/// Polls until the server loop has caught up with the queue length.
async fn wait_for_waiting(server: &TestServer, expected: usize) {
    for _ in 0..40 {
        if server.state.orchestrator.queue_stats().await.waiting == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn test_ws_login_acknowledged() {
    let server = TestServer::new();
    let url = server.spawn().await;
    let mut ws = connect(&url).await;
    send_json(&mut ws, json!({ "type": "login", "username": "alice" })).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply, json!({ "type": "login_success", "username": "alice" }));
}

#[tokio::test]
async fn test_ws_malformed_line_is_ignored() {
    let server = TestServer::new();
    let url = server.spawn().await;
    let mut ws = connect(&url).await;
    ws.send(Message::Text(
        "not json\n{\"type\":\"login\",\"username\":\"carol\"}".into(),
    ))
    .await
    .unwrap();
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "login_success");
    assert_eq!(reply["username"], "carol");
}

#[tokio::test]
async fn test_ws_join_without_login_is_ignored() {
    let server = TestServer::new();
    let url = server.spawn().await;
    let mut ws = connect(&url).await;
    send_json(&mut ws, json!({ "type": "join_queue" })).await;
    expect_silence(&mut ws, Duration::from_millis(200)).await;
    assert_eq!(server.state.orchestrator.queue_stats().await.waiting, 0);
}

#[tokio::test]
async fn test_ws_full_match_lifecycle() {
    let server = TestServer::new();
    let url = server.spawn().await;
    let mut alice = login(&url, "alice").await;
    let mut bob = login(&url, "bob").await;

    send_json(&mut alice, json!({ "type": "join_queue" })).await;
    expect_silence(&mut alice, Duration::from_millis(100)).await;
    send_json(&mut bob, json!({ "type": "join_queue" })).await;

    for ws in [&mut alice, &mut bob] {
        assert_eq!(recv_json(ws).await["type"], "match_creating");
    }
    let found_a = recv_json(&mut alice).await;
    let found_b = recv_json(&mut bob).await;
    assert_eq!(found_a["type"], "match_found");
    assert_eq!(found_a, found_b);
    assert_eq!(found_a["matchId"], 1);
    let pod_url = found_a["podUrl"].as_str().unwrap().to_string();
    let (host, port) = pod_url.split_once(':').unwrap();
    assert_eq!(host, "localhost");
    let port: u16 = port.parse().unwrap();
    assert!((30000..=32767).contains(&port));

    assert_eq!(server.cluster.workload_names().await.len(), 1);
    assert_eq!(server.cluster.endpoint_names().await.len(), 1);

    send_json(
        &mut alice,
        json!({ "type": "end_game", "podUrl": pod_url, "matchId": 1 }),
    )
    .await;
    for ws in [&mut alice, &mut bob] {
        let reply = recv_json(ws).await;
        assert_eq!(reply["type"], "end_game_success");
        assert_eq!(reply["message"], "Match ended successfully.");
    }

    assert!(server.cluster.workload_names().await.is_empty());
    assert!(server.cluster.endpoint_names().await.is_empty());
    assert!(server.state.orchestrator.list_matches().await.is_empty());
}

#[tokio::test]
async fn test_ws_end_game_unknown_port_reports_error() {
    let server = TestServer::new();
    let url = server.spawn().await;
    let mut alice = login(&url, "alice").await;
    send_json(
        &mut alice,
        json!({ "type": "end_game", "podUrl": "localhost:31999", "matchId": 9 }),
    )
    .await;
    let reply = recv_json(&mut alice).await;
    assert_eq!(reply["type"], "end_game_error");
    assert_eq!(reply["message"], "Failed to end match.");
}

#[tokio::test]
async fn test_ws_end_game_garbage_address_reports_error() {
    let server = TestServer::new();
    let url = server.spawn().await;
    let mut alice = login(&url, "alice").await;
    send_json(
        &mut alice,
        json!({ "type": "end_game", "podUrl": "no-port-here", "matchId": 1 }),
    )
    .await;
    assert_eq!(recv_json(&mut alice).await["type"], "end_game_error");
}

#[tokio::test]
async fn test_ws_provision_failure_notifies_both() {
    let cluster = InMemoryCluster::new();
    cluster.inject_fault(Fault::CreateEndpoint).await;
    let server = TestServer::with_cluster(cluster, Duration::from_secs(5));
    let url = server.spawn().await;
    let mut alice = login(&url, "alice").await;
    let mut bob = login(&url, "bob").await;

    send_json(&mut alice, json!({ "type": "join_queue" })).await;
    send_json(&mut bob, json!({ "type": "join_queue" })).await;

    for ws in [&mut alice, &mut bob] {
        assert_eq!(recv_json(ws).await["type"], "match_creating");
        assert_eq!(recv_json(ws).await["type"], "match_provision_failed");
    }
    // The workload created before the failure was rolled back.
    assert!(server.cluster.workload_names().await.is_empty());
    assert!(server.state.orchestrator.list_matches().await.is_empty());
}

#[tokio::test]
async fn test_ws_ready_timeout_notifies_both() {
    let cluster = InMemoryCluster::with_manual_start();
    let server = TestServer::with_cluster(cluster, Duration::from_millis(100));
    let url = server.spawn().await;
    let mut alice = login(&url, "alice").await;
    let mut bob = login(&url, "bob").await;

    send_json(&mut alice, json!({ "type": "join_queue" })).await;
    send_json(&mut bob, json!({ "type": "join_queue" })).await;

    for ws in [&mut alice, &mut bob] {
        assert_eq!(recv_json(ws).await["type"], "match_creating");
        assert_eq!(recv_json(ws).await["type"], "match_provision_failed");
    }
    assert!(server.cluster.workload_names().await.is_empty());
}

#[tokio::test]
async fn test_ws_cancel_queue_prevents_pairing() {
    let server = TestServer::new();
    let url = server.spawn().await;
    let mut alice = login(&url, "alice").await;
    let mut bob = login(&url, "bob").await;

    send_json(&mut alice, json!({ "type": "join_queue" })).await;
    wait_for_waiting(&server, 1).await;
    send_json(&mut alice, json!({ "type": "cancel_queue" })).await;
    wait_for_waiting(&server, 0).await;
    send_json(&mut bob, json!({ "type": "join_queue" })).await;

    expect_silence(&mut alice, Duration::from_millis(200)).await;
    expect_silence(&mut bob, Duration::from_millis(50)).await;
    assert_eq!(server.state.orchestrator.queue_stats().await.waiting, 1);
}

#[tokio::test]
async fn test_ws_disconnect_leaves_queue() {
    let server = TestServer::new();
    let url = server.spawn().await;
    let mut alice = login(&url, "alice").await;
    send_json(&mut alice, json!({ "type": "join_queue" })).await;
    wait_for_waiting(&server, 1).await;
    alice.close(None).await.unwrap();
    drop(alice);

    wait_for_waiting(&server, 0).await;
    let stats = server.state.orchestrator.queue_stats().await;
    assert_eq!(stats.waiting, 0);
    assert_eq!(stats.sessions, 0);

    let mut bob = login(&url, "bob").await;
    send_json(&mut bob, json!({ "type": "join_queue" })).await;
    expect_silence(&mut bob, Duration::from_millis(200)).await;
}
