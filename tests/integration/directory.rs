use crate::*;

use std::time::Duration;

use tokio::net::UnixStream;

use huddle_core::config::socket_path;
use huddle_core::message::{Destination, Message, Method};
use huddle_ipc::{IpcChannel, IpcServer, PeerStatus};

/// Two peers announce, both see the full directory, and the survivor sees
/// the departure.
#[tokio::test]
async fn two_peers_see_each_other_and_survive_departure() {
    let config = test_config("pair");
    let (server, _server_events) = IpcServer::bind(&config).await.expect("bind");

    let (a, mut a_events) = IpcChannel::connect(&config, "scoreA").await.expect("connect A");
    wait_for_directory(&mut a_events, &["scoreA"]).await;

    let (b, mut b_events) = IpcChannel::connect(&config, "scoreB").await.expect("connect B");
    wait_for_directory(&mut a_events, &["scoreA", "scoreB"]).await;
    wait_for_directory(&mut b_events, &["scoreA", "scoreB"]).await;

    b.close().await;
    wait_for_directory(&mut a_events, &["scoreA"]).await;
    assert_eq!(server.peers().await, vec!["scoreA"]);

    a.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn peer_status_events_track_joins_and_leaves() {
    let config = test_config("status");
    let (server, _server_events) = IpcServer::bind(&config).await.expect("bind");

    let (a, mut a_events) = IpcChannel::connect(&config, "editor-1").await.expect("connect");
    wait_for_directory(&mut a_events, &["editor-1"]).await;

    let (b, _b_events) = IpcChannel::connect(&config, "editor-2").await.expect("connect");
    wait_for_peer(&mut a_events, "editor-2", PeerStatus::Connected).await;

    b.close().await;
    wait_for_peer(&mut a_events, "editor-2", PeerStatus::Disconnected).await;

    a.close().await;
    server.shutdown().await;
}

/// A ping carries the sender's current identity; the directory follows it.
#[tokio::test]
async fn ping_refreshes_identity() {
    let config = test_config("ping");
    let (server, _server_events) = IpcServer::bind(&config).await.expect("bind");

    let (a, mut a_events) = IpcChannel::connect(&config, "draft").await.expect("connect");
    wait_for_directory(&mut a_events, &["draft"]).await;

    a.send(Message::ping("draft-final")).await.expect("ping");
    wait_for_directory(&mut a_events, &["draft-final"]).await;

    a.close().await;
    server.shutdown().await;
}

/// The coordinator can query a peer, and the peer's answer restores its
/// announced identity in the directory.
#[tokio::test]
async fn whois_query_restores_identity() {
    let config = test_config("whois");
    let (server, _server_events) = IpcServer::bind(&config).await.expect("bind");

    let (a, mut a_events) = IpcChannel::connect(&config, "responder").await.expect("connect");
    wait_for_directory(&mut a_events, &["responder"]).await;

    a.send(Message::ping("imposter")).await.expect("ping");
    wait_for_directory(&mut a_events, &["imposter"]).await;

    let connections = server.connections().await;
    assert_eq!(connections.len(), 1);
    server.ask_whois(connections[0].0).await.expect("whois query");

    wait_for_directory(&mut a_events, &["responder"]).await;

    a.close().await;
    server.shutdown().await;
}

/// A peer that never identifies is still listed, with an empty identity.
#[tokio::test]
async fn silent_peer_listed_with_empty_identity() {
    let mut config = test_config("silent");
    config.timeouts.handshake_ms = 200;
    let (server, _server_events) = IpcServer::bind(&config).await.expect("bind");

    let (a, mut a_events) = IpcChannel::connect(&config, "named").await.expect("connect");
    wait_for_directory(&mut a_events, &["named"]).await;

    let path = socket_path(&config.endpoint.name);
    let _silent = UnixStream::connect(&path).await.expect("silent connect");

    wait_for_directory(&mut a_events, &["named", ""]).await;

    a.close().await;
    server.shutdown().await;
}

/// A message addressed to the server role surfaces on the coordinator's
/// event stream and is not relayed.
#[tokio::test]
async fn server_destined_message_reaches_coordinator_only() {
    let config = test_config("to-server");
    let (server, mut server_events) = IpcServer::bind(&config).await.expect("bind");

    let (a, mut a_events) = IpcChannel::connect(&config, "sender").await.expect("connect");
    let (b, mut b_events) = IpcChannel::connect(&config, "bystander").await.expect("connect");
    wait_for_directory(&mut a_events, &["sender", "bystander"]).await;

    a.send(Message {
        sender_id: "sender".to_string(),
        dest: Destination::Server,
        method: Method::Other("focus-request".to_string()),
        args: vec!["window-3".to_string()],
    })
    .await
    .expect("send");

    let msg = next_server_message(&mut server_events).await;
    assert_eq!(msg.sender_id, "sender");
    assert_eq!(msg.method.as_str(), "focus-request");
    assert_eq!(msg.args, vec!["window-3"]);

    assert_no_app_message(&mut b_events, Duration::from_millis(300)).await;

    a.close().await;
    b.close().await;
    server.shutdown().await;
}
