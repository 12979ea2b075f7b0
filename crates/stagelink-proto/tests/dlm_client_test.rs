#![allow(clippy::unwrap_used)]
// Integration tests for `DlmClient` against a scripted fake unit on a
// real UDP socket. The fake decodes inbound frames with the same codec
// and replies per scenario.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::net::UdpSocket;

use stagelink_proto::Error;
use stagelink_proto::dlm::{DlmClient, decode_response, encode_command};

async fn fake_unit() -> (Arc<UdpSocket>, SocketAddr) {
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let addr = socket.local_addr().unwrap();
    (socket, addr)
}

/// Zero-length frame acknowledging `msg_id`.
fn ack_frame(msg_id: u32) -> Vec<u8> {
    encode_command("", msg_id)
}

fn inbound_msg_id(datagram: &[u8]) -> Option<u32> {
    decode_response(datagram).map(|r| r.msg_id)
}

#[tokio::test]
async fn retry_bound_exactly_three_transmissions() {
    let (unit, addr) = fake_unit().await;
    let transmissions = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&transmissions);
    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        loop {
            let _ = unit.recv_from(&mut buf).await;
            counter.fetch_add(1, Ordering::SeqCst);
            // Never reply.
        }
    });

    let client = DlmClient::bind(0, addr).await.unwrap();
    let result = client
        .send("Mod.In.Mute=A 1", 2, Duration::from_millis(50))
        .await;

    assert!(
        matches!(result, Err(Error::Timeout { attempts: 3 })),
        "expected Timeout after 3 attempts, got: {result:?}"
    );
    // Give the last datagram time to land.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transmissions.load(Ordering::SeqCst), 3);
    assert!(!client.is_online());
}

#[tokio::test]
async fn plain_ack_completes_a_non_query() {
    let (unit, addr) = fake_unit().await;

    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        let (len, peer) = unit.recv_from(&mut buf).await.unwrap();
        let msg_id = inbound_msg_id(&buf[..len]).unwrap();
        unit.send_to(&ack_frame(msg_id), peer).await.unwrap();
    });

    let client = DlmClient::bind(0, addr).await.unwrap();
    let reply = client
        .send("Mod.In.Mute=A 1", 0, Duration::from_millis(500))
        .await
        .unwrap();

    assert_eq!(reply, None);
    assert!(client.is_online());
}

#[tokio::test]
async fn query_waits_past_its_ack_for_the_data_response() {
    let (unit, addr) = fake_unit().await;

    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        let (len, peer) = unit.recv_from(&mut buf).await.unwrap();
        let msg_id = inbound_msg_id(&buf[..len]).unwrap();
        unit.send_to(&ack_frame(msg_id), peer).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        unit.send_to(&encode_command("Mod.In.Gain?A -6.00", msg_id), peer)
            .await
            .unwrap();
    });

    let client = DlmClient::bind(0, addr).await.unwrap();
    let reply = client
        .send("Mod.In.Gain?A", 0, Duration::from_millis(500))
        .await
        .unwrap();

    assert_eq!(reply.as_deref(), Some("Mod.In.Gain?A -6.00"));
    assert!(client.is_online());
}

#[tokio::test]
async fn ack_alone_never_completes_a_query() {
    let (unit, addr) = fake_unit().await;

    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        loop {
            let (len, peer) = unit.recv_from(&mut buf).await.unwrap();
            let msg_id = inbound_msg_id(&buf[..len]).unwrap();
            unit.send_to(&ack_frame(msg_id), peer).await.unwrap();
            // No data response ever follows.
        }
    });

    let client = DlmClient::bind(0, addr).await.unwrap();
    let result = client
        .send("Mod.In.Gain?A", 1, Duration::from_millis(60))
        .await;

    assert!(matches!(result, Err(Error::Timeout { .. })));
}

#[tokio::test]
async fn unknown_message_id_never_completes_a_pending_request() {
    let (unit, addr) = fake_unit().await;

    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        let (len, peer) = unit.recv_from(&mut buf).await.unwrap();
        let msg_id = inbound_msg_id(&buf[..len]).unwrap();
        // Answer with a response addressed to a message id nobody sent.
        unit.send_to(&encode_command("Mod.In.Gain?A 0.00", msg_id + 1000), peer)
            .await
            .unwrap();
    });

    let client = DlmClient::bind(0, addr).await.unwrap();
    let result = client
        .send("Mod.In.Gain?A", 0, Duration::from_millis(100))
        .await;

    assert!(matches!(result, Err(Error::Timeout { .. })));
}

#[tokio::test]
async fn duplicate_response_is_ignored_as_unsolicited() {
    let (unit, addr) = fake_unit().await;

    let unit_task = Arc::clone(&unit);
    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        loop {
            let (len, peer) = unit_task.recv_from(&mut buf).await.unwrap();
            let msg_id = inbound_msg_id(&buf[..len]).unwrap();
            let reply = encode_command("Mod.In.Mute?A 1", msg_id);
            // Same reply twice: the second must be dropped, not re-delivered.
            unit_task.send_to(&reply, peer).await.unwrap();
            unit_task.send_to(&reply, peer).await.unwrap();
        }
    });

    let client = DlmClient::bind(0, addr).await.unwrap();
    let first = client
        .send("Mod.In.Mute?A", 0, Duration::from_millis(500))
        .await
        .unwrap();
    assert_eq!(first.as_deref(), Some("Mod.In.Mute?A 1"));

    // The client keeps working after the stray duplicate.
    let second = client
        .send("Mod.In.Mute?A", 0, Duration::from_millis(500))
        .await
        .unwrap();
    assert_eq!(second.as_deref(), Some("Mod.In.Mute?A 1"));
    assert!(client.is_online());
}
