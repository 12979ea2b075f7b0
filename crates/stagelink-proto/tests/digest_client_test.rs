#![allow(clippy::unwrap_used)]
// Integration tests for `DigestClient` using wiremock.

use std::time::Duration;

use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{body_json, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use stagelink_proto::{DigestClient, Error};

const CHALLENGE: &str = "Digest realm=\"amplifier\", nonce=\"dcd98b7102dd\", qop=\"auth\"";

fn credentials() -> Option<(String, SecretString)> {
    Some(("tech".into(), SecretString::from("hunter2".to_string())))
}

async fn client_for(server: &MockServer, creds: Option<(String, SecretString)>) -> DigestClient {
    DigestClient::new(
        server.address().to_string(),
        creds,
        Duration::from_millis(1500),
    )
    .unwrap()
}

#[tokio::test]
async fn get_parses_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/info"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "name": "Amp 12D", "firmware_version": "2.8.1" })),
        )
        .mount(&server)
        .await;

    let client = client_for(&server, None).await;
    let resp = client.get::<serde_json::Value>("/api/info").await.unwrap();

    assert!(resp.ok());
    assert_eq!(resp.data.unwrap()["name"], "Amp 12D");
}

#[tokio::test]
async fn challenge_is_answered_exactly_once() {
    let server = MockServer::start().await;

    // First pass: the bare request gets challenged.
    Mock::given(method("GET"))
        .and(path("/api/info"))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", CHALLENGE))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    // Second pass: the re-issued request carries the Authorization header.
    Mock::given(method("GET"))
        .and(path("/api/info"))
        .and(header_exists("Authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "Amp" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, credentials()).await;
    let resp = client.get::<serde_json::Value>("/api/info").await.unwrap();

    assert!(resp.ok());
    assert_eq!(resp.data.unwrap()["name"], "Amp");
}

#[tokio::test]
async fn second_401_surfaces_as_authentication_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/info"))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", CHALLENGE))
        .mount(&server)
        .await;

    let client = client_for(&server, credentials()).await;
    let result = client.get::<serde_json::Value>("/api/info").await;

    assert!(
        matches!(result, Err(Error::Authentication { .. })),
        "expected Authentication error, got: {result:?}"
    );
}

#[tokio::test]
async fn missing_credentials_pass_the_401_through() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/info"))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", CHALLENGE))
        .mount(&server)
        .await;

    let client = client_for(&server, None).await;
    let resp = client.get::<serde_json::Value>("/api/info").await.unwrap();

    assert_eq!(resp.status.as_u16(), 401);
    assert!(resp.data.is_none());
}

#[tokio::test]
async fn post_sends_the_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/configuration/load"))
        .and(body_json(json!({ "index": 3 })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, None).await;
    let resp = client
        .post::<serde_json::Value>("/api/configuration/load", &json!({ "index": 3 }))
        .await
        .unwrap();

    assert!(resp.ok());
}
