//! HTTP signaling surface integration tests.
//!
//! Spins up the real router on an ephemeral port with a wiremock SFU behind
//! it, then drives the surface with `reqwest` the way a browser client's
//! HTTP bootstrap would.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]

use common::secret::SecretString;
use room_controller::http;
use room_controller::hub::Hub;
use room_controller::sfu::HttpSfuClient;
use room_controller::store::MemorySessionStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct TestServer {
    base_url: String,
    sfu: MockServer,
}

impl TestServer {
    async fn spawn() -> Result<Self, anyhow::Error> {
        let sfu = MockServer::start().await;

        let hub = Arc::new(Hub::new(
            SecretString::from("integration-test-secret"),
            Arc::new(HttpSfuClient::new(
                sfu.uri(),
                "app-1".to_string(),
                SecretString::from("sfu-token"),
            )),
            Arc::new(MemorySessionStore::new()),
            CancellationToken::new(),
        ));

        let app = http::router(hub);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            base_url: format!("http://{addr}"),
            sfu,
        })
    }

    /// Script one SFU session creation returning `session_id`.
    async fn expect_new_session(&self, session_id: &str) {
        Mock::given(method("POST"))
            .and(path("/apps/app-1/sessions/new"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(serde_json::json!({ "sessionId": session_id })),
            )
            .up_to_n_times(1)
            .mount(&self.sfu)
            .await;
    }

    async fn join(&self, client: &reqwest::Client, user: &str) -> Result<String, anyhow::Error> {
        let response = client
            .post(format!("{}/sessions/new", self.base_url))
            .json(&serde_json::json!({ "userSessionId": user, "room": "lobby" }))
            .send()
            .await?;
        assert_eq!(response.status(), 200);

        let body: serde_json::Value = response.json().await?;
        Ok(body["sessionIdentityToken"]
            .as_str()
            .expect("token in join response")
            .to_string())
    }
}

#[tokio::test]
async fn test_healthz() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;
    let response = reqwest::get(format!("{}/healthz", server.base_url)).await?;
    assert_eq!(response.status(), 200);
    Ok(())
}

#[tokio::test]
async fn test_session_bootstrap_is_exactly_once() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;
    server.expect_new_session("sfu-a").await;
    let client = reqwest::Client::new();

    let token = server.join(&client, "u-1").await?;
    assert!(!token.is_empty());

    // The second bootstrap for the same participant conflicts and never
    // reaches the SFU (the single scripted mock is already consumed).
    let response = client
        .post(format!("{}/sessions/new", server.base_url))
        .json(&serde_json::json!({ "userSessionId": "u-1", "room": "lobby" }))
        .send()
        .await?;
    assert_eq!(response.status(), 409);

    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["error"]["code"], 5);
    Ok(())
}

#[tokio::test]
async fn test_authenticated_routes_reject_missing_token() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/local_tracks", server.base_url))
        .send()
        .await?;
    assert_eq!(response.status(), 401);

    let response = client
        .put(format!("{}/sessions/renegotiate", server.base_url))
        .json(&serde_json::json!({
            "sessionDescription": { "type": "answer", "sdp": "v=0" }
        }))
        .send()
        .await?;
    assert_eq!(response.status(), 401);
    Ok(())
}

#[tokio::test]
async fn test_publish_then_list_then_close() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;
    server.expect_new_session("sfu-a").await;
    server.expect_new_session("sfu-b").await;

    Mock::given(method("POST"))
        .and(path("/apps/app-1/sessions/sfu-a/tracks/new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sessionDescription": { "type": "answer", "sdp": "v=0 answer" },
            "tracks": [{ "trackName": "cam-1", "mid": "0" }]
        })))
        .mount(&server.sfu)
        .await;
    Mock::given(method("PUT"))
        .and(path("/apps/app-1/sessions/sfu-a/tracks/close"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sessionDescription": { "type": "answer", "sdp": "v=0 close answer" }
        })))
        .mount(&server.sfu)
        .await;

    let client = reqwest::Client::new();
    let token_a = server.join(&client, "u-1").await?;
    let token_b = server.join(&client, "u-2").await?;

    // u-1 publishes cam-1.
    let response = client
        .post(format!("{}/tracks/new", server.base_url))
        .header("x-session-identity-token", &token_a)
        .json(&serde_json::json!({
            "sessionDescription": { "type": "offer", "sdp": "v=0 offer" },
            "tracks": [{ "mid": "0", "trackName": "cam-1" }]
        }))
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["sessionDescription"]["sdp"], "v=0 answer");

    // u-2 sees it, at version 2; u-1's own listing is empty.
    let body: serde_json::Value = client
        .get(format!("{}/local_tracks", server.base_url))
        .header("x-session-identity-token", &token_b)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(body["version"], 2);
    assert_eq!(body["tracks"][0]["name"], "cam-1");
    assert_eq!(body["tracks"][0]["sessionId"], "sfu-a");

    let body: serde_json::Value = client
        .get(format!("{}/local_tracks", server.base_url))
        .header("x-session-identity-token", &token_a)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(body["tracks"].as_array().unwrap().len(), 0);

    // u-1 closes the track: registry empties and the version bumps.
    let response = client
        .put(format!("{}/tracks/close", server.base_url))
        .header("x-session-identity-token", &token_a)
        .json(&serde_json::json!({
            "sessionDescription": { "type": "offer", "sdp": "v=0 close offer" },
            "tracks": [{ "mid": "0" }]
        }))
        .send()
        .await?;
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = client
        .get(format!("{}/local_tracks", server.base_url))
        .header("x-session-identity-token", &token_b)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(body["version"], 3);
    assert_eq!(body["tracks"].as_array().unwrap().len(), 0);
    Ok(())
}

#[tokio::test]
async fn test_operations_before_bootstrap_conflict() -> Result<(), anyhow::Error> {
    let server = TestServer::spawn().await?;
    let client = reqwest::Client::new();

    // A validly signed token whose participant never bootstrapped: the
    // controller refuses rather than creating a session implicitly.
    let secret = SecretString::from("integration-test-secret");
    let token = common::identity::issue(&secret, "u-9", "sfu-x", "lobby").unwrap();

    let response = client
        .put(format!("{}/sessions/renegotiate", server.base_url))
        .header("x-session-identity-token", &token)
        .json(&serde_json::json!({
            "sessionDescription": { "type": "answer", "sdp": "v=0" }
        }))
        .send()
        .await?;
    assert_eq!(response.status(), 409);

    // A garbage token is an auth failure, not a conflict.
    let response = client
        .put(format!("{}/sessions/renegotiate", server.base_url))
        .header("x-session-identity-token", "not-a-jwt")
        .json(&serde_json::json!({
            "sessionDescription": { "type": "answer", "sdp": "v=0" }
        }))
        .send()
        .await?;
    assert_eq!(response.status(), 401);
    Ok(())
}
