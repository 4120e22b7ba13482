//! Registration and token issuance over HTTP, then using the token to connect.

mod common;

use common::TestServer;
use pairchat::auth::{Registered, TokenResponse};
use reqwest::StatusCode;

async fn register(server: &TestServer, username: &str, password: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(server.http_url("/register"))
        .json(&serde_json::json!({ "username": username, "password": password }))
        .send()
        .await
        .unwrap()
}

async fn login(server: &TestServer, username: &str, password: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(server.http_url("/token"))
        .form(&[("username", username), ("password", password), ("grant_type", "password")])
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn register_then_login_then_chat() {
    let server = TestServer::spawn().await;

    let response = register(&server, "alice", "hunter2").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Registered = response.json().await.unwrap();
    assert_eq!(body.msg, "User registered successfully");

    let response = login(&server, "alice", "hunter2").await;
    assert_eq!(response.status(), StatusCode::OK);
    let token: TokenResponse = response.json().await.unwrap();
    assert_eq!(token.token_type, "bearer");

    let mut client = server.connect_raw(&format!("?token={}", token.access_token)).await;
    assert_eq!(client.recv_json().await["roomId"], "room1");

    client.say("hello", "t1").await;
    assert_eq!(client.recv_chat().await.sender, "alice");
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let server = TestServer::spawn().await;
    register(&server, "alice", "one").await;

    let response = register(&server, "alice", "two").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.text().await.unwrap(), "User already registered");
}

#[tokio::test]
async fn bad_credentials_are_unauthorized() {
    let server = TestServer::spawn().await;
    register(&server, "alice", "right").await;

    let response = login(&server, "alice", "wrong").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = login(&server, "nobody", "right").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.text().await.unwrap(), "Invalid credentials");
}
