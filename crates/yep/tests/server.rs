//! Integration tests for the YEP server: handshake, verification, and chat
//! over real WebSocket connections.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::Message;
use yep::prelude::*;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

type TestHandle = YepHandle<MemoryUserStore, MemoryCodeStore, MemoryMessageLog, JsonCodec>;

fn test_config() -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".into(),
        token_secret: b"integration-secret".to_vec(),
        phone_salt: "integration-salt".into(),
        ..ServerConfig::default()
    }
}

/// Starts a server on a random port and returns its address and handle.
async fn start_server_with(config: ServerConfig) -> (String, TestHandle) {
    let server = YepServerBuilder::new()
        .config(config)
        .build(
            Arc::new(MemoryUserStore::new()),
            Arc::new(MemoryCodeStore::new()),
            Arc::new(MemoryMessageLog::new()),
        )
        .await
        .expect("server should build");

    let addr = server.local_addr().expect("should have local addr").to_string();
    let handle = server.handle();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(10)).await;
    (addr, handle)
}

async fn start_server() -> (String, TestHandle) {
    start_server_with(test_config()).await
}

async fn connect(addr: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("should connect");
    ws
}

async fn send_json(ws: &mut ClientWs, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("send should succeed");
}

/// Receives the next server message, skipping control frames.
async fn recv(ws: &mut ClientWs) -> ServerMessage {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("server message should decode");
            }
            Message::Binary(bytes) => {
                return serde_json::from_slice(&bytes).expect("server message should decode");
            }
            Message::Close(_) => panic!("connection closed while waiting for a message"),
            _ => continue,
        }
    }
}

/// Asserts nothing but control frames arrive within `window`.
async fn assert_silent(ws: &mut ClientWs, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Text(text)))) => panic!("unexpected message: {}", text.as_str()),
            Ok(Some(Ok(Message::Binary(_)))) => panic!("unexpected binary message"),
            Ok(Some(Ok(_))) => continue,
            Ok(_) => panic!("connection ended unexpectedly"),
        }
    }
}

/// Asserts the server closes the connection.
async fn assert_closed(ws: &mut ClientWs) {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("server should close the connection")
        {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
            Some(Ok(Message::Text(text))) => panic!("unexpected message before close: {}", text.as_str()),
            Some(Ok(_)) => continue,
        }
    }
}

fn register_msg(email: &str, phone: &str) -> Value {
    json!({
        "type": "AUTH",
        "email": email,
        "phone": phone,
        "password": "p",
        "level": "C",
        "is_login": false,
    })
}

/// Registers a phone-less (immediately active) user and consumes the
/// `AUTH_SUCCESS` and `ONLINE_USERS` replies. Returns the identifier and
/// session token.
async fn join(ws: &mut ClientWs, email: &str, level: &str) -> (UserId, String) {
    send_json(
        ws,
        json!({
            "type": "AUTH",
            "email": email,
            "password": "p",
            "level": level,
            "is_login": false,
        }),
    )
    .await;

    let (yui, token) = match recv(ws).await {
        ServerMessage::AuthSuccess { yui, token, .. } => (yui, token),
        other => panic!("expected AUTH_SUCCESS, got {other:?}"),
    };
    match recv(ws).await {
        ServerMessage::OnlineUsers { .. } => {}
        other => panic!("expected ONLINE_USERS, got {other:?}"),
    }
    (yui, token)
}

async fn expect_join(ws: &mut ClientWs, email: &str) {
    match recv(ws).await {
        ServerMessage::UserJoin { content, .. } => {
            assert_eq!(content, format!("{email} joined the chat"));
        }
        other => panic!("expected USER_JOIN, got {other:?}"),
    }
}

// =========================================================================
// Registration and verification
// =========================================================================

#[tokio::test]
async fn test_register_with_phone_then_correct_code_authenticates() {
    let (addr, handle) = start_server().await;
    let mut ws = connect(&addr).await;

    send_json(&mut ws, register_msg("a@x.com", "+1 555 0100")).await;
    let yui = match recv(&mut ws).await {
        ServerMessage::VerificationRequired { yui, .. } => yui,
        other => panic!("expected VERIFICATION_REQUIRED, got {other:?}"),
    };
    assert!(!handle.is_online(&yui).await);

    handle
        .deliver_code("+1 555 0100", "123456")
        .await
        .expect("phone is registered");
    send_json(&mut ws, json!({"type": "OTP_VERIFY", "code": "123456"})).await;

    match recv(&mut ws).await {
        ServerMessage::AuthSuccess {
            yui: authed,
            level,
            token,
            ..
        } => {
            assert_eq!(authed, yui);
            assert_eq!(level, Level::C);
            assert!(!token.is_empty());
        }
        other => panic!("expected AUTH_SUCCESS, got {other:?}"),
    }
    match recv(&mut ws).await {
        ServerMessage::OnlineUsers { data, content, .. } => {
            assert_eq!(data, vec!["a@x.com"]);
            assert_eq!(content, "Online: 1 users");
        }
        other => panic!("expected ONLINE_USERS, got {other:?}"),
    }
    assert!(handle.is_online(&yui).await);
}

#[tokio::test]
async fn test_wrong_code_allows_retry() {
    let (addr, handle) = start_server().await;
    let mut ws = connect(&addr).await;

    send_json(&mut ws, register_msg("a@x.com", "+1 555 0100")).await;
    assert!(matches!(
        recv(&mut ws).await,
        ServerMessage::VerificationRequired { .. }
    ));
    let code = handle.issue_code("15550100").await.expect("phone is registered");

    send_json(&mut ws, json!({"type": "OTP_VERIFY", "code": "not-it"})).await;
    assert_eq!(
        recv(&mut ws).await,
        ServerMessage::error("Invalid verification code")
    );

    send_json(&mut ws, json!({"type": "OTP_VERIFY", "code": code})).await;
    assert!(matches!(recv(&mut ws).await, ServerMessage::AuthSuccess { .. }));
}

#[tokio::test]
async fn test_code_attempts_beyond_cap_close_connection() {
    let (addr, handle) = start_server_with(ServerConfig {
        max_code_attempts: 1,
        ..test_config()
    })
    .await;
    let mut ws = connect(&addr).await;

    send_json(&mut ws, register_msg("a@x.com", "+1 555 0100")).await;
    recv(&mut ws).await;
    handle.deliver_code("+1 555 0100", "123456").await.unwrap();

    send_json(&mut ws, json!({"type": "OTP_VERIFY", "code": "000000"})).await;
    assert_eq!(recv(&mut ws).await, ServerMessage::error("Invalid verification code"));

    send_json(&mut ws, json!({"type": "OTP_VERIFY", "code": "000001"})).await;
    assert_eq!(recv(&mut ws).await, ServerMessage::error("Too many verification attempts"));
    assert_closed(&mut ws).await;
}

#[tokio::test]
async fn test_reconnecting_does_not_reset_code_attempts() {
    let (addr, handle) = start_server_with(ServerConfig {
        max_code_attempts: 2,
        ..test_config()
    })
    .await;
    let mut ws = connect(&addr).await;
    send_json(&mut ws, register_msg("a@x.com", "+1 555 0100")).await;
    recv(&mut ws).await;
    handle.deliver_code("+1 555 0100", "123456").await.unwrap();
    ws.close(None).await.unwrap();

    let mut wrong_guesses = 0;
    'rounds: for _ in 0..5 {
        let mut ws = connect(&addr).await;
        send_json(
            &mut ws,
            json!({"type": "AUTH", "email": "a@x.com", "password": "p", "is_login": true}),
        )
        .await;
        assert!(matches!(
            recv(&mut ws).await,
            ServerMessage::VerificationRequired { .. }
        ));
        for guess in ["000000", "000001"] {
            send_json(&mut ws, json!({"type": "OTP_VERIFY", "code": guess})).await;
            match recv(&mut ws).await {
                ServerMessage::Error { content } if content == "Invalid verification code" => {
                    wrong_guesses += 1;
                }
                ServerMessage::Error { content } if content == "Too many verification attempts" => {
                    assert_closed(&mut ws).await;
                    break 'rounds;
                }
                other => panic!("unexpected reply: {other:?}"),
            }
        }
    }
    assert_eq!(wrong_guesses, 2);

    // The code was revoked with the last attempt.
    let mut ws = connect(&addr).await;
    send_json(
        &mut ws,
        json!({"type": "AUTH", "email": "a@x.com", "password": "p", "is_login": true}),
    )
    .await;
    recv(&mut ws).await;
    send_json(&mut ws, json!({"type": "OTP_VERIFY", "code": "123456"})).await;
    assert_eq!(
        recv(&mut ws).await,
        ServerMessage::error("No verification code has been issued yet")
    );
}

#[tokio::test]
async fn test_otp_after_authentication_is_error() {
    let (addr, _handle) = start_server().await;
    let mut ws = connect(&addr).await;
    join(&mut ws, "a@x.com", "C").await;

    send_json(&mut ws, json!({"type": "OTP_VERIFY", "code": "123456"})).await;
    assert_eq!(recv(&mut ws).await, ServerMessage::error("Already verified"));
}

#[tokio::test]
async fn test_deliver_code_for_unknown_phone_fails() {
    let (_addr, handle) = start_server().await;
    assert!(handle.deliver_code("+1 999 0000", "123456").await.is_err());
    assert!(!handle.phone_registered("+1 999 0000").await.unwrap());
}

// =========================================================================
// Login and tokens
// =========================================================================

#[tokio::test]
async fn test_login_with_wrong_password_errors_and_closes() {
    let (addr, _handle) = start_server().await;
    let mut first = connect(&addr).await;
    join(&mut first, "a@x.com", "B").await;

    let mut ws = connect(&addr).await;
    send_json(
        &mut ws,
        json!({"type": "AUTH", "email": "a@x.com", "password": "wrong", "is_login": true}),
    )
    .await;
    assert_eq!(recv(&mut ws).await, ServerMessage::error("Invalid credentials"));
    assert_closed(&mut ws).await;
}

#[tokio::test]
async fn test_token_handshake_skips_credentials() {
    let (addr, handle) = start_server().await;
    let mut first = connect(&addr).await;
    let (yui, token) = join(&mut first, "a@x.com", "A").await;
    first.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut ws = connect(&addr).await;
    send_json(&mut ws, json!({"type": "TOKEN", "token": token})).await;
    match recv(&mut ws).await {
        ServerMessage::AuthSuccess { yui: authed, level, .. } => {
            assert_eq!(authed, yui);
            assert_eq!(level, Level::A);
        }
        other => panic!("expected AUTH_SUCCESS, got {other:?}"),
    }
    assert!(handle.is_online(&yui).await);
}

#[tokio::test]
async fn test_invalid_token_answers_token_expired_and_closes() {
    let (addr, _handle) = start_server().await;
    let mut ws = connect(&addr).await;

    send_json(&mut ws, json!({"type": "TOKEN", "token": "not.a-token"})).await;
    assert!(matches!(recv(&mut ws).await, ServerMessage::TokenExpired { .. }));
    assert_closed(&mut ws).await;
}

#[tokio::test]
async fn test_malformed_handshake_errors_and_closes() {
    let (addr, _handle) = start_server().await;
    let mut ws = connect(&addr).await;

    send_json(&mut ws, json!({"type": "HELLO"})).await;
    match recv(&mut ws).await {
        ServerMessage::Error { content } => assert!(content.starts_with("Invalid handshake")),
        other => panic!("expected ERROR, got {other:?}"),
    }
    assert_closed(&mut ws).await;
}

#[tokio::test]
async fn test_second_login_evicts_first_without_leave_notice() {
    let (addr, handle) = start_server().await;
    let mut watcher = connect(&addr).await;
    join(&mut watcher, "w@x.com", "C").await;

    let mut first = connect(&addr).await;
    let (yui, token) = join(&mut first, "a@x.com", "C").await;
    expect_join(&mut watcher, "a@x.com").await;

    let mut second = connect(&addr).await;
    send_json(&mut second, json!({"type": "TOKEN", "token": token})).await;
    assert!(matches!(recv(&mut second).await, ServerMessage::AuthSuccess { .. }));

    assert_eq!(
        recv(&mut first).await,
        ServerMessage::error("Signed in from another connection")
    );
    assert_closed(&mut first).await;

    // The watcher sees the re-join but no departure.
    expect_join(&mut watcher, "a@x.com").await;
    assert_silent(&mut watcher, Duration::from_millis(200)).await;
    assert!(handle.is_online(&yui).await);
}

// =========================================================================
// Chat
// =========================================================================

#[tokio::test]
async fn test_message_reaches_others_without_echo() {
    let (addr, handle) = start_server().await;
    let mut a = connect(&addr).await;
    let (yui_a, _) = join(&mut a, "a@x.com", "C").await;
    let mut b = connect(&addr).await;
    join(&mut b, "b@x.com", "C").await;
    expect_join(&mut a, "b@x.com").await;

    send_json(&mut a, json!({"type": "MESSAGE", "content": "hi"})).await;

    match recv(&mut b).await {
        ServerMessage::Message {
            content, yui, level, ..
        } => {
            assert_eq!(content, "[a@x.com | Level C] hi");
            assert_eq!(yui, yui_a);
            assert_eq!(level, Level::C);
        }
        other => panic!("expected MESSAGE, got {other:?}"),
    }
    assert_silent(&mut a, Duration::from_millis(200)).await;

    let history = handle.history().history(&yui_a, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "hi");
}

#[tokio::test]
async fn test_level_c_long_message_rejected_to_sender_only() {
    let (addr, handle) = start_server().await;
    let mut a = connect(&addr).await;
    let (yui_a, _) = join(&mut a, "a@x.com", "C").await;
    let mut b = connect(&addr).await;
    join(&mut b, "b@x.com", "C").await;
    expect_join(&mut a, "b@x.com").await;

    send_json(&mut a, json!({"type": "MESSAGE", "content": "x".repeat(150)})).await;

    assert_eq!(recv(&mut a).await, ServerMessage::error("Level C: max 100 chars"));
    assert_silent(&mut b, Duration::from_millis(200)).await;
    assert!(handle.history().history(&yui_a, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_level_a_long_message_delivered() {
    let (addr, _handle) = start_server().await;
    let mut a = connect(&addr).await;
    join(&mut a, "a@x.com", "A").await;
    let mut b = connect(&addr).await;
    join(&mut b, "b@x.com", "C").await;

    send_json(&mut a, json!({"type": "MESSAGE", "content": "x".repeat(150)})).await;
    assert!(matches!(recv(&mut b).await, ServerMessage::Message { .. }));
}

#[tokio::test]
async fn test_ping_answered_with_pong() {
    let (addr, _handle) = start_server().await;
    let mut ws = connect(&addr).await;
    join(&mut ws, "a@x.com", "C").await;

    send_json(&mut ws, json!({"type": "PING"})).await;
    assert!(matches!(recv(&mut ws).await, ServerMessage::Pong { .. }));
}

#[tokio::test]
async fn test_undecodable_message_errors_and_keeps_session() {
    let (addr, _handle) = start_server().await;
    let mut ws = connect(&addr).await;
    join(&mut ws, "a@x.com", "C").await;

    ws.send(Message::Text("garbage".into())).await.unwrap();
    assert_eq!(recv(&mut ws).await, ServerMessage::error("Invalid message format"));

    send_json(&mut ws, json!({"type": "PING"})).await;
    assert!(matches!(recv(&mut ws).await, ServerMessage::Pong { .. }));
}

#[tokio::test]
async fn test_disconnect_broadcasts_leave() {
    let (addr, handle) = start_server().await;
    let mut a = connect(&addr).await;
    join(&mut a, "a@x.com", "C").await;
    let mut b = connect(&addr).await;
    let (yui_b, _) = join(&mut b, "b@x.com", "C").await;
    expect_join(&mut a, "b@x.com").await;

    b.close(None).await.unwrap();

    match recv(&mut a).await {
        ServerMessage::UserLeave { content, .. } => assert_eq!(content, "b@x.com left the chat"),
        other => panic!("expected USER_LEAVE, got {other:?}"),
    }
    assert!(!handle.is_online(&yui_b).await);
    assert_eq!(handle.online().await, vec!["a@x.com"]);
}

#[tokio::test]
async fn test_online_users_lists_everyone_including_self() {
    let (addr, _handle) = start_server().await;
    let mut a = connect(&addr).await;
    join(&mut a, "a@x.com", "C").await;

    let mut b = connect(&addr).await;
    send_json(
        &mut b,
        json!({"type": "AUTH", "email": "b@x.com", "password": "p", "is_login": false}),
    )
    .await;
    assert!(matches!(recv(&mut b).await, ServerMessage::AuthSuccess { .. }));
    match recv(&mut b).await {
        ServerMessage::OnlineUsers { data, content, .. } => {
            assert_eq!(data, vec!["a@x.com", "b@x.com"]);
            assert_eq!(content, "Online: 2 users");
        }
        other => panic!("expected ONLINE_USERS, got {other:?}"),
    }
}
