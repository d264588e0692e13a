//! End-to-end flow tests against an in-process exchange endpoint.
//!
//! A minimal one-shot HTTP server stands in for the backend token
//! exchange, so the controller, exchange client, storage, and refresh
//! scheduler are exercised together over a real socket.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

use authgate::auth::{AuthFlowController, FlowOutcome, MemorySessionStorage, SessionStorage};
use authgate::config::Config;

/// Serve exactly one HTTP response, then close.
async fn spawn_exchange_server(status: u16, body: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = body.to_string();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        // Drain the request: headers, then content-length worth of body.
        let mut buf = vec![0u8; 16 * 1024];
        let mut total = 0;
        loop {
            let n = socket.read(&mut buf[total..]).await.unwrap();
            if n == 0 {
                break;
            }
            total += n;
            let received = &buf[..total];
            if let Some(pos) = received.windows(4).position(|w| w == b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&received[..pos]);
                let content_length = headers
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if total >= pos + 4 + content_length {
                    break;
                }
            }
        }

        let response = format!(
            "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
    });

    format!("http://{}/token-exchange", addr)
}

fn test_config(exchange_url: String) -> Arc<Config> {
    let mut config = Config::default();
    config.idp.base_url = "https://idp.example.com".to_string();
    config.idp.client_id = "client123".to_string();
    config.idp.redirect_uri = "https://app.example.com/".to_string();
    config.exchange.url = exchange_url;
    config.exchange.timeout_secs = 5;
    Arc::new(config)
}

fn return_url(code: &str) -> Url {
    Url::parse(&format!("https://app.example.com/?code={code}")).unwrap()
}

#[tokio::test]
async fn exchange_success_stores_session_and_authenticates() {
    let endpoint = spawn_exchange_server(
        200,
        r#"{"idToken":"X","accessToken":"Y","refreshToken":"R","expiresIn":3600}"#,
    )
    .await;

    let storage = Arc::new(MemorySessionStorage::new());
    let (controller, _rx) = AuthFlowController::new(test_config(endpoint), storage.clone());

    let before = chrono::Utc::now().timestamp_millis();
    let outcome = controller.initialize(&return_url("abc123")).await.unwrap();
    let after = chrono::Utc::now().timestamp_millis();

    let FlowOutcome::Authenticated {
        session,
        cleaned_url,
    } = outcome
    else {
        panic!("expected Authenticated");
    };
    assert_eq!(session.id_token, "X");
    assert_eq!(session.access_token, "Y");
    assert_eq!(session.refresh_token.as_deref(), Some("R"));
    assert!(session.expires_at >= before + 3_600_000);
    assert!(session.expires_at <= after + 3_600_000);
    assert_eq!(cleaned_url.unwrap().as_str(), "https://app.example.com/");

    // The session was written atomically and the code marked consumed.
    let stored = storage.load().unwrap().unwrap();
    assert_eq!(stored, session);
    assert_eq!(storage.pending_code().unwrap().as_deref(), Some("abc123"));
}

#[tokio::test]
async fn short_lived_token_fires_refresh_immediately() {
    // 120 s is under the 5-minute buffer: the refresh event must fire
    // right away, degrading to a fresh login redirect.
    let endpoint = spawn_exchange_server(
        200,
        r#"{"idToken":"X","accessToken":"Y","expiresIn":120}"#,
    )
    .await;

    let storage = Arc::new(MemorySessionStorage::new());
    let (controller, mut rx) = AuthFlowController::new(test_config(endpoint), storage);

    let before = chrono::Utc::now().timestamp_millis();
    let outcome = controller.initialize(&return_url("abc123")).await.unwrap();
    assert!(outcome.is_authenticated());
    if let FlowOutcome::Authenticated { session, .. } = outcome {
        let drift = session.expires_at - (before + 120_000);
        assert!((0..5_000).contains(&drift), "expires_at ~ now + 120000");
    }

    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
    assert!(event.is_ok(), "refresh should fire within the buffer window");
    assert!(controller.login_url().contains("response_type=code"));
}

#[tokio::test]
async fn wrapped_body_equals_flat_response() {
    let flat_endpoint = spawn_exchange_server(
        200,
        r#"{"idToken":"X","accessToken":"Y","expiresIn":900}"#,
    )
    .await;
    let wrapped_endpoint = spawn_exchange_server(
        200,
        r#"{"statusCode":200,"body":"{\"idToken\":\"X\",\"accessToken\":\"Y\",\"expiresIn\":900}"}"#,
    )
    .await;

    let flat_storage = Arc::new(MemorySessionStorage::new());
    let (flat_controller, _rx1) =
        AuthFlowController::new(test_config(flat_endpoint), flat_storage.clone());
    flat_controller
        .initialize(&return_url("code-a"))
        .await
        .unwrap();

    let wrapped_storage = Arc::new(MemorySessionStorage::new());
    let (wrapped_controller, _rx2) =
        AuthFlowController::new(test_config(wrapped_endpoint), wrapped_storage.clone());
    wrapped_controller
        .initialize(&return_url("code-b"))
        .await
        .unwrap();

    let flat = flat_storage.load().unwrap().unwrap();
    let wrapped = wrapped_storage.load().unwrap().unwrap();
    assert_eq!(flat.id_token, wrapped.id_token);
    assert_eq!(flat.access_token, wrapped.access_token);
    assert_eq!(flat.refresh_token, wrapped.refresh_token);
}

#[tokio::test]
async fn snake_case_response_accepted() {
    let endpoint = spawn_exchange_server(
        200,
        r#"{"id_token":"X","access_token":"Y","refresh_token":"R","expires_in":600}"#,
    )
    .await;

    let storage = Arc::new(MemorySessionStorage::new());
    let (controller, _rx) = AuthFlowController::new(test_config(endpoint), storage.clone());

    let outcome = controller.initialize(&return_url("abc123")).await.unwrap();
    assert!(outcome.is_authenticated());
    assert_eq!(storage.load().unwrap().unwrap().id_token, "X");
}

#[tokio::test]
async fn error_response_never_writes_storage() {
    let endpoint = spawn_exchange_server(200, r#"{"error":"invalid_grant"}"#).await;

    let storage = Arc::new(MemorySessionStorage::new());
    let (controller, _rx) = AuthFlowController::new(test_config(endpoint), storage.clone());

    let outcome = controller.initialize(&return_url("abc123")).await.unwrap();
    match outcome {
        FlowOutcome::LoginRedirect { url } => {
            assert!(url.starts_with("https://idp.example.com/login?"));
        }
        other => panic!("expected LoginRedirect, got {other:?}"),
    }
    assert!(storage.load().unwrap().is_none());
}

#[tokio::test]
async fn http_error_status_redirects_to_login() {
    let endpoint =
        spawn_exchange_server(400, r#"{"error":"invalid_request"}"#).await;

    let storage = Arc::new(MemorySessionStorage::new());
    let (controller, _rx) = AuthFlowController::new(test_config(endpoint), storage.clone());

    let outcome = controller.initialize(&return_url("abc123")).await.unwrap();
    assert!(!outcome.is_authenticated());
    assert!(storage.load().unwrap().is_none());
}
