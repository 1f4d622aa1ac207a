use std::time::Duration;

use tokio::sync::mpsc;

use twitch_session_core::auth::{
    AuthorizationOutcome, AuthorizationRequest, Authorizer, LoopbackAuthorizer,
};
use twitch_session_core::SessionConfig;

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Start a loopback sign-in and wait until its listener is accepting.
async fn start_loopback(
    timeout: Duration,
) -> (
    String,
    tokio::task::JoinHandle<anyhow::Result<AuthorizationOutcome>>,
) {
    let port = free_port();
    let config = SessionConfig::new("client-123")
        .with_redirect_uri(format!("http://127.0.0.1:{}/callback", port));
    let request = AuthorizationRequest::new(&config);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let authorizer = LoopbackAuthorizer::new(&config)
        .with_browser(false)
        .with_timeout(timeout)
        .with_url_callback(move |url| {
            let _ = tx.send(url.to_string());
        });

    let handle = tokio::spawn(async move { authorizer.authorize(&request).await });
    let url = rx.recv().await.expect("authorizer reported its URL");
    assert!(url.contains("response_type=token"));

    (format!("http://127.0.0.1:{}", port), handle)
}

#[tokio::test]
async fn test_loopback_relays_fragment_and_accepts_token() {
    let (base, handle) = start_loopback(Duration::from_secs(30)).await;
    let http = reqwest::Client::new();

    let other = http.get(format!("{}/favicon.ico", base)).send().await.unwrap();
    assert_eq!(other.status(), 404);

    // Bare redirect serves the page that forwards the fragment
    let relay = http.get(format!("{}/callback", base)).send().await.unwrap();
    assert_eq!(relay.status(), 200);
    assert!(relay.text().await.unwrap().contains("window.location.hash"));

    let done = http
        .get(format!(
            "{}/callback?access_token=abc123&scope=openid%20user%3Aread%3Aemail&state=xyz&token_type=bearer",
            base
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(done.status(), 200);
    assert!(done.text().await.unwrap().contains("Sign-in complete"));

    let outcome = handle.await.unwrap().unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.param("access_token"), Some("abc123"));
    assert_eq!(outcome.param("state"), Some("xyz"));
    assert_eq!(outcome.param("scope"), Some("openid user:read:email"));
}

#[tokio::test]
async fn test_loopback_reports_denied_authorization() {
    let (base, handle) = start_loopback(Duration::from_secs(30)).await;

    let page = reqwest::get(format!(
        "{}/callback?error=access_denied&error_description=The+user+denied+you+access&state=xyz",
        base
    ))
    .await
    .unwrap();
    assert!(page.text().await.unwrap().contains("not completed"));

    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(
        outcome,
        AuthorizationOutcome::Error {
            error: "access_denied".to_string(),
            description: Some("The user denied you access".to_string()),
        }
    );
}

#[tokio::test]
async fn test_loopback_redirect_not_blocked_by_idle_connection() {
    let (base, handle) = start_loopback(Duration::from_secs(30)).await;
    let addr = base.trim_start_matches("http://").to_string();

    // Browsers preconnect to localhost without sending a request
    let _idle = tokio::net::TcpStream::connect(&addr).await.unwrap();

    let page = tokio::time::timeout(
        Duration::from_secs(5),
        reqwest::get(format!("{}/callback?access_token=abc&state=s", base)),
    )
    .await
    .expect("redirect answered while another connection is idle")
    .unwrap();
    assert_eq!(page.status(), 200);

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("authorizer finished")
        .unwrap()
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.param("access_token"), Some("abc"));
}

#[tokio::test(start_paused = true)]
async fn test_loopback_timeout_is_dismiss() {
    let (_base, handle) = start_loopback(Duration::from_secs(300)).await;

    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(outcome, AuthorizationOutcome::Dismiss);
}
