//! OAuth 2.0 implicit grant authorization step.
//!
//! The hosted authorization page redirects back to the application's
//! redirect URI with the access token in the URL fragment (or an `error`
//! in the query string). Two drivers are provided:
//!
//! - [`LoopbackAuthorizer`]: opens the browser and catches the redirect on a
//!   short-lived localhost listener
//! - [`PasteAuthorizer`]: for headless machines, the user pastes the
//!   redirected URL back into the terminal

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::{Rng, distributions::Alphanumeric};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use url::{Url, form_urlencoded};

use crate::config::SessionConfig;

/// Length of the random `state` value sent with each request
pub const STATE_LENGTH: usize = 30;

/// Maximum bytes read from a callback request
const MAX_REQUEST_BYTES: usize = 8192;

/// How long a callback connection may stay silent before it is dropped
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Served on the bare redirect URI: forwards the fragment as a query string,
/// since browsers never send fragments to the server.
const RELAY_PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Twitch Sign-in</title></head>
<body style="font-family:system-ui;text-align:center;padding:60px">
<h2 id="msg">Completing sign-in...</h2>
<script>
var hash = window.location.hash.substring(1);
if (hash) {
  window.location.replace(window.location.pathname + "?" + hash);
} else {
  document.getElementById("msg").textContent = "No authorization result received.";
}
</script>
</body></html>"#;

const DONE_PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Twitch Sign-in</title></head>
<body style="font-family:system-ui;text-align:center;padding:60px">
<h2>Sign-in complete</h2>
<p>You can close this tab and return to the application.</p>
</body></html>"#;

const DENIED_PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Twitch Sign-in</title></head>
<body style="font-family:system-ui;text-align:center;padding:60px">
<h2>Sign-in was not completed</h2>
<p>You can close this tab and return to the application.</p>
</body></html>"#;

/// Generate a fresh random `state` value.
pub fn generate_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_LENGTH)
        .map(char::from)
        .collect()
}

/// Build the hosted authorization page URL for an implicit grant.
pub fn build_authorize_url(config: &SessionConfig, state: &str) -> String {
    let separator = if config.endpoints.authorize_url.contains('?') {
        '&'
    } else {
        '?'
    };
    format!(
        "{base}{separator}client_id={client_id}\
        &redirect_uri={redirect}\
        &response_type=token\
        &scope={scope}\
        &force_verify={force_verify}\
        &state={state}",
        base = config.endpoints.authorize_url,
        client_id = urlencoding::encode(&config.client_id),
        redirect = urlencoding::encode(&config.redirect_uri),
        scope = urlencoding::encode(&config.scope_param()),
        force_verify = config.force_verify,
        state = urlencoding::encode(state),
    )
}

/// A single authorization attempt.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Full authorization page URL to open
    pub url: String,
    /// The `state` value embedded in `url`
    pub state: String,
    pub redirect_uri: String,
}

impl AuthorizationRequest {
    /// Create a request with a freshly generated `state`.
    pub fn new(config: &SessionConfig) -> Self {
        let state = generate_state();
        Self {
            url: build_authorize_url(config, &state),
            state,
            redirect_uri: config.redirect_uri.clone(),
        }
    }
}

/// Terminal result of the interactive step.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthorizationOutcome {
    /// Redirect carried an access token; all returned parameters included
    Success { params: HashMap<String, String> },
    /// The user explicitly backed out
    Cancel,
    /// The flow ended without a result (closed page, timeout)
    Dismiss,
    /// The authorization server reported an error
    Error {
        error: String,
        description: Option<String>,
    },
}

impl AuthorizationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AuthorizationOutcome::Success { .. })
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        match self {
            AuthorizationOutcome::Success { params } => params.get(name).map(String::as_str),
            _ => None,
        }
    }

    /// Short reason for a non-success outcome
    pub fn reason(&self) -> String {
        match self {
            AuthorizationOutcome::Success { .. } => "success".to_string(),
            AuthorizationOutcome::Cancel => "cancelled by user".to_string(),
            AuthorizationOutcome::Dismiss => "authorization dismissed".to_string(),
            AuthorizationOutcome::Error { error, description } => match description {
                Some(description) => format!("{}: {}", error, description),
                None => error.clone(),
            },
        }
    }
}

/// Classify redirect parameters.
pub fn outcome_from_params(mut params: HashMap<String, String>) -> AuthorizationOutcome {
    if let Some(error) = params.remove("error") {
        return AuthorizationOutcome::Error {
            error,
            description: params.remove("error_description"),
        };
    }
    if params.contains_key("access_token") {
        AuthorizationOutcome::Success { params }
    } else {
        AuthorizationOutcome::Dismiss
    }
}

/// Parse the URL the authorization page redirected to.
///
/// Parameters are read from the query string and the fragment; fragment
/// values win when both carry the same name.
pub fn parse_redirect(redirect: &str) -> Result<AuthorizationOutcome> {
    let url = Url::parse(redirect.trim()).context("Invalid redirect URL")?;

    let mut params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    if let Some(fragment) = url.fragment() {
        params.extend(form_urlencoded::parse(fragment.as_bytes()).into_owned());
    }

    Ok(outcome_from_params(params))
}

/// Drives the interactive authorization step and reports its terminal result.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, request: &AuthorizationRequest) -> Result<AuthorizationOutcome>;
}

// ============================================================================
// Loopback driver
// ============================================================================

pub type UrlCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Opens the authorization page and waits for the redirect on localhost.
pub struct LoopbackAuthorizer {
    timeout: Duration,
    open_browser: bool,
    on_url: Option<UrlCallback>,
}

impl LoopbackAuthorizer {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.callback_timeout_secs),
            open_browser: cfg!(feature = "browser"),
            on_url: None,
        }
    }

    /// Disable to only report the URL through the callback
    pub fn with_browser(mut self, open_browser: bool) -> Self {
        self.open_browser = open_browser;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Called with the authorization URL once the listener is ready
    pub fn with_url_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_url = Some(Box::new(callback));
        self
    }
}

#[async_trait]
impl Authorizer for LoopbackAuthorizer {
    async fn authorize(&self, request: &AuthorizationRequest) -> Result<AuthorizationOutcome> {
        let redirect = Url::parse(&request.redirect_uri).context("Invalid redirect URI")?;
        let host = match redirect.host_str() {
            Some("localhost") | None => "127.0.0.1",
            Some(host) => host,
        };
        let port = redirect
            .port_or_known_default()
            .context("Redirect URI has no port")?;

        let listener = TcpListener::bind((host, port))
            .await
            .with_context(|| format!("Failed to bind {}:{} for the sign-in redirect", host, port))?;
        tracing::debug!("Waiting for sign-in redirect on {}:{}", host, port);

        if let Some(on_url) = &self.on_url {
            on_url(&request.url);
        }
        if self.open_browser {
            open_in_browser(&request.url);
        }

        match tokio::time::timeout(self.timeout, accept_redirect(&listener, redirect.path())).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    "No sign-in redirect received after {}s",
                    self.timeout.as_secs()
                );
                Ok(AuthorizationOutcome::Dismiss)
            }
        }
    }
}

#[cfg(feature = "browser")]
fn open_in_browser(url: &str) {
    if let Err(e) = webbrowser::open(url) {
        tracing::warn!(
            "Failed to open browser automatically: {}. User can use the manual link.",
            e
        );
    }
}

#[cfg(not(feature = "browser"))]
fn open_in_browser(_url: &str) {
    tracing::debug!("Browser support disabled; waiting for the user to open the link");
}

/// Serve callback requests until one carries an authorization result.
///
/// Each connection is handled on its own task so an idle browser
/// preconnection cannot hold up the real redirect.
async fn accept_redirect(listener: &TcpListener, callback_path: &str) -> Result<AuthorizationOutcome> {
    let (tx, mut rx) = mpsc::channel(1);
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _addr) = accepted?;
                let tx = tx.clone();
                let callback_path = callback_path.to_string();
                tokio::spawn(async move {
                    if let Some(outcome) = handle_callback(stream, &callback_path).await {
                        let _ = tx.send(outcome).await;
                    }
                });
            }
            Some(outcome) = rx.recv() => return Ok(outcome),
        }
    }
}

/// Answer one callback connection; `Some` when it carried a result.
async fn handle_callback(mut stream: TcpStream, callback_path: &str) -> Option<AuthorizationOutcome> {
    let target = match tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request_target(&mut stream)).await {
        Ok(Ok(target)) => target,
        Ok(Err(e)) => {
            tracing::debug!("Ignoring malformed callback request: {}", e);
            return None;
        }
        Err(_) => {
            tracing::debug!("Dropping idle callback connection");
            return None;
        }
    };

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target.as_str(), ""),
    };

    if path != callback_path {
        write_response(&mut stream, "404 Not Found", "").await;
        return None;
    }

    if query.is_empty() {
        write_response(&mut stream, "200 OK", RELAY_PAGE).await;
        return None;
    }

    let params = form_urlencoded::parse(query.as_bytes()).into_owned().collect();
    let outcome = outcome_from_params(params);
    let page = if outcome.is_success() { DONE_PAGE } else { DENIED_PAGE };
    write_response(&mut stream, "200 OK", page).await;
    Some(outcome)
}

/// Read the request line and return its target ("/callback?a=b").
async fn read_request_target(stream: &mut TcpStream) -> Result<String> {
    let mut buf = vec![0u8; MAX_REQUEST_BYTES];
    let n = stream.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);

    let first_line = request.lines().next().unwrap_or_default();
    let mut parts = first_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("GET"), Some(target)) => Ok(target.to_string()),
        _ => Err(anyhow::anyhow!("unexpected request line: {:?}", first_line)),
    }
}

async fn write_response(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        tracing::debug!("Failed to write callback response: {}", e);
        return;
    }
    if let Err(e) = stream.flush().await {
        tracing::debug!("Failed to flush callback response: {}", e);
    }
}

// ============================================================================
// Paste driver
// ============================================================================

/// Prints the authorization URL and reads the redirected URL from stdin.
#[derive(Debug, Default)]
pub struct PasteAuthorizer;

#[async_trait]
impl Authorizer for PasteAuthorizer {
    async fn authorize(&self, request: &AuthorizationRequest) -> Result<AuthorizationOutcome> {
        println!();
        println!("Open the following URL in a browser and sign in:");
        println!();
        println!("{}", request.url);
        println!();
        println!("Then paste the full URL the browser was redirected to");
        println!("(it starts with {}), or press Enter to cancel:", request.redirect_uri);

        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .context("Failed to read redirect URL")?;

        let line = line.trim();
        if line.is_empty() {
            return Ok(AuthorizationOutcome::Cancel);
        }
        parse_redirect(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_state() {
        let a = generate_state();
        let b = generate_state();
        assert_eq!(a.len(), STATE_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_build_authorize_url() {
        let config = SessionConfig::new("client-123");
        let url = build_authorize_url(&config, "abcDEF123");

        assert!(url.starts_with("https://id.twitch.tv/oauth2/authorize?client_id=client-123&"));
        assert!(url.contains("&redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Fcallback&"));
        assert!(url.contains("&response_type=token&"));
        assert!(url.contains("&scope=openid%20user%3Aread%3Aemail%20user%3Aread%3Afollows&"));
        assert!(url.contains("&force_verify=true&"));
        assert!(url.ends_with("&state=abcDEF123"));

        let parsed = Url::parse(&url).unwrap();
        let params: HashMap<String, String> = parsed.query_pairs().into_owned().collect();
        assert_eq!(params["scope"], "openid user:read:email user:read:follows");
        assert_eq!(params["redirect_uri"], "http://localhost:3000/callback");
    }

    #[test]
    fn test_build_authorize_url_with_existing_query() {
        let config = SessionConfig::new("c").with_authorize_url("http://127.0.0.1:1/authorize?lang=en");
        let url = build_authorize_url(&config, "s");
        assert!(url.starts_with("http://127.0.0.1:1/authorize?lang=en&client_id=c&"));
    }

    #[test]
    fn test_request_embeds_state() {
        let config = SessionConfig::new("client-123");
        let request = AuthorizationRequest::new(&config);
        assert_eq!(request.state.len(), STATE_LENGTH);
        assert!(request.url.ends_with(&format!("state={}", request.state)));
        assert_eq!(request.redirect_uri, config.redirect_uri);
    }

    #[test]
    fn test_parse_redirect_fragment_success() {
        let outcome = parse_redirect(
            "http://localhost:3000/callback#access_token=73d0f8mkabpbmjp921asv2jaidwxn&scope=openid%20user%3Aread%3Aemail&state=c3ab8aa609ea11e793ae92361f002671&token_type=bearer",
        )
        .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.param("access_token"), Some("73d0f8mkabpbmjp921asv2jaidwxn"));
        assert_eq!(outcome.param("state"), Some("c3ab8aa609ea11e793ae92361f002671"));
        assert_eq!(outcome.param("scope"), Some("openid user:read:email"));
    }

    #[test]
    fn test_parse_redirect_query_error() {
        let outcome = parse_redirect(
            "http://localhost:3000/callback?error=access_denied&error_description=The+user+denied+you+access&state=c3ab8aa609ea11e793ae92361f002671",
        )
        .unwrap();

        assert_eq!(
            outcome,
            AuthorizationOutcome::Error {
                error: "access_denied".to_string(),
                description: Some("The user denied you access".to_string()),
            }
        );
        assert_eq!(outcome.reason(), "access_denied: The user denied you access");
        assert!(outcome.param("state").is_none());
    }

    #[test]
    fn test_parse_redirect_without_result() {
        let outcome = parse_redirect("http://localhost:3000/callback").unwrap();
        assert_eq!(outcome, AuthorizationOutcome::Dismiss);
    }

    #[test]
    fn test_parse_redirect_invalid_url() {
        assert!(parse_redirect("not a url").is_err());
    }
}
