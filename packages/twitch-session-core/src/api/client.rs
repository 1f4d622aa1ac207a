use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::ApiError;
use crate::config::{Endpoints, SessionConfig};

/// Header carrying the application client id on Helix requests
const CLIENT_ID_HEADER: &str = "client-id";

/// HTTP client for the Twitch identity and Helix endpoints.
///
/// No timeout or retry policy is applied; failures surface through
/// `ApiError` for the caller to handle.
#[derive(Debug, Clone)]
pub struct TwitchClient {
    http: reqwest::Client,
    client_id: String,
    endpoints: Endpoints,
}

impl TwitchClient {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            client_id: config.client_id.clone(),
            endpoints: config.endpoints.clone(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Build the header set for an outgoing Helix request.
    ///
    /// `Client-Id` is always present; `Authorization` only when a token is given.
    pub fn request_headers(&self, token: Option<&str>) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(CLIENT_ID_HEADER),
            HeaderValue::from_str(&self.client_id)?,
        );
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Fetch the profile records of the user owning `token`.
    pub async fn get_users(&self, token: &str) -> Result<Vec<TwitchUser>, ApiError> {
        let resp = self
            .http
            .get(&self.endpoints.users_url)
            .headers(self.request_headers(Some(token))?)
            .send()
            .await?;

        let users: UsersResponse = Self::parse_json(resp).await?;
        tracing::debug!("Users endpoint returned {} record(s)", users.data.len());
        Ok(users.data)
    }

    /// Validate `token` against the identity server.
    pub async fn validate_token(&self, token: &str) -> Result<TokenValidation, ApiError> {
        let mut auth = HeaderValue::from_str(&format!("OAuth {}", token))?;
        auth.set_sensitive(true);

        let resp = self
            .http
            .get(&self.endpoints.validate_url)
            .header(header::AUTHORIZATION, auth)
            .send()
            .await?;

        Self::parse_json(resp).await
    }

    /// Revoke `token` so it can no longer be used.
    pub async fn revoke_token(&self, token: &str) -> Result<(), ApiError> {
        let resp = self
            .http
            .post(&self.endpoints.revoke_url)
            .form(&[("client_id", self.client_id.as_str()), ("token", token)])
            .send()
            .await?;

        Self::check_response(resp).await?;
        Ok(())
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
        let resp = Self::check_response(resp).await?;
        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

/// Profile record of an authenticated user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwitchUser {
    pub id: String,
    /// Lower-case account name; absent in records written by older versions
    #[serde(default)]
    pub login: String,
    pub display_name: String,
    /// Only returned when the `user:read:email` scope was granted
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub profile_image_url: String,
}

impl TwitchUser {
    /// Whether this record belongs to the account named by a validation response
    pub fn matches_login(&self, login: &str) -> bool {
        let own = if self.login.is_empty() {
            self.display_name.to_lowercase()
        } else {
            self.login.to_lowercase()
        };
        !own.is_empty() && own == login.to_lowercase()
    }
}

/// Body of a successful token validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenValidation {
    pub client_id: String,
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    data: Vec<TwitchUser>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_headers_with_token() {
        let client = TwitchClient::new(&SessionConfig::new("client-123"));
        let headers = client.request_headers(Some("tok")).unwrap();

        assert_eq!(headers.get("client-id").unwrap(), "client-123");
        assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Bearer tok");
        assert!(headers.get(header::AUTHORIZATION).unwrap().is_sensitive());
    }

    #[test]
    fn test_request_headers_without_token() {
        let client = TwitchClient::new(&SessionConfig::new("client-123"));
        let headers = client.request_headers(None).unwrap();

        assert_eq!(headers.get("client-id").unwrap(), "client-123");
        assert!(headers.get(header::AUTHORIZATION).is_none());
    }

    #[test]
    fn test_parse_users_response() {
        let json = r#"{"data":[{"id":"141981764","login":"twitchdev","display_name":"TwitchDev","type":"","broadcaster_type":"partner","description":"Supporting third-party developers","profile_image_url":"https://static-cdn.jtvnw.net/jtv_user_pictures/8a6381c7-d0c0-4576-b179-38bd5ce1d6af-profile_image-300x300.png","offline_image_url":"","view_count":5980557,"email":"not-real@email.com","created_at":"2016-12-14T20:32:28Z"}]}"#;

        let resp: UsersResponse = serde_json::from_str(json).expect("Failed to parse users test JSON");
        assert_eq!(resp.data.len(), 1);

        let user = &resp.data[0];
        assert_eq!(user.id, "141981764");
        assert_eq!(user.login, "twitchdev");
        assert_eq!(user.display_name, "TwitchDev");
        assert_eq!(user.email.as_deref(), Some("not-real@email.com"));
        assert!(user.profile_image_url.ends_with("300x300.png"));
    }

    #[test]
    fn test_parse_user_without_email() {
        let json = r#"{"id":"1","login":"someone","display_name":"Someone","profile_image_url":""}"#;
        let user: TwitchUser = serde_json::from_str(json).unwrap();
        assert!(user.email.is_none());
    }

    #[test]
    fn test_matches_login() {
        let user = TwitchUser {
            id: "1".to_string(),
            login: "twitchdev".to_string(),
            display_name: "TwitchDev".to_string(),
            email: None,
            profile_image_url: String::new(),
        };
        assert!(user.matches_login("twitchdev"));
        assert!(user.matches_login("TwitchDev"));
        assert!(!user.matches_login("someoneelse"));

        // Older records carry no login; fall back to the display name
        let legacy = TwitchUser {
            login: String::new(),
            ..user
        };
        assert!(legacy.matches_login("twitchdev"));

        let empty = TwitchUser {
            login: String::new(),
            display_name: String::new(),
            ..legacy
        };
        assert!(!empty.matches_login(""));
    }

    #[test]
    fn test_parse_validation_response() {
        let json = r#"{"client_id":"wbmytr93xzw8zbg0p1izqyzzc5mbiz","login":"twitchdev","scopes":["channel:read:subscriptions"],"user_id":"141981764","expires_in":5520838}"#;
        let validation: TokenValidation = serde_json::from_str(json).unwrap();
        assert_eq!(validation.login, "twitchdev");
        assert_eq!(validation.user_id, "141981764");
        assert_eq!(validation.expires_in, 5520838);
    }
}
