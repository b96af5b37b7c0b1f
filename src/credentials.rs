//! Credential strategies for acquiring OAuth2 access tokens.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use url::form_urlencoded;

use crate::client::Api;
use crate::http::{Transport, retrying};

/// Default authorization origin for token requests.
pub const DEFAULT_AUTH_URL: &str = "https://go.vanguardistas.net";

/// Path of the OAuth2 token endpoint on the authorization host.
pub const TOKEN_ENDPOINT: &str = "/oauth/token";

/// An OAuth2 access token as returned by the token endpoint.
///
/// Both fields are optional on the wire: a payload missing either is only
/// an error once an Authorization header is built from it, not at
/// acquisition time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AccessToken {
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

/// The capability of producing an access token for an [`Api`] client.
///
/// Token-endpoint responses are routed through the calling client's status
/// dispatch, so token failures surface with the same taxonomy as ordinary
/// API calls.
#[async_trait]
pub trait Credentials: Send + Sync {
    async fn access_token(&self, api: &Api) -> Result<AccessToken>;
}

/// The OAuth2 client-credentials grant.
///
/// Owns a dedicated transport against the authorization host; the resource
/// host's connection is never used for token traffic.
pub struct ClientCredentialsGrant {
    api_key: String,
    api_secret: String,
    conn: Transport,
}

impl ClientCredentialsGrant {
    /// Credentials against the default authorization host.
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self::with_auth_url(api_key, api_secret, DEFAULT_AUTH_URL)
    }

    /// Credentials against a specific authorization origin.
    pub fn with_auth_url(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        auth_url: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            conn: Transport::new(auth_url),
        }
    }

    /// Reads `VAN_API_KEY` and `VAN_API_SECRET` from the environment.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("VAN_API_KEY").context("VAN_API_KEY is not set")?;
        let api_secret = std::env::var("VAN_API_SECRET").context("VAN_API_SECRET is not set")?;
        Ok(Self::new(api_key, api_secret))
    }
}

#[async_trait]
impl Credentials for ClientCredentialsGrant {
    #[tracing::instrument(skip(self, api))]
    async fn access_token(&self, api: &Api) -> Result<AccessToken> {
        let form = [
            ("grant_type", "client_credentials"),
            ("api_key", self.api_key.as_str()),
            ("api_secret", self.api_secret.as_str()),
        ];
        request_token(&self.conn, api, &form).await
    }
}

/// POSTs a form-encoded grant to the token endpoint, retrying transient
/// failures, and decodes the payload through `api`'s dispatcher.
pub async fn request_token(
    conn: &Transport,
    api: &Api,
    form: &[(&str, &str)],
) -> Result<AccessToken> {
    let body: String = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(form)
        .finish();
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-www-form-urlencoded"),
    );

    let payload = retrying("POST /oauth/token", || async {
        let (request, response) = conn
            .send(
                Method::POST,
                TOKEN_ENDPOINT,
                Some(body.as_bytes()),
                headers.clone(),
            )
            .await?;
        api.handle(&request, response)
    })
    .await?;

    match payload {
        Some(value) => serde_json::from_value(value).context("malformed token response"),
        None => Ok(AccessToken::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;

    fn api() -> Api {
        // The resource host is never contacted by token requests.
        Api::new("https://apihost", None)
    }

    #[tokio::test]
    async fn test_access_token_posts_the_form_encoded_grant() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body("grant_type=client_credentials&api_key=key&api_secret=secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"token_type": "bearer", "access_token": "tok", "expires_in": 3600}"#,
            )
            .create_async()
            .await;

        let creds = ClientCredentialsGrant::with_auth_url("key", "secret", server.url());
        let token = creds.access_token(&api()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(token.token_type.as_deref(), Some("bearer"));
        assert_eq!(token.access_token.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_token_endpoint_errors_use_the_shared_taxonomy() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": "invalid_client"}"#)
            .create_async()
            .await;

        let creds = ClientCredentialsGrant::with_auth_url("key", "bad", server.url());
        let err = creds.access_token(&api()).await.unwrap_err();

        mock.assert_async().await;
        let api_err = err.downcast_ref::<ApiError>().unwrap();
        assert_eq!(api_err.error, serde_json::Value::from("invalid_client"));
    }

    #[tokio::test]
    async fn test_token_payload_with_missing_fields_is_accepted() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "tok"}"#)
            .create_async()
            .await;

        let creds = ClientCredentialsGrant::with_auth_url("key", "secret", server.url());
        let token = creds.access_token(&api()).await.unwrap();

        // Incomplete, but only an error once a header is built from it.
        assert_eq!(token.token_type, None);
        assert_eq!(token.access_token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_from_env() {
        // Safety: test-only env mutation; nothing else reads these names.
        unsafe {
            std::env::set_var("VAN_API_KEY", "key-from-env");
            std::env::set_var("VAN_API_SECRET", "secret-from-env");
        }
        let creds = ClientCredentialsGrant::from_env().unwrap();
        assert_eq!(creds.api_key, "key-from-env");
        assert_eq!(creds.api_secret, "secret-from-env");
        assert_eq!(creds.conn.base_url(), DEFAULT_AUTH_URL);
    }
}
