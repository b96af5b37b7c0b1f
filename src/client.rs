//! The API client: verb entry points, the retried request pipeline, and
//! status dispatch.

use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::Value;

use crate::credentials::{AccessToken, Credentials};
use crate::error::{ApiError, Retryable};
use crate::http::{RawRequest, RawResponse, Transport, retrying};

/// A request payload: JSON by default, or raw bytes with an explicit
/// content type.
#[derive(Debug, Clone)]
pub enum Body {
    Json(Value),
    Raw {
        content_type: String,
        content: Vec<u8>,
    },
}

/// How a response status code is handled by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// 200/201: deserialize the body, or "no data" when it is empty.
    Success,
    /// 401: possibly-expired token; drop the cache and retry.
    RetryAuthExpired,
    /// 503: the service says come back later.
    RetryUnavailable,
    /// Everything else: terminal [`ApiError`].
    Error,
}

fn disposition(status: u16) -> Disposition {
    match status {
        200 | 201 => Disposition::Success,
        401 => Disposition::RetryAuthExpired,
        503 => Disposition::RetryUnavailable,
        _ => Disposition::Error,
    }
}

/// A proxy object for one API host.
///
/// Owns its transport, its credentials and the in-memory access token
/// cache. One logical call at a time per instance; concurrent callers
/// should use one client per worker.
pub struct Api {
    conn: Transport,
    credentials: Option<Box<dyn Credentials>>,
    access_token: Mutex<Option<AccessToken>>,
    default_headers: HeaderMap,
}

impl Api {
    /// Creates a client for `base_url`, e.g. `https://api.example.com`.
    pub fn new(base_url: impl Into<String>, credentials: Option<Box<dyn Credentials>>) -> Self {
        Self::with_transport(Transport::new(base_url), credentials)
    }

    /// Creates a client over an existing transport (e.g. one with an
    /// injected connection factory).
    pub fn with_transport(conn: Transport, credentials: Option<Box<dyn Credentials>>) -> Self {
        Self {
            conn,
            credentials,
            access_token: Mutex::new(None),
            default_headers: HeaderMap::new(),
        }
    }

    /// Headers sent with every request, before auth and content headers.
    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = headers;
        self
    }

    /// GET a resource.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, url: &str) -> Result<Option<Value>> {
        self.request(Method::GET, url, None).await
    }

    /// PUT data to a resource.
    #[tracing::instrument(skip(self, data))]
    pub async fn put(&self, url: &str, data: Value) -> Result<Option<Value>> {
        self.request(Method::PUT, url, Some(Body::Json(data))).await
    }

    /// DELETE a resource.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, url: &str) -> Result<Option<Value>> {
        self.request(Method::DELETE, url, None).await
    }

    /// PATCH a resource.
    #[tracing::instrument(skip(self, data))]
    pub async fn patch(&self, url: &str, data: Value) -> Result<Option<Value>> {
        self.request(Method::PATCH, url, Some(Body::Json(data)))
            .await
    }

    /// POST a resource.
    #[tracing::instrument(skip(self, data))]
    pub async fn post(&self, url: &str, data: Value) -> Result<Option<Value>> {
        self.request(Method::POST, url, Some(Body::Json(data)))
            .await
    }

    /// POST raw bytes with an explicit content type.
    #[tracing::instrument(skip(self, content))]
    pub async fn post_raw(
        &self,
        url: &str,
        content_type: &str,
        content: Vec<u8>,
    ) -> Result<Option<Value>> {
        self.request(
            Method::POST,
            url,
            Some(Body::Raw {
                content_type: content_type.to_string(),
                content,
            }),
        )
        .await
    }

    /// Makes an HTTP request to the API.
    ///
    /// Transient failures (connection faults, 503, 401) are retried. The
    /// access token is acquired per attempt — cached when present,
    /// otherwise fetched through the credentials — so a token a 401 just
    /// invalidated is replaced before the next attempt.
    #[tracing::instrument(skip(self, body))]
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<Body>,
    ) -> Result<Option<Value>> {
        self.request_with(method, url, body, |request, response| {
            self.handle(request, response)
        })
        .await
    }

    /// Like [`Api::request`], but hands the raw exchange to `handler`
    /// instead of the built-in dispatch — the extension point for non-JSON
    /// payloads such as streaming a binary body to a file.
    ///
    /// The handler runs inside the retry loop: returning an error tagged
    /// [`Retryable`] re-drives the whole request.
    pub async fn request_with<T, F>(
        &self,
        method: Method,
        url: &str,
        body: Option<Body>,
        handler: F,
    ) -> Result<T>
    where
        F: Fn(&RawRequest, RawResponse) -> Result<T>,
    {
        let (bytes, content_type) = serialize(body)?;
        let name = format!("{} {}", method, url);
        retrying(&name, || async {
            let token = self.acquire_token().await?;
            let headers = self.build_headers(token.as_ref(), content_type.as_deref())?;
            let (request, response) = self
                .conn
                .send(method.clone(), url, bytes.as_deref(), headers)
                .await?;
            handler(&request, response)
        })
        .await
    }

    /// Status dispatch: turns a raw exchange into data, a retryable fault,
    /// or a terminal [`ApiError`].
    pub fn handle(&self, request: &RawRequest, response: RawResponse) -> Result<Option<Value>> {
        match disposition(response.status) {
            Disposition::Success => {
                if response.body.is_empty() {
                    return Ok(None);
                }
                deserialize(&response.body).map(Some)
            }
            Disposition::RetryAuthExpired => {
                // TODO: let this arm check whether the token actually
                // expired instead of assuming so; a permanently invalid
                // credential currently burns the whole retry budget.
                self.invalidate_token();
                Err(Retryable::new("expired access token?").into())
            }
            Disposition::RetryUnavailable => {
                Err(Retryable::new("service temporarily unavailable").into())
            }
            Disposition::Error => Err(api_error(request, response)),
        }
    }

    /// Returns the cached access token, asking the credentials for a fresh
    /// one on a cache miss. `None` when the client has no credentials.
    async fn acquire_token(&self) -> Result<Option<AccessToken>> {
        if let Some(token) = self.cached_token() {
            return Ok(Some(token));
        }
        let Some(credentials) = &self.credentials else {
            return Ok(None);
        };
        let token = credentials.access_token(self).await?;
        *self
            .access_token
            .lock()
            .expect("token cache lock poisoned") = Some(token.clone());
        Ok(Some(token))
    }

    fn cached_token(&self) -> Option<AccessToken> {
        self.access_token
            .lock()
            .expect("token cache lock poisoned")
            .clone()
    }

    fn invalidate_token(&self) {
        self.access_token
            .lock()
            .expect("token cache lock poisoned")
            .take();
    }

    fn build_headers(
        &self,
        token: Option<&AccessToken>,
        content_type: Option<&str>,
    ) -> Result<HeaderMap> {
        let mut headers = self.default_headers.clone();
        if let Some(token) = token {
            headers.insert(AUTHORIZATION, auth_header(token)?);
        }
        if let Some(content_type) = content_type {
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_str(content_type).context("invalid content type")?,
            );
        }
        Ok(headers)
    }
}

fn auth_header(token: &AccessToken) -> Result<HeaderValue> {
    let (Some(token_type), Some(value)) = (&token.token_type, &token.access_token) else {
        bail!("access token is missing token_type/access_token");
    };
    HeaderValue::from_str(&format!("{} {}", token_type, value))
        .context("access token does not form a valid Authorization header")
}

/// The error payload shape for non-2xx responses with a body.
#[derive(Debug, Default, Deserialize)]
struct ErrorPayload {
    error: Value,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error_info: Option<Value>,
    #[serde(default)]
    error_url: Option<String>,
}

fn api_error(request: &RawRequest, response: RawResponse) -> anyhow::Error {
    let payload = if response.body.is_empty() {
        Ok(ErrorPayload {
            error: Value::from(response.status),
            ..ErrorPayload::default()
        })
    } else {
        deserialize(&response.body).and_then(|value| {
            serde_json::from_value(value).context("malformed error response body")
        })
    };
    match payload {
        Ok(payload) => ApiError {
            request: request.clone(),
            response,
            error: payload.error,
            description: payload.error_description,
            info: payload.error_info,
            url: payload.error_url,
        }
        .into(),
        Err(e) => e,
    }
}

/// Serializes the payload to wire bytes plus its content type. No payload
/// means no body and no content headers.
fn serialize(body: Option<Body>) -> Result<(Option<Vec<u8>>, Option<String>)> {
    match body {
        None => Ok((None, None)),
        Some(Body::Json(data)) => {
            let bytes =
                serde_json::to_vec(&data).context("failed to serialize request body as JSON")?;
            Ok((Some(bytes), Some("application/json".to_string())))
        }
        Some(Body::Raw {
            content_type,
            content,
        }) => Ok((Some(content), Some(content_type))),
    }
}

/// JSON is the only wire format; bodies are UTF-8 text.
fn deserialize(body: &[u8]) -> Result<Value> {
    let text = std::str::from_utf8(body).context("response body is not valid UTF-8")?;
    serde_json::from_str(text).context("failed to parse response body as JSON")
}
