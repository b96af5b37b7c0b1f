//! Single-origin transport owning one lazily-created connection handle.

use std::fmt;
use std::sync::Mutex;

use anyhow::Result;
use log::{debug, info};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method};

use crate::error::Retryable;

/// Builds the connection handle on demand. Swappable in tests to count how
/// often the handle is re-created.
pub type ConnFactory = Box<dyn Fn() -> Client + Send + Sync>;

/// One outgoing request, as handed to the wire. Built fresh per attempt and
/// never mutated afterwards.
#[derive(Clone)]
pub struct RawRequest {
    pub method: Method,
    pub host: String,
    pub url: String,
    pub body: Option<Vec<u8>>,
    pub headers: HeaderMap,
}

impl fmt::Debug for RawRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawRequest")
            .field("method", &self.method)
            .field("host", &self.host)
            .field("url", &self.url)
            .field("body", &self.body.as_deref().map(String::from_utf8_lossy))
            .field("headers", &self.headers)
            .finish()
    }
}

/// One fully-read response. The body is opaque bytes; interpretation is the
/// dispatcher's job.
#[derive(Clone)]
pub struct RawResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Case-insensitive header lookup; first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .field("body", &String::from_utf8_lossy(&self.body))
            .finish()
    }
}

/// Owns the single reusable connection handle for one origin.
///
/// The handle is created on first use and unconditionally disposed of on
/// any transport-level fault, so the next call starts from a clean slate.
pub struct Transport {
    base_url: String,
    conn: Mutex<Option<Client>>,
    conn_factory: ConnFactory,
}

impl Transport {
    /// Creates a transport for `base_url`, e.g. `https://api.example.com`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_factory(base_url, Box::new(Client::new))
    }

    /// Creates a transport with an injected connection factory.
    pub fn with_factory(base_url: impl Into<String>, conn_factory: ConnFactory) -> Self {
        Self {
            base_url: base_url.into(),
            conn: Mutex::new(None),
            conn_factory,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends a single request and reads the full response.
    ///
    /// This is a low level method: statuses are returned as-is, but any
    /// transport fault (connect refused, reset, timeout, truncated body)
    /// disposes of the connection handle and comes back as a [`Retryable`]
    /// wrapping the underlying fault.
    #[tracing::instrument(skip(self, body, headers))]
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&[u8]>,
        headers: HeaderMap,
    ) -> Result<(RawRequest, RawResponse)> {
        let conn = self.conn();
        let request = RawRequest {
            method,
            host: self.base_url.clone(),
            url: url.to_string(),
            body: body.map(<[u8]>::to_vec),
            headers,
        };
        debug!("REQUEST:\n{:#?}", request);
        match self.exchange(&conn, &request).await {
            Ok(response) => {
                debug!("RESPONSE:\n{:#?}", response);
                Ok((request, response))
            }
            Err(fault) => {
                // The handle may be mid-stream or otherwise broken; never
                // hand it out again.
                self.disconnect();
                info!("HTTP connection error: {}", fault);
                Err(Retryable::wrapping("HTTP connection error", fault).into())
            }
        }
    }

    async fn exchange(
        &self,
        conn: &Client,
        request: &RawRequest,
    ) -> Result<RawResponse, reqwest::Error> {
        let mut builder = conn
            .request(
                request.method.clone(),
                format!("{}{}", self.base_url, request.url),
            )
            .headers(request.headers.clone());
        if let Some(bytes) = &request.body {
            builder = builder.body(bytes.clone());
        }

        let resp = builder.send().await?;
        let status = resp.status();
        let headers = resp
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = resp.bytes().await?.to_vec();

        Ok(RawResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }

    fn conn(&self) -> Client {
        let mut conn = self.conn.lock().expect("connection handle lock poisoned");
        conn.get_or_insert_with(|| (self.conn_factory)()).clone()
    }

    fn disconnect(&self) {
        // Dropping the handle closes its pooled connections once any
        // in-flight clone is gone.
        self.conn
            .lock()
            .expect("connection handle lock poisoned")
            .take();
    }
}
