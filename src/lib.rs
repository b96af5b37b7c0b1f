//! Client library for the Vanguardistas APIs.
//!
//! A thin, resilient layer over HTTP that provides:
//!
//! * serialization and deserialization of JSON payloads
//! * conversion of API errors into typed Rust errors
//! * retrieving, caching and renewing access tokens as required
//! * retrying requests on transient failures
//!
//! The entry point is [`Api`], usually paired with a
//! [`ClientCredentialsGrant`]:
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use van_api::{Api, ClientCredentialsGrant};
//!
//! let credentials = ClientCredentialsGrant::new("my-key", "my-secret");
//! let api = Api::new("https://api.example.com", Some(Box::new(credentials)));
//! let sections = api.get("/1/sections?fields=title-urlname-url").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod credentials;
pub mod error;
pub mod http;

pub use client::{Api, Body};
pub use credentials::{AccessToken, ClientCredentialsGrant, Credentials};
pub use error::{ApiError, Retryable};

/// The crate version, stamped from git tags at build time.
pub fn version() -> &'static str {
    env!("VAN_API_VERSION")
}
