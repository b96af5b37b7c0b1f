//! Error taxonomy: transient faults tagged for retry, and terminal API errors.

use std::fmt;

use serde_json::Value;

use crate::http::{RawRequest, RawResponse};

/// A caught, but retryable error.
///
/// Wraps the original fault so it can surface unchanged once the retry
/// budget is exhausted; the retry driver only ever sees the tag.
#[derive(Debug)]
pub struct Retryable {
    context: String,
    original: Option<anyhow::Error>,
}

impl Retryable {
    /// A retryable condition with no underlying fault (e.g. an HTTP 503).
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            original: None,
        }
    }

    /// Tags `original` as retryable without losing its identity.
    pub fn wrapping(context: impl Into<String>, original: impl Into<anyhow::Error>) -> Self {
        Self {
            context: context.into(),
            original: Some(original.into()),
        }
    }

    /// Re-raises the wrapped fault. When there is nothing to unwrap the
    /// context surfaces as a plain error: the retryable tag is shed so an
    /// enclosing retry loop sees an already-exhausted failure as terminal
    /// instead of retrying it all over again.
    pub fn into_original(self) -> anyhow::Error {
        match self.original {
            Some(original) => original,
            None => anyhow::anyhow!("{}", self.context),
        }
    }
}

impl fmt::Display for Retryable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.context)
    }
}

impl std::error::Error for Retryable {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.original
            .as_deref()
            .map(|original| original as &(dyn std::error::Error + 'static))
    }
}

/// A terminal API failure: the server answered, and the answer was no.
///
/// Carries the full exchange plus the structured fields of the error
/// payload, so callers never see an opaque "something failed".
#[derive(Debug)]
pub struct ApiError {
    pub request: RawRequest,
    pub response: RawResponse,
    /// The `error` field of the payload, or the bare status code when the
    /// response had no body.
    pub error: Value,
    pub description: Option<String>,
    pub info: Option<Value>,
    pub url: Option<String>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Value::String(error) => write!(f, "{}", error)?,
            other => write!(f, "{}", other)?,
        }
        if let Some(description) = &self.description {
            write!(f, ": {}", description)?;
            if let Some(info) = &self.info {
                write!(f, "\n{:#}", info)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}
