//! HTTP plumbing shared by the API client and the credential strategies.

mod retry;
mod transport;

pub use retry::{MAX_ATTEMPTS, retrying};
pub use transport::{ConnFactory, RawRequest, RawResponse, Transport};
