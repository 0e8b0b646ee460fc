//! HTTP plumbing shared by the remote collaborators

use std::future::Future;
use std::time::Duration;

use reqwest::Client;

use crate::{Error, Result};

/// Longest a single request to a remote service may take
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client whose requests fail once `timeout` has elapsed
pub(crate) fn client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to build http client, using defaults");
            Client::new()
        })
}

/// Await `call`, giving up with `Error::ServiceUnavailable` after `timeout`
///
/// # Errors
///
/// Returns the call's own error, or `Error::ServiceUnavailable` if it did not
/// finish in time
pub async fn with_deadline<T, F>(service: &str, timeout: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, call).await.unwrap_or_else(|_| {
        tracing::warn!(service, ?timeout, "remote call timed out");
        Err(Error::ServiceUnavailable(format!(
            "{service} did not answer within {timeout:?}"
        )))
    })
}
