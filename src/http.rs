//! Shared HTTP plumbing for the open-data and geocoding clients

use std::time::Duration;

use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use tracing::warn;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Bounded retry with exponential backoff for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, backoff: Duration) -> Self {
        Self { retries, backoff }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Build a client with a per-request timeout
pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
}

/// Timeouts, connection failures and 5xx responses are worth another try.
/// Client errors and undecodable bodies are not.
fn is_transient(error: &reqwest::Error) -> bool {
    if error.is_timeout() || error.is_connect() {
        return true;
    }
    error.status().is_some_and(|status| status.is_server_error())
}

/// GET `url` and decode the JSON body, retrying transient failures
pub async fn get_json<T: DeserializeOwned>(
    client: &Client,
    url: Url,
    policy: RetryPolicy,
) -> Result<T, reqwest::Error> {
    let mut attempt = 0;
    loop {
        match fetch_once(client, url.clone()).await {
            Ok(body) => return Ok(body),
            Err(e) if attempt < policy.retries && is_transient(&e) => {
                attempt += 1;
                let delay = policy.delay(attempt);
                warn!(
                    url = %url,
                    attempt,
                    "Transient HTTP failure, retrying in {:?}: {}",
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn fetch_once<T: DeserializeOwned>(client: &Client, url: Url) -> Result<T, reqwest::Error> {
    client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json::<T>()
        .await
}
