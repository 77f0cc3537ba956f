use std::time::Duration;

use tracing::{debug, info, warn};

use super::decode_standard;
use crate::error::{HelperError, Result};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Download a subscription and return its decoded text.
///
/// When `proxy_url` is set the request goes through that HTTP forward proxy,
/// otherwise it connects directly and ignores proxy environment variables.
pub async fn fetch(url: &str, proxy_url: Option<&str>) -> Result<String> {
    let builder = reqwest::Client::builder().timeout(FETCH_TIMEOUT);
    let builder = match proxy_url {
        Some(proxy) => builder.proxy(reqwest::Proxy::all(proxy)?),
        None => builder.no_proxy(),
    };
    let client = builder.build()?;

    debug!("fetching subscription from {}", url);

    let body = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    decode_standard(body.trim())
}

/// [`fetch`] with up to `attempts` tries on network errors.
///
/// Decode errors are returned immediately.
pub async fn fetch_with_retry(
    url: &str,
    proxy_url: Option<&str>,
    attempts: u16,
) -> Result<String> {
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        match fetch(url, proxy_url).await {
            Ok(text) => {
                info!("subscription fetched ({} bytes decoded)", text.len());
                return Ok(text);
            }
            Err(HelperError::Network(e)) if attempt < attempts => {
                warn!(
                    "subscription fetch attempt {}/{} failed: {}",
                    attempt, attempts, e
                );
                tokio::time::sleep(RETRY_BACKOFF * u32::from(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
