use crate::config::Config;
use crate::{Result, ScanError};
use log::debug;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH};
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Status codes taken as proof that a path exists (exposed or access-controlled)
pub const VERIFIED_STATUSES: &[u16] = &[200, 401, 403];

/// Build the client shared by verification, header audit and crawling:
/// custom user agent, authorization marker header, redirects followed,
/// certificate validation disabled.
pub fn build_client(config: &Config) -> Result<Client> {
    let mut headers = HeaderMap::new();
    let name = HeaderName::from_bytes(config.http.authz_header.as_bytes())
        .map_err(|e| config::ConfigError::Message(format!("Invalid authorization header name: {}", e)))?;
    let value = HeaderValue::from_str(&config.http.authz_value)
        .map_err(|e| config::ConfigError::Message(format!("Invalid authorization header value: {}", e)))?;
    headers.insert(name, value);

    Client::builder()
        .timeout(config.request_timeout())
        .danger_accept_invalid_certs(true)
        .redirect(reqwest::redirect::Policy::limited(config.http.max_redirects as usize))
        .user_agent(&config.http.user_agent)
        .default_headers(headers)
        .build()
        .map_err(ScanError::Http)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub status: Option<u16>,
    pub content_length: Option<String>,
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn is_verified(&self) -> bool {
        self.status.map_or(false, |s| VERIFIED_STATUSES.contains(&s))
    }
}

/// HEAD the URL, retrying with GET when the server rejects HEAD (405/501).
/// Transport errors are recorded in the outcome instead of being returned.
pub async fn probe(client: &Client, url: &str) -> ProbeOutcome {
    let response = match client.head(url).send().await {
        Ok(resp)
            if resp.status() == StatusCode::METHOD_NOT_ALLOWED
                || resp.status() == StatusCode::NOT_IMPLEMENTED =>
        {
            client.get(url).send().await
        }
        other => other,
    };

    match response {
        Ok(resp) => {
            let content_length = resp
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            debug!("Probe {} -> {}", url, resp.status());
            ProbeOutcome {
                status: Some(resp.status().as_u16()),
                content_length,
                error: None,
            }
        }
        Err(e) => {
            debug!("Probe {} failed: {}", url, e);
            ProbeOutcome {
                status: None,
                content_length: None,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Fixed pause between sequential requests; zero means no pause.
pub async fn throttle(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
