//! JSON webhook delivery
//!
//! Shared HTTP client used by the chat, SMS gateway and generic webhook
//! channels.

use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

use crate::error::Result;

/// Thin wrapper around a pooled HTTP client
#[derive(Clone)]
pub struct WebhookClient {
    client: Client,
}

impl WebhookClient {
    /// Create a client whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// POST a JSON body, treating any non-2xx status as a failure
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> std::result::Result<(), String> {
        match self.client.post(url).json(body).send().await {
            Ok(resp) => {
                if resp.status().is_success() {
                    debug!("Webhook delivered to {}", redact(url));
                    Ok(())
                } else {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    error!("Webhook delivery failed: {} - {}", status, body);
                    Err(format!("HTTP {}: {}", status, body))
                }
            }
            Err(e) => {
                error!("Webhook request failed: {}", e);
                Err(e.to_string())
            }
        }
    }
}

/// Webhook URLs embed their credentials in the path; log only the host
fn redact(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => format!(
            "{}://{}/…",
            parsed.scheme(),
            parsed.host_str().unwrap_or("?")
        ),
        Err(_) => "<invalid url>".to_string(),
    }
}
