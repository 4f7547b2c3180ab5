//! External alerting sink.
//!
//! Fatal stops and top-level crawl failures are reported to a messaging
//! webhook (Slack-compatible `{"text": …}` payload) so a dead crawl is
//! noticed before someone looks at the logs.

use magpie_core::error::CrawlError;
use reqwest::Client;

#[derive(Clone)]
pub struct WebhookAlerter {
    client: Client,
    url: String,
}

impl WebhookAlerter {
    pub fn new(url: impl Into<String>) -> Result<Self, CrawlError> {
        let client = Client::builder()
            .build()
            .map_err(|e| CrawlError::Network(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Post one message. Alerting is best-effort: failures are logged,
    /// never propagated into the crawl.
    pub async fn notify(&self, message: &str) {
        let payload = serde_json::json!({ "text": message });
        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) if !response.status().is_success() => {
                tracing::error!(status = %response.status(), "Alert webhook rejected message");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "Failed to send alert");
            }
        }
    }
}
