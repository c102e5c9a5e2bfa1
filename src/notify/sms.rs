//! SMS delivery through an Africa's Talking-style messaging gateway:
//! form-encoded POST with the account username in the form data and the API
//! key in a header.

use async_trait::async_trait;
use tracing::debug;

use super::{DispatchError, Dispatcher};
use crate::config::SmsGatewayConfig;

pub struct SmsDispatcher {
    client: reqwest::Client,
    config: SmsGatewayConfig,
    sender_id: String,
}

impl SmsDispatcher {
    pub fn new(config: SmsGatewayConfig, sender_id: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            sender_id,
        }
    }
}

#[async_trait]
impl Dispatcher for SmsDispatcher {
    async fn send(&self, to: &str, body: &str) -> Result<(), DispatchError> {
        let form = [
            ("username", self.config.username.as_str()),
            ("to", to),
            ("message", body),
            ("from", self.sender_id.as_str()),
        ];

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("apiKey", &self.config.api_key)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(DispatchError::Gateway(format!("{status}: {detail}")));
        }

        debug!(to = %to, "SMS accepted by gateway");
        Ok(())
    }
}
