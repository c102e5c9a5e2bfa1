//! Code delivery boundary: `send(destination, body)` over SMS, SMTP, or the
//! console. Delivery is best-effort — whether a failure is surfaced to the
//! caller is the verification service's fail-open policy, not decided here.

mod email;
mod sms;

pub use email::EmailDispatcher;
pub use sms::SmsDispatcher;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::config::{DeliveryConfig, DeliveryMode};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("delivery timed out")]
    Timeout,
    #[error("gateway rejected the message: {0}")]
    Gateway(String),
    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<(), DispatchError>;
}

/// Logs the message instead of delivering it. This is the out-of-band debug
/// channel for demo/dev deployments: the verification code lands in the
/// server log.
pub struct ConsoleDispatcher;

#[async_trait]
impl Dispatcher for ConsoleDispatcher {
    async fn send(&self, to: &str, body: &str) -> Result<(), DispatchError> {
        info!(to = %to, "{}", body);
        Ok(())
    }
}

/// Build the dispatcher selected by `[delivery]` in the config file.
pub fn from_config(config: &DeliveryConfig) -> Result<Arc<dyn Dispatcher>> {
    match config.mode {
        DeliveryMode::Console => Ok(Arc::new(ConsoleDispatcher)),
        DeliveryMode::Sms => {
            let sms = config
                .sms
                .clone()
                .context("[delivery.sms] is required when delivery.mode = \"sms\"")?;
            Ok(Arc::new(SmsDispatcher::new(sms, config.sender_id.clone())))
        }
        DeliveryMode::Email => {
            let email = config
                .email
                .clone()
                .context("[delivery.email] is required when delivery.mode = \"email\"")?;
            Ok(Arc::new(EmailDispatcher::new(
                email,
                config.sender_id.clone(),
            )?))
        }
    }
}
