//! Verification code delivery over SMTP.

use anyhow::Result;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use super::{DispatchError, Dispatcher};
use crate::config::EmailConfig;

pub struct EmailDispatcher {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailDispatcher {
    pub fn new(config: EmailConfig, sender_name: String) -> Result<Self> {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
                .port(config.smtp_port);

        if let (Some(username), Some(password)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        let from: Mailbox = format!("{} <{}>", sender_name, config.from_address).parse()?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Dispatcher for EmailDispatcher {
    async fn send(&self, to: &str, body: &str) -> Result<(), DispatchError> {
        let to: Mailbox = to
            .parse()
            .map_err(|_| DispatchError::Transport(format!("invalid email address: {to}")))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject("Your verification code")
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        Ok(())
    }
}
