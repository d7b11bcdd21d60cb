//! Email provider trait and error types

use async_trait::async_trait;
use thiserror::Error;

/// A plain-text message to one recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text_body: String,
}

/// Email provider error types
#[derive(Error, Debug)]
pub enum EmailProviderError {
    #[error("Email provider not configured")]
    NotConfigured,

    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Trait for email providers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailProviderError>;

    fn provider_name(&self) -> &'static str;
}

/// Writes each message to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEmailProvider;

#[async_trait]
impl EmailProvider for LogEmailProvider {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailProviderError> {
        tracing::info!(
            to = %message.to,
            subject = %message.subject,
            "Email delivered to log:\n{}",
            message.text_body
        );
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "log"
    }
}
