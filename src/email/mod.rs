//! Outbound email
//!
//! Delivery is an external collaborator reached through `EmailProvider`.
//! `LogEmailProvider` is the built-in provider: it records messages in the
//! service log instead of talking to a mail server.

pub mod provider;
pub mod templates;

pub use provider::{EmailMessage, EmailProvider, EmailProviderError, LogEmailProvider};
pub use templates::{EmailTemplate, TemplateEngine};
