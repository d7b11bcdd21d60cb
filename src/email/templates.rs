//! Email templates
//!
//! Variables are written as `{{variable_name}}`.

use super::EmailMessage;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailTemplate {
    /// Sent after registration
    EmailConfirmation,
    PasswordReset,
}

impl EmailTemplate {
    pub fn subject(&self) -> &'static str {
        match self {
            Self::EmailConfirmation => "Email Confirmation",
            Self::PasswordReset => "Password Reset",
        }
    }

    pub fn text_body(&self) -> &'static str {
        match self {
            Self::EmailConfirmation => EMAIL_CONFIRMATION_TEXT,
            Self::PasswordReset => PASSWORD_RESET_TEXT,
        }
    }
}

/// Template rendering with variable substitution
#[derive(Debug, Default)]
pub struct TemplateEngine {
    variables: HashMap<String, String>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Replace `{{variable}}` with its value; unknown variables stay as-is
    pub fn render(&self, template: &str) -> String {
        self.variables
            .iter()
            .fold(template.to_string(), |acc, (key, value)| {
                acc.replace(&format!("{{{{{}}}}}", key), value)
            })
    }

    pub fn render_message(&self, template: EmailTemplate, to: &str) -> EmailMessage {
        EmailMessage {
            to: to.to_string(),
            subject: self.render(template.subject()),
            text_body: self.render(template.text_body()),
        }
    }
}

/// `{base}/{path}?email=..&token=..` with both values URL-encoded
pub fn action_link(public_url: &str, path: &str, email: &str, token: &str) -> String {
    format!(
        "{}/{}?email={}&token={}",
        public_url.trim_end_matches('/'),
        path.trim_start_matches('/'),
        urlencoding::encode(email),
        urlencoding::encode(token)
    )
}

/// Confirmation email for a freshly registered account
pub fn confirmation_email(public_url: &str, email: &str, token: &str) -> EmailMessage {
    let mut engine = TemplateEngine::new();
    engine.set("confirm_link", action_link(public_url, "confirm", email, token));
    engine.render_message(EmailTemplate::EmailConfirmation, email)
}

/// Password reset email carrying a token valid for `expires_in_minutes`
pub fn password_reset_email(
    public_url: &str,
    email: &str,
    token: &str,
    expires_in_minutes: i64,
) -> EmailMessage {
    let mut engine = TemplateEngine::new();
    engine
        .set("reset_link", action_link(public_url, "reset", email, token))
        .set("expires_in_minutes", expires_in_minutes.to_string());
    engine.render_message(EmailTemplate::PasswordReset, email)
}

const EMAIL_CONFIRMATION_TEXT: &str = r#"Please confirm your email by opening the link below:

{{confirm_link}}

If you did not create an account, you can ignore this email."#;

const PASSWORD_RESET_TEXT: &str = r#"To reset your password, open the link below:

{{reset_link}}

This link expires in {{expires_in_minutes}} minutes.
If you did not request a password reset, you can ignore this email."#;
