//! Outgoing email: verification codes over SMTP.
//!
//! When `SMTP_HOST` is unset the mailer runs in no-op mode and logs the
//! code instead of sending it, which keeps local development and tests
//! free of SMTP infrastructure.

use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;

use crate::core::config;
use crate::core::error::{AppError, AppResult};

/// RFC 5322 simplified email shape.
static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .unwrap_or_else(|e| panic!("invalid email regex: {}", e))
});

/// SMTP mailer for verification codes.
#[derive(Clone)]
pub struct Mailer {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: String,
}

impl Mailer {
    /// Builds a mailer from environment configuration.
    ///
    /// Returns a no-op mailer when `SMTP_HOST` is empty.
    pub fn from_config() -> AppResult<Self> {
        let host = config::smtp::HOST.clone();
        if host.is_empty() {
            log::warn!("SMTP_HOST not set, verification emails will be logged instead of sent");
            return Ok(Self {
                transport: None,
                from: config::smtp::FROM.clone(),
            });
        }

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&host)
            .map_err(|e| AppError::Email(format!("SMTP relay {}: {}", host, e)))?
            .port(*config::smtp::PORT);

        if let Some(username) = config::smtp::USERNAME.clone() {
            let password = config::smtp::PASSWORD.clone().unwrap_or_default();
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            transport: Some(builder.build()),
            from: config::smtp::FROM.clone(),
        })
    }

    /// True when a real SMTP transport is configured.
    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    /// Sends a verification code to `recipient`.
    pub async fn send_verification_code(&self, recipient: &str, code: &str) -> AppResult<()> {
        let Some(transport) = &self.transport else {
            log::info!("SMTP disabled, verification code for {}: {}", recipient, code);
            return Ok(());
        };

        let to = recipient
            .parse()
            .map_err(|e| AppError::Email(format!("bad recipient {}: {}", recipient, e)))?;
        let from = self
            .from
            .parse()
            .map_err(|e| AppError::Email(format!("bad sender {}: {}", self.from, e)))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject("Your verification code")
            .header(ContentType::TEXT_PLAIN)
            .body(format!(
                "Your verification code is: {}\n\nIt expires in {} minutes. \
                 If you did not request this, ignore this message.",
                code,
                config::verification::CODE_TTL_MINUTES
            ))
            .map_err(|e| AppError::Email(format!("building message: {}", e)))?;

        transport
            .send(message)
            .await
            .map_err(|e| AppError::Email(format!("sending to {}: {}", recipient, e)))?;

        log::info!("Verification code sent to {}", recipient);
        Ok(())
    }
}

/// Generates a 6-digit verification code.
pub fn generate_code() -> String {
    let code: u32 = rand::thread_rng().gen_range(100_000..1_000_000);
    code.to_string()
}

/// Email shape check. Real validation happens when the code arrives.
pub fn looks_like_email(text: &str) -> bool {
    let text = text.trim();
    !text.is_empty() && text.len() <= 254 && EMAIL_REGEX.is_match(text)
}
