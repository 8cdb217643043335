//! SMTP sender via lettre.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::info;

use crate::channels::traits::MailSender;
use crate::config::EmailConfig;
use crate::error::TransportError;
use crate::pipeline::types::OutgoingReply;

/// Submission port that expects STARTTLS rather than implicit TLS.
const STARTTLS_PORT: u16 = 587;

/// Production `MailSender`.
pub struct SmtpSender {
    transport: SmtpTransport,
}

impl SmtpSender {
    pub fn new(config: &EmailConfig) -> Result<Self, TransportError> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let builder = if config.smtp_port == STARTTLS_PORT {
            SmtpTransport::starttls_relay(&config.smtp_host)
        } else {
            SmtpTransport::relay(&config.smtp_host)
        }
        .map_err(|e| TransportError::Connect {
            host: config.smtp_host.clone(),
            port: config.smtp_port,
            reason: format!("SMTP relay error: {e}"),
        })?;

        Ok(Self {
            transport: builder.port(config.smtp_port).credentials(creds).build(),
        })
    }
}

#[async_trait]
impl MailSender for SmtpSender {
    async fn send(&self, reply: &OutgoingReply) -> Result<(), TransportError> {
        let email = build_message(reply)?;
        let transport = self.transport.clone();
        let to = reply.to.clone();

        tokio::task::spawn_blocking(move || transport.send(&email))
            .await
            .map_err(|e| TransportError::Task(e.to_string()))?
            .map_err(|e| TransportError::SendFailed {
                to: to.clone(),
                reason: format!("SMTP send failed: {e}"),
            })?;

        info!(to = %to, subject = %reply.subject, "Reply sent");
        Ok(())
    }
}

/// Build the plain-text reply, threaded on the original `Message-ID`.
pub fn build_message(reply: &OutgoingReply) -> Result<Message, TransportError> {
    let failed = |reason: String| TransportError::SendFailed {
        to: reply.to.clone(),
        reason,
    };

    Message::builder()
        .from(
            reply
                .from
                .parse()
                .map_err(|e| failed(format!("Invalid from address: {e}")))?,
        )
        .to(reply
            .to
            .parse()
            .map_err(|e| failed(format!("Invalid to address: {e}")))?)
        .subject(reply.subject.as_str())
        .in_reply_to(reply.in_reply_to.clone())
        .references(reply.references.clone())
        .header(ContentType::TEXT_PLAIN)
        .body(reply.body.clone())
        .map_err(|e| failed(format!("Failed to build email: {e}")))
}
