//! SMTP delivery of invitation and reminder emails.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use timekeep_core::{Config, InvitationEmail, InvitationMailer};

/// Invitation mailer backed by an SMTP relay.
#[derive(Clone)]
pub struct SmtpInvitationMailer {
    mailer: Arc<AsyncSmtpTransport<Tokio1Executor>>,
    from: Mailbox,
}

impl SmtpInvitationMailer {
    /// Create the mailer from config. Returns `None` if email is disabled or SMTP is not configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        if !config.email_enabled {
            tracing::debug!("Invitation email disabled (EMAIL_ENABLED=false)");
            return None;
        }
        let host = config.smtp_host.as_deref()?;
        let from: Mailbox = match config.smtp_from.as_deref()?.parse() {
            Ok(from) => from,
            Err(e) => {
                tracing::error!(error = %e, "Invalid SMTP_FROM, invitation email disabled");
                return None;
            }
        };
        let port = config.smtp_port;
        let credentials = match (&config.smtp_user, &config.smtp_password) {
            (Some(u), Some(p)) => Some(Credentials::new(u.clone(), p.clone())),
            _ => None,
        };

        let mailer = if config.smtp_tls {
            let b = match AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host) {
                Ok(b) => b.port(port),
                Err(e) => {
                    tracing::error!(error = %e, host = %host, "Failed to configure SMTP relay");
                    return None;
                }
            };
            let b = match credentials {
                Some(c) => b.credentials(c),
                None => b,
            };
            tracing::info!(
                host = %host,
                port = port,
                "Invitation mailer initialized (SMTP with STARTTLS)"
            );
            b.build()
        } else {
            let b = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host).port(port);
            let b = match credentials {
                Some(c) => b.credentials(c),
                None => b,
            };
            tracing::info!(host = %host, port = port, "Invitation mailer initialized (SMTP)");
            b.build()
        };

        Some(Self {
            mailer: Arc::new(mailer),
            from,
        })
    }
}

#[async_trait]
impl InvitationMailer for SmtpInvitationMailer {
    async fn send_invitation(&self, email: InvitationEmail) -> Result<(), String> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| format!("Invalid recipient address: {}", e))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject())
            .header(ContentType::TEXT_PLAIN)
            .body(email.text_body())
            .map_err(|e| e.to_string())?;

        self.mailer.send(message).await.map_err(|e| e.to_string())?;
        tracing::info!(
            invitation_id = %email.invitation_id,
            is_reminder = email.is_reminder,
            "Invitation email sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(move |key| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        })
        .expect("test config")
    }

    #[test]
    fn from_config_returns_none_when_email_disabled() {
        let config = config(&[
            ("DATABASE_URL", "postgresql://localhost/test"),
            ("EMAIL_ENABLED", "false"),
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_FROM", "noreply@example.com"),
        ]);
        assert!(SmtpInvitationMailer::from_config(&config).is_none());
    }

    #[test]
    fn from_config_returns_none_without_host() {
        let config = config(&[
            ("DATABASE_URL", "postgresql://localhost/test"),
            ("EMAIL_ENABLED", "true"),
            ("SMTP_FROM", "noreply@example.com"),
        ]);
        assert!(SmtpInvitationMailer::from_config(&config).is_none());
    }
}
