//! Outbound mail transport.
//!
//! [`MailTransport`] is the seam the mailing service sends through; the
//! [`SmtpClient`] adapter speaks SMTP directly over a fresh connection per
//! message.

mod auth;
mod connection;

use std::time::Duration;

use secrecy::Secret;

use crate::configuration::SmtpSettings;
use crate::email::MessageEnvelope;
use connection::Connection;

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("Failed to connect to {address}.")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Timed out connecting to {address}.")]
    ConnectTimeout { address: String },
    #[error("TLS negotiation failed: {0}")]
    Tls(String),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("{command} was rejected with {code}: {text}")]
    Rejected {
        command: String,
        code: u16,
        text: String,
    },
    #[error("Unexpected SMTP exchange: {0}")]
    Protocol(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[async_trait::async_trait]
pub trait MailTransport: Send + Sync {
    /// Delivers one envelope. Succeeds only once the server has acknowledged
    /// the message and closed the session cleanly.
    async fn send(&self, envelope: &MessageEnvelope) -> Result<(), TransportError>;
}

#[derive(Debug, Clone)]
pub struct SmtpClient {
    host: String,
    port: u16,
    username: String,
    password: Secret<String>,
    timeout: Duration,
    tls_enabled: bool,
    helo_name: String,
}

impl SmtpClient {
    pub fn new(settings: &SmtpSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            username: settings.username.clone(),
            password: settings.password.clone(),
            timeout: settings.timeout(),
            tls_enabled: settings.tls_enabled,
            helo_name: settings.helo_name().to_string(),
        }
    }

    async fn greet(&self, connection: &mut Connection) -> Result<(), TransportError> {
        let reply = connection.command(&format!("EHLO {}", self.helo_name)).await?;
        if reply.is_positive() {
            return Ok(());
        }
        tracing::debug!(code = reply.code, "EHLO refused, falling back to HELO");
        connection
            .expect_positive(&format!("HELO {}", self.helo_name))
            .await
            .map(|_| ())
    }

    async fn deliver(&self, envelope: &MessageEnvelope) -> Result<(), TransportError> {
        let mut connection = Connection::open(&self.host, self.port, self.timeout).await?;
        let greeting = connection.read_reply().await?;
        connection::ensure_code("greeting", &greeting, |code| code == 220)?;
        self.greet(&mut connection).await?;

        if self.tls_enabled {
            let reply = connection.command("STARTTLS").await?;
            if reply.code != 220 {
                return Err(TransportError::Tls(format!(
                    "STARTTLS refused with {}: {}",
                    reply.code,
                    reply.text()
                )));
            }
            connection = connection.upgrade_to_tls(&self.host).await?;
            self.greet(&mut connection).await?;
        }

        auth::login(&mut connection, &self.username, &self.password).await?;

        connection
            .expect_positive(&format!("MAIL FROM:<{}>", envelope.from.as_ref()))
            .await?;
        for recipient in envelope.recipients() {
            connection
                .expect_positive(&format!("RCPT TO:<{}>", recipient.as_ref()))
                .await?;
        }
        connection.expect("DATA", 354).await?;
        connection.send_data(&envelope.to_mime()).await?;
        connection.expect("QUIT", 221).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl MailTransport for SmtpClient {
    #[tracing::instrument(
        name = "SMTP delivery",
        skip_all,
        fields(smtp_host = %self.host, smtp_port = self.port, recipients = envelope.to.len() + envelope.cc.len())
    )]
    async fn send(&self, envelope: &MessageEnvelope) -> Result<(), TransportError> {
        self.deliver(envelope).await
    }
}
