//! Outbound mail delivery.
//!
//! The dispatcher and the sweep talk to a [`MailTransport`]. The production
//! implementation, [`SmtpMailer`], relays over authenticated STARTTLS SMTP
//! using [`lettre`]. Delivery is attempted exactly once per call: retries and
//! backoff are deliberately absent, and callers decide whether a failure is
//! fatal.
//!
//! # Example
//!
//! ```no_run
//! use housekeeper::config::Config;
//! use housekeeper::mailer::{MailTransport, SmtpMailer};
//! use housekeeper::notification::{compose, RENAME_SUBJECT};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let mailer = SmtpMailer::from_config(&config.mail)?;
//!     let message = compose(
//!         &config.mail.from_address,
//!         &config.mail.to_address,
//!         RENAME_SUBJECT,
//!         ["/srv/reports/daily.csv"],
//!     );
//!     mailer.send(&message).await?;
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lettre::address::Envelope;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::config::MailConfig;
use crate::notification::NotificationMessage;

/// SMTP command timeout.
const SMTP_TIMEOUT_SECS: u64 = 30;

/// Errors that can occur while delivering a notification.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The relay rejected the message or the connection failed.
    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    /// A sender or recipient address could not be parsed.
    #[error("invalid address '{address}': {message}")]
    InvalidAddress { address: String, message: String },

    /// The SMTP envelope could not be built.
    #[error("invalid envelope: {0}")]
    Envelope(String),

    /// The configured server is not in `host:port` form.
    #[error("invalid smtp server '{0}': expected host:port")]
    InvalidServer(String),

    /// Delivery failed for a reason reported by a non-SMTP transport.
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Something that can deliver a composed notification to its recipient.
pub trait MailTransport: Send + Sync {
    /// Delivers `message` once, with no retry.
    fn send(
        &self,
        message: &NotificationMessage,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

impl<T: MailTransport> MailTransport for Arc<T> {
    fn send(
        &self,
        message: &NotificationMessage,
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        (**self).send(message)
    }
}

/// SMTP login. The password is wiped from memory on drop and never printed.
#[derive(Clone)]
pub struct SmtpCredential {
    username: String,
    password: Zeroizing<String>,
}

impl SmtpCredential {
    #[must_use]
    pub fn new(username: String, password: String) -> Self {
        Self {
            username,
            password: Zeroizing::new(password),
        }
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    fn to_credentials(&self) -> Credentials {
        Credentials::new(self.username.clone(), self.password.as_str().to_owned())
    }
}

impl fmt::Debug for SmtpCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpCredential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Mail transport backed by an authenticated STARTTLS SMTP relay.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    server: String,
}

impl SmtpMailer {
    /// Builds a mailer for the relay and credentials in `config`.
    ///
    /// No connection is opened until the first send.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is not `host:port` or the TLS
    /// parameters for the host cannot be built.
    pub fn from_config(config: &MailConfig) -> Result<Self, TransportError> {
        let (host, port) = split_server(&config.smtp_server)?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?
            .port(port)
            .credentials(config.credential.to_credentials())
            .timeout(Some(Duration::from_secs(SMTP_TIMEOUT_SECS)))
            .build();

        debug!(host = host, port = port, "SMTP transport configured");

        Ok(Self {
            transport,
            server: config.smtp_server.clone(),
        })
    }
}

impl fmt::Debug for SmtpMailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpMailer")
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

impl MailTransport for SmtpMailer {
    async fn send(&self, message: &NotificationMessage) -> Result<(), TransportError> {
        let from = parse_address(message.from())?;
        let to = parse_address(message.to())?;
        let envelope = Envelope::new(Some(from), vec![to])
            .map_err(|e| TransportError::Envelope(e.to_string()))?;

        self.transport
            .send_raw(&envelope, message.render().as_bytes())
            .await?;

        info!(to = %message.to(), "There is a mail sent to address, please check it");
        Ok(())
    }
}

fn parse_address(raw: &str) -> Result<Address, TransportError> {
    raw.parse::<Address>()
        .map_err(|e| TransportError::InvalidAddress {
            address: raw.to_string(),
            message: e.to_string(),
        })
}

/// Splits `host:port`, splitting on the last colon.
fn split_server(server: &str) -> Result<(&str, u16), TransportError> {
    let (host, port) = server
        .rsplit_once(':')
        .ok_or_else(|| TransportError::InvalidServer(server.to_string()))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| TransportError::InvalidServer(server.to_string()))?;
    if host.is_empty() {
        return Err(TransportError::InvalidServer(server.to_string()));
    }
    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail_config(server: &str) -> MailConfig {
        MailConfig {
            from_address: "ops@example.com".to_string(),
            to_address: "oncall@example.com".to_string(),
            smtp_server: server.to_string(),
            credential: SmtpCredential::new("ops@example.com".to_string(), "secret".to_string()),
        }
    }

    #[test]
    fn split_server_parses_host_and_port() {
        assert_eq!(split_server("smtp.gmail.com:587").unwrap(), ("smtp.gmail.com", 587));
    }

    #[test]
    fn split_server_rejects_bad_input() {
        for bad in ["smtp.gmail.com", "smtp.gmail.com:", ":587", "host:99999", "host:abc"] {
            assert!(
                matches!(split_server(bad), Err(TransportError::InvalidServer(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn credential_debug_redacts_password() {
        let cred = SmtpCredential::new("user".to_string(), "hunter2".to_string());
        let debug = format!("{cred:?}");
        assert!(debug.contains("user"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn parse_address_reports_bad_input() {
        let err = parse_address("not an address").unwrap_err();
        assert!(matches!(err, TransportError::InvalidAddress { ref address, .. } if address == "not an address"));
        assert!(parse_address("ops@example.com").is_ok());
    }

    #[tokio::test]
    async fn from_config_builds_without_connecting() {
        let mailer = SmtpMailer::from_config(&mail_config("smtp.example.com:587"))
            .expect("builder should not touch the network");
        assert!(format!("{mailer:?}").contains("smtp.example.com:587"));
    }

    #[test]
    fn from_config_rejects_missing_port() {
        let err = SmtpMailer::from_config(&mail_config("smtp.example.com")).unwrap_err();
        assert!(matches!(err, TransportError::InvalidServer(_)));
    }

    #[test]
    fn transport_error_display() {
        let err = TransportError::Delivery("relay said no".to_string());
        assert_eq!(err.to_string(), "delivery failed: relay said no");
    }
}
