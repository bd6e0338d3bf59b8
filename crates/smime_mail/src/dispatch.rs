use std::time::Duration;

use lettre::{
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
    transport::smtp::authentication::Credentials,
};
use smime_common::config::{SmimeFormsConfig, SmtpEncryption};
use tracing::debug;

use crate::{mail::MailError, pipeline::SecureMessage};

const SMTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Hands a finished message over to the outside world.
#[trait_variant::make(Send)]
pub trait Dispatcher {
    async fn dispatch(&self, message: &SecureMessage) -> Result<(), MailError>;
}

/// Subset of configuration needed to reach the SMTP relay.
#[derive(Clone, Debug)]
pub struct SmtpSettings {
    server: String,
    port: u16,
    encryption: SmtpEncryption,
    user: String,
    password: String,
}

impl SmtpSettings {
    /// Constructs `SmtpSettings` from configuration. Returns error if no server is set.
    pub fn from_config(config: &SmimeFormsConfig) -> Result<Self, MailError> {
        let Some(server) = config.smtp_server.clone() else {
            return Err(MailError::SmtpNotConfigured);
        };

        Ok(Self {
            server,
            port: config.smtp_port,
            encryption: config.smtp_encryption,
            user: config.smtp_user.clone().unwrap_or_default(),
            password: config
                .smtp_password
                .as_ref()
                .map(|password| password.expose_secret().to_string())
                .unwrap_or_default(),
        })
    }
}

pub struct SmtpDispatcher {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpDispatcher {
    /// Builds mailer object with specified configuration
    pub fn new(settings: SmtpSettings) -> Result<Self, MailError> {
        type Builder = AsyncSmtpTransport<Tokio1Executor>;

        let builder = match settings.encryption {
            SmtpEncryption::None => Builder::builder_dangerous(&settings.server),
            SmtpEncryption::StartTls => Builder::starttls_relay(&settings.server)?,
            SmtpEncryption::ImplicitTls => Builder::relay(&settings.server)?,
        }
        .port(settings.port)
        .timeout(Some(SMTP_TIMEOUT));

        // Skip credentials if any of them is empty
        let builder = if settings.user.is_empty() || settings.password.is_empty() {
            debug!("SMTP credentials were not provided, skipping username/password authentication");
            builder
        } else {
            builder.credentials(Credentials::new(settings.user, settings.password))
        };

        Ok(Self {
            transport: builder.build(),
        })
    }
}

impl Dispatcher for SmtpDispatcher {
    async fn dispatch(&self, message: &SecureMessage) -> Result<(), MailError> {
        let envelope = message.envelope()?;
        let formatted = message.formatted()?;
        let response = self.transport.send_raw(&envelope, &formatted).await?;
        debug!(
            "SMTP relay accepted {} ({} bytes): {response:?}",
            message.message_id(),
            formatted.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn settings_require_server() {
        let config = SmimeFormsConfig::try_parse_from([
            "smime_forms",
            "--passphrase-key",
            "AAAA",
            "list-certificates",
        ])
        .unwrap();
        assert!(matches!(
            SmtpSettings::from_config(&config),
            Err(MailError::SmtpNotConfigured)
        ));

        let config = SmimeFormsConfig::try_parse_from([
            "smime_forms",
            "--passphrase-key",
            "AAAA",
            "--smtp-server",
            "mail.example.com",
            "--smtp-user",
            "forms",
            "list-certificates",
        ])
        .unwrap();
        let settings = SmtpSettings::from_config(&config).unwrap();
        assert_eq!(settings.server, "mail.example.com");
        assert_eq!(settings.port, 587);
        assert_eq!(settings.encryption, SmtpEncryption::StartTls);
        assert!(settings.password.is_empty());
    }
}
