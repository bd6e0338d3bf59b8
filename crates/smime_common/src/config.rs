use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;

use crate::secret::SecretStringWrapper;

#[derive(Clone, Debug, Parser)]
#[command(version, about = "Sign and encrypt form submission emails with S/MIME")]
pub struct SmimeFormsConfig {
    #[arg(long, env = "SMIME_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "SMIME_DB_HOST", default_value = "localhost")]
    pub database_host: String,

    #[arg(long, env = "SMIME_DB_PORT", default_value_t = 5432)]
    pub database_port: u16,

    #[arg(long, env = "SMIME_DB_NAME", default_value = "smime_forms")]
    pub database_name: String,

    #[arg(long, env = "SMIME_DB_USER", default_value = "smime_forms")]
    pub database_user: String,

    #[arg(long, env = "SMIME_DB_PASSWORD", default_value = "")]
    pub database_password: SecretStringWrapper,

    /// Directory holding uploaded certificates and keys.
    #[arg(long, env = "SMIME_ASSETS_PATH", default_value = "assets")]
    pub assets_path: PathBuf,

    /// Base64-encoded 32 byte key used to encrypt signing key passphrases at rest.
    #[arg(long, env = "SMIME_PASSPHRASE_KEY")]
    pub passphrase_key: SecretStringWrapper,

    #[arg(long, env = "SMIME_OPENSSL_PATH", default_value = "openssl")]
    pub openssl_path: PathBuf,

    #[arg(long, env = "SMIME_SMTP_SERVER")]
    pub smtp_server: Option<String>,

    #[arg(long, env = "SMIME_SMTP_PORT", default_value_t = 587)]
    pub smtp_port: u16,

    #[arg(long, env = "SMIME_SMTP_ENCRYPTION", value_enum, default_value_t = SmtpEncryption::StartTls)]
    pub smtp_encryption: SmtpEncryption,

    #[arg(long, env = "SMIME_SMTP_USER")]
    pub smtp_user: Option<String>,

    #[arg(long, env = "SMIME_SMTP_PASSWORD")]
    pub smtp_password: Option<SecretStringWrapper>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Apply pending database migrations.
    Migrate,
    /// Register the encryption certificate of a recipient.
    AddEncryptionCertificate {
        #[arg(long)]
        email: String,
        /// Certificate file reference, relative to the assets directory.
        #[arg(long)]
        file: String,
    },
    /// Register the signing certificate and private key of a sender.
    AddSigningCertificate {
        #[arg(long)]
        email: String,
        #[arg(long)]
        certificate: String,
        #[arg(long)]
        key: String,
        #[arg(long, env = "SMIME_SIGNING_PASSPHRASE", hide_env_values = true)]
        passphrase: Option<SecretStringWrapper>,
    },
    RemoveEncryptionCertificate {
        #[arg(long)]
        email: String,
    },
    RemoveSigningCertificate {
        #[arg(long)]
        email: String,
    },
    /// List registered certificates.
    ListCertificates,
    /// Send a form submission described by a JSON file.
    SendSubmission { path: PathBuf },
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize, ValueEnum)]
pub enum SmtpEncryption {
    None,
    #[default]
    StartTls,
    ImplicitTls,
}

impl SmimeFormsConfig {
    #[must_use]
    pub fn database_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.database_host)
            .port(self.database_port)
            .username(&self.database_user)
            .password(self.database_password.expose_secret())
            .database(&self.database_name)
    }
}
