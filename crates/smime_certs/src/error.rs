use std::fmt;

use smime_common::{assets::AssetError, db::Id, secret::SecretError};
use thiserror::Error;

/// Kind of certificate record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CertificateKind {
    Encryption,
    Signing,
}

impl fmt::Display for CertificateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encryption => f.write_str("encryption"),
            Self::Signing => f.write_str("signing"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("There is already an entry with the email address {email_address} ({kind})")]
    DuplicateAddress {
        kind: CertificateKind,
        email_address: String,
    },
    #[error("No {0} certificate with ID {1}")]
    NotFound(CertificateKind, Id),
    #[error(transparent)]
    AssetError(#[from] AssetError),
    #[error(transparent)]
    SecretError(#[from] SecretError),
    #[error(transparent)]
    SqlxError(#[from] sqlx::Error),
    #[error(transparent)]
    MigrateError(#[from] sqlx::migrate::MigrateError),
}
