//! Per-message credential resolution.
//!
//! Credentials are address specific, so a [`CredentialBundle`] is resolved afresh for
//! every outgoing copy and never cached.

use std::path::PathBuf;

use smime_common::{assets::AssetLocator, secret::SecretStringWrapper};
use tracing::{debug, warn};

use crate::{error::CertificateError, store::CertificateStore};

/// Everything needed to sign a message on behalf of a sender.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigningCredentials {
    pub certificate_path: PathBuf,
    pub key_path: PathBuf,
    pub passphrase: Option<SecretStringWrapper>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CredentialBundle {
    pub signing: Option<SigningCredentials>,
    pub encryption_path: Option<PathBuf>,
}

impl CredentialBundle {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signing.is_none() && self.encryption_path.is_none()
    }
}

pub struct CredentialResolver<'a, S, A> {
    store: &'a S,
    assets: &'a A,
}

impl<'a, S, A> CredentialResolver<'a, S, A>
where
    S: CertificateStore + Sync,
    A: AssetLocator + Sync,
{
    #[must_use]
    pub fn new(store: &'a S, assets: &'a A) -> Self {
        Self { store, assets }
    }

    /// Resolve signing credentials for `sender` and the encryption certificate for `recipient`.
    ///
    /// A dynamic recipient is only known once the submitted form has been evaluated, so no
    /// certificate can have been registered for it and the bundle is always empty.
    /// A missing record or file is not an error; only store failures are.
    pub async fn resolve(
        &self,
        sender: &str,
        recipient: &str,
        is_dynamic_recipient: bool,
    ) -> Result<CredentialBundle, CertificateError> {
        if is_dynamic_recipient {
            debug!("Recipient {recipient} is dynamic, skipping S/MIME credential lookup");
            return Ok(CredentialBundle::default());
        }

        let encryption_path = self.encryption_path(recipient).await?;
        let signing = self.signing_credentials(sender).await?;
        debug!(
            "Resolved credentials for {sender} -> {recipient}: signing: {}, encryption: {}",
            signing.is_some(),
            encryption_path.is_some()
        );

        Ok(CredentialBundle {
            signing,
            encryption_path,
        })
    }

    async fn encryption_path(
        &self,
        recipient: &str,
    ) -> Result<Option<PathBuf>, CertificateError> {
        let Some(record) = self.store.find_encryption_certificate(recipient).await? else {
            debug!("No encryption certificate registered for {recipient}");
            return Ok(None);
        };
        let Some(file) = &record.certificate_file else {
            warn!("Encryption certificate record for {recipient} has no file");
            return Ok(None);
        };

        let path = self.assets.locate(file).await;
        if path.is_none() {
            warn!("Encryption certificate file {file} for {recipient} is missing");
        }
        Ok(path)
    }

    async fn signing_credentials(
        &self,
        sender: &str,
    ) -> Result<Option<SigningCredentials>, CertificateError> {
        let Some(record) = self.store.find_signing_certificate(sender).await? else {
            debug!("No signing certificate registered for {sender}");
            return Ok(None);
        };

        let certificate_path = match &record.certificate_file {
            Some(file) => self.assets.locate(file).await,
            None => None,
        };
        let key_path = match &record.key_file {
            Some(file) => self.assets.locate(file).await,
            None => None,
        };

        match (certificate_path, key_path) {
            (Some(certificate_path), Some(key_path)) => Ok(Some(SigningCredentials {
                certificate_path,
                key_path,
                passphrase: record.passphrase,
            })),
            _ => {
                warn!(
                    "Signing certificate or key for {sender} is missing, message won't be signed"
                );
                Ok(None)
            }
        }
    }
}
