use smime_common::{
    assets::AssetProtector,
    db::{
        Id,
        models::{EncryptionCertificate, SigningCertificate},
    },
};
use tokio::sync::RwLock;
use tracing::debug;

use super::{CertificateStore, protect_files, validate_files};
use crate::error::{CertificateError, CertificateKind};

#[derive(Default)]
struct Tables {
    encryption: Vec<EncryptionCertificate<Id>>,
    signing: Vec<SigningCertificate<Id>>,
    last_id: Id,
}

impl Tables {
    fn next_id(&mut self) -> Id {
        self.last_id += 1;
        self.last_id
    }
}

/// Certificate store held in process memory.
///
/// Reads run concurrently. Writes are serialized, with the uniqueness check and the
/// write performed under the same lock. A write whose files cannot be protected is
/// rolled back.
pub struct MemoryCertificateStore<A> {
    tables: RwLock<Tables>,
    assets: A,
}

impl<A> MemoryCertificateStore<A> {
    #[must_use]
    pub fn new(assets: A) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            assets,
        }
    }
}

fn duplicate(kind: CertificateKind, email_address: &str) -> CertificateError {
    CertificateError::DuplicateAddress {
        kind,
        email_address: email_address.to_string(),
    }
}

impl<A> CertificateStore for MemoryCertificateStore<A>
where
    A: AssetProtector + Sync,
{
    async fn find_encryption_certificate(
        &self,
        email_address: &str,
    ) -> Result<Option<EncryptionCertificate<Id>>, CertificateError> {
        let tables = self.tables.read().await;
        Ok(tables
            .encryption
            .iter()
            .find(|record| record.email_address == email_address)
            .cloned())
    }

    async fn find_signing_certificate(
        &self,
        email_address: &str,
    ) -> Result<Option<SigningCertificate<Id>>, CertificateError> {
        let tables = self.tables.read().await;
        Ok(tables
            .signing
            .iter()
            .find(|record| record.email_address == email_address)
            .cloned())
    }

    async fn save_encryption_certificate(
        &self,
        record: EncryptionCertificate,
    ) -> Result<EncryptionCertificate<Id>, CertificateError> {
        validate_files(record.files())?;
        let saved = {
            let mut tables = self.tables.write().await;
            if tables
                .encryption
                .iter()
                .any(|existing| existing.email_address == record.email_address)
            {
                return Err(duplicate(
                    CertificateKind::Encryption,
                    &record.email_address,
                ));
            }
            let saved = record.with_id(tables.next_id());
            tables.encryption.push(saved.clone());
            saved
        };
        if let Err(err) = protect_files(&self.assets, saved.files().cloned().collect()).await {
            self.tables
                .write()
                .await
                .encryption
                .retain(|existing| existing.id != saved.id);
            return Err(err.into());
        }
        debug!(
            "Saved encryption certificate {} for {}",
            saved.id, saved.email_address
        );
        Ok(saved)
    }

    async fn save_signing_certificate(
        &self,
        record: SigningCertificate,
    ) -> Result<SigningCertificate<Id>, CertificateError> {
        validate_files(record.files())?;
        let saved = {
            let mut tables = self.tables.write().await;
            if tables
                .signing
                .iter()
                .any(|existing| existing.email_address == record.email_address)
            {
                return Err(duplicate(CertificateKind::Signing, &record.email_address));
            }
            let saved = record.with_id(tables.next_id());
            tables.signing.push(saved.clone());
            saved
        };
        if let Err(err) = protect_files(&self.assets, saved.files().cloned().collect()).await {
            self.tables
                .write()
                .await
                .signing
                .retain(|existing| existing.id != saved.id);
            return Err(err.into());
        }
        debug!(
            "Saved signing certificate {} for {}",
            saved.id, saved.email_address
        );
        Ok(saved)
    }

    async fn update_encryption_certificate(
        &self,
        record: &EncryptionCertificate<Id>,
    ) -> Result<(), CertificateError> {
        validate_files(record.files())?;
        let previous = {
            let mut tables = self.tables.write().await;
            if tables.encryption.iter().any(|existing| {
                existing.id != record.id && existing.email_address == record.email_address
            }) {
                return Err(duplicate(
                    CertificateKind::Encryption,
                    &record.email_address,
                ));
            }
            let existing = tables
                .encryption
                .iter_mut()
                .find(|existing| existing.id == record.id)
                .ok_or(CertificateError::NotFound(
                    CertificateKind::Encryption,
                    record.id,
                ))?;
            std::mem::replace(existing, record.clone())
        };

        if let Err(err) = protect_files(&self.assets, record.files().cloned().collect()).await {
            let mut tables = self.tables.write().await;
            if let Some(existing) = tables
                .encryption
                .iter_mut()
                .find(|existing| existing.id == record.id)
            {
                *existing = previous;
            }
            return Err(err.into());
        }
        Ok(())
    }

    async fn update_signing_certificate(
        &self,
        record: &SigningCertificate<Id>,
    ) -> Result<(), CertificateError> {
        validate_files(record.files())?;
        let previous = {
            let mut tables = self.tables.write().await;
            if tables.signing.iter().any(|existing| {
                existing.id != record.id && existing.email_address == record.email_address
            }) {
                return Err(duplicate(CertificateKind::Signing, &record.email_address));
            }
            let existing = tables
                .signing
                .iter_mut()
                .find(|existing| existing.id == record.id)
                .ok_or(CertificateError::NotFound(CertificateKind::Signing, record.id))?;
            std::mem::replace(existing, record.clone())
        };

        if let Err(err) = protect_files(&self.assets, record.files().cloned().collect()).await {
            let mut tables = self.tables.write().await;
            if let Some(existing) = tables
                .signing
                .iter_mut()
                .find(|existing| existing.id == record.id)
            {
                *existing = previous;
            }
            return Err(err.into());
        }
        Ok(())
    }

    async fn delete_encryption_certificate(&self, id: Id) -> Result<(), CertificateError> {
        let mut tables = self.tables.write().await;
        let count = tables.encryption.len();
        tables.encryption.retain(|record| record.id != id);
        if tables.encryption.len() == count {
            return Err(CertificateError::NotFound(CertificateKind::Encryption, id));
        }
        Ok(())
    }

    async fn delete_signing_certificate(&self, id: Id) -> Result<(), CertificateError> {
        let mut tables = self.tables.write().await;
        let count = tables.signing.len();
        tables.signing.retain(|record| record.id != id);
        if tables.signing.len() == count {
            return Err(CertificateError::NotFound(CertificateKind::Signing, id));
        }
        Ok(())
    }

    async fn list_encryption_certificates(
        &self,
    ) -> Result<Vec<EncryptionCertificate<Id>>, CertificateError> {
        Ok(self.tables.read().await.encryption.clone())
    }

    async fn list_signing_certificates(
        &self,
    ) -> Result<Vec<SigningCertificate<Id>>, CertificateError> {
        Ok(self.tables.read().await.signing.clone())
    }
}
