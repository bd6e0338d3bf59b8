//! Persistent certificate records.
//!
//! One record per email address per kind. Lookups use exact, case-sensitive
//! matching on the address as captured from the message envelope.

use smime_common::{
    assets::{AssetError, AssetProtector, FileRef},
    db::{
        Id,
        models::{EncryptionCertificate, SigningCertificate},
    },
};

use crate::error::CertificateError;

pub mod memory;
pub mod postgres;

#[trait_variant::make(Send)]
pub trait CertificateStore {
    async fn find_encryption_certificate(
        &self,
        email_address: &str,
    ) -> Result<Option<EncryptionCertificate<Id>>, CertificateError>;

    async fn find_signing_certificate(
        &self,
        email_address: &str,
    ) -> Result<Option<SigningCertificate<Id>>, CertificateError>;

    /// Insert a new record. Fails with [`CertificateError::DuplicateAddress`] if the
    /// address already has a record of this kind; the existing record is left untouched.
    async fn save_encryption_certificate(
        &self,
        record: EncryptionCertificate,
    ) -> Result<EncryptionCertificate<Id>, CertificateError>;

    async fn save_signing_certificate(
        &self,
        record: SigningCertificate,
    ) -> Result<SigningCertificate<Id>, CertificateError>;

    async fn update_encryption_certificate(
        &self,
        record: &EncryptionCertificate<Id>,
    ) -> Result<(), CertificateError>;

    async fn update_signing_certificate(
        &self,
        record: &SigningCertificate<Id>,
    ) -> Result<(), CertificateError>;

    async fn delete_encryption_certificate(&self, id: Id) -> Result<(), CertificateError>;

    async fn delete_signing_certificate(&self, id: Id) -> Result<(), CertificateError>;

    async fn list_encryption_certificates(
        &self,
    ) -> Result<Vec<EncryptionCertificate<Id>>, CertificateError>;

    async fn list_signing_certificates(
        &self,
    ) -> Result<Vec<SigningCertificate<Id>>, CertificateError>;
}

/// Reject references pointing outside the asset directory before anything is written.
pub(crate) fn validate_files<'a, I>(files: I) -> Result<(), AssetError>
where
    I: IntoIterator<Item = &'a FileRef>,
{
    for file in files {
        file.validate()?;
    }
    Ok(())
}

/// Move every file owned by a freshly written record into protected storage.
pub(crate) async fn protect_files<A>(assets: &A, files: Vec<FileRef>) -> Result<(), AssetError>
where
    A: AssetProtector + Sync,
{
    for file in &files {
        assets.protect(file).await?;
    }
    Ok(())
}
