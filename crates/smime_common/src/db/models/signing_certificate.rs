use std::fmt;

use super::FILE_NOT_UPLOADED;
use crate::{
    assets::FileRef,
    db::{Id, NoId},
    secret::SecretStringWrapper,
};

/// Signing identity of a sender: certificate, private key and the key passphrase.
///
/// The passphrase is kept encrypted at rest by the persistent store and is only
/// ever held here in decrypted form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigningCertificate<I = NoId> {
    pub id: I,
    pub email_address: String,
    pub certificate_file: Option<FileRef>,
    pub key_file: Option<FileRef>,
    pub passphrase: Option<SecretStringWrapper>,
}

impl SigningCertificate {
    #[must_use]
    pub fn new<S: Into<String>>(
        email_address: S,
        certificate_file: Option<FileRef>,
        key_file: Option<FileRef>,
        passphrase: Option<SecretStringWrapper>,
    ) -> Self {
        Self {
            id: NoId,
            email_address: email_address.into(),
            certificate_file,
            key_file,
            passphrase,
        }
    }

    #[must_use]
    pub fn with_id(self, id: Id) -> SigningCertificate<Id> {
        SigningCertificate {
            id,
            email_address: self.email_address,
            certificate_file: self.certificate_file,
            key_file: self.key_file,
            passphrase: self.passphrase,
        }
    }
}

impl<I> SigningCertificate<I> {
    pub fn files(&self) -> impl Iterator<Item = &FileRef> {
        self.certificate_file.iter().chain(self.key_file.iter())
    }

    #[must_use]
    pub fn certificate_filename(&self) -> &str {
        self.certificate_file
            .as_ref()
            .map_or(FILE_NOT_UPLOADED, FileRef::file_name)
    }

    #[must_use]
    pub fn key_filename(&self) -> &str {
        self.key_file
            .as_ref()
            .map_or(FILE_NOT_UPLOADED, FileRef::file_name)
    }
}

impl fmt::Display for SigningCertificate<Id> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}",
            self.id,
            self.email_address,
            self.certificate_filename(),
            self.key_filename()
        )
    }
}
