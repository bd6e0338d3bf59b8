use std::fmt;

use serde::{Deserialize, Serialize};

use super::FILE_NOT_UPLOADED;
use crate::{
    assets::FileRef,
    db::{Id, NoId},
};

/// Public certificate used to encrypt mail addressed to `email_address`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct EncryptionCertificate<I = NoId> {
    pub id: I,
    pub email_address: String,
    pub certificate_file: Option<FileRef>,
}

impl EncryptionCertificate {
    #[must_use]
    pub fn new<S: Into<String>>(email_address: S, certificate_file: Option<FileRef>) -> Self {
        Self {
            id: NoId,
            email_address: email_address.into(),
            certificate_file,
        }
    }

    /// Attach the identifier assigned by the store.
    #[must_use]
    pub fn with_id(self, id: Id) -> EncryptionCertificate<Id> {
        EncryptionCertificate {
            id,
            email_address: self.email_address,
            certificate_file: self.certificate_file,
        }
    }
}

impl<I> EncryptionCertificate<I> {
    /// Files owned by this record.
    pub fn files(&self) -> impl Iterator<Item = &FileRef> {
        self.certificate_file.iter()
    }

    /// Certificate file name for use in listings.
    #[must_use]
    pub fn certificate_filename(&self) -> &str {
        self.certificate_file
            .as_ref()
            .map_or(FILE_NOT_UPLOADED, FileRef::file_name)
    }
}

impl fmt::Display for EncryptionCertificate<Id> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}",
            self.id,
            self.email_address,
            self.certificate_filename()
        )
    }
}
