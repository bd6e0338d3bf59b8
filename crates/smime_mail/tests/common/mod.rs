#![allow(dead_code)]

use std::{
    io,
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use smime_certs::{
    CertificateError, CertificateStore, MemoryCertificateStore, SigningCredentials,
};
use smime_common::{
    assets::{FileRef, FsAssetStore},
    db::{
        Id,
        models::{EncryptionCertificate, SigningCertificate},
    },
};
use smime_mail::{Dispatcher, MailError, MailState, MimeEntity, SecureMessage, Smime, SmimeError};

/// Stands in for openssl, wrapping entities into recognizable S/MIME shaped envelopes.
#[derive(Default)]
pub struct FakeSmime {
    /// Operation name and media type of the entity it was given.
    pub calls: Mutex<Vec<(&'static str, String)>>,
    pub fail: Option<&'static str>,
}

impl FakeSmime {
    pub fn failing(operation: &'static str) -> Self {
        Self {
            fail: Some(operation),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<(&'static str, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, operation: &'static str, entity: &MimeEntity) -> Result<(), SmimeError> {
        self.calls
            .lock()
            .unwrap()
            .push((operation, entity.media_type().unwrap_or_default()));
        if self.fail == Some(operation) {
            return Err(SmimeError::Failed {
                operation,
                stderr: String::from("unable to load signing key"),
            });
        }
        Ok(())
    }
}

impl Smime for FakeSmime {
    async fn sign(
        &self,
        entity: &MimeEntity,
        _credentials: &SigningCredentials,
    ) -> Result<MimeEntity, SmimeError> {
        self.record("sign", entity)?;
        let mut raw = b"Content-Type: multipart/signed; protocol=\"application/pkcs7-signature\";\r\n \
            micalg=\"sha-256\"; boundary=\"fake\"\r\n\r\n--fake\r\n"
            .to_vec();
        raw.extend_from_slice(entity.as_bytes());
        raw.extend_from_slice(
            b"\r\n--fake\r\nContent-Type: application/pkcs7-signature; name=\"smime.p7s\"\r\n\r\n\
            SIGNATURE\r\n--fake--\r\n",
        );
        Ok(MimeEntity::from_bytes(raw))
    }

    async fn encrypt(
        &self,
        entity: &MimeEntity,
        _certificate: &Path,
    ) -> Result<MimeEntity, SmimeError> {
        self.record("encrypt", entity)?;
        let raw = format!(
            "Content-Type: application/pkcs7-mime; smime-type=enveloped-data; name=\"smime.p7m\"\r\n\
            Content-Transfer-Encoding: base64\r\n\r\nENVELOPED {} BYTES\r\n",
            entity.len()
        );
        Ok(MimeEntity::from_bytes(raw.into_bytes()))
    }
}

#[derive(Clone, Debug)]
pub struct Sent {
    pub to: String,
    pub subject: String,
    pub state: MailState,
    pub media_type: String,
    pub formatted: Vec<u8>,
}

#[derive(Default)]
pub struct RecordingDispatcher {
    pub sent: Mutex<Vec<Sent>>,
    pub fail: bool,
}

impl RecordingDispatcher {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

impl Dispatcher for RecordingDispatcher {
    async fn dispatch(&self, message: &SecureMessage) -> Result<(), MailError> {
        if self.fail {
            return Err(lettre::error::Error::Io(io::Error::other("connection refused")).into());
        }
        let formatted = message.formatted()?;
        self.sent.lock().unwrap().push(Sent {
            to: message.to().email.to_string(),
            subject: message.subject().to_string(),
            state: message.state(),
            media_type: message
                .body()
                .and_then(MimeEntity::media_type)
                .unwrap_or_default(),
            formatted,
        });
        Ok(())
    }
}

/// Memory store counting lookups, to tell whether resolution happened at all.
pub struct CountingStore {
    pub inner: MemoryCertificateStore<FsAssetStore>,
    pub lookups: AtomicUsize,
}

impl CountingStore {
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl CertificateStore for CountingStore {
    async fn find_encryption_certificate(
        &self,
        email_address: &str,
    ) -> Result<Option<EncryptionCertificate<Id>>, CertificateError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.find_encryption_certificate(email_address).await
    }

    async fn find_signing_certificate(
        &self,
        email_address: &str,
    ) -> Result<Option<SigningCertificate<Id>>, CertificateError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.find_signing_certificate(email_address).await
    }

    async fn save_encryption_certificate(
        &self,
        record: EncryptionCertificate,
    ) -> Result<EncryptionCertificate<Id>, CertificateError> {
        self.inner.save_encryption_certificate(record).await
    }

    async fn save_signing_certificate(
        &self,
        record: SigningCertificate,
    ) -> Result<SigningCertificate<Id>, CertificateError> {
        self.inner.save_signing_certificate(record).await
    }

    async fn update_encryption_certificate(
        &self,
        record: &EncryptionCertificate<Id>,
    ) -> Result<(), CertificateError> {
        self.inner.update_encryption_certificate(record).await
    }

    async fn update_signing_certificate(
        &self,
        record: &SigningCertificate<Id>,
    ) -> Result<(), CertificateError> {
        self.inner.update_signing_certificate(record).await
    }

    async fn delete_encryption_certificate(&self, id: Id) -> Result<(), CertificateError> {
        self.inner.delete_encryption_certificate(id).await
    }

    async fn delete_signing_certificate(&self, id: Id) -> Result<(), CertificateError> {
        self.inner.delete_signing_certificate(id).await
    }

    async fn list_encryption_certificates(
        &self,
    ) -> Result<Vec<EncryptionCertificate<Id>>, CertificateError> {
        self.inner.list_encryption_certificates().await
    }

    async fn list_signing_certificates(
        &self,
    ) -> Result<Vec<SigningCertificate<Id>>, CertificateError> {
        self.inner.list_signing_certificates().await
    }
}

/// Asset directory and certificate store backed by a temporary directory.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub assets: FsAssetStore,
    pub store: CountingStore,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let assets = FsAssetStore::new(dir.path());
        let store = CountingStore {
            inner: MemoryCertificateStore::new(assets.clone()),
            lookups: AtomicUsize::new(0),
        };
        Self { dir, assets, store }
    }

    pub async fn upload(&self, name: &str) -> FileRef {
        let reference = format!("SmimeCertificates/{name}");
        let path = self.dir.path().join(&reference);
        tokio::fs::create_dir_all(path.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(path, name.as_bytes()).await.unwrap();
        FileRef::new(reference)
    }

    pub async fn register_recipient(&self, email_address: &str) {
        let file = self.upload(&format!("{email_address}.crt")).await;
        self.store
            .save_encryption_certificate(EncryptionCertificate::new(email_address, Some(file)))
            .await
            .unwrap();
    }

    pub async fn register_sender(&self, email_address: &str) {
        let certificate = self.upload(&format!("{email_address}.pem")).await;
        let key = self.upload(&format!("{email_address}.key")).await;
        self.store
            .save_signing_certificate(SigningCertificate::new(
                email_address,
                Some(certificate),
                Some(key),
                None,
            ))
            .await
            .unwrap();
    }
}

pub fn signing_credentials() -> SigningCredentials {
    SigningCredentials {
        certificate_path: PathBuf::from("/certs/sender.pem"),
        key_path: PathBuf::from("/certs/sender.key"),
        passphrase: None,
    }
}

/// Number of header lines called `name` in the top level header block.
pub fn count_top_level_headers(formatted: &[u8], name: &str) -> usize {
    let text = String::from_utf8_lossy(formatted);
    let headers = text.split("\r\n\r\n").next().unwrap_or_default();
    headers
        .split("\r\n")
        .filter(|line| {
            line.split_once(':')
                .is_some_and(|(field, _)| field.eq_ignore_ascii_case(name))
        })
        .count()
}
