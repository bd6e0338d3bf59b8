use smime_common::{
    assets::{AssetProtector, FileRef},
    db::{
        Id,
        models::{EncryptionCertificate, SigningCertificate},
    },
    secret::PassphraseCipher,
};
use sqlx::{PgPool, migrate::Migrator, query, query_as};
use tracing::{debug, info};

use super::{CertificateStore, protect_files, validate_files};
use crate::error::{CertificateError, CertificateKind};

pub static MIGRATOR: Migrator = sqlx::migrate!();

type EncryptionRow = (Id, String, Option<String>);
type SigningRow = (Id, String, Option<String>, Option<String>, Option<Vec<u8>>);

/// Certificate store backed by PostgreSQL.
///
/// Uniqueness is enforced by a `UNIQUE` constraint on `email_address`, so concurrent
/// administrative writes are serialized by the database. Writes commit only once the
/// referenced files are in protected storage. Signing key passphrases are stored as
/// ciphertext and decrypted on read.
pub struct PgCertificateStore<A> {
    pool: PgPool,
    cipher: PassphraseCipher,
    assets: A,
}

impl<A> PgCertificateStore<A> {
    #[must_use]
    pub fn new(pool: PgPool, cipher: PassphraseCipher, assets: A) -> Self {
        Self {
            pool,
            cipher,
            assets,
        }
    }

    pub async fn migrate(&self) -> Result<(), CertificateError> {
        info!("Applying certificate store migrations");
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    fn encryption_from_row(row: EncryptionRow) -> EncryptionCertificate<Id> {
        let (id, email_address, certificate_file) = row;
        EncryptionCertificate {
            id,
            email_address,
            certificate_file: certificate_file.map(FileRef::new),
        }
    }

    fn signing_from_row(
        &self,
        row: SigningRow,
    ) -> Result<SigningCertificate<Id>, CertificateError> {
        let (id, email_address, certificate_file, key_file, passphrase) = row;
        let passphrase = passphrase
            .map(|sealed| self.cipher.open(&sealed))
            .transpose()?;
        Ok(SigningCertificate {
            id,
            email_address,
            certificate_file: certificate_file.map(FileRef::new),
            key_file: key_file.map(FileRef::new),
            passphrase,
        })
    }

    fn sealed_passphrase<I>(
        &self,
        record: &SigningCertificate<I>,
    ) -> Result<Option<Vec<u8>>, CertificateError> {
        Ok(record
            .passphrase
            .as_ref()
            .map(|passphrase| self.cipher.seal(passphrase))
            .transpose()?)
    }
}

/// Map a unique constraint violation to [`CertificateError::DuplicateAddress`].
fn map_write_error(
    err: sqlx::Error,
    kind: CertificateKind,
    email_address: &str,
) -> CertificateError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            CertificateError::DuplicateAddress {
                kind,
                email_address: email_address.to_string(),
            }
        }
        _ => err.into(),
    }
}

impl<A> CertificateStore for PgCertificateStore<A>
where
    A: AssetProtector + Sync,
{
    async fn find_encryption_certificate(
        &self,
        email_address: &str,
    ) -> Result<Option<EncryptionCertificate<Id>>, CertificateError> {
        let row = query_as::<_, EncryptionRow>(
            "SELECT id, email_address, certificate_file \
            FROM smime_encryption_certificate WHERE email_address = $1",
        )
        .bind(email_address)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Self::encryption_from_row))
    }

    async fn find_signing_certificate(
        &self,
        email_address: &str,
    ) -> Result<Option<SigningCertificate<Id>>, CertificateError> {
        let row = query_as::<_, SigningRow>(
            "SELECT id, email_address, certificate_file, key_file, passphrase \
            FROM smime_signing_certificate WHERE email_address = $1",
        )
        .bind(email_address)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| self.signing_from_row(row)).transpose()
    }

    async fn save_encryption_certificate(
        &self,
        record: EncryptionCertificate,
    ) -> Result<EncryptionCertificate<Id>, CertificateError> {
        validate_files(record.files())?;
        let mut transaction = self.pool.begin().await?;
        let id: Id = sqlx::query_scalar(
            "INSERT INTO smime_encryption_certificate (email_address, certificate_file) \
            VALUES ($1, $2) RETURNING id",
        )
        .bind(&record.email_address)
        .bind(record.certificate_file.as_ref().map(FileRef::as_str))
        .fetch_one(&mut *transaction)
        .await
        .map_err(|err| {
            map_write_error(err, CertificateKind::Encryption, &record.email_address)
        })?;
        let saved = record.with_id(id);
        protect_files(&self.assets, saved.files().cloned().collect()).await?;
        transaction.commit().await?;
        debug!(
            "Saved encryption certificate {id} for {}",
            saved.email_address
        );
        Ok(saved)
    }

    async fn save_signing_certificate(
        &self,
        record: SigningCertificate,
    ) -> Result<SigningCertificate<Id>, CertificateError> {
        validate_files(record.files())?;
        let passphrase = self.sealed_passphrase(&record)?;
        let mut transaction = self.pool.begin().await?;
        let id: Id = sqlx::query_scalar(
            "INSERT INTO smime_signing_certificate \
            (email_address, certificate_file, key_file, passphrase) \
            VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(&record.email_address)
        .bind(record.certificate_file.as_ref().map(FileRef::as_str))
        .bind(record.key_file.as_ref().map(FileRef::as_str))
        .bind(passphrase)
        .fetch_one(&mut *transaction)
        .await
        .map_err(|err| {
            map_write_error(err, CertificateKind::Signing, &record.email_address)
        })?;
        let saved = record.with_id(id);
        protect_files(&self.assets, saved.files().cloned().collect()).await?;
        transaction.commit().await?;
        debug!("Saved signing certificate {id} for {}", saved.email_address);
        Ok(saved)
    }

    async fn update_encryption_certificate(
        &self,
        record: &EncryptionCertificate<Id>,
    ) -> Result<(), CertificateError> {
        validate_files(record.files())?;
        let mut transaction = self.pool.begin().await?;
        let result = query(
            "UPDATE smime_encryption_certificate \
            SET email_address = $2, certificate_file = $3 WHERE id = $1",
        )
        .bind(record.id)
        .bind(&record.email_address)
        .bind(record.certificate_file.as_ref().map(FileRef::as_str))
        .execute(&mut *transaction)
        .await
        .map_err(|err| {
            map_write_error(err, CertificateKind::Encryption, &record.email_address)
        })?;
        if result.rows_affected() == 0 {
            return Err(CertificateError::NotFound(
                CertificateKind::Encryption,
                record.id,
            ));
        }

        protect_files(&self.assets, record.files().cloned().collect()).await?;
        transaction.commit().await?;
        Ok(())
    }

    async fn update_signing_certificate(
        &self,
        record: &SigningCertificate<Id>,
    ) -> Result<(), CertificateError> {
        validate_files(record.files())?;
        let passphrase = self.sealed_passphrase(record)?;
        let mut transaction = self.pool.begin().await?;
        let result = query(
            "UPDATE smime_signing_certificate \
            SET email_address = $2, certificate_file = $3, key_file = $4, passphrase = $5 \
            WHERE id = $1",
        )
        .bind(record.id)
        .bind(&record.email_address)
        .bind(record.certificate_file.as_ref().map(FileRef::as_str))
        .bind(record.key_file.as_ref().map(FileRef::as_str))
        .bind(passphrase)
        .execute(&mut *transaction)
        .await
        .map_err(|err| {
            map_write_error(err, CertificateKind::Signing, &record.email_address)
        })?;
        if result.rows_affected() == 0 {
            return Err(CertificateError::NotFound(
                CertificateKind::Signing,
                record.id,
            ));
        }

        protect_files(&self.assets, record.files().cloned().collect()).await?;
        transaction.commit().await?;
        Ok(())
    }

    async fn delete_encryption_certificate(&self, id: Id) -> Result<(), CertificateError> {
        let result = query("DELETE FROM smime_encryption_certificate WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CertificateError::NotFound(CertificateKind::Encryption, id));
        }
        Ok(())
    }

    async fn delete_signing_certificate(&self, id: Id) -> Result<(), CertificateError> {
        let result = query("DELETE FROM smime_signing_certificate WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CertificateError::NotFound(CertificateKind::Signing, id));
        }
        Ok(())
    }

    async fn list_encryption_certificates(
        &self,
    ) -> Result<Vec<EncryptionCertificate<Id>>, CertificateError> {
        let rows = query_as::<_, EncryptionRow>(
            "SELECT id, email_address, certificate_file \
            FROM smime_encryption_certificate ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Self::encryption_from_row).collect())
    }

    async fn list_signing_certificates(
        &self,
    ) -> Result<Vec<SigningCertificate<Id>>, CertificateError> {
        let rows = query_as::<_, SigningRow>(
            "SELECT id, email_address, certificate_file, key_file, passphrase \
            FROM smime_signing_certificate ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| self.signing_from_row(row))
            .collect()
    }
}
