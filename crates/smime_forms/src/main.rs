use std::path::Path;

use anyhow::{Context, bail};
use clap::Parser;
use serde::Deserialize;
use smime_certs::{CertificateStore, CredentialResolver, PgCertificateStore};
use smime_common::{
    VERSION,
    assets::{FileRef, FsAssetStore},
    config::{Command, SmimeFormsConfig},
    db::{
        models::{EncryptionCertificate, SigningCertificate},
        setup_pool,
    },
    secret::PassphraseCipher,
};
use smime_mail::{
    FormEmailSettings, FormMailer, FormRecipient, FormSubmission, OpensslSmime,
    SecureMailPipeline, SmtpDispatcher, SmtpSettings,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Contents of the file passed to `send-submission`.
#[derive(Debug, Deserialize)]
struct SubmissionRequest {
    form: FormEmailSettings,
    recipients: Vec<FormRecipient>,
    submission: FormSubmission,
}

fn init_tracing(log_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = SmimeFormsConfig::parse();
    init_tracing(&config.log_level);
    info!("Starting smime_forms {VERSION}");

    let pool = setup_pool(config.database_options())
        .await
        .context("failed to connect to the database")?;
    let cipher = PassphraseCipher::from_base64(&config.passphrase_key)?;
    let assets = FsAssetStore::new(&config.assets_path);
    let store = PgCertificateStore::new(pool, cipher, assets.clone());

    match config.cmd.clone() {
        Command::Migrate => store.migrate().await?,
        Command::AddEncryptionCertificate { email, file } => {
            let record = store
                .save_encryption_certificate(EncryptionCertificate::new(
                    email,
                    Some(FileRef::new(file)),
                ))
                .await?;
            info!("Added {record}");
        }
        Command::AddSigningCertificate {
            email,
            certificate,
            key,
            passphrase,
        } => {
            let record = store
                .save_signing_certificate(SigningCertificate::new(
                    email,
                    Some(FileRef::new(certificate)),
                    Some(FileRef::new(key)),
                    passphrase.filter(|passphrase| !passphrase.is_empty()),
                ))
                .await?;
            info!("Added {record}");
        }
        Command::RemoveEncryptionCertificate { email } => {
            let Some(record) = store.find_encryption_certificate(&email).await? else {
                bail!("no encryption certificate registered for {email}");
            };
            store.delete_encryption_certificate(record.id).await?;
            info!("Removed {record}");
        }
        Command::RemoveSigningCertificate { email } => {
            let Some(record) = store.find_signing_certificate(&email).await? else {
                bail!("no signing certificate registered for {email}");
            };
            store.delete_signing_certificate(record.id).await?;
            info!("Removed {record}");
        }
        Command::ListCertificates => {
            for record in store.list_encryption_certificates().await? {
                println!("{record}");
            }
            for record in store.list_signing_certificates().await? {
                println!("{record}");
            }
        }
        Command::SendSubmission { path } => {
            let request = read_request(&path).await?;
            let dispatcher = SmtpDispatcher::new(SmtpSettings::from_config(&config)?)?;
            let pipeline =
                SecureMailPipeline::new(OpensslSmime::new(&config.openssl_path), dispatcher);
            let mailer = FormMailer::new(CredentialResolver::new(&store, &assets), pipeline);

            let reports = mailer
                .send_submission(&request.form, &request.recipients, &request.submission)
                .await;
            let mut failed = 0;
            for report in &reports {
                match &report.outcome {
                    Ok(message) => println!("{}: {}", report.recipient, message.state()),
                    Err(err) => {
                        error!("Delivery to {} failed: {err}", report.recipient);
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                bail!("{failed} of {} deliveries failed", reports.len());
            }
        }
    }

    Ok(())
}

async fn read_request(path: &Path) -> anyhow::Result<SubmissionRequest> {
    let contents = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_request(&contents).with_context(|| format!("invalid submission in {}", path.display()))
}

fn parse_request(contents: &[u8]) -> serde_json::Result<SubmissionRequest> {
    serde_json::from_slice(contents)
}
