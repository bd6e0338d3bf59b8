//! Form submission notifications.
//!
//! Every configured recipient gets its own copy of the submission, protected with the
//! credentials registered for that particular sender and recipient.

use std::str::FromStr;

use lettre::message::Mailbox;
use serde::{Deserialize, Serialize};
use smime_certs::{CertificateStore, CredentialResolver};
use smime_common::assets::AssetLocator;
use tracing::{debug, info};

use crate::{
    dispatch::Dispatcher,
    mail::{Mail, MailError},
    pipeline::{SecureMailPipeline, SecureMessage, SecurityPolicy},
    smime::Smime,
};

static SUBMISSION_TEMPLATE: &str = include_str!("../templates/form-submission.md");

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FormEmailSettings {
    pub title: String,
    #[serde(default)]
    pub use_encryption: bool,
}

impl FormEmailSettings {
    #[must_use]
    pub fn is_encryption_enabled(&self) -> bool {
        self.use_encryption
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FormRecipient {
    pub email_address: String,
    #[serde(default)]
    pub email_subject: Option<String>,
    /// Name of the submitted field holding the address, for recipients chosen by the submitter.
    #[serde(default)]
    pub send_email_to_field: Option<String>,
}

impl FormRecipient {
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.send_email_to_field.is_some()
    }

    /// Address the copy is actually delivered to.
    pub fn delivery_address<'a>(
        &'a self,
        submission: &'a FormSubmission,
    ) -> Result<&'a str, MailError> {
        match &self.send_email_to_field {
            Some(field) => submission
                .field(field)
                .map(|field| field.value.trim())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| MailError::MissingRecipientField(field.clone())),
            None => Ok(&self.email_address),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SubmittedField {
    pub name: String,
    pub title: String,
    pub value: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FormSubmission {
    /// `From` of the notifications, either a bare address or `Name <address>`.
    pub sender: String,
    pub fields: Vec<SubmittedField>,
}

impl FormSubmission {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&SubmittedField> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// Outcome of delivering one copy of a submission.
#[derive(Debug)]
pub struct DeliveryReport {
    pub recipient: String,
    pub outcome: Result<SecureMessage, MailError>,
}

impl DeliveryReport {
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        self.outcome.is_ok()
    }
}

pub struct FormMailer<'a, St, A, S, D> {
    resolver: CredentialResolver<'a, St, A>,
    pipeline: SecureMailPipeline<S, D>,
}

impl<'a, St, A, S, D> FormMailer<'a, St, A, S, D>
where
    St: CertificateStore + Sync,
    A: AssetLocator + Sync,
    S: Smime + Sync,
    D: Dispatcher + Sync,
{
    #[must_use]
    pub fn new(
        resolver: CredentialResolver<'a, St, A>,
        pipeline: SecureMailPipeline<S, D>,
    ) -> Self {
        Self { resolver, pipeline }
    }

    #[must_use]
    pub fn pipeline(&self) -> &SecureMailPipeline<S, D> {
        &self.pipeline
    }

    /// Send one copy of `submission` to each of `recipients`.
    pub async fn send_submission(
        &self,
        form: &FormEmailSettings,
        recipients: &[FormRecipient],
        submission: &FormSubmission,
    ) -> Vec<DeliveryReport> {
        let mut reports = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let outcome = self.send_to_recipient(form, recipient, submission).await;
            reports.push(DeliveryReport {
                recipient: recipient.email_address.clone(),
                outcome,
            });
        }
        info!(
            "Form {} submission delivered to {} of {} recipients",
            form.title,
            reports.iter().filter(|report| report.is_delivered()).count(),
            reports.len()
        );

        reports
    }

    pub async fn send_to_recipient(
        &self,
        form: &FormEmailSettings,
        recipient: &FormRecipient,
        submission: &FormSubmission,
    ) -> Result<SecureMessage, MailError> {
        let address = recipient.delivery_address(submission)?;
        let subject = recipient.email_subject.as_deref().unwrap_or(&form.title);
        let mut mail = Mail::new(
            &submission.sender,
            address,
            subject,
            SUBMISSION_TEMPLATE.to_string(),
        );
        mail.add_to_context("form_title", &form.title);
        mail.add_to_context("fields", &submission.fields);

        // signing records are keyed by the bare address, without any display name
        let sender = Mailbox::from_str(&submission.sender)?;
        let policy = self
            .policy(form, recipient, &sender.email.to_string())
            .await?;
        self.pipeline.send(&mail, &policy).await
    }

    async fn policy(
        &self,
        form: &FormEmailSettings,
        recipient: &FormRecipient,
        sender: &str,
    ) -> Result<SecurityPolicy, MailError> {
        if !form.is_encryption_enabled() {
            debug!("Encryption disabled for form {}", form.title);
            return Ok(SecurityPolicy::default());
        }

        let is_dynamic = recipient.is_dynamic();
        let credentials = self
            .resolver
            .resolve(sender, &recipient.email_address, is_dynamic)
            .await?;

        Ok(SecurityPolicy {
            credentials,
            encryption_required: !is_dynamic,
        })
    }
}
