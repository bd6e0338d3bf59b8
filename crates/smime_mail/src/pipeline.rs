//! Conditional S/MIME protection of outgoing messages.
//!
//! A [`SecureMessage`] moves through a fixed sequence of states:
//!
//! ```text
//! Draft -> Rendered -> [Signed] -> [Encrypted] -> Dispatched | Failed
//! ```
//!
//! Signing always happens on the plain rendered body and encryption always wraps the
//! result, so a message can never be encrypted first and signed afterwards.

use std::{fmt, path::Path, str::FromStr};

use lettre::{
    Address,
    address::Envelope,
    message::{
        Mailbox, Mailboxes,
        header::{self, Headers},
    },
};
use smime_certs::{CredentialBundle, SigningCredentials};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    dispatch::Dispatcher,
    mail::{MailError, RenderMail},
    mime::MimeEntity,
    smime::Smime,
};

/// Appended to the subject when encryption was expected but no certificate was found.
pub const UNENCRYPTED_SUBJECT_MARKER: &str = " [UNENCRYPTED: CHECK CMS CONFIGURATION]";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MailState {
    Draft,
    Rendered,
    Signed,
    Encrypted,
    Dispatched,
    Failed,
}

impl MailState {
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Rendered)
                | (
                    Self::Rendered,
                    Self::Signed | Self::Encrypted | Self::Dispatched | Self::Failed
                )
                | (
                    Self::Signed,
                    Self::Encrypted | Self::Dispatched | Self::Failed
                )
                | (Self::Encrypted, Self::Dispatched | Self::Failed)
        )
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Dispatched | Self::Failed)
    }
}

impl fmt::Display for MailState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Draft => "draft",
            Self::Rendered => "rendered",
            Self::Signed => "signed",
            Self::Encrypted => "encrypted",
            Self::Dispatched => "dispatched",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What the pipeline should do for a single outgoing copy.
///
/// `encryption_required` is set when the form has encryption enabled and the recipient
/// is fixed. When it is set and `credentials` has no encryption certificate, the message
/// goes out in the clear with [`UNENCRYPTED_SUBJECT_MARKER`] appended to its subject.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SecurityPolicy {
    pub credentials: CredentialBundle,
    pub encryption_required: bool,
}

impl SecurityPolicy {
    #[must_use]
    pub fn required(credentials: CredentialBundle) -> Self {
        Self {
            credentials,
            encryption_required: true,
        }
    }
}

#[derive(Debug)]
pub struct SecureMessage {
    from: Mailbox,
    to: Mailbox,
    subject: String,
    message_id: String,
    body: Option<MimeEntity>,
    state: MailState,
}

impl SecureMessage {
    pub fn new(from: &str, to: &str, subject: &str) -> Result<Self, MailError> {
        let from = Mailbox::from_str(from)?;
        let to = Mailbox::from_str(to)?;
        let message_id = format!("<{}@{}>", Uuid::new_v4(), from.email.domain());

        Ok(Self {
            from,
            to,
            subject: subject.to_string(),
            message_id,
            body: None,
            state: MailState::Draft,
        })
    }

    #[must_use]
    pub fn state(&self) -> MailState {
        self.state
    }

    #[must_use]
    pub fn from(&self) -> &Mailbox {
        &self.from
    }

    #[must_use]
    pub fn to(&self) -> &Mailbox {
        &self.to
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Current outermost entity, `None` until rendered.
    #[must_use]
    pub fn body(&self) -> Option<&MimeEntity> {
        self.body.as_ref()
    }

    fn ensure_transition(&self, next: MailState) -> Result<(), MailError> {
        if self.state.can_transition_to(next) {
            Ok(())
        } else {
            Err(MailError::InvalidTransition {
                from: self.state,
                to: next,
            })
        }
    }

    fn rendered_body(&self, next: MailState) -> Result<&MimeEntity, MailError> {
        self.body.as_ref().ok_or(MailError::InvalidTransition {
            from: self.state,
            to: next,
        })
    }

    pub fn render<M: RenderMail + ?Sized>(&mut self, mail: &M) -> Result<(), MailError> {
        self.ensure_transition(MailState::Rendered)?;
        self.body = Some(mail.render()?);
        self.state = MailState::Rendered;
        Ok(())
    }

    pub async fn sign<S: Smime + Sync>(
        &mut self,
        smime: &S,
        credentials: &SigningCredentials,
    ) -> Result<(), MailError> {
        self.ensure_transition(MailState::Signed)?;
        let body = self.rendered_body(MailState::Signed)?;
        match smime.sign(body, credentials).await {
            Ok(signed) => {
                debug!("Signed message to {}", self.to);
                self.body = Some(signed);
                self.state = MailState::Signed;
                Ok(())
            }
            Err(err) => {
                error!("Failed to sign message to {}: {err}", self.to);
                self.state = MailState::Failed;
                Err(err.into())
            }
        }
    }

    pub async fn encrypt<S: Smime + Sync>(
        &mut self,
        smime: &S,
        certificate: &Path,
    ) -> Result<(), MailError> {
        self.ensure_transition(MailState::Encrypted)?;
        let body = self.rendered_body(MailState::Encrypted)?;
        match smime.encrypt(body, certificate).await {
            Ok(encrypted) => {
                debug!("Encrypted message to {}", self.to);
                self.body = Some(encrypted);
                self.state = MailState::Encrypted;
                Ok(())
            }
            Err(err) => {
                error!("Failed to encrypt message to {}: {err}", self.to);
                self.state = MailState::Failed;
                Err(err.into())
            }
        }
    }

    /// Flag the subject as unencrypted. Returns `false` if it already was.
    pub fn mark_unencrypted(&mut self) -> bool {
        if self.subject.ends_with(UNENCRYPTED_SUBJECT_MARKER) {
            return false;
        }
        self.subject.push_str(UNENCRYPTED_SUBJECT_MARKER);
        true
    }

    pub fn envelope(&self) -> Result<Envelope, MailError> {
        let recipients: Vec<Address> = vec![self.to.email.clone()];
        Ok(Envelope::new(Some(self.from.email.clone()), recipients)?)
    }

    /// Complete RFC 5322 message: top level headers followed by the outermost entity.
    pub fn formatted(&self) -> Result<Vec<u8>, MailError> {
        let body = self.rendered_body(MailState::Dispatched)?;

        let mut headers = Headers::new();
        headers.set(header::From::from(Mailboxes::from(self.from.clone())));
        headers.set(header::To::from(Mailboxes::from(self.to.clone())));
        headers.set(header::Subject::from(self.subject.clone()));
        headers.set(header::Date::now());
        headers.set(header::MessageId::from(self.message_id.clone()));
        headers.set(header::MIME_VERSION_1_0);

        let mut formatted = headers.to_string().into_bytes();
        formatted.extend_from_slice(body.as_bytes());
        Ok(formatted)
    }

    pub async fn dispatch<D: Dispatcher + Sync>(
        &mut self,
        dispatcher: &D,
    ) -> Result<(), MailError> {
        self.ensure_transition(MailState::Dispatched)?;
        match dispatcher.dispatch(self).await {
            Ok(()) => {
                info!(
                    "Mail sent to: {}, subject: {}, protection: {}",
                    self.to, self.subject, self.state
                );
                self.state = MailState::Dispatched;
                Ok(())
            }
            Err(err) => {
                error!(
                    "Failed to send mail to: {}, subject: {}, error: {err}",
                    self.to, self.subject
                );
                self.state = MailState::Failed;
                Err(err)
            }
        }
    }
}

/// Signs and encrypts outgoing messages as far as the available credentials allow.
pub struct SecureMailPipeline<S, D> {
    smime: S,
    dispatcher: D,
}

impl<S, D> SecureMailPipeline<S, D>
where
    S: Smime + Sync,
    D: Dispatcher + Sync,
{
    #[must_use]
    pub fn new(smime: S, dispatcher: D) -> Self {
        Self { smime, dispatcher }
    }

    #[must_use]
    pub fn smime(&self) -> &S {
        &self.smime
    }

    #[must_use]
    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    /// Render `mail` and apply signing and encryption according to `policy`.
    ///
    /// A failing cryptographic operation aborts the message; it is never sent with less
    /// protection than the credentials called for.
    pub async fn seal<M>(
        &self,
        mail: &M,
        policy: &SecurityPolicy,
    ) -> Result<SecureMessage, MailError>
    where
        M: RenderMail + Sync + ?Sized,
    {
        let mut message = SecureMessage::new(mail.sender(), mail.recipient(), mail.subject())?;
        message.render(mail)?;

        if let Some(signing) = &policy.credentials.signing {
            message.sign(&self.smime, signing).await?;
        }

        match &policy.credentials.encryption_path {
            Some(certificate) => message.encrypt(&self.smime, certificate).await?,
            None if policy.encryption_required => {
                warn!(
                    "No encryption certificate for {}, sending unencrypted",
                    message.to()
                );
                message.mark_unencrypted();
            }
            None => {}
        }

        Ok(message)
    }

    /// Seal `mail` and hand it over to the dispatcher.
    pub async fn send<M>(
        &self,
        mail: &M,
        policy: &SecurityPolicy,
    ) -> Result<SecureMessage, MailError>
    where
        M: RenderMail + Sync + ?Sized,
    {
        let mut message = self.seal(mail, policy).await?;
        message.dispatch(&self.dispatcher).await?;
        Ok(message)
    }
}
