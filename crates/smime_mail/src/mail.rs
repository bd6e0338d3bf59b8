use serde::Serialize;
use smime_certs::CertificateError;
use tera::{Context, Tera};
use thiserror::Error;

use crate::{mime::MimeEntity, pipeline::MailState, smime::SmimeError};

#[derive(Debug, Error)]
pub enum MailError {
    #[error(transparent)]
    LettreError(#[from] lettre::error::Error),

    #[error(transparent)]
    AddressError(#[from] lettre::address::AddressError),

    #[error(transparent)]
    SmtpError(#[from] lettre::transport::smtp::Error),

    #[error(transparent)]
    TemplateError(#[from] tera::Error),

    #[error(transparent)]
    SmimeError(#[from] SmimeError),

    #[error(transparent)]
    CertificateError(#[from] CertificateError),

    #[error("Message can't move from {from} to {to}")]
    InvalidTransition { from: MailState, to: MailState },

    #[error("Recipient field {0} is missing from the submission")]
    MissingRecipientField(String),

    #[error("SMTP not configured")]
    SmtpNotConfigured,
}

/// Anything that can be turned into the plain body of an outgoing message.
pub trait RenderMail {
    fn sender(&self) -> &str;
    fn recipient(&self) -> &str;
    fn subject(&self) -> &str;
    fn render(&self) -> Result<MimeEntity, MailError>;
}

/// Markdown mail template with its context.
#[derive(Debug)]
pub struct Mail {
    from: String,
    to: String,
    subject: String,
    template: String,
    context: Context,
}

impl Mail {
    /// Create new [`Mail`].
    #[must_use]
    pub fn new<F, T, S>(from: F, to: T, subject: S, template: String) -> Self
    where
        F: Into<String>,
        T: Into<String>,
        S: Into<String>,
    {
        Self {
            from: from.into(),
            to: to.into(),
            subject: subject.into(),
            template,
            context: Context::new(),
        }
    }

    /// Getter for `template`.
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Add to context.
    pub fn add_to_context<K, V>(&mut self, key: K, value: &V)
    where
        K: Into<String>,
        V: Serialize + ?Sized,
    {
        self.context.insert(key.into(), value);
    }
}

impl RenderMail for Mail {
    fn sender(&self) -> &str {
        &self.from
    }

    fn recipient(&self) -> &str {
        &self.to
    }

    fn subject(&self) -> &str {
        &self.subject
    }

    /// Renders the template twice: verbatim for the plain text part and HTML-escaped
    /// as Markdown source for the HTML part.
    fn render(&self) -> Result<MimeEntity, MailError> {
        let plain = Tera::one_off(&self.template, &self.context, false)?;
        let escaped = Tera::one_off(&self.template, &self.context, true)?;
        let html = markdown_to_html(&escaped);

        Ok(MimeEntity::from(
            lettre::message::MultiPart::alternative_plain_html(plain, html),
        ))
    }
}

fn markdown_to_html(source: &str) -> String {
    let parser = pulldown_cmark::Parser::new(source);
    let mut html = String::with_capacity(source.len() * 3 / 2);
    pulldown_cmark::html::push_html(&mut html, parser);
    html
}
