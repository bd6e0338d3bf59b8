//! Sign and encrypt outgoing mail with S/MIME.
//!
//! Refer to:
//! - [RFC 8551](https://datatracker.ietf.org/doc/html/rfc8551) for S/MIME 4.0
//! - [RFC 1847](https://datatracker.ietf.org/doc/html/rfc1847) for `multipart/signed`

pub mod dispatch;
pub mod form;
pub mod mail;
pub mod mime;
pub mod pipeline;
pub mod smime;

pub use crate::{
    dispatch::{Dispatcher, SmtpDispatcher, SmtpSettings},
    form::{
        DeliveryReport, FormEmailSettings, FormMailer, FormRecipient, FormSubmission,
        SubmittedField,
    },
    mail::{Mail, MailError, RenderMail},
    mime::MimeEntity,
    pipeline::{
        MailState, SecureMailPipeline, SecureMessage, SecurityPolicy, UNENCRYPTED_SUBJECT_MARKER,
    },
    smime::{OpensslSmime, Smime, SmimeError},
};
