//! S/MIME certificate records and per-message credential resolution.

pub mod error;
pub mod resolver;
pub mod store;

pub use crate::{
    error::{CertificateError, CertificateKind},
    resolver::{CredentialBundle, CredentialResolver, SigningCredentials},
    store::{CertificateStore, memory::MemoryCertificateStore, postgres::PgCertificateStore},
};
