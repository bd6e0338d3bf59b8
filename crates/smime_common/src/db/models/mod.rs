pub mod encryption_certificate;
pub mod signing_certificate;

pub use encryption_certificate::EncryptionCertificate;
pub use signing_certificate::SigningCertificate;

/// Placeholder shown in listings for a certificate record without an uploaded file.
pub const FILE_NOT_UPLOADED: &str = "File not uploaded";
