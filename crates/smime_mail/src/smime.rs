//! S/MIME primitives.
//!
//! [`OpensslSmime`] drives the `openssl cms` command line tool. The entity is written to
//! its stdin and the resulting S/MIME entity is read back from stdout, so no message
//! content touches the disk. Key passphrases are handed over through the child's
//! environment rather than its arguments.

use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
};

use smime_certs::SigningCredentials;
use thiserror::Error;
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::{debug, error};

use crate::mime::MimeEntity;

const PASSPHRASE_ENV: &str = "SMIME_KEY_PASSPHRASE";

#[derive(Debug, Error)]
pub enum SmimeError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("S/MIME {operation} failed: {stderr}")]
    Failed {
        operation: &'static str,
        stderr: String,
    },

    #[error("S/MIME {0} produced no output")]
    EmptyOutput(&'static str),
}

#[trait_variant::make(Send)]
pub trait Smime {
    /// Wrap `entity` into a detached `multipart/signed` entity.
    async fn sign(
        &self,
        entity: &MimeEntity,
        credentials: &SigningCredentials,
    ) -> Result<MimeEntity, SmimeError>;

    /// Wrap `entity` into an `application/pkcs7-mime` enveloped-data entity readable only
    /// by the holder of the private key matching `certificate`.
    async fn encrypt(
        &self,
        entity: &MimeEntity,
        certificate: &Path,
    ) -> Result<MimeEntity, SmimeError>;
}

#[derive(Clone, Debug)]
pub struct OpensslSmime {
    program: PathBuf,
}

impl Default for OpensslSmime {
    fn default() -> Self {
        Self::new("openssl")
    }
}

impl OpensslSmime {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, operation: &str) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(["cms", operation])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// `-passin` is always given so an encrypted key without a stored passphrase fails
    /// instead of prompting on the terminal.
    fn sign_command(&self, credentials: &SigningCredentials) -> Command {
        let passphrase = credentials
            .passphrase
            .as_ref()
            .map_or("", |passphrase| passphrase.expose_secret());
        let mut command = self.command("-sign");
        command
            .args(["-md", "sha256", "-crlfeol", "-signer"])
            .arg(&credentials.certificate_path)
            .arg("-inkey")
            .arg(&credentials.key_path)
            .arg("-passin")
            .arg(format!("env:{PASSPHRASE_ENV}"))
            .env(PASSPHRASE_ENV, passphrase);
        command
    }

    async fn run(
        &self,
        operation: &'static str,
        mut command: Command,
        entity: &MimeEntity,
    ) -> Result<MimeEntity, SmimeError> {
        let mut child = command.spawn().map_err(|source| SmimeError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("child stdin is not piped"))?;

        // Feed stdin while collecting output, large entities would otherwise fill the pipes.
        let input = entity.as_bytes();
        let write = async move {
            stdin.write_all(input).await?;
            stdin.shutdown().await
        };
        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!("openssl cms {operation} exited with {}: {stderr}", output.status);
            return Err(SmimeError::Failed { operation, stderr });
        }
        written?;
        if output.stdout.is_empty() {
            return Err(SmimeError::EmptyOutput(operation));
        }
        debug!(
            "openssl cms {operation} turned {} bytes into {}",
            entity.len(),
            output.stdout.len()
        );

        // The outer message carries its own MIME-Version header.
        Ok(MimeEntity::from_bytes(output.stdout).without_header("MIME-Version"))
    }
}

impl Smime for OpensslSmime {
    async fn sign(
        &self,
        entity: &MimeEntity,
        credentials: &SigningCredentials,
    ) -> Result<MimeEntity, SmimeError> {
        self.run("sign", self.sign_command(credentials), entity)
            .await
    }

    async fn encrypt(
        &self,
        entity: &MimeEntity,
        certificate: &Path,
    ) -> Result<MimeEntity, SmimeError> {
        let mut command = self.command("-encrypt");
        command.args(["-aes256", "-crlfeol"]).arg(certificate);

        self.run("encrypt", command, entity).await
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use claims::assert_matches;
    use smime_common::secret::SecretStringWrapper;

    use super::*;

    fn passin_env(command: &Command) -> Option<String> {
        let args: Vec<_> = command.as_std().get_args().collect();
        let position = args.iter().position(|arg| *arg == "-passin")?;
        assert_eq!(args[position + 1], "env:SMIME_KEY_PASSPHRASE");
        command
            .as_std()
            .get_envs()
            .find(|(name, _)| *name == PASSPHRASE_ENV)
            .and_then(|(_, value)| value)
            .map(|value| value.to_string_lossy().into_owned())
    }

    #[test]
    fn passphrase_is_passed_through_environment() {
        let credentials = SigningCredentials {
            certificate_path: PathBuf::from("/certs/sender.pem"),
            key_path: PathBuf::from("/certs/sender.key"),
            passphrase: Some(SecretStringWrapper::from_str("Test123!").unwrap()),
        };
        let command = OpensslSmime::default().sign_command(&credentials);
        assert_eq!(passin_env(&command).as_deref(), Some("Test123!"));
        assert!(
            !command
                .as_std()
                .get_args()
                .any(|arg| arg.to_string_lossy().contains("Test123!"))
        );
    }

    #[test]
    fn missing_passphrase_never_prompts() {
        let credentials = SigningCredentials {
            certificate_path: PathBuf::from("/certs/sender.pem"),
            key_path: PathBuf::from("/certs/sender.key"),
            passphrase: None,
        };
        let command = OpensslSmime::default().sign_command(&credentials);
        assert_eq!(passin_env(&command).as_deref(), Some(""));
    }

    #[tokio::test]
    async fn missing_program_is_reported() {
        let smime = OpensslSmime::new("/nonexistent/openssl");
        let entity = MimeEntity::from_bytes(b"Content-Type: text/plain\r\n\r\nhello\r\n".to_vec());

        let result = smime
            .encrypt(&entity, Path::new("/nonexistent/recipient.crt"))
            .await;
        assert_matches!(result, Err(SmimeError::Spawn { .. }));
    }
}
