//! Uploaded certificate and key files.
//!
//! Files live in an asset directory with two areas:
//! - protected: `<assets>/.protected/<ref>`, not served to the public
//! - public: `<assets>/<ref>`
//!
//! Certificate material is moved into the protected area once the record referencing
//! it is saved. Lookups check the protected area first.

use std::{
    fmt,
    path::{Component, Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

pub const PROTECTED_DIR: &str = ".protected";

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("Invalid file reference: {0}")]
    InvalidReference(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Opaque reference to an uploaded file, relative to the asset directory.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct FileRef(String);

impl FileRef {
    #[must_use]
    pub fn new<S: Into<String>>(reference: S) -> Self {
        Self(reference.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment of the reference.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Relative path of this reference. Rejects absolute paths and any parent or root
    /// components, so a reference can never point outside the asset directory.
    pub fn validate(&self) -> Result<&Path, AssetError> {
        let path = Path::new(&self.0);
        let is_plain = !self.0.is_empty()
            && path
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if is_plain {
            Ok(path)
        } else {
            Err(AssetError::InvalidReference(self.0.clone()))
        }
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves a file reference to a readable local path.
#[trait_variant::make(Send)]
pub trait AssetLocator {
    /// Returns the protected path if it exists, otherwise the public path if it exists.
    async fn locate(&self, file: &FileRef) -> Option<PathBuf>;
}

/// Makes a referenced file non-public.
#[trait_variant::make(Send)]
pub trait AssetProtector {
    async fn protect(&self, file: &FileRef) -> Result<(), AssetError>;
}

/// Asset storage backed by a local directory.
#[derive(Clone, Debug)]
pub struct FsAssetStore {
    base_path: PathBuf,
}

impl FsAssetStore {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(base_path: P) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn protected_path(&self, relative: &Path) -> PathBuf {
        self.base_path.join(PROTECTED_DIR).join(relative)
    }

    fn public_path(&self, relative: &Path) -> PathBuf {
        self.base_path.join(relative)
    }
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .is_ok_and(|metadata| metadata.is_file())
}

impl AssetLocator for FsAssetStore {
    async fn locate(&self, file: &FileRef) -> Option<PathBuf> {
        let relative = match file.validate() {
            Ok(relative) => relative,
            Err(err) => {
                warn!("Refusing to resolve asset: {err}");
                return None;
            }
        };

        let protected = self.protected_path(relative);
        if is_file(&protected).await {
            return Some(protected);
        }
        let public = self.public_path(relative);
        if is_file(&public).await {
            return Some(public);
        }

        debug!("Asset {file} not found in {}", self.base_path.display());
        None
    }
}

impl AssetProtector for FsAssetStore {
    async fn protect(&self, file: &FileRef) -> Result<(), AssetError> {
        let relative = file.validate()?;
        let protected = self.protected_path(relative);
        if is_file(&protected).await {
            debug!("Asset {file} is already protected");
            return Ok(());
        }
        let public = self.public_path(relative);
        if !is_file(&public).await {
            debug!("Asset {file} does not exist, nothing to protect");
            return Ok(());
        }

        if let Some(parent) = protected.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&public, &protected).await?;
        #[cfg(unix)]
        {
            use std::{fs::Permissions, os::unix::fs::PermissionsExt};
            fs::set_permissions(&protected, Permissions::from_mode(0o600)).await?;
        }
        info!("Moved asset {file} to protected storage");

        Ok(())
    }
}
