//! Persistence of ACME account keys
//!
//! An account is identified by its key alone. The key is stored once per
//! (environment, contact) pair and never replaced afterwards, since the CA
//! registration is bound to it.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::errors::StoreError;
use crate::models::Environment;

/// Which account to load or save
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountIdentity {
    pub environment: Environment,
    pub contact: String,
}

impl AccountIdentity {
    pub fn new(environment: Environment, contact: impl Into<String>) -> Self {
        Self {
            environment,
            contact: contact.into(),
        }
    }
}

/// PEM-encoded ACME account key material. Opaque to everything but the ACME backend.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountKey {
    pem: String,
}

impl AccountKey {
    pub fn from_pem(pem: impl Into<String>) -> Result<Self, StoreError> {
        let pem = pem.into();
        pem::parse(pem.as_bytes()).map_err(|e| StoreError::InvalidKey(e.to_string()))?;
        Ok(Self { pem })
    }

    /// Armor raw key material under the given PEM tag
    pub fn encode(tag: &str, contents: Vec<u8>) -> Self {
        Self {
            pem: pem::encode(&pem::Pem::new(tag, contents)),
        }
    }

    /// Raw key material, provided the PEM block carries the expected tag
    pub fn decode(&self, tag: &str) -> Result<Vec<u8>, StoreError> {
        let block = pem::parse(self.pem.as_bytes()).map_err(|e| StoreError::InvalidKey(e.to_string()))?;
        if block.tag() != tag {
            return Err(StoreError::InvalidKey(format!(
                "expected a '{}' block, found '{}'",
                tag,
                block.tag()
            )));
        }
        Ok(block.contents().to_vec())
    }

    pub fn as_pem(&self) -> &str {
        &self.pem
    }
}

impl std::fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccountKey(..)")
    }
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Load the persisted key for an identity, if any. Has no side effects.
    async fn load(&self, identity: &AccountIdentity) -> Result<Option<AccountKey>, StoreError>;

    /// Persist a newly created key. Fails rather than overwrite an existing one.
    async fn save(&self, identity: &AccountIdentity, key: &AccountKey) -> Result<(), StoreError>;
}

/// Stores keys as `<root>/account/<environment>/<contact>.pem`
pub struct FileAccountStore {
    root: PathBuf,
}

impl FileAccountStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn key_path(&self, identity: &AccountIdentity) -> PathBuf {
        let file_name: String = identity
            .contact
            .trim()
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' => '_',
                c => c,
            })
            .collect();

        self.root
            .join("account")
            .join(identity.environment.as_str())
            .join(format!("{}.pem", file_name))
    }
}

#[async_trait]
impl AccountStore for FileAccountStore {
    async fn load(&self, identity: &AccountIdentity) -> Result<Option<AccountKey>, StoreError> {
        let path = self.key_path(identity);

        match tokio::fs::read_to_string(&path).await {
            Ok(pem) => {
                debug!("Loaded account key from {}", path.display());
                AccountKey::from_pem(pem).map(Some)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, identity: &AccountIdentity, key: &AccountKey) -> Result<(), StoreError> {
        let path = self.key_path(identity);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = match options.open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(path));
            }
            Err(e) => return Err(e.into()),
        };

        file.write_all(key.as_pem().as_bytes()).await?;
        file.sync_all().await?;

        info!(
            "Saved {} account key for {} to {}",
            identity.environment,
            identity.contact,
            path.display()
        );

        Ok(())
    }
}
