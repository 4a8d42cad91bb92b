//! ACME session capability
//!
//! The workflow drives a CA through these traits only. [`letsencrypt`] backs
//! them with `instant-acme`; tests back them with scripted doubles.

pub mod letsencrypt;

use async_trait::async_trait;
use std::sync::Arc;

use crate::account::AccountKey;
use crate::errors::AcmeError;
use crate::models::ChallengeStatus;

pub use letsencrypt::{LetsEncryptDirectory, LetsEncryptOrder, LetsEncryptSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    Http01,
    Dns01,
    TlsAlpn01,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    /// Invalid, revoked or expired
    Invalid,
}

/// One challenge offered for an authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub kind: ChallengeKind,
    pub url: String,
    pub token: String,
    /// `token.thumbprint` for the session's account key
    pub key_authorization: String,
    pub status: ChallengeStatus,
    pub error: Option<String>,
}

/// CA-side proof requirement for one identifier of the order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    /// Identifier as the CA reports it. RFC 8555 CAs report a wildcard
    /// authorization under its bare base name.
    pub identifier: String,
    pub status: AuthorizationStatus,
    pub challenges: Vec<Challenge>,
}

impl Authorization {
    pub fn dns_challenge(&self) -> Option<&Challenge> {
        self.challenges.iter().find(|c| c.kind == ChallengeKind::Dns01)
    }

    /// Wildcard authorizations offer nothing but DNS-01
    pub fn offers_only_dns01(&self) -> bool {
        !self.challenges.is_empty()
            && self
                .challenges
                .iter()
                .all(|c| c.kind == ChallengeKind::Dns01)
    }
}

/// Entry point to a CA: create an account or resume one from its key
#[async_trait]
pub trait AcmeDirectory: Send + Sync {
    async fn new_account(
        &self,
        contact: &str,
    ) -> Result<(Arc<dyn AcmeSession>, AccountKey), AcmeError>;

    async fn resume_account(&self, key: &AccountKey) -> Result<Arc<dyn AcmeSession>, AcmeError>;
}

/// An authenticated account able to open orders
#[async_trait]
pub trait AcmeSession: Send + Sync {
    async fn new_order(&self, identifiers: &[String]) -> Result<Box<dyn AcmeOrder>, AcmeError>;
}

/// One certificate order in flight
#[async_trait]
pub trait AcmeOrder: Send + Sync {
    /// Fetch every authorization of the order
    async fn authorizations(&self) -> Result<Vec<Authorization>, AcmeError>;

    /// Ask the CA to validate a challenge and wait until it reaches a final
    /// status. Callers bound the wait with their own timeout.
    async fn validate(&self, challenge: &Challenge) -> Result<(ChallengeStatus, Option<String>), AcmeError>;

    /// Submit the CSR and return the issued chain as PEM, leaf first
    async fn finalize(&self, csr_der: &[u8]) -> Result<String, AcmeError>;
}
