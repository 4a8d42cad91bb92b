//! ACME certificate issuance through DNS-01 challenges
//!
//! This crate drives an ACME order from account login to a password-protected
//! PKCS#12 bundle, proving control of every requested name with
//! `_acme-challenge` TXT records managed through a [`certdns_dns::DnsProvider`].
//!
//! # Components
//!
//! - [`account`]: persisted ACME account keys, one per environment and contact
//! - [`acme`]: the ACME session capability and its `instant-acme` backend
//! - [`challenge`]: zone resolution, TXT record publishing and cleanup
//! - [`orchestrator`]: login and the issuance state machine
//! - [`finalizer`]: key generation, CSR, PKCS#12 export
//!
//! # Usage
//!
//! ```ignore
//! use certdns_acme::{
//!     AccountIdentity, CertificateRequest, Environment, FileAccountStore, IssuanceOptions,
//!     LetsEncryptDirectory, Session,
//! };
//!
//! let directory = LetsEncryptDirectory::new(Environment::Staging);
//! let store = FileAccountStore::new("/var/lib/certdns");
//! let identity = AccountIdentity::new(Environment::Staging, "admin@example.com");
//!
//! let session = Session::login(&directory, &store, identity, dns).await?;
//! let request = CertificateRequest::new(vec!["example.com".into()], "password").with_wildcard(true);
//! let issued = session.issue(&request, &IssuanceOptions::default()).await?;
//! std::fs::write("example.com_wildcard.pfx", &issued.bundle.pkcs12_der)?;
//! ```

pub mod account;
pub mod acme;
pub mod challenge;
pub mod errors;
pub mod finalizer;
pub mod models;
pub mod orchestrator;

#[cfg(test)]
pub(crate) mod testing;

pub use account::{AccountIdentity, AccountKey, AccountStore, FileAccountStore};
pub use acme::{AcmeDirectory, AcmeOrder, AcmeSession, LetsEncryptDirectory};
pub use challenge::{
    resolve_challenge_host, ChallengeHost, CleanupReport, DnsChallengeCleaner,
    DnsChallengePublisher, DnsChallengeRecord, PropagationCheck,
};
pub use errors::{
    AccountError, AcmeError, DnsCleanupError, DnsPublishError, FinalizationError, IssuanceError,
    StoreError,
};
pub use models::{
    CertificateBundle, CertificateRequest, ChallengeOutcome, ChallengeStatus, Environment,
    IssuanceState, IssuedCertificate, SubjectProfile,
};
pub use orchestrator::{IssuanceOptions, Session};
