//! The DNS-01 issuance workflow
//!
//! A [`Session`] is obtained once through [`Session::login`] and then drives
//! any number of issuance attempts. Each attempt runs
//! `order -> authorizations -> publish -> propagation -> validate -> cleanup
//! -> finalize`. Cleanup runs exactly once per attempt as soon as an order has
//! challenges in flight, whatever the validation outcome.
//!
//! Two attempts touching the same zone must not overlap: cleanup removes every
//! challenge value at a host, including another attempt's. Callers serialize.

use certdns_dns::DnsProvider;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::account::{AccountIdentity, AccountStore};
use crate::acme::{
    AcmeDirectory, AcmeOrder, AcmeSession, Authorization, AuthorizationStatus, Challenge,
};
use crate::challenge::publisher::{DEFAULT_DNS_TIMEOUT, DEFAULT_RECORD_TTL};
use crate::challenge::{
    key_authorization_digest, DnsChallengeCleaner, DnsChallengePublisher, PropagationCheck,
};
use crate::errors::{AccountError, IssuanceError};
use crate::finalizer::finalize_order;
use crate::models::{
    CertificateRequest, ChallengeOutcome, ChallengeStatus, IssuanceState, IssuedCertificate,
};

pub const DEFAULT_VALIDATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Tunables of one issuance attempt
#[derive(Debug, Clone)]
pub struct IssuanceOptions {
    /// Wait between publishing and asking the CA to validate
    pub propagation: PropagationCheck,
    /// Upper bound for one challenge to reach a verdict
    pub validation_timeout: Duration,
    /// Upper bound for each DNS provider call
    pub dns_timeout: Duration,
    pub record_ttl: u32,
}

impl Default for IssuanceOptions {
    fn default() -> Self {
        Self {
            propagation: PropagationCheck::default(),
            validation_timeout: DEFAULT_VALIDATION_TIMEOUT,
            dns_timeout: DEFAULT_DNS_TIMEOUT,
            record_ttl: DEFAULT_RECORD_TTL,
        }
    }
}

/// An authenticated ACME account paired with the DNS provider that proves
/// control of the requested names. Immutable once logged in.
pub struct Session {
    acme: Arc<dyn AcmeSession>,
    dns: Arc<dyn DnsProvider>,
    identity: AccountIdentity,
    created_account: bool,
}

impl Session {
    /// Resume the stored account for `identity`, or create and store a new one.
    ///
    /// Store failures abort the login; nothing is ordered before it succeeds.
    pub async fn login(
        directory: &dyn AcmeDirectory,
        store: &dyn AccountStore,
        identity: AccountIdentity,
        dns: Arc<dyn DnsProvider>,
    ) -> Result<Self, AccountError> {
        let (acme, created_account) = match store.load(&identity).await? {
            Some(key) => {
                debug!(
                    "Found {} account key for {}",
                    identity.environment, identity.contact
                );
                (directory.resume_account(&key).await?, false)
            }
            None => {
                info!(
                    "No {} account for {}, registering a new one",
                    identity.environment, identity.contact
                );
                let (session, key) = directory.new_account(&identity.contact).await?;
                store.save(&identity, &key).await?;
                (session, true)
            }
        };

        Ok(Self {
            acme,
            dns,
            identity,
            created_account,
        })
    }

    pub fn identity(&self) -> &AccountIdentity {
        &self.identity
    }

    /// Whether this login registered a new account
    pub fn created_account(&self) -> bool {
        self.created_account
    }

    /// Run one issuance attempt for the request
    pub async fn issue(
        &self,
        request: &CertificateRequest,
        options: &IssuanceOptions,
    ) -> Result<IssuedCertificate, IssuanceError> {
        request.validate()?;

        let identifiers = request.order_identifiers();
        let primary = request.primary_domain().unwrap_or_default();
        let attempt = Attempt {
            primary: &primary,
            identifiers: &identifiers,
        };
        attempt.enter(IssuanceState::Idle);

        let order = self.acme.new_order(&identifiers).await.map_err(|e| {
            error!("CA rejected order for {}: {}", identifiers.join(", "), e);
            IssuanceError::Order(e)
        })?;
        attempt.enter(IssuanceState::OrderOpened);

        let (pending, mut outcomes) = collect_challenges(order.as_ref(), &identifiers).await?;
        attempt.enter(IssuanceState::Authorized);

        let publisher = DnsChallengePublisher::new(self.dns.clone())
            .with_ttl(options.record_ttl)
            .with_timeout(options.dns_timeout);
        let cleaner = DnsChallengeCleaner::new(self.dns.clone()).with_timeout(options.dns_timeout);

        let digests: Vec<(String, String)> = pending
            .iter()
            .map(|(domain, challenge)| {
                (
                    domain.clone(),
                    key_authorization_digest(&challenge.key_authorization),
                )
            })
            .collect();

        let records = match publisher.publish(&digests).await {
            Ok(records) => records,
            Err(source) => {
                error!("Publishing challenge records failed: {}", source);
                let report = cleaner.cleanup(&identifiers).await;
                attempt.enter(IssuanceState::Failed);
                return Err(IssuanceError::DnsPublish {
                    source,
                    cleanup_errors: report.errors,
                });
            }
        };
        attempt.enter(IssuanceState::ChallengesPublished);

        if !records.is_empty() {
            options.propagation.wait(&records).await;
        }
        attempt.enter(IssuanceState::Validating);

        outcomes.extend(validate_all(order.as_ref(), &pending, options.validation_timeout).await);
        let validated = outcomes.iter().all(|o| o.status.is_valid());

        let cleanup = cleaner.cleanup(&identifiers).await;
        for e in &cleanup.errors {
            warn!("Challenge record left behind: {}", e);
        }

        if !validated {
            attempt.enter(IssuanceState::Failed);
            let err = IssuanceError::Validation {
                outcomes,
                cleanup_errors: cleanup.errors,
            };
            error!("{}", err);
            return Err(err);
        }
        attempt.enter(IssuanceState::Validated);

        attempt.enter(IssuanceState::Finalizing);
        let bundle = finalize_order(order.as_ref(), request).await.map_err(|e| {
            error!("Finalization for {} failed: {}", primary, e);
            IssuanceError::Finalization(e)
        })?;
        attempt.enter(IssuanceState::Complete);

        Ok(IssuedCertificate {
            bundle,
            outcomes,
            cleanup,
        })
    }
}

struct Attempt<'a> {
    primary: &'a str,
    identifiers: &'a [String],
}

impl Attempt<'_> {
    fn enter(&self, state: IssuanceState) {
        info!(
            "Issuance for {} ({} name(s)): {}",
            self.primary,
            self.identifiers.len(),
            state
        );
    }
}

/// DNS-01 challenges still to be solved, plus outcomes for authorizations the
/// CA already considers valid. Both are labeled with the ordered identifier.
async fn collect_challenges(
    order: &dyn AcmeOrder,
    identifiers: &[String],
) -> Result<(Vec<(String, Challenge)>, Vec<ChallengeOutcome>), IssuanceError> {
    let authorizations = order
        .authorizations()
        .await
        .map_err(|e| IssuanceError::Authorization(e.to_string()))?;

    let mut pending = Vec::new();
    let mut reused = Vec::new();

    for (domain, authz) in label_authorizations(authorizations, identifiers) {
        match authz.status {
            AuthorizationStatus::Valid => {
                debug!("Authorization for {} already valid", domain);
                reused.push(ChallengeOutcome {
                    domain,
                    status: ChallengeStatus::Valid,
                    detail: None,
                });
            }
            AuthorizationStatus::Invalid => {
                return Err(IssuanceError::Authorization(format!(
                    "Authorization for {} is invalid",
                    domain
                )));
            }
            AuthorizationStatus::Pending => {
                let challenge = authz.dns_challenge().cloned().ok_or_else(|| {
                    IssuanceError::Authorization(format!(
                        "No DNS-01 challenge offered for {}",
                        domain
                    ))
                })?;
                pending.push((domain, challenge));
            }
        }
    }

    Ok((pending, reused))
}

/// Pair each authorization with the order identifier it answers for.
///
/// A wildcard authorization is reported under its bare base name, so ordering
/// `example.com` and `*.example.com` yields two authorizations for
/// `example.com`. The one offering DNS-01 only is the wildcard; if that does
/// not single one out, the later one is.
fn label_authorizations(
    authorizations: Vec<Authorization>,
    identifiers: &[String],
) -> Vec<(String, Authorization)> {
    let mut labels: Vec<Option<String>> = vec![None; authorizations.len()];
    let mut bare: BTreeMap<&str, Vec<usize>> = BTreeMap::new();

    for (i, authz) in authorizations.iter().enumerate() {
        if authz.identifier.starts_with("*.") {
            labels[i] = Some(authz.identifier.clone());
        } else {
            bare.entry(authz.identifier.as_str()).or_default().push(i);
        }
    }

    for (base, indices) in &bare {
        let wildcard = format!("*.{}", base);
        let ordered = identifiers.iter().any(|d| *d == wildcard);
        let claimed = labels.iter().flatten().any(|l| *l == wildcard);

        let wildcard_at = match indices.as_slice() {
            _ if !ordered || claimed => None,
            [_] if identifiers.iter().any(|d| d == base) => None,
            [only] => Some(*only),
            _ => {
                let dns_only: Vec<usize> = indices
                    .iter()
                    .copied()
                    .filter(|&i| authorizations[i].offers_only_dns01())
                    .collect();
                match dns_only.as_slice() {
                    [one] => Some(*one),
                    _ => indices.last().copied(),
                }
            }
        };

        for &i in indices {
            labels[i] = Some(if Some(i) == wildcard_at {
                wildcard.clone()
            } else {
                base.to_string()
            });
        }
    }

    authorizations
        .into_iter()
        .zip(labels)
        .map(|(authz, label)| {
            let label = label.unwrap_or_else(|| authz.identifier.clone());
            (label, authz)
        })
        .collect()
}

async fn validate_all(
    order: &dyn AcmeOrder,
    pending: &[(String, Challenge)],
    timeout: Duration,
) -> Vec<ChallengeOutcome> {
    let checks = pending.iter().map(|(domain, challenge)| async move {
        let (status, detail) = match tokio::time::timeout(timeout, order.validate(challenge)).await
        {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => (ChallengeStatus::Invalid, Some(e.to_string())),
            Err(_) => (
                ChallengeStatus::TimedOut,
                Some(format!("No verdict within {:?}", timeout)),
            ),
        };

        if status.is_valid() {
            info!("Challenge for {} validated", domain);
        } else {
            warn!("Challenge for {} is {}", domain, status);
        }

        ChallengeOutcome {
            domain: domain.clone(),
            status,
            detail,
        }
    });

    join_all(checks).await
}
