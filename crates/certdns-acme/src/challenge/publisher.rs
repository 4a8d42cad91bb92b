use certdns_dns::{DnsProvider, DnsRecordRequest};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::zone::{resolve_challenge_host, ChallengeHost};
use crate::errors::DnsPublishError;

pub const DEFAULT_RECORD_TTL: u32 = 60;
pub const DEFAULT_DNS_TIMEOUT: Duration = Duration::from_secs(30);

/// A TXT record created for one challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsChallengeRecord {
    /// Identifier the challenge belongs to
    pub domain: String,
    pub zone: String,
    pub host: String,
    pub value: String,
    pub record_id: String,
}

/// Creates the `_acme-challenge` TXT records for a set of challenges.
///
/// Records are always added, never updated in place: a name may already hold
/// values from an earlier, interrupted attempt, and the CA accepts any of them.
pub struct DnsChallengePublisher {
    provider: Arc<dyn DnsProvider>,
    ttl: u32,
    timeout: Duration,
}

impl DnsChallengePublisher {
    pub fn new(provider: Arc<dyn DnsProvider>) -> Self {
        Self {
            provider,
            ttl: DEFAULT_RECORD_TTL,
            timeout: DEFAULT_DNS_TIMEOUT,
        }
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Publish one TXT record per `(domain, digest)` pair.
    ///
    /// Stops at the first failure; records created before it stay in place and
    /// are left to the cleaner.
    pub async fn publish(
        &self,
        challenges: &[(String, String)],
    ) -> Result<Vec<DnsChallengeRecord>, DnsPublishError> {
        let mut known_zones: HashSet<String> = HashSet::new();
        let mut published: HashSet<(ChallengeHost, String)> = HashSet::new();
        let mut records = Vec::with_capacity(challenges.len());

        for (domain, digest) in challenges {
            let target = resolve_challenge_host(domain);

            if !known_zones.contains(&target.zone) {
                self.ensure_zone(domain, &target).await?;
                known_zones.insert(target.zone.clone());
            }

            if !published.insert((target.clone(), digest.clone())) {
                debug!("TXT value for {} already published", target.fqdn());
                continue;
            }

            let request = DnsRecordRequest::txt(target.host.clone(), digest.clone(), self.ttl);
            let created =
                tokio::time::timeout(self.timeout, self.provider.create_record(&target.zone, request))
                    .await
                    .map_err(|_| DnsPublishError::Timeout {
                        zone: target.zone.clone(),
                        host: target.host.clone(),
                    })?
                    .map_err(|source| DnsPublishError::Provider {
                        zone: target.zone.clone(),
                        host: target.host.clone(),
                        source,
                    })?;

            info!(
                "Published DNS-01 TXT record for {} at {}",
                domain,
                target.fqdn()
            );

            records.push(DnsChallengeRecord {
                domain: domain.clone(),
                zone: target.zone,
                host: target.host,
                value: digest.clone(),
                record_id: created.id,
            });
        }

        Ok(records)
    }

    async fn ensure_zone(&self, domain: &str, target: &ChallengeHost) -> Result<(), DnsPublishError> {
        let zone = tokio::time::timeout(self.timeout, self.provider.get_zone(&target.zone))
            .await
            .map_err(|_| DnsPublishError::Timeout {
                zone: target.zone.clone(),
                host: target.host.clone(),
            })?
            .map_err(|source| DnsPublishError::Provider {
                zone: target.zone.clone(),
                host: target.host.clone(),
                source,
            })?;

        match zone {
            Some(_) => Ok(()),
            None => Err(DnsPublishError::ZoneNotFound {
                domain: domain.to_string(),
                zone: target.zone.clone(),
            }),
        }
    }
}
