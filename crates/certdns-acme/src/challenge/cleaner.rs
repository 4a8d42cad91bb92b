use certdns_dns::{DnsProvider, DnsRecordType};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::publisher::DEFAULT_DNS_TIMEOUT;
use super::zone::{resolve_challenge_host, ChallengeHost};
use crate::errors::DnsCleanupError;

/// What a cleanup pass removed and what it failed to remove
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed: usize,
    pub errors: Vec<DnsCleanupError>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Removes every TXT record at the challenge hosts of a domain list.
///
/// All values at a host go, not only the ones the current attempt created, so
/// leftovers of an interrupted run are removed as well. Failures are collected
/// in the report and never raised.
pub struct DnsChallengeCleaner {
    provider: Arc<dyn DnsProvider>,
    timeout: Duration,
}

impl DnsChallengeCleaner {
    pub fn new(provider: Arc<dyn DnsProvider>) -> Self {
        Self {
            provider,
            timeout: DEFAULT_DNS_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn cleanup(&self, domains: &[String]) -> CleanupReport {
        let mut report = CleanupReport::default();
        let mut hosts: Vec<ChallengeHost> = Vec::new();

        for domain in domains {
            let target = resolve_challenge_host(domain);
            if !hosts.contains(&target) {
                hosts.push(target);
            }
        }

        for target in &hosts {
            if let Err(e) = self.cleanup_host(target, &mut report).await {
                warn!("{}", e);
                report.errors.push(e);
            }
        }

        info!(
            "DNS challenge cleanup removed {} record(s) across {} host(s), {} error(s)",
            report.removed,
            hosts.len(),
            report.errors.len()
        );

        report
    }

    async fn cleanup_host(
        &self,
        target: &ChallengeHost,
        report: &mut CleanupReport,
    ) -> Result<(), DnsCleanupError> {
        let zone = self
            .with_timeout_for(target, self.provider.get_zone(&target.zone))
            .await?;

        if zone.is_none() {
            debug!("Zone {} not managed, nothing to clean", target.zone);
            return Ok(());
        }

        let records = self
            .with_timeout_for(
                target,
                self.provider
                    .find_records(&target.zone, &target.host, DnsRecordType::TXT),
            )
            .await?;

        for record in records {
            match self
                .with_timeout_for(target, self.provider.delete_record(&target.zone, &record.id))
                .await
            {
                Ok(()) => {
                    debug!("Deleted TXT record {} at {}", record.id, target.fqdn());
                    report.removed += 1;
                }
                Err(e) => {
                    warn!("{}", e);
                    report.errors.push(e);
                }
            }
        }

        Ok(())
    }

    async fn with_timeout_for<T>(
        &self,
        target: &ChallengeHost,
        call: impl std::future::Future<Output = Result<T, certdns_dns::DnsError>>,
    ) -> Result<T, DnsCleanupError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| DnsCleanupError::Timeout {
                zone: target.zone.clone(),
                host: target.host.clone(),
            })?
            .map_err(|source| DnsCleanupError::Provider {
                zone: target.zone.clone(),
                host: target.host.clone(),
                source,
            })
    }
}
