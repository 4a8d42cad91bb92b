use std::path::PathBuf;

use certdns_dns::DnsError;
use thiserror::Error;

use crate::models::ChallengeOutcome;

/// Failure of one issuance attempt, tagged by the workflow stage that failed.
#[derive(Error, Debug)]
pub enum IssuanceError {
    #[error("Invalid certificate request: {0}")]
    InvalidRequest(String),

    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    #[error("Order error: {0}")]
    Order(#[source] AcmeError),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("DNS publish error: {source}")]
    DnsPublish {
        #[source]
        source: DnsPublishError,
        /// Cleanup failures that happened while unwinding the publish failure
        cleanup_errors: Vec<DnsCleanupError>,
    },

    #[error("Validation failed for: {}", failed_domains(.outcomes))]
    Validation {
        /// Status of every challenge in the order, not only the failed ones
        outcomes: Vec<ChallengeOutcome>,
        cleanup_errors: Vec<DnsCleanupError>,
    },

    #[error("Finalization error: {0}")]
    Finalization(#[from] FinalizationError),
}

fn failed_domains(outcomes: &[ChallengeOutcome]) -> String {
    outcomes
        .iter()
        .filter(|o| !o.status.is_valid())
        .map(|o| match &o.detail {
            Some(detail) => format!("{} ({}: {})", o.domain, o.status, detail),
            None => format!("{} ({})", o.domain, o.status),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl IssuanceError {
    /// Short name of the stage that failed, for logs and exit messages
    pub fn stage(&self) -> &'static str {
        match self {
            IssuanceError::InvalidRequest(_) => "request",
            IssuanceError::Account(_) => "account",
            IssuanceError::Order(_) => "order",
            IssuanceError::Authorization(_) => "authorization",
            IssuanceError::DnsPublish { .. } => "dns-publish",
            IssuanceError::Validation { .. } => "validation",
            IssuanceError::Finalization(_) => "finalization",
        }
    }

    /// Per-domain validation statuses, when the failure carries them
    pub fn outcomes(&self) -> Option<&[ChallengeOutcome]> {
        match self {
            IssuanceError::Validation { outcomes, .. } => Some(outcomes),
            _ => None,
        }
    }

    /// Non-fatal cleanup failures recorded while handling this error
    pub fn cleanup_errors(&self) -> &[DnsCleanupError] {
        match self {
            IssuanceError::DnsPublish { cleanup_errors, .. }
            | IssuanceError::Validation { cleanup_errors, .. } => cleanup_errors,
            _ => &[],
        }
    }
}

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("Account store error: {0}")]
    Store(#[from] StoreError),

    #[error("ACME account error: {0}")]
    Acme(#[from] AcmeError),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Account key already persisted at {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("Invalid account key: {0}")]
    InvalidKey(String),
}

#[derive(Error, Debug)]
pub enum AcmeError {
    #[error("ACME error: {0}")]
    Protocol(String),

    #[error("Invalid ACME response: {0}")]
    InvalidResponse(String),

    #[error("Invalid account credentials: {0}")]
    Credentials(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl From<instant_acme::Error> for AcmeError {
    fn from(err: instant_acme::Error) -> Self {
        AcmeError::Protocol(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum DnsPublishError {
    #[error("No DNS zone {zone} found for {domain}")]
    ZoneNotFound { domain: String, zone: String },

    #[error("Failed to publish {host}.{zone}: {source}")]
    Provider {
        zone: String,
        host: String,
        #[source]
        source: DnsError,
    },

    #[error("Timed out publishing {host}.{zone}")]
    Timeout { zone: String, host: String },
}

#[derive(Error, Debug)]
pub enum DnsCleanupError {
    #[error("Failed to clean up {host}.{zone}: {source}")]
    Provider {
        zone: String,
        host: String,
        #[source]
        source: DnsError,
    },

    #[error("Timed out cleaning up {host}.{zone}")]
    Timeout { zone: String, host: String },
}

#[derive(Error, Debug)]
pub enum FinalizationError {
    #[error("Certificate generation error: {0}")]
    CertificateGeneration(String),

    #[error("ACME error: {0}")]
    Acme(#[from] AcmeError),

    #[error("Invalid certificate chain: {0}")]
    InvalidChain(String),

    #[error("Bundle export error: {0}")]
    Export(String),
}

impl From<rcgen::Error> for FinalizationError {
    fn from(err: rcgen::Error) -> Self {
        FinalizationError::CertificateGeneration(err.to_string())
    }
}

impl From<openssl::error::ErrorStack> for FinalizationError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        FinalizationError::Export(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChallengeStatus;

    #[test]
    fn test_validation_error_lists_failed_domains_only() {
        let err = IssuanceError::Validation {
            outcomes: vec![
                ChallengeOutcome {
                    domain: "example.com".to_string(),
                    status: ChallengeStatus::Valid,
                    detail: None,
                },
                ChallengeOutcome {
                    domain: "*.example.com".to_string(),
                    status: ChallengeStatus::Invalid,
                    detail: Some("Incorrect TXT record".to_string()),
                },
            ],
            cleanup_errors: vec![],
        };

        assert_eq!(err.stage(), "validation");
        assert_eq!(
            err.to_string(),
            "Validation failed for: *.example.com (invalid: Incorrect TXT record)"
        );
        assert_eq!(err.outcomes().map(|o| o.len()), Some(2));
    }

    #[test]
    fn test_cleanup_errors_exposed_on_publish_failure() {
        let err = IssuanceError::DnsPublish {
            source: DnsPublishError::ZoneNotFound {
                domain: "a.example.org".to_string(),
                zone: "example.org".to_string(),
            },
            cleanup_errors: vec![DnsCleanupError::Timeout {
                zone: "example.org".to_string(),
                host: "_acme-challenge.a".to_string(),
            }],
        };

        assert_eq!(err.stage(), "dns-publish");
        assert_eq!(err.cleanup_errors().len(), 1);
        assert!(err.outcomes().is_none());
        assert!(err.to_string().contains("No DNS zone example.org"));
    }
}
