use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::challenge::CleanupReport;
use crate::errors::IssuanceError;

/// ACME CA environment an account and its orders live in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
}

impl Environment {
    pub fn from_staging_flag(staging: bool) -> Self {
        if staging {
            Environment::Staging
        } else {
            Environment::Production
        }
    }

    /// Let's Encrypt directory URL for this environment
    pub fn directory_url(&self) -> &'static str {
        match self {
            Environment::Production => instant_acme::LetsEncrypt::Production.url(),
            Environment::Staging => instant_acme::LetsEncrypt::Staging.url(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subject attributes copied verbatim into the CSR. Empty fields are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectProfile {
    pub country: Option<String>,
    pub state: Option<String>,
    pub locality: Option<String>,
    pub organization: Option<String>,
    pub organizational_unit: Option<String>,
}

/// One issuance request: which names, which subject, how to protect the export.
#[derive(Clone)]
pub struct CertificateRequest {
    /// Bare domain names; the first one becomes the common name
    pub domains: Vec<String>,
    pub subject: SubjectProfile,
    /// Password protecting the exported PKCS#12 bundle
    pub password: String,
    /// Expand every domain to `{domain, *.domain}`
    pub wildcard: bool,
}

impl std::fmt::Debug for CertificateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateRequest")
            .field("domains", &self.domains)
            .field("subject", &self.subject)
            .field("password", &"<redacted>")
            .field("wildcard", &self.wildcard)
            .finish()
    }
}

impl CertificateRequest {
    pub fn new(domains: Vec<String>, password: impl Into<String>) -> Self {
        Self {
            domains,
            subject: SubjectProfile::default(),
            password: password.into(),
            wildcard: false,
        }
    }

    pub fn with_subject(mut self, subject: SubjectProfile) -> Self {
        self.subject = subject;
        self
    }

    pub fn with_wildcard(mut self, wildcard: bool) -> Self {
        self.wildcard = wildcard;
        self
    }

    pub fn validate(&self) -> Result<(), IssuanceError> {
        if self.domains.is_empty() {
            return Err(IssuanceError::InvalidRequest(
                "At least one domain is required".to_string(),
            ));
        }

        for domain in &self.domains {
            if domain.trim().is_empty() {
                return Err(IssuanceError::InvalidRequest(
                    "Domain cannot be empty".to_string(),
                ));
            }
            if domain.starts_with("*.") {
                return Err(IssuanceError::InvalidRequest(format!(
                    "Domain '{}' must be a bare name; use wildcard mode for '*.' variants",
                    domain
                )));
            }
            if domain.chars().any(char::is_whitespace) || !domain.contains('.') {
                return Err(IssuanceError::InvalidRequest(format!(
                    "Domain '{}' is not a valid DNS name",
                    domain
                )));
            }
        }

        Ok(())
    }

    /// Identifiers submitted with the order, in request order, without duplicates
    pub fn order_identifiers(&self) -> Vec<String> {
        let mut identifiers: Vec<String> = Vec::new();
        let expanded = self.domains.iter().flat_map(|domain| {
            let domain = domain.trim().trim_end_matches('.').to_lowercase();
            if self.wildcard {
                vec![domain.clone(), format!("*.{}", domain)]
            } else {
                vec![domain]
            }
        });

        for identifier in expanded {
            if !identifiers.contains(&identifier) {
                identifiers.push(identifier);
            }
        }

        identifiers
    }

    /// Common name of the issued certificate: the first requested domain
    pub fn primary_domain(&self) -> Option<String> {
        self.domains
            .first()
            .map(|d| d.trim().trim_end_matches('.').to_lowercase())
    }

    /// Friendly name stored in the exported bundle
    pub fn friendly_name(&self) -> String {
        self.domains.join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Valid,
    Invalid,
    /// No verdict from the CA within the validation timeout
    TimedOut,
}

impl ChallengeStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, ChallengeStatus::Valid)
    }
}

impl std::fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChallengeStatus::Pending => "pending",
            ChallengeStatus::Valid => "valid",
            ChallengeStatus::Invalid => "invalid",
            ChallengeStatus::TimedOut => "timed out",
        };
        f.write_str(s)
    }
}

/// Validation result of one challenge in the order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeOutcome {
    pub domain: String,
    pub status: ChallengeStatus,
    /// CA problem detail, when the CA reported one
    pub detail: Option<String>,
}

/// Private key and certificate chain, exported as password-protected PKCS#12
#[derive(Debug, Clone)]
pub struct CertificateBundle {
    pub friendly_name: String,
    pub common_name: String,
    /// Every name the certificate covers, including wildcard variants
    pub domains: Vec<String>,
    pub pkcs12_der: Vec<u8>,
    pub not_after: DateTime<Utc>,
}

/// Result of a successful issuance
#[derive(Debug)]
pub struct IssuedCertificate {
    pub bundle: CertificateBundle,
    pub outcomes: Vec<ChallengeOutcome>,
    pub cleanup: CleanupReport,
}

/// States of one issuance attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuanceState {
    Idle,
    OrderOpened,
    Authorized,
    ChallengesPublished,
    Validating,
    Validated,
    Failed,
    Finalizing,
    Complete,
}

impl std::fmt::Display for IssuanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IssuanceState::Idle => "idle",
            IssuanceState::OrderOpened => "order-opened",
            IssuanceState::Authorized => "authorized",
            IssuanceState::ChallengesPublished => "challenges-published",
            IssuanceState::Validating => "validating",
            IssuanceState::Validated => "validated",
            IssuanceState::Failed => "failed",
            IssuanceState::Finalizing => "finalizing",
            IssuanceState::Complete => "complete",
        };
        f.write_str(s)
    }
}
