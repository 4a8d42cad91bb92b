use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};

pub const ACME_CHALLENGE_LABEL: &str = "_acme-challenge";

/// Where the challenge record for a domain lives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChallengeHost {
    /// Registrable zone holding the record
    pub zone: String,
    /// Record name relative to the zone
    pub host: String,
}

impl ChallengeHost {
    pub fn fqdn(&self) -> String {
        format!("{}.{}", self.host, self.zone)
    }
}

/// Resolve the zone and record host for a domain.
///
/// The zone is the last two labels. Any labels before it are appended to the
/// challenge label, so `a.b.example.com` maps to `_acme-challenge.a.b` in
/// `example.com`. A leading `*.` is ignored: a wildcard and its base name share
/// one challenge host.
pub fn resolve_challenge_host(domain: &str) -> ChallengeHost {
    let name = domain
        .trim()
        .trim_start_matches("*.")
        .trim_end_matches('.')
        .to_lowercase();
    let labels: Vec<&str> = name.split('.').filter(|l| !l.is_empty()).collect();

    let split = labels.len().saturating_sub(2);
    let zone = labels[split..].join(".");
    let subdomain = labels[..split].join(".");

    let host = if subdomain.is_empty() {
        ACME_CHALLENGE_LABEL.to_string()
    } else {
        format!("{}.{}", ACME_CHALLENGE_LABEL, subdomain)
    };

    ChallengeHost { zone, host }
}

/// TXT value for a DNS-01 challenge: base64url(SHA-256(key authorization))
pub fn key_authorization_digest(key_authorization: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key_authorization.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}
