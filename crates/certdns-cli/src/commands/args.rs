use anyhow::Context;
use certdns_acme::{
    AccountIdentity, Environment, FileAccountStore, LetsEncryptDirectory, SubjectProfile,
};
use certdns_dns::{
    DnsProvider, DnsProviderType, DnsimpleCredentials, DnsimpleProvider, ManualDnsProvider,
};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// ACME account selection
#[derive(Args, Debug, Clone)]
pub struct AccountArgs {
    /// Contact e-mail of the ACME account, also used to pick the DNSimple account
    #[arg(long, env = "CERTDNS_EMAIL")]
    pub email: String,

    /// Use the Let's Encrypt staging environment
    #[arg(long, env = "CERTDNS_STAGING")]
    pub staging: bool,

    /// Custom ACME directory URL, e.g. a local Pebble instance
    #[arg(long, env = "CERTDNS_ACME_DIRECTORY")]
    pub acme_directory: Option<String>,

    /// Data directory holding account keys (defaults to ~/.certdns)
    #[arg(long, env = "CERTDNS_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
}

impl AccountArgs {
    pub fn environment(&self) -> Environment {
        Environment::from_staging_flag(self.staging)
    }

    pub fn identity(&self) -> AccountIdentity {
        AccountIdentity::new(self.environment(), self.email.trim())
    }

    pub fn directory(&self) -> LetsEncryptDirectory {
        match &self.acme_directory {
            Some(url) => LetsEncryptDirectory::with_directory_url(url.clone()),
            None => LetsEncryptDirectory::new(self.environment()),
        }
    }

    pub fn data_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(dirs::home_dir()
                .context("Could not find home directory, pass --data-dir")?
                .join(".certdns")),
        }
    }

    pub fn store(&self) -> anyhow::Result<FileAccountStore> {
        Ok(FileAccountStore::new(self.data_dir()?))
    }
}

/// DNS provider access
#[derive(Args, Debug, Clone)]
pub struct DnsArgs {
    /// DNS provider managing the challenge records (dnsimple, manual)
    #[arg(long, default_value = "dnsimple", env = "CERTDNS_DNS_PROVIDER")]
    pub dns_provider: DnsProviderType,

    /// DNSimple API token
    #[arg(long, env = "CERTDNS_DNSIMPLE_TOKEN", hide_env_values = true)]
    pub dnsimple_token: Option<String>,

    /// DNSimple account ID; looked up by e-mail when omitted
    #[arg(long, env = "CERTDNS_DNSIMPLE_ACCOUNT")]
    pub dnsimple_account: Option<String>,

    /// Use the DNSimple sandbox API
    #[arg(long, env = "CERTDNS_DNSIMPLE_SANDBOX")]
    pub dnsimple_sandbox: bool,

    /// Timeout in seconds for each DNS provider call
    #[arg(long, default_value_t = 30, env = "CERTDNS_DNS_TIMEOUT")]
    pub dns_timeout: u64,
}

impl DnsArgs {
    pub fn credentials(&self) -> anyhow::Result<DnsimpleCredentials> {
        let api_token = self
            .dnsimple_token
            .clone()
            .context("--dnsimple-token is required for the dnsimple provider")?;

        Ok(DnsimpleCredentials {
            api_token,
            account_id: self.dnsimple_account.clone(),
            sandbox: self.dnsimple_sandbox,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.dns_timeout)
    }

    pub async fn connect(&self, contact: &str) -> anyhow::Result<Arc<dyn DnsProvider>> {
        let provider: Arc<dyn DnsProvider> = match self.dns_provider {
            DnsProviderType::Dnsimple => Arc::new(
                DnsimpleProvider::login(self.credentials()?, contact)
                    .await
                    .context("Failed to log in to DNSimple")?,
            ),
            DnsProviderType::Manual => {
                warn!("Manual DNS provider selected, challenge records cannot be managed");
                Arc::new(ManualDnsProvider::new())
            }
        };

        if !provider.test_connection().await? {
            anyhow::bail!("{} DNS provider rejected the connection test", self.dns_provider);
        }

        Ok(provider)
    }
}

/// Certificate subject fields
#[derive(Args, Debug, Clone, Default)]
pub struct SubjectArgs {
    /// Subject country (C)
    #[arg(long, env = "CERTDNS_SUBJECT_COUNTRY")]
    pub country: Option<String>,

    /// Subject state or province (ST)
    #[arg(long, env = "CERTDNS_SUBJECT_STATE")]
    pub state: Option<String>,

    /// Subject locality (L)
    #[arg(long, env = "CERTDNS_SUBJECT_LOCALITY")]
    pub locality: Option<String>,

    /// Subject organization (O)
    #[arg(long, env = "CERTDNS_SUBJECT_ORGANIZATION")]
    pub organization: Option<String>,

    /// Subject organizational unit (OU)
    #[arg(long, env = "CERTDNS_SUBJECT_ORGANIZATIONAL_UNIT")]
    pub organizational_unit: Option<String>,
}

impl From<SubjectArgs> for SubjectProfile {
    fn from(args: SubjectArgs) -> Self {
        SubjectProfile {
            country: args.country,
            state: args.state,
            locality: args.locality,
            organization: args.organization,
            organizational_unit: args.organizational_unit,
        }
    }
}

/// File name of the exported bundle for a domain set
pub fn bundle_file_name(domains: &[String], wildcard: bool) -> String {
    let joined = domains
        .iter()
        .map(|d| d.trim().trim_end_matches('.').to_lowercase())
        .collect::<Vec<_>>()
        .join("+");

    if wildcard {
        format!("{}_wildcard.pfx", joined)
    } else {
        format!("{}.pfx", joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(staging: bool) -> AccountArgs {
        AccountArgs {
            email: " admin@example.com ".to_string(),
            staging,
            acme_directory: None,
            data_dir: Some(PathBuf::from("/srv/certdns")),
        }
    }

    #[test]
    fn test_bundle_file_name() {
        let domains = vec!["a.example.com".to_string(), "B.example.com.".to_string()];
        assert_eq!(
            bundle_file_name(&domains, false),
            "a.example.com+b.example.com.pfx"
        );
        assert_eq!(
            bundle_file_name(&domains[..1], true),
            "a.example.com_wildcard.pfx"
        );
    }

    #[test]
    fn test_account_identity_and_paths() {
        let args = account(true);
        let identity = args.identity();
        assert_eq!(identity.environment, Environment::Staging);
        assert_eq!(identity.contact, "admin@example.com");
        assert_eq!(args.data_dir().unwrap(), PathBuf::from("/srv/certdns"));
        assert_eq!(
            args.store().unwrap().key_path(&identity),
            PathBuf::from("/srv/certdns/account/staging/admin@example.com.pem")
        );
    }

    #[test]
    fn test_directory_selection() {
        assert_eq!(
            account(false).directory().directory_url(),
            Environment::Production.directory_url()
        );

        let mut custom = account(true);
        custom.acme_directory = Some("https://localhost:14000/dir".to_string());
        assert_eq!(
            custom.directory().directory_url(),
            "https://localhost:14000/dir"
        );
    }

    #[test]
    fn test_subject_conversion() {
        let profile: SubjectProfile = SubjectArgs {
            country: Some("NL".to_string()),
            organization: Some("Example BV".to_string()),
            ..Default::default()
        }
        .into();
        assert_eq!(profile.country.as_deref(), Some("NL"));
        assert_eq!(profile.organization.as_deref(), Some("Example BV"));
        assert!(profile.locality.is_none());
    }

    fn dns(provider: DnsProviderType, token: Option<&str>) -> DnsArgs {
        DnsArgs {
            dns_provider: provider,
            dnsimple_token: token.map(str::to_string),
            dnsimple_account: Some("1385".to_string()),
            dnsimple_sandbox: true,
            dns_timeout: 10,
        }
    }

    #[test]
    fn test_dns_credentials() {
        let dns = dns(DnsProviderType::Dnsimple, Some("token"));
        let creds = dns.credentials().unwrap();
        assert_eq!(creds.api_token, "token");
        assert_eq!(creds.account_id.as_deref(), Some("1385"));
        assert!(creds.sandbox);
        assert_eq!(dns.timeout(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_dnsimple_requires_token() {
        let err = dns(DnsProviderType::Dnsimple, None)
            .connect("admin@example.com")
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("--dnsimple-token"));
    }

    #[tokio::test]
    async fn test_manual_provider_needs_no_token() {
        let provider = dns(DnsProviderType::Manual, None)
            .connect("admin@example.com")
            .await
            .unwrap();
        assert_eq!(provider.provider_type(), DnsProviderType::Manual);
        assert!(provider.get_zone("example.com").await.unwrap().is_none());
    }

    #[test]
    fn test_dns_provider_flag() {
        use clap::Parser;

        #[derive(Parser)]
        struct Harness {
            #[command(flatten)]
            dns: DnsArgs,
        }

        let parsed = Harness::try_parse_from(["certdns"]).unwrap().dns;
        assert_eq!(parsed.dns_provider, DnsProviderType::Dnsimple);

        let parsed = Harness::try_parse_from(["certdns", "--dns-provider", "Manual"])
            .unwrap()
            .dns;
        assert_eq!(parsed.dns_provider, DnsProviderType::Manual);

        assert!(Harness::try_parse_from(["certdns", "--dns-provider", "route53"]).is_err());
    }
}
