use anyhow::Context;
use certdns_acme::{
    CertificateRequest, IssuanceError, IssuanceOptions, PropagationCheck, Session,
};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::args::{bundle_file_name, AccountArgs, DnsArgs, SubjectArgs};

#[derive(Args)]
pub struct IssueCommand {
    /// Domains to certify; the first one becomes the common name
    #[arg(required = true, value_delimiter = ',', env = "CERTDNS_DOMAINS")]
    pub domains: Vec<String>,

    /// Also certify `*.<domain>` for every domain
    #[arg(long, env = "CERTDNS_WILDCARD")]
    pub wildcard: bool,

    /// Password protecting the exported PKCS#12 bundle
    #[arg(long, env = "CERTDNS_PFX_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Directory the bundle is written to
    #[arg(long, default_value = ".", env = "CERTDNS_OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Replace an existing bundle file
    #[arg(long)]
    pub force: bool,

    /// Seconds to wait after publishing challenge records
    #[arg(long, default_value_t = 5, env = "CERTDNS_PROPAGATION_DELAY")]
    pub propagation_delay: u64,

    /// After the delay, poll public DNS until the records are visible
    #[arg(long, env = "CERTDNS_CHECK_PROPAGATION")]
    pub check_propagation: bool,

    /// Upper bound in seconds for the public DNS poll
    #[arg(long, default_value_t = 120, env = "CERTDNS_PROPAGATION_TIMEOUT")]
    pub propagation_timeout: u64,

    /// Seconds to wait for the CA to validate each challenge
    #[arg(long, default_value_t = 120, env = "CERTDNS_VALIDATION_TIMEOUT")]
    pub validation_timeout: u64,

    /// TTL of the challenge TXT records
    #[arg(long, default_value_t = 60, env = "CERTDNS_RECORD_TTL")]
    pub record_ttl: u32,

    #[command(flatten)]
    pub account: AccountArgs,

    #[command(flatten)]
    pub dns: DnsArgs,

    #[command(flatten)]
    pub subject: SubjectArgs,
}

impl IssueCommand {
    pub fn options(&self) -> IssuanceOptions {
        let delay = Duration::from_secs(self.propagation_delay);
        let propagation = if self.check_propagation {
            PropagationCheck::Resolve {
                delay,
                poll_interval: Duration::from_secs(5),
                timeout: Duration::from_secs(self.propagation_timeout),
            }
        } else {
            PropagationCheck::FixedDelay(delay)
        };

        IssuanceOptions {
            propagation,
            validation_timeout: Duration::from_secs(self.validation_timeout),
            dns_timeout: self.dns.timeout(),
            record_ttl: self.record_ttl,
        }
    }

    pub fn request(&self) -> CertificateRequest {
        CertificateRequest::new(self.domains.clone(), self.password.clone())
            .with_subject(self.subject.clone().into())
            .with_wildcard(self.wildcard)
    }

    pub fn bundle_path(&self) -> PathBuf {
        self.output_dir
            .join(bundle_file_name(&self.domains, self.wildcard))
    }

    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.run())
    }

    async fn run(self) -> anyhow::Result<()> {
        let request = self.request();
        let path = self.bundle_path();

        if path.exists() && !self.force {
            anyhow::bail!(
                "{} already exists, pass --force to replace it",
                path.display()
            );
        }

        info!(
            "Issuing certificate for {} ({})",
            request.order_identifiers().join(", "),
            self.account.environment()
        );

        let dns = self.dns.connect(&self.account.email).await?;
        let store = self.account.store()?;
        let directory = self.account.directory();
        debug!("Using ACME directory {}", directory.directory_url());

        let session = Session::login(&directory, &store, self.account.identity(), dns)
            .await
            .context("ACME login failed")?;

        let issued = match session.issue(&request, &self.options()).await {
            Ok(issued) => issued,
            Err(err) => {
                print_failure(&err);
                let stage = err.stage();
                return Err(anyhow::Error::new(err)
                    .context(format!("Issuance failed at the {} stage", stage)));
            }
        };

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;
        let mut file = tokio::fs::File::create(&path)
            .await
            .with_context(|| format!("Failed to create {}", path.display()))?;
        file.write_all(&issued.bundle.pkcs12_der).await?;
        file.sync_all().await?;

        println!();
        println!("{}", "Certificate issued".bright_green().bold());
        println!(
            "{} {}",
            "Names:".bright_white().bold(),
            issued.bundle.domains.join(", ").bright_cyan()
        );
        println!(
            "{} {}",
            "Valid until:".bright_white().bold(),
            issued.bundle.not_after
        );
        println!(
            "{} {}",
            "Bundle:".bright_white().bold(),
            path.display().to_string().bright_cyan()
        );
        if !issued.cleanup.is_clean() {
            println!(
                "{}",
                format!(
                    "{} challenge record(s) could not be removed, run `certdns cleanup`",
                    issued.cleanup.errors.len()
                )
                .bright_yellow()
            );
        }
        println!();

        Ok(())
    }
}

fn print_failure(err: &IssuanceError) {
    eprintln!();
    eprintln!(
        "{} {}",
        "Issuance failed at stage:".bright_red().bold(),
        err.stage()
    );
    if let Some(outcomes) = err.outcomes() {
        for outcome in outcomes {
            let status = outcome.status.to_string();
            let status = if outcome.status.is_valid() {
                status.bright_green()
            } else {
                status.bright_red()
            };
            match &outcome.detail {
                Some(detail) => eprintln!("  {} {} ({})", outcome.domain, status, detail),
                None => eprintln!("  {} {}", outcome.domain, status),
            }
        }
    }
    for e in err.cleanup_errors() {
        eprintln!("  {} {}", "cleanup:".bright_yellow(), e);
    }
    eprintln!();
}
