use certdns_acme::{CertificateRequest, DnsChallengeCleaner};
use clap::Args;
use colored::Colorize;

use super::args::DnsArgs;

/// Remove leftover `_acme-challenge` TXT records, e.g. after an interrupted run
#[derive(Args)]
pub struct CleanupCommand {
    /// Domains whose challenge records should be removed
    #[arg(required = true, value_delimiter = ',', env = "CERTDNS_DOMAINS")]
    pub domains: Vec<String>,

    /// Include the `*.<domain>` variants
    #[arg(long, env = "CERTDNS_WILDCARD")]
    pub wildcard: bool,

    /// Contact e-mail used to pick the DNSimple account
    #[arg(long, env = "CERTDNS_EMAIL")]
    pub email: String,

    #[command(flatten)]
    pub dns: DnsArgs,
}

impl CleanupCommand {
    pub fn targets(&self) -> Vec<String> {
        CertificateRequest::new(self.domains.clone(), String::new())
            .with_wildcard(self.wildcard)
            .order_identifiers()
    }

    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.run())
    }

    async fn run(self) -> anyhow::Result<()> {
        let dns = self.dns.connect(&self.email).await?;
        let report = DnsChallengeCleaner::new(dns)
            .with_timeout(self.dns.timeout())
            .cleanup(&self.targets())
            .await;

        println!();
        println!(
            "{} {}",
            "Removed challenge records:".bright_white().bold(),
            report.removed
        );
        for e in &report.errors {
            eprintln!("  {} {}", "failed:".bright_red(), e);
        }
        println!();

        if !report.is_clean() {
            anyhow::bail!(
                "{} challenge record operation(s) failed",
                report.errors.len()
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        cleanup: CleanupCommand,
    }

    #[test]
    fn test_targets_expand_wildcards() {
        let cmd = Harness::try_parse_from([
            "certdns",
            "--email",
            "admin@example.com",
            "--dnsimple-token",
            "tok",
            "--wildcard",
            "example.com,www.example.org",
        ])
        .unwrap()
        .cleanup;

        assert_eq!(
            cmd.targets(),
            vec!["example.com", "*.example.com", "www.example.org", "*.www.example.org"]
        );
    }
}
