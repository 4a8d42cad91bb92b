use anyhow::Context;
use certdns_acme::Session;
use clap::Args;
use colored::Colorize;
use tracing::info;

use super::args::{AccountArgs, DnsArgs};

/// Create the ACME account on first use, or check that the stored one still works
#[derive(Args)]
pub struct LoginCommand {
    #[command(flatten)]
    pub account: AccountArgs,

    #[command(flatten)]
    pub dns: DnsArgs,
}

impl LoginCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.run())
    }

    async fn run(self) -> anyhow::Result<()> {
        let dns = self.dns.connect(&self.account.email).await?;
        let store = self.account.store()?;
        let identity = self.account.identity();
        let key_path = store.key_path(&identity);

        let session = Session::login(&self.account.directory(), &store, identity, dns)
            .await
            .context("ACME login failed")?;

        info!(
            "Logged in as {} ({})",
            session.identity().contact,
            session.identity().environment
        );

        let verb = if session.created_account() {
            "Created".bright_green().bold()
        } else {
            "Resumed".bright_cyan().bold()
        };
        println!();
        println!(
            "{} {} account for {}",
            verb,
            session.identity().environment,
            session.identity().contact.bright_white()
        );
        println!(
            "{} {}",
            "Account key:".bright_white().bold(),
            key_path.display()
        );
        println!();

        Ok(())
    }
}
