//! certdns - ACME certificates through DNS-01 challenges on DNSimple

mod commands;

use clap::{Parser, Subcommand};
use commands::{CleanupCommand, IssueCommand, LoginCommand};
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "CERTDNS_LOG_LEVEL", global = true)]
    log_level: String,

    /// Log format: compact, full
    #[arg(
        long,
        default_value = "compact",
        env = "CERTDNS_LOG_FORMAT",
        global = true
    )]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue a certificate and write it as a PKCS#12 bundle
    Issue(IssueCommand),
    /// Create or resume the ACME account
    Login(LoginCommand),
    /// Remove leftover challenge records
    Cleanup(CleanupCommand),
}

fn log_filter(level: &str) -> anyhow::Result<tracing_subscriber::EnvFilter> {
    // RUST_LOG gives full control; otherwise our crates log at `level` and
    // noisy dependencies at warn
    if std::env::var("RUST_LOG").is_ok() {
        return Ok(tracing_subscriber::EnvFilter::try_from_default_env()?);
    }

    Ok(tracing_subscriber::EnvFilter::try_new(format!(
        "certdns={level},\
         certdns_acme={level},\
         certdns_dns={level},\
         instant_acme=warn,\
         hickory_resolver=warn,\
         hickory_proto=warn,\
         h2=warn,\
         hyper=warn,\
         reqwest=warn,\
         rustls=warn",
        level = level
    ))?)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let fmt_layer = match cli.log_format.as_str() {
        "full" => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry()
        .with(log_filter(&cli.log_level)?)
        .with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Issue(cmd) => cmd.execute(),
        Commands::Login(cmd) => cmd.execute(),
        Commands::Cleanup(cmd) => cmd.execute(),
    }
}
