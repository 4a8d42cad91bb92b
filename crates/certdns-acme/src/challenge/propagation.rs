use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::publisher::DnsChallengeRecord;

pub const DEFAULT_PROPAGATION_DELAY: Duration = Duration::from_secs(5);

/// How long to wait between publishing TXT records and asking the CA to look
/// at them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropagationCheck {
    /// Sleep for a fixed time
    FixedDelay(Duration),
    /// Sleep for `delay`, then query public DNS every `poll_interval` until all
    /// values are visible or `timeout` runs out. Running out is logged and the
    /// attempt carries on; the CA has the final word.
    Resolve {
        delay: Duration,
        poll_interval: Duration,
        timeout: Duration,
    },
}

impl Default for PropagationCheck {
    fn default() -> Self {
        PropagationCheck::FixedDelay(DEFAULT_PROPAGATION_DELAY)
    }
}

impl PropagationCheck {
    pub async fn wait(&self, records: &[DnsChallengeRecord]) {
        match self {
            PropagationCheck::FixedDelay(delay) => {
                debug!("Waiting {:?} for DNS propagation", delay);
                tokio::time::sleep(*delay).await;
            }
            PropagationCheck::Resolve {
                delay,
                poll_interval,
                timeout,
            } => {
                tokio::time::sleep(*delay).await;
                poll_until_visible(records, *poll_interval, *timeout).await;
            }
        }
    }
}

/// Expected TXT values per absolute record name
fn expected_values(records: &[DnsChallengeRecord]) -> BTreeMap<String, Vec<String>> {
    let mut expected: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for record in records {
        let name = format!("{}.{}.", record.host, record.zone);
        let values = expected.entry(name).or_default();
        if !values.contains(&record.value) {
            values.push(record.value.clone());
        }
    }
    expected
}

async fn poll_until_visible(
    records: &[DnsChallengeRecord],
    poll_interval: Duration,
    timeout: Duration,
) {
    let mut options = ResolverOpts::default();
    options.cache_size = 0;
    options.use_hosts_file = false;
    options.try_tcp_on_error = true;

    let resolver = TokioAsyncResolver::tokio(ResolverConfig::cloudflare(), options);

    let mut pending = expected_values(records);
    let deadline = Instant::now() + timeout;

    loop {
        let mut still_pending = BTreeMap::new();
        for (name, values) in pending {
            let visible = visible_values(&resolver, &name).await;
            let missing: Vec<String> = values
                .into_iter()
                .filter(|v| !visible.contains(v))
                .collect();
            if missing.is_empty() {
                debug!("All TXT values visible at {}", name);
            } else {
                still_pending.insert(name, missing);
            }
        }
        pending = still_pending;

        if pending.is_empty() {
            info!("DNS challenge records are visible in public DNS");
            return;
        }

        if Instant::now() + poll_interval > deadline {
            warn!(
                "TXT records not yet visible after {:?}: {}",
                timeout,
                pending.keys().cloned().collect::<Vec<_>>().join(", ")
            );
            return;
        }

        tokio::time::sleep(poll_interval).await;
    }
}

async fn visible_values(resolver: &TokioAsyncResolver, name: &str) -> Vec<String> {
    match resolver.txt_lookup(name).await {
        Ok(lookup) => lookup
            .iter()
            .map(|record| {
                record
                    .txt_data()
                    .iter()
                    .map(|data| String::from_utf8_lossy(data).to_string())
                    .collect::<String>()
            })
            .collect(),
        Err(e) => {
            debug!("TXT lookup for {} failed: {}", name, e);
            Vec::new()
        }
    }
}
