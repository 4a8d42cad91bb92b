use async_trait::async_trait;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus as AcmeAuthorizationStatus,
    ChallengeType as AcmeChallengeType, Identifier, NewAccount, NewOrder, Order, OrderStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info};

use super::{
    AcmeDirectory, AcmeOrder, AcmeSession, Authorization, AuthorizationStatus, Challenge,
    ChallengeKind,
};
use crate::account::AccountKey;
use crate::errors::AcmeError;
use crate::models::{ChallengeStatus, Environment};

/// PEM tag wrapping serialized `instant-acme` account credentials
pub const CREDENTIALS_PEM_TAG: &str = "ACME ACCOUNT CREDENTIALS";

const POLL_BASE_DELAY_SECS: u64 = 1;
const POLL_MAX_DELAY_SECS: u64 = 10;
const ORDER_READY_MAX_ATTEMPTS: u32 = 6;
const CERTIFICATE_MAX_ATTEMPTS: u32 = 60;
/// Concurrent validations reuse an authorization listing this recent
const SNAPSHOT_MAX_AGE: Duration = Duration::from_secs(1);

fn backoff(attempt: u32) -> Duration {
    // 1s, 2s, 4s, 8s, then capped
    let secs = POLL_BASE_DELAY_SECS.saturating_mul(2u64.saturating_pow(attempt.min(16)));
    Duration::from_secs(secs.min(POLL_MAX_DELAY_SECS))
}

/// Let's Encrypt (or any RFC 8555 CA) reached through `instant-acme`
pub struct LetsEncryptDirectory {
    directory_url: String,
}

impl LetsEncryptDirectory {
    pub fn new(environment: Environment) -> Self {
        Self {
            directory_url: environment.directory_url().to_string(),
        }
    }

    /// Use a custom ACME directory, e.g. a local Pebble instance
    pub fn with_directory_url(directory_url: impl Into<String>) -> Self {
        Self {
            directory_url: directory_url.into(),
        }
    }

    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }
}

#[async_trait]
impl AcmeDirectory for LetsEncryptDirectory {
    async fn new_account(
        &self,
        contact: &str,
    ) -> Result<(Arc<dyn AcmeSession>, AccountKey), AcmeError> {
        info!(
            "Creating ACME account for {} at {}",
            contact, self.directory_url
        );

        let mailto = format!("mailto:{}", contact);
        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &[mailto.as_str()],
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            &self.directory_url,
            None,
        )
        .await?;

        let serialized = serde_json::to_vec(&credentials)
            .map_err(|e| AcmeError::Credentials(format!("Failed to serialize account: {}", e)))?;

        let session: Arc<dyn AcmeSession> = Arc::new(LetsEncryptSession { account });
        Ok((session, AccountKey::encode(CREDENTIALS_PEM_TAG, serialized)))
    }

    async fn resume_account(&self, key: &AccountKey) -> Result<Arc<dyn AcmeSession>, AcmeError> {
        let serialized = key
            .decode(CREDENTIALS_PEM_TAG)
            .map_err(|e| AcmeError::Credentials(e.to_string()))?;

        let credentials: AccountCredentials = serde_json::from_slice(&serialized).map_err(|e| {
            AcmeError::Credentials(format!("Failed to deserialize account: {}", e))
        })?;

        let account = Account::from_credentials(credentials)
            .await
            .map_err(|e| AcmeError::Credentials(format!("Failed to load account: {}", e)))?;

        debug!("Resumed ACME account from stored credentials");

        Ok(Arc::new(LetsEncryptSession { account }))
    }
}

pub struct LetsEncryptSession {
    account: Account,
}

#[async_trait]
impl AcmeSession for LetsEncryptSession {
    async fn new_order(&self, identifiers: &[String]) -> Result<Box<dyn AcmeOrder>, AcmeError> {
        let identifiers: Vec<Identifier> = identifiers
            .iter()
            .map(|name| Identifier::Dns(name.clone()))
            .collect();

        let order = self
            .account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await?;

        info!("Opened ACME order {}", order.url());

        Ok(Box::new(LetsEncryptOrder {
            inner: Mutex::new(OrderInner {
                order,
                snapshot: None,
            }),
        }))
    }
}

struct OrderInner {
    order: Order,
    snapshot: Option<AuthorizationSnapshot>,
}

/// The order's authorizations as last fetched
struct AuthorizationSnapshot {
    fetched_at: Instant,
    authorizations: Vec<Authorization>,
}

impl AuthorizationSnapshot {
    fn new(authorizations: Vec<Authorization>) -> Self {
        Self {
            fetched_at: Instant::now(),
            authorizations,
        }
    }

    fn fresh(&self, max_age: Duration) -> Option<&[Authorization]> {
        (self.fetched_at.elapsed() < max_age).then_some(self.authorizations.as_slice())
    }
}

/// `instant-acme` orders need exclusive access; concurrent callers take turns
/// per request, never across a whole poll loop.
pub struct LetsEncryptOrder {
    inner: Mutex<OrderInner>,
}

impl LetsEncryptOrder {
    /// List the order's authorizations, reusing one fetched within `max_age`.
    ///
    /// The CA only lists authorizations as a whole, so validations running
    /// side by side share a single listing per poll interval.
    async fn fetch_authorizations(
        &self,
        max_age: Duration,
    ) -> Result<Vec<Authorization>, AcmeError> {
        let mut inner = self.inner.lock().await;
        if let Some(authorizations) = inner.snapshot.as_ref().and_then(|s| s.fresh(max_age)) {
            return Ok(authorizations.to_vec());
        }

        let fetched = inner.order.authorizations().await?;
        let authorizations: Vec<Authorization> = fetched
            .iter()
            .map(|authz| {
                let status = convert_authorization_status(&authz.status);
                Authorization {
                    identifier: identifier_name(&authz.identifier),
                    status,
                    challenges: authz
                        .challenges
                        .iter()
                        .map(|c| Challenge {
                            kind: convert_challenge_kind(&c.r#type),
                            url: c.url.clone(),
                            token: c.token.clone(),
                            key_authorization: inner
                                .order
                                .key_authorization(c)
                                .as_str()
                                .to_string(),
                            status: challenge_status(status),
                            error: c.error.as_ref().and_then(|p| p.detail.clone()),
                        })
                        .collect(),
                }
            })
            .collect();

        debug!("Fetched {} authorization(s)", authorizations.len());
        inner.snapshot = Some(AuthorizationSnapshot::new(authorizations.clone()));
        Ok(authorizations)
    }

    async fn wait_for_order_ready(&self) -> Result<OrderStatus, AcmeError> {
        for attempt in 0..ORDER_READY_MAX_ATTEMPTS {
            let status = {
                let mut inner = self.inner.lock().await;
                inner.order.refresh().await?.status
            };

            match status {
                OrderStatus::Ready | OrderStatus::Valid => return Ok(status),
                OrderStatus::Invalid => {
                    error!("Order became invalid before finalization");
                    return Err(AcmeError::InvalidResponse(
                        "Order is invalid".to_string(),
                    ));
                }
                OrderStatus::Pending | OrderStatus::Processing => {
                    debug!(
                        "Order not ready yet (attempt {}/{})",
                        attempt + 1,
                        ORDER_READY_MAX_ATTEMPTS
                    );
                    tokio::time::sleep(backoff(attempt)).await;
                }
            }
        }

        Err(AcmeError::Timeout(format!(
            "Order not ready after {} attempts",
            ORDER_READY_MAX_ATTEMPTS
        )))
    }
}

#[async_trait]
impl AcmeOrder for LetsEncryptOrder {
    async fn authorizations(&self) -> Result<Vec<Authorization>, AcmeError> {
        self.fetch_authorizations(Duration::ZERO).await
    }

    async fn validate(
        &self,
        challenge: &Challenge,
    ) -> Result<(ChallengeStatus, Option<String>), AcmeError> {
        {
            let mut inner = self.inner.lock().await;
            inner.order.set_challenge_ready(&challenge.url).await?;
        }
        debug!("Challenge {} marked ready", challenge.url);

        let mut attempt = 0;
        loop {
            tokio::time::sleep(backoff(attempt)).await;
            attempt += 1;

            let authorizations = self.fetch_authorizations(SNAPSHOT_MAX_AGE).await?;
            let current = authorizations
                .iter()
                .flat_map(|a| a.challenges.iter().map(move |c| (a, c)))
                .find(|(_, c)| c.url == challenge.url);

            let Some((authz, current)) = current else {
                return Err(AcmeError::InvalidResponse(format!(
                    "Challenge {} vanished from the order",
                    challenge.url
                )));
            };

            match authz.status {
                AuthorizationStatus::Valid => return Ok((ChallengeStatus::Valid, None)),
                AuthorizationStatus::Invalid => {
                    let detail = current
                        .error
                        .clone()
                        .unwrap_or_else(|| "Authorization is invalid".to_string());
                    return Ok((ChallengeStatus::Invalid, Some(detail)));
                }
                AuthorizationStatus::Pending => debug!(
                    "Challenge for {} still pending (poll {})",
                    authz.identifier, attempt
                ),
            }
        }
    }

    async fn finalize(&self, csr_der: &[u8]) -> Result<String, AcmeError> {
        let status = self.wait_for_order_ready().await?;

        if status == OrderStatus::Ready {
            let mut inner = self.inner.lock().await;
            inner.order.finalize(csr_der).await?;
            info!("Order finalized, waiting for certificate");
        }

        for _ in 0..CERTIFICATE_MAX_ATTEMPTS {
            {
                let mut inner = self.inner.lock().await;
                if let Some(chain) = inner.order.certificate().await? {
                    return Ok(chain);
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        Err(AcmeError::Timeout(
            "Certificate was not issued in time".to_string(),
        ))
    }
}

fn identifier_name(identifier: &Identifier) -> String {
    #[allow(unreachable_patterns)]
    match identifier {
        Identifier::Dns(name) => name.clone(),
        other => format!("{:?}", other),
    }
}

fn convert_challenge_kind(kind: &AcmeChallengeType) -> ChallengeKind {
    #[allow(unreachable_patterns)]
    match kind {
        AcmeChallengeType::Http01 => ChallengeKind::Http01,
        AcmeChallengeType::Dns01 => ChallengeKind::Dns01,
        AcmeChallengeType::TlsAlpn01 => ChallengeKind::TlsAlpn01,
        _ => ChallengeKind::Other,
    }
}

fn convert_authorization_status(status: &AcmeAuthorizationStatus) -> AuthorizationStatus {
    match status {
        AcmeAuthorizationStatus::Pending => AuthorizationStatus::Pending,
        AcmeAuthorizationStatus::Valid => AuthorizationStatus::Valid,
        AcmeAuthorizationStatus::Invalid
        | AcmeAuthorizationStatus::Revoked
        | AcmeAuthorizationStatus::Expired => AuthorizationStatus::Invalid,
    }
}

/// The CA's verdict on an authorization settles its challenges too
fn challenge_status(status: AuthorizationStatus) -> ChallengeStatus {
    match status {
        AuthorizationStatus::Pending => ChallengeStatus::Pending,
        AuthorizationStatus::Valid => ChallengeStatus::Valid,
        AuthorizationStatus::Invalid => ChallengeStatus::Invalid,
    }
}
