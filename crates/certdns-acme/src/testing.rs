//! In-memory doubles for the DNS, ACME and account-store seams

use async_trait::async_trait;
use certdns_dns::{
    DnsError, DnsProvider, DnsProviderType, DnsRecord, DnsRecordContent, DnsRecordRequest,
    DnsZone,
};
use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, DnType, IsCa, KeyPair,
};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

use crate::account::{AccountIdentity, AccountKey, AccountStore};
use crate::acme::letsencrypt::CREDENTIALS_PEM_TAG;
use crate::acme::{
    AcmeDirectory, AcmeOrder, AcmeSession, Authorization, AuthorizationStatus, Challenge,
    ChallengeKind,
};
use crate::challenge::{key_authorization_digest, resolve_challenge_host};
use crate::errors::{AcmeError, StoreError};
use crate::models::ChallengeStatus;

/// A DNS provider holding its zones in memory
pub struct InMemoryDnsProvider {
    zones: Vec<String>,
    records: Mutex<Vec<DnsRecord>>,
    created: Mutex<Vec<DnsRecord>>,
    next_id: AtomicUsize,
    creates: AtomicUsize,
    fail_create_on: AtomicUsize,
    fail_deletes: AtomicBool,
}

impl InMemoryDnsProvider {
    pub fn new(zones: &[&str]) -> Self {
        Self {
            zones: zones.iter().map(|z| z.to_string()).collect(),
            records: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            creates: AtomicUsize::new(0),
            fail_create_on: AtomicUsize::new(usize::MAX),
            fail_deletes: AtomicBool::new(false),
        }
    }

    /// Fail the n-th (zero based) call to `create_record`
    pub fn fail_create_on(&self, n: usize) {
        self.fail_create_on.store(n, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self) {
        self.fail_deletes.store(true, Ordering::SeqCst);
    }

    pub async fn seed_txt(&self, zone: &str, name: &str, value: &str) {
        let record = self.build(zone, DnsRecordRequest::txt(name, value, 3600));
        self.records.lock().await.push(record);
    }

    pub async fn txt_values(&self, zone: &str, name: &str) -> Vec<String> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|r| r.zone == zone && r.name == name)
            .filter_map(|r| match &r.content {
                DnsRecordContent::TXT { content } => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every record ever created through `create_record`, deleted or not
    pub async fn created_records(&self) -> Vec<DnsRecord> {
        self.created.lock().await.clone()
    }

    pub async fn record_count(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn ttls(&self) -> Vec<u32> {
        self.records.lock().await.iter().map(|r| r.ttl).collect()
    }

    fn build(&self, zone: &str, request: DnsRecordRequest) -> DnsRecord {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        DnsRecord {
            id: id.to_string(),
            zone: zone.to_string(),
            fqdn: certdns_dns::providers::traits::fqdn(zone, &request.name),
            name: request.name,
            content: request.content,
            ttl: request.ttl.unwrap_or(3600),
        }
    }

    fn check_zone(&self, zone: &str) -> Result<(), DnsError> {
        if self.zones.iter().any(|z| z == zone) {
            Ok(())
        } else {
            Err(DnsError::ZoneNotFound(zone.to_string()))
        }
    }
}

#[async_trait]
impl DnsProvider for InMemoryDnsProvider {
    fn provider_type(&self) -> DnsProviderType {
        DnsProviderType::Manual
    }

    async fn test_connection(&self) -> Result<bool, DnsError> {
        Ok(true)
    }

    async fn get_zone(&self, zone: &str) -> Result<Option<DnsZone>, DnsError> {
        Ok(self.zones.iter().find(|z| *z == zone).map(|z| DnsZone {
            id: z.clone(),
            name: z.clone(),
            account_id: None,
        }))
    }

    async fn list_records(&self, zone: &str) -> Result<Vec<DnsRecord>, DnsError> {
        self.check_zone(zone)?;
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .filter(|r| r.zone == zone)
            .cloned()
            .collect())
    }

    async fn create_record(
        &self,
        zone: &str,
        request: DnsRecordRequest,
    ) -> Result<DnsRecord, DnsError> {
        self.check_zone(zone)?;
        let call = self.creates.fetch_add(1, Ordering::SeqCst);
        if call == self.fail_create_on.load(Ordering::SeqCst) {
            return Err(DnsError::ApiError("record quota exceeded".to_string()));
        }

        let record = self.build(zone, request);
        self.records.lock().await.push(record.clone());
        self.created.lock().await.push(record.clone());
        Ok(record)
    }

    async fn update_record(
        &self,
        zone: &str,
        record_id: &str,
        request: DnsRecordRequest,
    ) -> Result<DnsRecord, DnsError> {
        self.check_zone(zone)?;
        let mut records = self.records.lock().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == record_id)
            .ok_or_else(|| DnsError::RecordNotFound(record_id.to_string()))?;
        record.content = request.content;
        if let Some(ttl) = request.ttl {
            record.ttl = ttl;
        }
        Ok(record.clone())
    }

    async fn delete_record(&self, zone: &str, record_id: &str) -> Result<(), DnsError> {
        self.check_zone(zone)?;
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(DnsError::ApiError("delete rejected".to_string()));
        }
        self.records.lock().await.retain(|r| r.id != record_id);
        Ok(())
    }
}

/// Account store backed by a map, with switchable IO failure
#[derive(Default)]
pub struct MemoryAccountStore {
    keys: Mutex<HashMap<AccountIdentity, AccountKey>>,
    broken: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn break_io(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub async fn get(&self, identity: &AccountIdentity) -> Option<AccountKey> {
        self.keys.lock().await.get(identity).cloned()
    }

    fn io_check(&self) -> Result<(), StoreError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "account directory not readable",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn load(&self, identity: &AccountIdentity) -> Result<Option<AccountKey>, StoreError> {
        self.io_check()?;
        Ok(self.keys.lock().await.get(identity).cloned())
    }

    async fn save(&self, identity: &AccountIdentity, key: &AccountKey) -> Result<(), StoreError> {
        self.io_check()?;
        let mut keys = self.keys.lock().await;
        if keys.contains_key(identity) {
            return Err(StoreError::AlreadyExists(PathBuf::from(&identity.contact)));
        }
        keys.insert(identity.clone(), key.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A self-signed CA that signs CSRs into PEM chains (leaf, then CA)
pub struct TestCa {
    cert: rcgen::Certificate,
    key: KeyPair,
}

impl TestCa {
    pub fn new() -> Self {
        let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params
            .distinguished_name
            .push(DnType::CommonName, "certdns test CA");
        let cert = params.self_signed(&key).unwrap();
        Self { cert, key }
    }

    pub fn sign(&self, csr_der: &[u8]) -> Result<String, rcgen::Error> {
        let csr = CertificateSigningRequestParams::from_der(&csr_der.to_vec().into())?;
        let leaf = csr.signed_by(&self.cert, &self.key)?;
        Ok(format!("{}{}", leaf.pem(), self.cert.pem()))
    }
}

/// What the CA saw across every order of a scripted account
#[derive(Default)]
pub struct OrderLog {
    pub validated: StdMutex<Vec<String>>,
    pub finalized: AtomicUsize,
}

/// An order whose authorizations and validation verdicts are fixed up front
pub struct ScriptedOrder {
    authorizations: Vec<Authorization>,
    /// Challenge URL to the identifier it was ordered as
    ordered_as: HashMap<String, String>,
    verdicts: HashMap<String, (ChallengeStatus, Option<String>)>,
    hanging: HashSet<String>,
    ca: Option<Arc<TestCa>>,
    dns: Option<Arc<InMemoryDnsProvider>>,
    log: Arc<OrderLog>,
}

impl ScriptedOrder {
    pub fn new(authorizations: Vec<Authorization>) -> Self {
        Self {
            authorizations,
            ordered_as: HashMap::new(),
            verdicts: HashMap::new(),
            hanging: HashSet::new(),
            ca: None,
            dns: None,
            log: Arc::new(OrderLog::default()),
        }
    }

    pub fn with_ca(mut self, ca: TestCa) -> Self {
        self.ca = Some(Arc::new(ca));
        self
    }

    fn identifier_for(&self, challenge: &Challenge) -> Option<&str> {
        if let Some(name) = self.ordered_as.get(&challenge.url) {
            return Some(name);
        }
        self.authorizations
            .iter()
            .find(|a| a.challenges.iter().any(|c| c.url == challenge.url))
            .map(|a| a.identifier.as_str())
    }
}

#[async_trait]
impl AcmeOrder for ScriptedOrder {
    async fn authorizations(&self) -> Result<Vec<Authorization>, AcmeError> {
        Ok(self.authorizations.clone())
    }

    async fn validate(
        &self,
        challenge: &Challenge,
    ) -> Result<(ChallengeStatus, Option<String>), AcmeError> {
        let identifier = self
            .identifier_for(challenge)
            .ok_or_else(|| AcmeError::InvalidResponse("unknown challenge".to_string()))?
            .to_string();

        self.log
            .validated
            .lock()
            .unwrap()
            .push(identifier.clone());

        if self.hanging.contains(&identifier) {
            futures::future::pending::<()>().await;
        }

        if let Some(dns) = &self.dns {
            let target = resolve_challenge_host(&identifier);
            let expected = key_authorization_digest(&challenge.key_authorization);
            if !dns
                .txt_values(&target.zone, &target.host)
                .await
                .contains(&expected)
            {
                return Ok((
                    ChallengeStatus::Invalid,
                    Some(format!("No TXT record found at {}", target.fqdn())),
                ));
            }
        }

        Ok(self
            .verdicts
            .get(&identifier)
            .cloned()
            .unwrap_or((ChallengeStatus::Valid, None)))
    }

    async fn finalize(&self, csr_der: &[u8]) -> Result<String, AcmeError> {
        let ca = self
            .ca
            .as_ref()
            .ok_or_else(|| AcmeError::Protocol("Order is not ready".to_string()))?;
        self.log.finalized.fetch_add(1, Ordering::SeqCst);
        ca.sign(csr_der)
            .map_err(|e| AcmeError::InvalidResponse(e.to_string()))
    }
}

#[derive(Default)]
struct Script {
    new_account_calls: AtomicUsize,
    resume_calls: AtomicUsize,
    fail_new_account: AtomicBool,
    reject_orders: AtomicBool,
    order_requests: StdMutex<Vec<Vec<String>>>,
    verdicts: StdMutex<HashMap<String, (ChallengeStatus, Option<String>)>>,
    hanging: StdMutex<HashSet<String>>,
    already_valid: StdMutex<HashSet<String>>,
    without_dns01: StdMutex<HashSet<String>>,
    dns: StdMutex<Option<Arc<InMemoryDnsProvider>>>,
    ca: StdMutex<Option<Arc<TestCa>>>,
    log: Arc<OrderLog>,
}

/// A CA double acting as directory and account session at once.
///
/// Wildcard authorizations are reported under their bare base name and offer
/// DNS-01 only, as RFC 8555 CAs do. Scripted verdicts stay keyed by the
/// ordered name. Every identifier validates unless told otherwise. When a DNS provider is
/// observed, a challenge only validates if its TXT value is present at the
/// time the CA looks.
#[derive(Clone, Default)]
pub struct ScriptedAcme {
    script: Arc<Script>,
}

impl ScriptedAcme {
    pub fn new() -> Self {
        let acme = Self::default();
        *acme.script.ca.lock().unwrap() = Some(Arc::new(TestCa::new()));
        acme
    }

    pub fn observe_dns(&self, dns: Arc<InMemoryDnsProvider>) {
        *self.script.dns.lock().unwrap() = Some(dns);
    }

    pub fn verdict(&self, identifier: &str, status: ChallengeStatus, detail: Option<&str>) {
        self.script
            .verdicts
            .lock()
            .unwrap()
            .insert(identifier.to_string(), (status, detail.map(str::to_string)));
    }

    pub fn hang_validation(&self, identifier: &str) {
        self.script
            .hanging
            .lock()
            .unwrap()
            .insert(identifier.to_string());
    }

    pub fn already_valid(&self, identifier: &str) {
        self.script
            .already_valid
            .lock()
            .unwrap()
            .insert(identifier.to_string());
    }

    pub fn without_dns01(&self, identifier: &str) {
        self.script
            .without_dns01
            .lock()
            .unwrap()
            .insert(identifier.to_string());
    }

    pub fn reject_orders(&self) {
        self.script.reject_orders.store(true, Ordering::SeqCst);
    }

    pub fn fail_new_account(&self) {
        self.script.fail_new_account.store(true, Ordering::SeqCst);
    }

    pub fn new_account_calls(&self) -> usize {
        self.script.new_account_calls.load(Ordering::SeqCst)
    }

    pub fn resume_calls(&self) -> usize {
        self.script.resume_calls.load(Ordering::SeqCst)
    }

    pub fn order_requests(&self) -> Vec<Vec<String>> {
        self.script.order_requests.lock().unwrap().clone()
    }

    pub fn validated(&self) -> Vec<String> {
        self.script.log.validated.lock().unwrap().clone()
    }

    pub fn finalized(&self) -> usize {
        self.script.log.finalized.load(Ordering::SeqCst)
    }

    fn authorization(&self, identifier: &str) -> Authorization {
        let status = if self.script.already_valid.lock().unwrap().contains(identifier) {
            AuthorizationStatus::Valid
        } else {
            AuthorizationStatus::Pending
        };

        let token = format!("token-{}", identifier.replace('*', "star"));
        let base = identifier.strip_prefix("*.");
        let mut challenges = Vec::new();
        if base.is_none() {
            challenges.push(Challenge {
                kind: ChallengeKind::Http01,
                url: format!("https://ca.test/chall/http/{}", identifier),
                token: token.clone(),
                key_authorization: format!("{}.thumbprint", token),
                status: ChallengeStatus::Pending,
                error: None,
            });
        }
        if !self.script.without_dns01.lock().unwrap().contains(identifier) {
            challenges.push(Challenge {
                kind: ChallengeKind::Dns01,
                url: format!("https://ca.test/chall/dns/{}", identifier),
                token: token.clone(),
                key_authorization: format!("{}.thumbprint", token),
                status: ChallengeStatus::Pending,
                error: None,
            });
        }

        Authorization {
            identifier: base.unwrap_or(identifier).to_string(),
            status,
            challenges,
        }
    }
}

#[async_trait]
impl AcmeDirectory for ScriptedAcme {
    async fn new_account(
        &self,
        contact: &str,
    ) -> Result<(Arc<dyn AcmeSession>, AccountKey), AcmeError> {
        let n = self.script.new_account_calls.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_new_account.load(Ordering::SeqCst) {
            return Err(AcmeError::Protocol("account creation refused".to_string()));
        }
        let key = AccountKey::encode(
            CREDENTIALS_PEM_TAG,
            format!("{}#{}", contact, n).into_bytes(),
        );
        Ok((Arc::new(self.clone()), key))
    }

    async fn resume_account(&self, key: &AccountKey) -> Result<Arc<dyn AcmeSession>, AcmeError> {
        self.script.resume_calls.fetch_add(1, Ordering::SeqCst);
        key.decode(CREDENTIALS_PEM_TAG)
            .map_err(|e| AcmeError::Credentials(e.to_string()))?;
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl AcmeSession for ScriptedAcme {
    async fn new_order(&self, identifiers: &[String]) -> Result<Box<dyn AcmeOrder>, AcmeError> {
        self.script
            .order_requests
            .lock()
            .unwrap()
            .push(identifiers.to_vec());

        if self.script.reject_orders.load(Ordering::SeqCst) {
            return Err(AcmeError::Protocol(
                "urn:ietf:params:acme:error:rejectedIdentifier".to_string(),
            ));
        }

        let authorizations: Vec<Authorization> =
            identifiers.iter().map(|i| self.authorization(i)).collect();
        let ordered_as = identifiers
            .iter()
            .zip(&authorizations)
            .flat_map(|(name, authz)| {
                authz
                    .challenges
                    .iter()
                    .map(move |c| (c.url.clone(), name.clone()))
            })
            .collect();

        Ok(Box::new(ScriptedOrder {
            authorizations,
            ordered_as,
            verdicts: self.script.verdicts.lock().unwrap().clone(),
            hanging: self.script.hanging.lock().unwrap().clone(),
            ca: self.script.ca.lock().unwrap().clone(),
            dns: self.script.dns.lock().unwrap().clone(),
            log: self.script.log.clone(),
        }))
    }
}
